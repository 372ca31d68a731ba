//! Block discovery and graph construction.
//!
//! Construction of one method runs in two steps:
//!
//! 1. [`BlockListBuilder`] scans the bytecode once and produces a [`BlockMap`]: the
//!    block starting at each leader, syntactic successor and handler edges, loop
//!    headers and the locals that need phis.
//! 2. [`GraphBuilder`] abstractly interprets the bytecode block by block on a
//!    [`crate::ir::ValueStack`], appending typed nodes, merging states at block
//!    entries and joining every trapping node into the handlers that cover it.
//!
//! While appending, the builder consults the canonicalizer, a [`ValueMap`] for local
//! value numbering and a [`MemoryValueCache`] that forwards field loads and drops
//! redundant default stores. Calls to statically bound targets are inlined by running
//! both steps again on the callee inside the caller's graph.
//!
//! # Key Components
//!
//! - [`BlockListBuilder`] / [`BlockMap`] - Block skeleton and loop marking
//! - [`GraphBuilder`] / [`BuildOutput`] - The construction driver
//! - [`MemoryValueCache`] - Field load forwarding and store elimination
//! - [`ValueMap`] - Per-block hash-consing of pure nodes
//! - [`InlineDecision`] / [`RecompileHint`] - What the builder reports besides the graph

mod block_list;
mod bytecodes;
mod driver;
mod inline;
mod memory;
mod merge;
mod scope;
mod value_map;

pub use block_list::{BlockListBuilder, BlockMap};
pub use driver::{BuildOutput, GraphBuilder};
pub use inline::{
    InlineDecision, InlineOutcome, InlineRejection, RecompileHint, UnresolvedKind,
};
pub use memory::{MemoryValueCache, StoreOutcome};
pub use value_map::ValueMap;
