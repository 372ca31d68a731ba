//! High-level intermediate representation.
//!
//! The graph builder produces a block-structured value graph: basic blocks hold
//! phis at their entry, straight-line value nodes and one terminating control node.
//! Nodes refer to their operands by [`ValueId`]; blocks, state snapshots and scopes
//! are likewise addressed by id inside one [`Graph`] arena.
//!
//! # Key Components
//!
//! - [`Graph`] - The arena owning nodes, blocks, snapshots and scopes
//! - [`Instruction`] / [`Node`] - Operations and their per-node data
//! - [`Block`] - Basic blocks with entry state and instruction order
//! - [`ValueStack`] - Symbolic operand stack, locals and held locks
//! - [`XHandler`] - Exception handler edges
//! - [`ValueType`], [`BasicType`], [`ConstValue`] - Type tags and constants

mod block;
mod graph;
mod ids;
mod instruction;
mod types;
mod value_stack;
mod xhandler;

pub use block::{Block, BlockFlags};
pub use graph::{Graph, IrScope};
pub use ids::{BlockId, ScopeId, StateId, ValueId};
pub use instruction::{
    ArithOp, CompareOp, Condition, ConvertOp, Instruction, InvokeKind, LogicOp, Node, NodeFlags,
    PhiSlot, ShiftOp,
};
pub use types::{BasicType, ConstValue, ValueType};
pub use value_stack::{StateKind, ValueStack};
pub use xhandler::XHandler;
