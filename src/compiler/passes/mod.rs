//! Graph rewriting passes.
//!
//! - [`Canonicalizer`] - Per-node folding, run by the graph builder before every append
//! - [`PhiSimplifier`] - Whole-graph removal of phis merging a single value

mod canonicalizer;
mod phis;

pub use canonicalizer::{fold_arithmetic, fold_convert, Canonical, Canonicalizer};
pub use phis::PhiSimplifier;
