//! Exception handler edges.

use crate::{database::ExceptionHandler, ir::BlockId};

/// One exception handler as seen by the graph.
///
/// Declared handlers are copied into an `XHandler` per parsing scope (the root
/// method, each inlined callee, each subroutine copy) since the entry block differs
/// per copy. Once a trapping node has been joined into the handler's entry state,
/// `phi_operand` records which predecessor index that edge occupies in the entry
/// block's phis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XHandler {
    /// First covered bci.
    pub start: i32,
    /// First bci past the covered range.
    pub end: i32,
    /// Handler entry bci.
    pub handler_bci: i32,
    /// Pool index of the caught class; 0 catches everything.
    pub catch_type: u16,
    /// Entry block in the current scope copy.
    pub entry_block: Option<BlockId>,
    /// Predecessor index of this edge in the entry block, once joined.
    pub phi_operand: Option<usize>,
    /// Number of inlining scopes between the throwing node and the handler.
    pub scope_count: usize,
}

impl XHandler {
    /// Creates a handler from a declared table entry.
    #[must_use]
    pub fn from_declared(handler: &ExceptionHandler) -> Self {
        XHandler {
            start: handler.start_pc as i32,
            end: handler.end_pc as i32,
            handler_bci: handler.handler_pc as i32,
            catch_type: handler.catch_type,
            entry_block: None,
            phi_operand: None,
            scope_count: 0,
        }
    }

    /// Creates the catch-all handler guarding an inlined synchronized callee.
    #[must_use]
    pub fn synchronization(entry_block: BlockId) -> Self {
        XHandler {
            start: 0,
            end: i32::MAX,
            handler_bci: -1,
            catch_type: 0,
            entry_block: Some(entry_block),
            phi_operand: None,
            scope_count: 0,
        }
    }

    /// Returns `true` if the handler covers `bci`.
    #[must_use]
    pub fn covers(&self, bci: i32) -> bool {
        self.start <= bci && bci < self.end
    }

    /// Returns `true` if the handler catches every exception.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.catch_type == 0
    }
}
