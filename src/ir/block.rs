//! Basic blocks.

use bitflags::bitflags;

use crate::{
    ir::{BlockId, ScopeId, ValueId, ValueStack},
    utils::BitSet,
};

bitflags! {
    /// Block properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u16 {
        /// Synthetic header of the standard method entry
        const STD_ENTRY = 0x0001;
        /// Target block of on-stack replacement
        const OSR_ENTRY = 0x0002;
        /// Entry of an exception handler
        const EXCEPTION_ENTRY = 0x0004;
        /// First block of a `jsr` subroutine
        const SUBROUTINE_ENTRY = 0x0008;
        /// Target of a back edge
        const LOOP_HEADER = 0x0010;
        /// Parsed
        const WAS_VISITED = 0x0020;
        /// Queued for parsing
        const ON_WORK_LIST = 0x0040;
        /// Part of a subroutine body
        const SUBROUTINE_BODY = 0x0080;
        /// Continuation block of an inlined call
        const CONTINUATION = 0x0100;
    }
}

/// A basic block.
///
/// Blocks are created once per bytecode offset per parsing scope by the
/// [`crate::builder::BlockListBuilder`], so a block's identity is its start offset
/// within its scope. The builder then fills in the entry state, the phis, the
/// instruction order and the terminating control node.
///
/// `predecessors` holds one entry per edge whose state was merged into the block,
/// in merge order. A block may appear more than once (an exception entry reached
/// from several trapping nodes of the same block); every phi of the block has
/// exactly one operand per entry.
#[derive(Debug, Clone)]
pub struct Block {
    /// Own id.
    pub id: BlockId,
    /// Start bci; -1 for synthetic blocks.
    pub bci: i32,
    /// Scope the block was created for.
    pub scope: ScopeId,
    /// Properties.
    pub flags: BlockFlags,
    /// Loop marking order; -1 until marked. Smaller numbers are parsed first.
    pub depth_first_number: i32,
    /// Index of the loop the block heads, or -1.
    pub loop_index: i32,
    /// Bit set of the loops the block belongs to.
    pub loop_membership: u32,
    /// Normal and exceptional successors found by block discovery.
    pub successors: Vec<BlockId>,
    /// Merged incoming edges.
    pub predecessors: Vec<BlockId>,
    /// Locals stored to in this block.
    pub stores_to_locals: BitSet,
    /// Entry state, set by the first merge.
    pub state: Option<ValueStack>,
    /// Phis at the block entry.
    pub phis: Vec<ValueId>,
    /// Nodes in program order, excluding phis and the block end.
    pub instructions: Vec<ValueId>,
    /// Terminating control node.
    pub end: Option<ValueId>,
    /// Handler entry blocks reachable from this block.
    pub exception_handlers: Vec<BlockId>,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new(id: BlockId, bci: i32, scope: ScopeId) -> Self {
        Block {
            id,
            bci,
            scope,
            flags: BlockFlags::empty(),
            depth_first_number: -1,
            loop_index: -1,
            loop_membership: 0,
            successors: Vec::new(),
            predecessors: Vec::new(),
            stores_to_locals: BitSet::new(0),
            state: None,
            phis: Vec::new(),
            instructions: Vec::new(),
            end: None,
            exception_handlers: Vec::new(),
        }
    }

    /// Returns `true` if all of `flags` are set.
    #[must_use]
    pub fn is_set(&self, flags: BlockFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Adds a syntactic successor, ignoring duplicates.
    pub fn add_successor(&mut self, sux: BlockId) {
        if !self.successors.contains(&sux) {
            self.successors.push(sux);
        }
    }

    /// Adds a reachable exception handler entry, ignoring duplicates.
    pub fn add_exception_handler(&mut self, entry: BlockId) {
        if !self.exception_handlers.contains(&entry) {
            self.exception_handlers.push(entry);
        }
    }

    /// Returns `true` once the block has a terminating control node.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }
}
