//! Block discovery and loop marking.
//!
//! [`BlockListBuilder`] runs once per parsed method body (the root method and every
//! inlined callee). It makes two passes:
//!
//! 1. A linear scan of the bytecode creates a block at every leader (offset 0, the
//!    OSR bci, handler entries and range boundaries, branch and `jsr` targets and the
//!    instruction after every control transfer) and records the syntactic successor
//!    edges, including one edge from each block to every handler that covers one of
//!    its trapping instructions.
//! 2. A depth-first walk from offset 0 marks loop headers (blocks reached again while
//!    still on the walk stack), numbers the blocks in reverse postorder and collects
//!    the locals that need phis at loop headers.
//!
//! Each loop gets one bit of a 32-bit membership word. A method with more loops than
//! that fails with [`BailoutReason::TooManyLoops`].

use tracing::trace;

use crate::{
    bytecode::{DecodedCode, Insn, Opcode, Operand},
    database::ExceptionHandler,
    ir::{BlockFlags, BlockId, Graph, ScopeId, XHandler},
    utils::BitSet,
    BailoutReason,
};

/// The block skeleton of one method body.
#[derive(Debug, Clone)]
pub struct BlockMap {
    bci2block: Vec<Option<BlockId>>,
    /// Blocks in creation order.
    pub blocks: Vec<BlockId>,
    /// Locals that need a phi at loop headers.
    pub requires_phi: BitSet,
    /// Number of loop headers found.
    pub loop_count: usize,
    /// The declared handlers with their entry blocks filled in.
    pub handlers: Vec<XHandler>,
}

impl BlockMap {
    /// Returns the block starting at `bci`.
    #[must_use]
    pub fn block_at(&self, bci: i32) -> Option<BlockId> {
        usize::try_from(bci)
            .ok()
            .and_then(|bci| self.bci2block.get(bci).copied().flatten())
    }

    /// Replaces or clears the block registered for `bci`.
    pub(crate) fn set_block_at(&mut self, bci: i32, block: Option<BlockId>) {
        if let Some(slot) = usize::try_from(bci)
            .ok()
            .and_then(|bci| self.bci2block.get_mut(bci))
        {
            *slot = block;
        }
    }
}

struct Frame {
    block: BlockId,
    /// Successors still to visit, walked from the last one down.
    remaining: usize,
    loop_state: u32,
    in_subroutine: bool,
}

enum Visit {
    Cached(u32),
    Enter(Frame),
}

/// Discovers the blocks of one method body.
pub struct BlockListBuilder<'a> {
    graph: &'a mut Graph,
    code: &'a DecodedCode,
    scope: ScopeId,
    max_locals: usize,
    handlers: Vec<XHandler>,
    bci2block: Vec<Option<BlockId>>,
    blocks: Vec<BlockId>,
    requires_phi: BitSet,
    next_loop_index: u32,
    next_block_number: i32,
    visited: BitSet,
    active: BitSet,
}

impl<'a> BlockListBuilder<'a> {
    /// Builds the block skeleton of `code`, adding the blocks to `graph`.
    ///
    /// # Arguments
    /// * `graph` - Graph receiving the blocks
    /// * `code` - The decoded method body
    /// * `scope` - Scope the blocks belong to
    /// * `max_locals` - Local slot count of the method
    /// * `handlers` - The method's declared exception handlers
    /// * `osr_bci` - OSR entry bci, for the root of an OSR compile
    /// * `is_root` - `true` for the method being compiled, `false` for callees
    ///
    /// # Errors
    /// Fails if a handler covers its own entry, if a handler entry is reachable by
    /// normal control flow, if a branch leaves the method or if there are more loops
    /// than the membership word can track.
    pub fn build(
        graph: &'a mut Graph,
        code: &'a DecodedCode,
        scope: ScopeId,
        max_locals: usize,
        handlers: &[ExceptionHandler],
        osr_bci: Option<u32>,
        is_root: bool,
    ) -> Result<BlockMap, BailoutReason> {
        let mut builder = BlockListBuilder {
            graph,
            code,
            scope,
            max_locals,
            handlers: handlers.iter().map(XHandler::from_declared).collect(),
            bci2block: vec![None; code.code_size() as usize],
            blocks: Vec::new(),
            requires_phi: BitSet::new(max_locals),
            next_loop_index: 0,
            next_block_number: 0,
            visited: BitSet::new(0),
            active: BitSet::new(0),
        };

        builder.check_handlers()?;
        let leaders = builder.leaders(osr_bci)?;
        builder.set_entries(osr_bci, is_root)?;
        builder.set_leaders(&leaders)?;
        builder.mark_loops()?;

        trace!(
            target: "jitfront::blocks",
            scope = %scope,
            blocks = builder.blocks.len(),
            loops = builder.next_loop_index,
            phi_locals = builder.requires_phi.count(),
            "block list built"
        );

        Ok(BlockMap {
            bci2block: builder.bci2block,
            blocks: builder.blocks,
            requires_phi: builder.requires_phi,
            loop_count: builder.next_loop_index as usize,
            handlers: builder.handlers,
        })
    }

    fn check_handlers(&self) -> Result<(), BailoutReason> {
        for handler in &self.handlers {
            if handler.covers(handler.handler_bci) {
                return Err(BailoutReason::HandlerCoversItself);
            }
            if self.code.index_of(handler.handler_bci as u32).is_none() {
                return Err(BailoutReason::MalformedBytecode(format!(
                    "exception handler at {} is not an instruction start",
                    handler.handler_bci
                )));
            }
        }
        Ok(())
    }

    fn leaders(&self, osr_bci: Option<u32>) -> Result<BitSet, BailoutReason> {
        let size = self.code.code_size() as usize;
        let mut leaders = BitSet::new(size);
        leaders.insert(0);
        if let Some(bci) = osr_bci {
            if self.code.index_of(bci).is_none() {
                return Err(BailoutReason::MalformedBytecode(format!(
                    "osr bci {bci} is not an instruction start"
                )));
            }
            leaders.insert(bci as usize);
        }
        for handler in &self.handlers {
            for bci in [handler.start, handler.end, handler.handler_bci] {
                if self.code.index_of(bci as u32).is_some() {
                    leaders.insert(bci as usize);
                }
            }
        }
        for insn in self.code.insns() {
            let transfers = insn.opcode.ends_block()
                || insn.opcode.is_conditional_branch()
                || matches!(insn.opcode, Opcode::Jsr | Opcode::JsrW);
            if !transfers {
                continue;
            }
            for target in insn.branch_targets() {
                leaders.insert(target as usize);
            }
            if (insn.next_bci() as usize) < size {
                leaders.insert(insn.next_bci() as usize);
            }
        }
        Ok(leaders)
    }

    fn set_entries(&mut self, osr_bci: Option<u32>, is_root: bool) -> Result<(), BailoutReason> {
        let std_entry = self.make_block_at(0, None)?;
        if is_root {
            self.graph.block_mut(std_entry).flags |= BlockFlags::STD_ENTRY;
        }
        if let Some(bci) = osr_bci {
            let osr_entry = self.make_block_at(bci, None)?;
            self.graph.block_mut(osr_entry).flags |= BlockFlags::OSR_ENTRY;
        }
        for i in 0..self.handlers.len() {
            let entry = self.make_block_at(self.handlers[i].handler_bci as u32, None)?;
            self.graph.block_mut(entry).flags |= BlockFlags::EXCEPTION_ENTRY;
            self.handlers[i].entry_block = Some(entry);
        }
        Ok(())
    }

    fn make_block_at(
        &mut self,
        bci: u32,
        predecessor: Option<BlockId>,
    ) -> Result<BlockId, BailoutReason> {
        if self.code.index_of(bci).is_none() {
            return Err(BailoutReason::MalformedBytecode(format!(
                "control flow reaches {bci} which is not an instruction start"
            )));
        }
        let block = match self.bci2block[bci as usize] {
            Some(block) => block,
            None => {
                let block = self.graph.add_block(bci as i32, self.scope);
                self.graph.block_mut(block).stores_to_locals = BitSet::new(self.max_locals);
                self.bci2block[bci as usize] = Some(block);
                self.blocks.push(block);
                block
            }
        };

        if let Some(predecessor) = predecessor {
            if self.graph.block(block).is_set(BlockFlags::EXCEPTION_ENTRY) {
                return Err(BailoutReason::HandlerReachedByNormalFlow);
            }
            self.graph.block_mut(predecessor).add_successor(block);
        }
        Ok(block)
    }

    fn handle_exceptions(&mut self, current: BlockId, bci: i32) {
        for handler in &self.handlers {
            if !handler.covers(bci) {
                continue;
            }
            if let Some(entry) = handler.entry_block {
                self.graph.block_mut(current).add_successor(entry);
            }
            if handler.is_catch_all() {
                break;
            }
        }
    }

    fn store(&mut self, current: BlockId, insn: &Insn) {
        use Opcode::*;
        let slots = match insn.opcode {
            Istore | Fstore | Astore | Istore0 | Istore1 | Istore2 | Istore3 | Fstore0
            | Fstore1 | Fstore2 | Fstore3 | Astore0 | Astore1 | Astore2 | Astore3 | Iinc => 1,
            Lstore | Dstore | Lstore0 | Lstore1 | Lstore2 | Lstore3 | Dstore0 | Dstore1
            | Dstore2 | Dstore3 => 2,
            _ => return,
        };
        if let Some(local) = insn.local() {
            let stores = &mut self.graph.block_mut(current).stores_to_locals;
            for slot in 0..slots {
                stores.insert(usize::from(local) + slot);
            }
        }
    }

    fn set_leaders(&mut self, leaders: &BitSet) -> Result<(), BailoutReason> {
        let code = self.code;
        let has_handlers = !self.handlers.is_empty();
        let mut current: Option<BlockId> = None;

        for insn in code.insns() {
            if leaders.contains(insn.bci as usize) {
                current = Some(self.make_block_at(insn.bci, current)?);
            }
            let block = current.ok_or_else(|| {
                BailoutReason::MalformedBytecode(format!("no block at bci {}", insn.bci))
            })?;

            if has_handlers && insn.opcode.can_trap() {
                self.handle_exceptions(block, insn.bci as i32);
            }
            self.store(block, insn);

            match &insn.operand {
                _ if insn.opcode.is_conditional_branch() => {
                    self.make_block_at(insn.next_bci(), Some(block))?;
                    if let Operand::Branch(target) = insn.operand {
                        self.make_block_at(target, Some(block))?;
                    }
                    current = None;
                }
                Operand::Branch(target) if matches!(insn.opcode, Opcode::Goto | Opcode::GotoW) => {
                    self.make_block_at(*target, Some(block))?;
                    current = None;
                }
                Operand::Branch(target) if matches!(insn.opcode, Opcode::Jsr | Opcode::JsrW) => {
                    self.make_block_at(insn.next_bci(), Some(block))?;
                    let subroutine = self.make_block_at(*target, Some(block))?;
                    self.graph.block_mut(subroutine).flags |= BlockFlags::SUBROUTINE_ENTRY;
                    current = None;
                }
                Operand::TableSwitch(table) => {
                    for &target in &table.targets {
                        self.make_block_at(target, Some(block))?;
                    }
                    self.make_block_at(table.default, Some(block))?;
                    current = None;
                }
                Operand::LookupSwitch(table) => {
                    for &(_, target) in &table.pairs {
                        self.make_block_at(target, Some(block))?;
                    }
                    self.make_block_at(table.default, Some(block))?;
                    current = None;
                }
                _ if insn.opcode.ends_block() => current = None,
                _ => {}
            }
        }
        Ok(())
    }

    fn make_loop_header(&mut self, block: BlockId) -> Result<(), BailoutReason> {
        let next = self.next_loop_index;
        let data = self.graph.block_mut(block);
        // Exception edges can look like back edges; they never form loops.
        if data.is_set(BlockFlags::EXCEPTION_ENTRY) || data.is_set(BlockFlags::LOOP_HEADER) {
            return Ok(());
        }
        if next >= u32::BITS {
            return Err(BailoutReason::TooManyLoops);
        }
        data.flags |= BlockFlags::LOOP_HEADER;
        data.loop_index = next as i32;
        data.loop_membership = 1 << next;
        self.next_loop_index += 1;
        Ok(())
    }

    fn enter(&mut self, block: BlockId, in_subroutine: bool) -> Result<Visit, BailoutReason> {
        if self.visited.contains(block.index()) {
            if self.active.contains(block.index()) {
                self.make_loop_header(block)?;
            }
            return Ok(Visit::Cached(self.graph.block(block).loop_membership));
        }
        self.visited.insert(block.index());
        self.active.insert(block.index());
        let data = self.graph.block(block);
        Ok(Visit::Enter(Frame {
            block,
            remaining: data.successors.len(),
            loop_state: 0,
            in_subroutine: in_subroutine || data.is_set(BlockFlags::SUBROUTINE_ENTRY),
        }))
    }

    fn leave(&mut self, frame: Frame) -> u32 {
        self.active.remove(frame.block.index());
        let number = self.next_block_number;
        self.next_block_number -= 1;

        let mut loop_state = frame.loop_state;
        let data = self.graph.block_mut(frame.block);
        data.depth_first_number = number;
        if frame.in_subroutine {
            data.flags |= BlockFlags::SUBROUTINE_BODY;
        }
        if loop_state != 0 || frame.in_subroutine {
            self.requires_phi.union_with(&data.stores_to_locals);
        }
        if data.is_set(BlockFlags::LOOP_HEADER) {
            loop_state &= !(1u32 << data.loop_index);
        }
        data.loop_membership = loop_state;
        loop_state
    }

    fn mark_loops(&mut self) -> Result<(), BailoutReason> {
        self.next_block_number = self.blocks.len() as i32;
        let Some(root) = self.bci2block[0] else {
            return Ok(());
        };

        let mut stack = Vec::new();
        if let Visit::Enter(frame) = self.enter(root, false)? {
            stack.push(frame);
        }
        while let Some(top) = stack.last_mut() {
            if top.remaining == 0 {
                if let Some(frame) = stack.pop() {
                    let state = self.leave(frame);
                    if let Some(parent) = stack.last_mut() {
                        parent.loop_state |= state;
                    }
                }
                continue;
            }
            top.remaining -= 1;
            let (block, position, in_subroutine) = (top.block, top.remaining, top.in_subroutine);
            let successor = self.graph.block(block).successors[position];
            match self.enter(successor, in_subroutine)? {
                Visit::Cached(state) => {
                    if let Some(top) = stack.last_mut() {
                        top.loop_state |= state;
                    }
                }
                Visit::Enter(frame) => stack.push(frame),
            }
        }
        Ok(())
    }
}
