//! Per-scope parsing data.
//!
//! The graph builder keeps a stack of [`ScopeData`]: one entry for the root method,
//! one per inlined callee being parsed and one per `jsr` subroutine copy. A subroutine
//! entry shares the IR scope and the bytecode of its method but owns a private copy of
//! the block map, since every subroutine invocation is parsed into cloned blocks.

use std::rc::Rc;

use crate::{
    builder::BlockMap,
    bytecode::DecodedCode,
    database::MethodId,
    ir::{BlockFlags, BlockId, Graph, ScopeId, ValueId, ValueStack, XHandler},
};

/// Where the only return of an inlined callee left the builder, so the `Goto` to the
/// continuation can be undone.
#[derive(Debug, Clone)]
pub(crate) struct Cleanup {
    pub block: BlockId,
    pub state: ValueStack,
}

/// Bookkeeping of a `jsr` subroutine being parsed.
#[derive(Debug, Clone)]
pub(crate) struct Subroutine {
    /// Bci of the subroutine entry.
    pub entry_bci: i32,
    /// Block following the `jsr`; every `ret` jumps there.
    pub continuation: BlockId,
    /// Local holding the return address once the subroutine stored it.
    pub return_address_local: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct ScopeData {
    /// IR scope the parsed nodes belong to.
    pub scope: ScopeId,
    /// Method whose bytecode is parsed.
    pub method: MethodId,
    pub code: Rc<DecodedCode>,
    pub blocks: BlockMap,
    pub handlers: Vec<XHandler>,
    /// `true` if this scope or an enclosing one has exception handlers.
    pub has_handler: bool,
    /// Blocks waiting to be parsed, sorted so the smallest depth-first number is last.
    pub work_list: Vec<BlockId>,
    /// Block a callee's returns jump to; `None` for the root method.
    pub continuation: Option<BlockId>,
    /// Callee size limit for calls made from this scope.
    pub max_inline_size: usize,
    pub num_returns: usize,
    pub cleanup: Option<Cleanup>,
    /// Returns of the callee, merged into the continuation once parsing is done.
    pub pending_returns: Vec<(BlockId, ValueStack)>,
    /// Object locked on entry of a synchronized callee.
    pub sync_lock: Option<ValueId>,
    pub subroutine: Option<Subroutine>,
}

impl ScopeData {
    /// Creates the data of a method scope.
    pub fn method(
        scope: ScopeId,
        method: MethodId,
        code: Rc<DecodedCode>,
        blocks: BlockMap,
        parent_has_handler: bool,
        max_inline_size: usize,
    ) -> Self {
        let handlers = blocks.handlers.clone();
        ScopeData {
            scope,
            method,
            code,
            has_handler: parent_has_handler || !handlers.is_empty(),
            handlers,
            blocks,
            work_list: Vec::new(),
            continuation: None,
            max_inline_size,
            num_returns: 0,
            cleanup: None,
            pending_returns: Vec::new(),
            sync_lock: None,
            subroutine: None,
        }
    }

    /// Creates a subroutine scope parsed inside `parent`.
    ///
    /// The handler list is filled in by the builder once the handler entry blocks have
    /// been cloned.
    pub fn subroutine(parent: &ScopeData, entry_bci: i32, continuation: BlockId) -> Self {
        ScopeData {
            scope: parent.scope,
            method: parent.method,
            code: Rc::clone(&parent.code),
            blocks: parent.blocks.clone(),
            handlers: Vec::new(),
            has_handler: parent.has_handler,
            work_list: Vec::new(),
            continuation: parent.continuation,
            max_inline_size: parent.max_inline_size,
            num_returns: 0,
            cleanup: None,
            pending_returns: Vec::new(),
            sync_lock: None,
            subroutine: Some(Subroutine {
                entry_bci,
                continuation,
                return_address_local: None,
            }),
        }
    }

    pub fn is_subroutine(&self) -> bool {
        self.subroutine.is_some()
    }

    /// Queues `block` for parsing, keeping the list sorted by depth-first number.
    ///
    /// Blocks already queued once are ignored, as is the block control returns to when
    /// this scope is done.
    pub fn add_to_work_list(&mut self, graph: &mut Graph, block: BlockId) {
        if graph.block(block).is_set(BlockFlags::ON_WORK_LIST) {
            return;
        }
        let exit = match &self.subroutine {
            Some(sub) => Some(sub.continuation),
            None => self.continuation,
        };
        if exit == Some(block) {
            return;
        }
        graph.block_mut(block).flags |= BlockFlags::ON_WORK_LIST;
        let dfn = graph.block(block).depth_first_number;
        let position = self
            .work_list
            .iter()
            .rposition(|b| graph.block(*b).depth_first_number >= dfn)
            .map_or(0, |i| i + 1);
        self.work_list.insert(position, block);
    }

    /// Takes the queued block with the smallest depth-first number.
    pub fn remove_from_work_list(&mut self) -> Option<BlockId> {
        self.work_list.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::BlockListBuilder, bytecode::BytecodeAssembler, bytecode::Opcode};

    #[test]
    fn test_work_list_order() {
        let mut asm = BytecodeAssembler::new();
        asm.iload(0)
            .branch(Opcode::Ifeq, "else")
            .iconst(1)
            .op(Opcode::Ireturn)
            .label("else")
            .iconst(2)
            .op(Opcode::Ireturn);
        let code = Rc::new(DecodedCode::decode(&asm.finish().expect("valid code")).expect("decodes"));
        let mut graph = Graph::new();
        let scope = ScopeId::new(0);
        let blocks = BlockListBuilder::build(&mut graph, &code, scope, 1, &[], None, true)
            .expect("builds");
        let entry = blocks.block_at(0).expect("entry");
        let then = blocks.block_at(4).expect("then");
        let other = blocks.block_at(6).expect("else");

        let mut data = ScopeData::method(scope, MethodId(0), code, blocks, false, 35);
        data.add_to_work_list(&mut graph, other);
        data.add_to_work_list(&mut graph, entry);
        data.add_to_work_list(&mut graph, then);
        data.add_to_work_list(&mut graph, entry);
        assert_eq!(data.work_list.len(), 3);

        let mut order = Vec::new();
        while let Some(block) = data.remove_from_work_list() {
            order.push(graph.block(block).depth_first_number);
        }
        assert!(order.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(order[0], graph.block(entry).depth_first_number);
    }
}
