//! The graph builder driver: block iteration, node appending and exception edges.

use std::{mem, rc::Rc};

use tracing::{debug, trace, warn};

use crate::{
    builder::{
        inline::{InlineDecision, RecompileHint},
        merge::try_merge,
        scope::ScopeData,
        BlockListBuilder, MemoryValueCache, ValueMap,
    },
    bytecode::DecodedCode,
    compiler::{Canonical, Canonicalizer},
    database::{Method, MethodId, ProgramDatabase},
    error::{Bailout, BailoutReason},
    ir::{
        BlockFlags, BlockId, ConstValue, Graph, Instruction, IrScope, Node, NodeFlags, ScopeId,
        StateId, StateKind, ValueId, ValueStack, ValueType, XHandler,
    },
    CompilerConfig, Error,
};

/// The graph of one method together with what happened while building it.
#[derive(Debug)]
pub struct BuildOutput {
    /// The finished graph.
    pub graph: Graph,
    /// Every inlining decision, in the order the call sites were parsed.
    pub inlining: Vec<InlineDecision>,
    /// Unresolved entities met while parsing.
    pub recompile_hints: Vec<RecompileHint>,
    /// Number of nodes appended to blocks.
    pub instruction_count: usize,
}

/// Builds the graph of one method by abstract interpretation of its bytecode.
///
/// Blocks are parsed in depth-first order from a per-scope work list. Each bytecode
/// pops and pushes values on a symbolic [`ValueStack`]; nodes are canonicalized and
/// value numbered before they are appended, and every node that can trap is joined
/// into the exception handlers covering it. Statically bound calls may be inlined,
/// in which case the callee is parsed into the caller's graph in a nested scope.
pub struct GraphBuilder<'a> {
    pub(super) db: &'a dyn ProgramDatabase,
    pub(super) config: &'a CompilerConfig,
    pub(super) graph: Graph,
    /// Data of the scope being parsed.
    pub(super) scope: ScopeData,
    /// Enclosing scopes, innermost last.
    pub(super) parents: Vec<ScopeData>,
    pub(super) block: BlockId,
    pub(super) state: ValueStack,
    pub(super) bci: i32,
    /// Set when the current block was ended by inlining or a subroutine and its
    /// successors have been dealt with.
    pub(super) skip_block: bool,
    osr_bci: Option<u32>,
    vmap: ValueMap,
    pub(super) memory: MemoryValueCache,
    instruction_count: usize,
    pub(super) inlined_bytes: usize,
    pub(super) inlining: Vec<InlineDecision>,
    pub(super) recompile_hints: Vec<RecompileHint>,
}

impl<'a> GraphBuilder<'a> {
    /// Builds the graph of `method`, optionally with an OSR entry at `osr_bci`.
    ///
    /// # Errors
    /// Returns [`Error::MethodNotFound`] if the database does not know `method` and
    /// [`Error::Bailout`] if construction was abandoned.
    pub fn build(
        db: &'a dyn ProgramDatabase,
        config: &'a CompilerConfig,
        method: MethodId,
        osr_bci: Option<u32>,
    ) -> crate::Result<BuildOutput> {
        let root = db.method(method).ok_or(Error::MethodNotFound(method))?;
        debug!(target: "jitfront::builder", %method, name = %root.name, ?osr_bci, "building graph");

        let mut graph = Graph::new();
        let scope = match root_scope(&mut graph, config, method, root, osr_bci) {
            Ok(scope) => scope,
            Err(reason) => return Err(bail(reason, graph, 0)),
        };
        let Some(start) = scope.blocks.block_at(0) else {
            let reason = BailoutReason::MalformedBytecode("method has no entry block".into());
            return Err(bail(reason, graph, 0));
        };

        let state = ValueStack::new(scope.scope, 0, None);
        let mut builder = GraphBuilder {
            db,
            config,
            graph,
            scope,
            parents: Vec::new(),
            block: start,
            state,
            bci: 0,
            skip_block: false,
            osr_bci,
            vmap: ValueMap::new(),
            memory: MemoryValueCache::new(config.eliminate_field_access),
            instruction_count: 0,
            inlined_bytes: 0,
            inlining: Vec::new(),
            recompile_hints: Vec::new(),
        };

        match builder.build_root(root, start) {
            Ok(()) => {
                debug!(
                    target: "jitfront::builder",
                    %method,
                    nodes = builder.instruction_count,
                    blocks = builder.graph.block_count(),
                    lvn_hits = builder.vmap.hits(),
                    memory_hits = builder.memory.hits(),
                    eliminated_stores = builder.memory.eliminated_stores(),
                    "graph built"
                );
                Ok(BuildOutput {
                    graph: builder.graph,
                    inlining: builder.inlining,
                    recompile_hints: builder.recompile_hints,
                    instruction_count: builder.instruction_count,
                })
            }
            Err(reason) => Err(bail(reason, builder.graph, builder.instruction_count)),
        }
    }

    fn build_root(&mut self, root: &Method, start: BlockId) -> Result<(), BailoutReason> {
        let scope = self.scope.scope;
        let max_locals = usize::from(root.max_locals);
        let mut state = ValueStack::new(scope, max_locals, None);

        let mut index = 0;
        if !root.is_static() {
            let receiver = self.graph.add_node(
                Node::new(Instruction::Local { index: 0 }, ValueType::Object)
                    .with_declared(root.holder),
            );
            state.set_local(0, Some(receiver));
            index = 1;
        }
        for (position, param) in root.signature.params.iter().enumerate() {
            let ty = param.value_type();
            let declared = match ty {
                ValueType::Object => root.signature.param_class(position),
                _ => None,
            };
            let local = self
                .graph
                .add_node(Node::new(Instruction::Local { index }, ty).with_declared(declared));
            if !state.store_local(index, local, |v| self.graph.ty(v)) {
                return Err(malformed("parameters exceed max_locals"));
            }
            index += ty.size();
        }
        if root.is_synchronized() {
            let lock = if root.is_static() {
                let holder = root
                    .holder
                    .ok_or_else(|| malformed("synchronized static method without holder"))?;
                self.graph
                    .add_node(Node::constant(ConstValue::Class(holder)))
            } else {
                state
                    .local(0)
                    .ok_or_else(|| malformed("missing receiver"))?
            };
            state.lock(lock);
        }
        self.graph.entry_state = Some(
            self.graph
                .add_state(state.copy(StateKind::BlockBegin, 0)),
        );

        let selective = self.config.selective_phi_functions;
        if self.graph.block(start).is_set(BlockFlags::LOOP_HEADER) {
            // The initial state must arrive over an edge so the header's phis get an
            // operand for it.
            let header = self.graph.add_block(0, scope);
            {
                let block = self.graph.block_mut(header);
                block.flags |= BlockFlags::STD_ENTRY | BlockFlags::WAS_VISITED;
                block.depth_first_number = 0;
                block.state = Some(state.copy(StateKind::BlockBegin, 0));
            }
            self.graph.block_mut(start).flags.remove(BlockFlags::STD_ENTRY);
            let mut goto = Node::new(Instruction::Goto { target: start }, ValueType::Void);
            goto.bci = 0;
            goto.block = Some(header);
            goto.state_after = Some(self.graph.add_state(state.copy(StateKind::StateAfter, 0)));
            let goto = self.graph.add_node(goto);
            self.graph.block_mut(header).end = Some(goto);
            self.graph.block_mut(header).add_successor(start);
            if !try_merge(
                &mut self.graph,
                start,
                Some(header),
                &state,
                &self.scope.blocks.requires_phi,
                selective,
            )? {
                return Err(BailoutReason::BlockJoinFailed);
            }
            self.graph.start = Some(header);
        } else {
            if !try_merge(
                &mut self.graph,
                start,
                None,
                &state,
                &self.scope.blocks.requires_phi,
                selective,
            )? {
                return Err(BailoutReason::BlockJoinFailed);
            }
            self.graph.start = Some(start);
        }

        self.scope.add_to_work_list(&mut self.graph, start);
        self.iterate_all_blocks(false)?;

        if let Some(osr_bci) = self.osr_bci {
            let target = self
                .scope
                .blocks
                .block_at(osr_bci as i32)
                .ok_or(BailoutReason::OsrEntryNotVisited)?;
            let block = self.graph.block(target);
            if !block.is_set(BlockFlags::WAS_VISITED) {
                return Err(BailoutReason::OsrEntryNotVisited);
            }
            if block.state.as_ref().is_some_and(|s| !s.is_stack_empty()) {
                return Err(BailoutReason::OsrStackNotEmpty);
            }
        }

        if let Some(user) = self.graph.remove_illegal_phis() {
            return Err(BailoutReason::TypeMismatch(self.graph.node(user).bci));
        }
        Ok(())
    }

    /// Parses the blocks of the current scope's work list until it is empty.
    ///
    /// With `start_in_current` the scope's first bytecodes are parsed into the current
    /// block before the work list is consulted; inlining uses this to continue a
    /// caller block with the callee's entry.
    pub(super) fn iterate_all_blocks(
        &mut self,
        start_in_current: bool,
    ) -> Result<(), BailoutReason> {
        if start_in_current {
            self.iterate_bytecodes_for_block(0)?;
        }
        while let Some(block) = self.scope.remove_from_work_list() {
            if self.graph.block(block).is_set(BlockFlags::WAS_VISITED) {
                continue;
            }
            if self.graph.block(block).is_set(BlockFlags::OSR_ENTRY) {
                self.setup_osr_entry_block(block)?;
                self.graph.block_mut(block).flags.remove(BlockFlags::OSR_ENTRY);
            }
            self.graph.block_mut(block).flags |= BlockFlags::WAS_VISITED;
            self.connect_to_end(block)?;
        }
        Ok(())
    }

    fn connect_to_end(&mut self, block: BlockId) -> Result<(), BailoutReason> {
        let entry = self.graph.block(block);
        let bci = entry.bci;
        let state = entry
            .state
            .as_ref()
            .ok_or(BailoutReason::BlockJoinFailed)?
            .copy(StateKind::Parsing, bci);
        trace!(
            target: "jitfront::builder",
            block = %block,
            bci,
            scope = %self.scope.scope,
            "parsing block"
        );
        self.vmap.kill();
        self.memory.kill();
        self.block = block;
        self.state = state;
        self.iterate_bytecodes_for_block(bci)
    }

    /// Parses bytecodes from `bci` into the current block until the block ends or the
    /// next instruction starts another block, then joins the exit state into every
    /// successor.
    pub(super) fn iterate_bytecodes_for_block(&mut self, bci: i32) -> Result<(), BailoutReason> {
        self.skip_block = false;
        let code: Rc<DecodedCode> = Rc::clone(&self.scope.code);
        let start = u32::try_from(bci)
            .ok()
            .and_then(|bci| code.index_of(bci))
            .ok_or_else(|| malformed(format!("no instruction starts at bci {bci}")))?;

        let entry = self.graph.block(self.block);
        if entry.is_set(BlockFlags::EXCEPTION_ENTRY)
            && entry.bci == bci
            && entry.scope == self.scope.scope
            && entry.instructions.is_empty()
        {
            let exception = self.append_at(
                Node::new(Instruction::ExceptionObject, ValueType::Object)
                    .with_flags(NodeFlags::PINNED),
                bci,
            )?;
            self.state.push(exception, 1);
        }

        let mut index = start;
        let mut next_bci = bci;
        while self.graph.block(self.block).end.is_none() {
            let Some(insn) = code.insns().get(index) else {
                return Err(malformed("control falls off the end of the method"));
            };
            next_bci = insn.bci as i32;
            if matches!(self.block_at(next_bci), Some(other) if other != self.block) {
                break;
            }
            self.bci = next_bci;
            self.state.bci = next_bci;
            self.parse_insn(insn)?;
            index += 1;
        }

        if self.skip_block {
            return Ok(());
        }

        let block = self.block;
        if self.graph.block(block).end.is_none() {
            let target = self
                .block_at(next_bci)
                .ok_or_else(|| malformed(format!("no block at bci {next_bci}")))?;
            self.append(Node::new(Instruction::Goto { target }, ValueType::Void))?;
        }

        let successors = self.graph.end_successors(block);
        for sux in successors.into_iter().rev() {
            // Returns of an inlined callee are joined once the callee is done.
            if Some(sux) == self.scope.continuation {
                continue;
            }
            self.graph.block_mut(block).add_successor(sux);
            if !try_merge(
                &mut self.graph,
                sux,
                Some(block),
                &self.state,
                &self.scope.blocks.requires_phi,
                self.config.selective_phi_functions,
            )? {
                return Err(BailoutReason::BlockJoinFailed);
            }
            self.scope.add_to_work_list(&mut self.graph, sux);
        }
        Ok(())
    }

    /// Returns the block starting at `bci` in the current scope.
    ///
    /// Inside a subroutine every block shared with the enclosing scope is cloned on
    /// first access, so each subroutine invocation gets its own copy of the blocks it
    /// reaches.
    pub(super) fn block_at(&mut self, bci: i32) -> Option<BlockId> {
        let block = self.scope.blocks.block_at(bci)?;
        if !self.scope.is_subroutine() {
            return Some(block);
        }
        let shared = self
            .parents
            .last()
            .and_then(|parent| parent.blocks.block_at(bci))
            == Some(block);
        if !shared {
            return Some(block);
        }

        let original = self.graph.block(block);
        let (bci, scope, dfn) = (original.bci, original.scope, original.depth_first_number);
        let kept = original.flags
            & (BlockFlags::LOOP_HEADER
                | BlockFlags::SUBROUTINE_ENTRY
                | BlockFlags::EXCEPTION_ENTRY
                | BlockFlags::WAS_VISITED);
        let loop_index = original.loop_index;
        let clone = self.graph.add_block(bci, scope);
        let copy = self.graph.block_mut(clone);
        copy.depth_first_number = dfn;
        copy.flags |= kept;
        copy.loop_index = loop_index;
        self.scope.blocks.set_block_at(bci, Some(clone));
        trace!(target: "jitfront::builder", original = %block, %clone, bci, "cloned block for subroutine");
        Some(clone)
    }

    /// Appends `node` to the current block at the current bci.
    pub(super) fn append(&mut self, node: Node) -> Result<ValueId, BailoutReason> {
        self.append_at(node, self.bci)
    }

    /// Appends `node` to the current block.
    ///
    /// The node is canonicalized and value numbered first; if an existing value
    /// replaces it, nothing is appended and that value is returned. Nodes that can
    /// trap get a state snapshot and their exception handlers.
    pub(super) fn append_at(&mut self, node: Node, bci: i32) -> Result<ValueId, BailoutReason> {
        let mut node = node;
        node.bci = bci;
        if self.config.canonicalize_nodes {
            match Canonicalizer::new(&self.graph, self.db).canonicalize(node) {
                Canonical::Existing(value) => return Ok(value),
                Canonical::Node(simplified) => node = simplified,
            }
            node.bci = bci;
        }
        if self.config.use_local_value_numbering {
            if let Some(value) = self.vmap.find(&node) {
                return Ok(value);
            }
        }

        self.instruction_count += 1;
        if self.instruction_count > self.config.instruction_count_cutoff {
            return Err(BailoutReason::TooLarge);
        }

        let can_trap = node.can_trap();
        if can_trap && node.state_before.is_none() {
            node.state_before = Some(self.copy_state_before());
        }
        node.block = Some(self.block);
        let is_end = node.instr.is_block_end();
        let has_state_after = node.instr.has_state_after();
        let kills_memory = matches!(node.instr, Instruction::Invoke { .. });

        let id = self.graph.add_node(node);
        if is_end {
            self.graph.block_mut(self.block).end = Some(id);
        } else {
            self.graph.block_mut(self.block).instructions.push(id);
        }
        if self.config.use_local_value_numbering {
            self.vmap.insert(self.graph.node(id), id);
        }
        if has_state_after {
            let after = self.graph.add_state(self.state.copy(StateKind::StateAfter, bci));
            self.graph.node_mut(id).state_after = Some(after);
        }
        if kills_memory {
            self.memory.kill();
        }
        if can_trap {
            self.handle_exception(id)?;
        }
        Ok(id)
    }

    /// Snapshots the current state for a node about to be appended.
    pub(super) fn copy_state_before(&mut self) -> StateId {
        self.graph
            .add_state(self.state.copy(StateKind::StateBefore, self.bci))
    }

    /// Forgets every cached value; used after monitor operations.
    pub(super) fn kill_all(&mut self) {
        self.vmap.kill();
        self.memory.kill();
    }

    /// Joins the state of trapping node `node` into every handler that covers it,
    /// walking outwards through the inlining scopes until a catch-all is found.
    fn handle_exception(&mut self, node: ValueId) -> Result<(), BailoutReason> {
        let Some(before) = self.graph.node(node).state_before else {
            return Ok(());
        };
        if !self.scope.has_handler {
            let empty = self.graph.state(before).copy(StateKind::EmptyExceptionState, self.bci);
            let empty = self.graph.add_state(empty);
            self.graph.node_mut(node).exception_state = Some(empty);
            return Ok(());
        }

        let GraphBuilder {
            graph,
            scope,
            parents,
            config,
            block: current,
            ..
        } = self;
        let current = *current;
        let selective = config.selective_phi_functions;
        let before_state = graph.state(before);
        let mut cur_state = before_state.copy(StateKind::ExceptionState, before_state.bci);
        let exception_state = graph.add_state(cur_state.clone());

        let mut handlers = Vec::new();
        let mut level = parents.len();
        let mut scope_count = 0;
        'scopes: loop {
            let data = if level == parents.len() {
                &mut *scope
            } else {
                &mut parents[level]
            };
            for handler in data.handlers.clone() {
                if !handler.covers(cur_state.bci) {
                    continue;
                }
                let Some(entry) = handler.entry_block else {
                    continue;
                };
                if entry == current {
                    return Err(BailoutReason::HandlerCoversItself);
                }
                let phi_operand = graph.block(entry).predecessors.len();
                if !try_merge(
                    graph,
                    entry,
                    Some(current),
                    &cur_state,
                    &data.blocks.requires_phi,
                    selective,
                )? {
                    return Err(BailoutReason::ExceptionJoinFailed);
                }
                graph.block_mut(current).add_exception_handler(entry);
                data.add_to_work_list(graph, entry);
                let catch_all = handler.is_catch_all();
                handlers.push(XHandlerEdge {
                    handler,
                    phi_operand,
                    scope_count,
                });
                if catch_all {
                    break 'scopes;
                }
            }

            // Subroutine copies already carried the handlers of their method.
            while level > 0 && level_data(scope, parents, level).is_subroutine() {
                level -= 1;
            }
            if level == 0 {
                break;
            }
            let Some(caller) = cur_state.caller else {
                break;
            };
            let caller = graph.state(caller);
            cur_state = caller.copy(StateKind::ExceptionState, caller.bci);
            level -= 1;
            scope_count += 1;
        }

        let exception_state = if handlers.is_empty() {
            let empty = graph
                .state(exception_state)
                .copy(StateKind::EmptyExceptionState, graph.state(exception_state).bci);
            graph.add_state(empty)
        } else {
            exception_state
        };
        let node = graph.node_mut(node);
        node.exception_state = Some(exception_state);
        node.exception_handlers = handlers
            .into_iter()
            .map(|edge| {
                let mut handler = edge.handler;
                handler.phi_operand = Some(edge.phi_operand);
                handler.scope_count = edge.scope_count;
                handler
            })
            .collect();
        Ok(())
    }

    /// Builds the block that loads the interpreter's locals on OSR entry and jumps to
    /// `target`, the block at the OSR bci.
    fn setup_osr_entry_block(&mut self, target: BlockId) -> Result<(), BailoutReason> {
        let bci = self.graph.block(target).bci;
        let target_state = self
            .graph
            .block(target)
            .state
            .clone()
            .ok_or(BailoutReason::OsrEntryNotVisited)?;

        let osr = self.graph.add_block(bci, self.scope.scope);
        {
            let block = self.graph.block_mut(osr);
            block.flags |= BlockFlags::OSR_ENTRY | BlockFlags::WAS_VISITED;
            block.depth_first_number = 0;
            let mut entry = target_state.copy(StateKind::BlockBegin, bci);
            entry.clear_locals();
            block.state = Some(entry);
        }
        self.graph.osr_entry = Some(osr);

        self.kill_all();
        self.block = osr;
        self.bci = bci;
        self.state = target_state.copy(StateKind::Parsing, bci);
        self.append(Node::new(Instruction::OsrEntry, ValueType::Address).with_flags(NodeFlags::PINNED))?;

        let mut index = 0;
        while index < target_state.locals_size() {
            let Some(value) = target_state.local(index) else {
                index += 1;
                continue;
            };
            let ty = self.graph.ty(value);
            if ty == ValueType::Illegal {
                index += 1;
                continue;
            }
            let local = self.append(Node::new(Instruction::OsrLocal { index }, ty))?;
            self.state.store_local(index, local, |v| self.graph.ty(v));
            index += ty.size();
        }

        self.append(Node::new(Instruction::Goto { target }, ValueType::Void))?;
        self.graph.block_mut(osr).add_successor(target);
        if !try_merge(
            &mut self.graph,
            target,
            Some(osr),
            &self.state,
            &self.scope.blocks.requires_phi,
            self.config.selective_phi_functions,
        )? {
            return Err(BailoutReason::BlockJoinFailed);
        }
        debug!(target: "jitfront::builder", bci, block = %osr, "osr entry built");
        Ok(())
    }

    /// Pushes a callee or subroutine scope; the current scope becomes its parent.
    pub(super) fn push_scope(&mut self, data: ScopeData) {
        let parent = mem::replace(&mut self.scope, data);
        self.parents.push(parent);
    }

    /// Pops the current scope and returns its data.
    pub(super) fn pop_scope(&mut self) -> Result<ScopeData, BailoutReason> {
        let parent = self
            .parents
            .pop()
            .ok_or_else(|| malformed("scope stack underflow"))?;
        Ok(mem::replace(&mut self.scope, parent))
    }

    /// Adds a scope entry to the graph for a callee of the current scope.
    pub(super) fn add_callee_scope(&mut self, method: MethodId) -> (ScopeId, usize) {
        let caller = self.scope.scope;
        let level = self.graph.scope(caller).level + 1;
        let scope = self.graph.add_scope(IrScope {
            method,
            caller: Some(caller),
            caller_bci: self.bci,
            level,
        });
        (scope, level)
    }
}

/// A handler edge found while walking the scopes, before it is stored on the node.
struct XHandlerEdge {
    handler: XHandler,
    phi_operand: usize,
    scope_count: usize,
}

fn level_data<'s>(scope: &'s ScopeData, parents: &'s [ScopeData], level: usize) -> &'s ScopeData {
    parents.get(level).unwrap_or(scope)
}

/// Creates the data of the root scope: decoded bytecode and block map.
fn root_scope(
    graph: &mut Graph,
    config: &CompilerConfig,
    method: MethodId,
    root: &Method,
    osr_bci: Option<u32>,
) -> Result<ScopeData, BailoutReason> {
    if !root.has_code() {
        return Err(malformed("method has no bytecode"));
    }
    if usize::from(root.max_locals) < root.arg_slots() {
        return Err(malformed("parameters exceed max_locals"));
    }
    let code = Rc::new(DecodedCode::decode(&root.code)?);
    let scope = graph.add_scope(IrScope {
        method,
        caller: None,
        caller_bci: -1,
        level: 0,
    });
    let blocks = BlockListBuilder::build(
        graph,
        &code,
        scope,
        usize::from(root.max_locals),
        &root.handlers,
        osr_bci,
        true,
    )?;
    Ok(ScopeData::method(
        scope,
        method,
        code,
        blocks,
        false,
        config.max_inline_size,
    ))
}

fn bail(reason: BailoutReason, graph: Graph, instruction_count: usize) -> Error {
    warn!(target: "jitfront::builder", %reason, instruction_count, "compilation bailed out");
    Error::Bailout(Box::new(Bailout {
        reason,
        graph,
        instruction_count,
    }))
}

pub(super) fn malformed(message: impl Into<String>) -> BailoutReason {
    BailoutReason::MalformedBytecode(message.into())
}
