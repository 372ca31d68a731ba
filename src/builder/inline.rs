//! Calls, returns and subroutines.
//!
//! A call whose target is statically bound is inlined when the callee passes the
//! size, depth and recursion limits of [`CompilerConfig`]: the callee's blocks are
//! discovered in a fresh scope, its parameters are taken straight from the caller's
//! popped arguments and each of its returns jumps to one continuation block in the
//! caller. A callee with exactly one return that ends in the block the call started
//! in is spliced without any jump at all.
//!
//! `jsr` is handled the same way: the subroutine is parsed in a nested scope with a
//! private copy of the block map, so every call site gets its own copy of the
//! subroutine's blocks, and each `ret` becomes a jump back to the call site.

use std::{mem, rc::Rc};

use strum::Display;
use tracing::{debug, trace};

use crate::{
    builder::{
        driver::malformed,
        merge::try_merge,
        scope::{Cleanup, ScopeData},
        BlockListBuilder, GraphBuilder,
    },
    bytecode::{DecodedCode, Insn, Operand},
    config::UnresolvedPolicy,
    database::{Method, MethodId, MethodRef},
    error::BailoutReason,
    ir::{
        BasicType, BlockFlags, BlockId, ConstValue, Instruction, InvokeKind, LogicOp, Node,
        NodeFlags, ShiftOp, StateId, StateKind, ValueId, ValueStack, ValueType, XHandler,
    },
    CompilerConfig,
};

/// Why a call was not inlined.
///
/// Rejections are ordinary outcomes: the call is compiled as an invoke and the compile
/// goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[allow(missing_docs)]
pub enum InlineRejection {
    #[strum(to_string = "inlining disabled")]
    Disabled,
    #[strum(to_string = "callee not resolved")]
    Unresolved,
    #[strum(to_string = "no static binding")]
    NotBindable,
    #[strum(to_string = "callee unknown to the database")]
    UnknownCallee,
    #[strum(to_string = "callee has no bytecode")]
    NoCode,
    #[strum(to_string = "callee bytecode is malformed")]
    MalformedCode,
    #[strum(to_string = "callee has exception handlers")]
    HasExceptionHandlers,
    #[strum(to_string = "callee is synchronized")]
    Synchronized,
    #[strum(to_string = "callee's klass not initialized yet")]
    HolderNotInitialized,
    #[strum(to_string = "callee has jsr/ret")]
    HasSubroutines,
    #[strum(to_string = "receiver is the null constant")]
    NullReceiver,
    #[strum(to_string = "inlining too deep")]
    TooDeep,
    #[strum(to_string = "recursive inlining too deep")]
    RecursiveTooDeep,
    #[strum(to_string = "callee is too large")]
    TooLarge,
    #[strum(to_string = "callee uses too much stack")]
    StackTooLarge,
    #[strum(to_string = "inlining budget exhausted")]
    BudgetExhausted,
}

/// Result of one inlining decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineOutcome {
    /// The callee was parsed into the caller's graph.
    Inlined,
    /// The call was kept.
    Rejected(InlineRejection),
}

/// One call site the builder considered for inlining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineDecision {
    /// Method containing the call.
    pub caller: MethodId,
    /// Bound target, if the call could be bound at all.
    pub callee: Option<MethodId>,
    /// Name of the called method.
    pub callee_name: String,
    /// Bci of the call in the caller.
    pub bci: i32,
    /// Inlining level of the caller; 0 for the method being compiled.
    pub level: usize,
    /// Whether the callee was inlined, and why not.
    pub outcome: InlineOutcome,
}

/// An entity the database could not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedKind {
    /// A field, by name.
    Field(String),
    /// A method, by name.
    Method(String),
    /// A class, by name.
    Class(String),
    /// An `ldc` constant of an unloaded class, by constant pool index.
    Constant(u16),
}

/// A request to recompile once an unresolved entity is available.
///
/// Only recorded under [`UnresolvedPolicy::DeferRecompile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecompileHint {
    /// Method whose bytecode references the entity.
    pub method: MethodId,
    /// Bci of the referencing bytecode.
    pub bci: i32,
    /// The unresolved entity.
    pub kind: UnresolvedKind,
}

impl GraphBuilder<'_> {
    pub(super) fn note_unresolved(&mut self, kind: UnresolvedKind) {
        trace!(
            target: "jitfront::builder",
            method = %self.scope.method,
            bci = self.bci,
            ?kind,
            "unresolved reference"
        );
        if self.config.unresolved_policy == UnresolvedPolicy::DeferRecompile {
            self.recompile_hints.push(RecompileHint {
                method: self.scope.method,
                bci: self.bci,
                kind,
            });
        }
    }

    /// Translates an invoke bytecode, inlining the target when possible.
    pub(super) fn invoke(&mut self, kind: InvokeKind, index: u16) -> Result<(), BailoutReason> {
        let method_ref = self
            .db
            .resolve_method(self.scope.method, index)
            .ok_or_else(|| malformed(format!("unknown method reference {index}")))?;
        let before = self.copy_state_before();

        let args = self
            .state
            .pop_arguments(method_ref.signature.param_slots())
            .ok_or(BailoutReason::StackUnderflow(self.bci))?;
        let types_match = args.len() == method_ref.signature.params.len()
            && args
                .iter()
                .zip(&method_ref.signature.params)
                .all(|(&arg, param)| self.graph.ty(arg) == param.value_type());
        if !types_match {
            return Err(BailoutReason::TypeMismatch(self.bci));
        }
        let receiver = match kind {
            InvokeKind::Static => None,
            _ => Some(self.pop(ValueType::Object)?),
        };

        let target = self.bind(kind, &method_ref);
        let decision = if !method_ref.is_resolved() {
            self.note_unresolved(UnresolvedKind::Method(method_ref.name.clone()));
            Err(InlineRejection::Unresolved)
        } else if !self.config.enable_inlining {
            Err(InlineRejection::Disabled)
        } else {
            target.ok_or(InlineRejection::NotBindable)
        };

        let outcome = match decision {
            Ok(callee) => match self.inline_policy(callee, &method_ref, receiver) {
                Ok(code) => {
                    self.inline_full(callee, code, receiver, &args, before)?;
                    InlineOutcome::Inlined
                }
                Err(rejection) => InlineOutcome::Rejected(rejection),
            },
            Err(rejection) => InlineOutcome::Rejected(rejection),
        };
        self.record_decision(target, &method_ref.name, outcome);
        if outcome == InlineOutcome::Inlined {
            return Ok(());
        }

        let flags = if method_ref.is_resolved() {
            NodeFlags::empty()
        } else {
            NodeFlags::NEEDS_PATCHING
        };
        let ret = method_ref.signature.ret.value_type();
        let declared = method_ref.signature.ret_class;
        let result = self.append(
            Node::new(
                Instruction::Invoke {
                    kind,
                    method: Box::new(method_ref),
                    receiver,
                    args,
                },
                ret,
            )
            .with_declared(declared)
            .with_flags(flags)
            .with_state_before(before),
        )?;
        if ret != ValueType::Void {
            self.push(ret, result);
        }
        Ok(())
    }

    /// Returns the method a call always dispatches to, if that is known.
    fn bind(&self, kind: InvokeKind, method_ref: &MethodRef) -> Option<MethodId> {
        let target = method_ref.target?;
        match kind {
            InvokeKind::Static | InvokeKind::Special => Some(target),
            _ if method_ref.is_final => Some(target),
            _ => self.db.find_monomorphic_target(target),
        }
    }

    fn record_decision(&mut self, callee: Option<MethodId>, name: &str, outcome: InlineOutcome) {
        let level = self.graph.scope(self.scope.scope).level;
        match outcome {
            InlineOutcome::Inlined => {
                debug!(target: "jitfront::inline", callee = name, bci = self.bci, level, "inlined");
            }
            InlineOutcome::Rejected(reason) => {
                debug!(target: "jitfront::inline", callee = name, bci = self.bci, level, %reason, "not inlined");
            }
        }
        self.inlining.push(InlineDecision {
            caller: self.scope.method,
            callee,
            callee_name: name.to_string(),
            bci: self.bci,
            level,
            outcome,
        });
    }

    /// Applies the inlining limits to a bound callee and decodes its bytecode.
    ///
    /// A callee that cannot be inlined only rejects the inline; the call is kept.
    fn inline_policy(
        &self,
        callee_id: MethodId,
        method_ref: &MethodRef,
        receiver: Option<ValueId>,
    ) -> Result<Rc<DecodedCode>, InlineRejection> {
        let callee = self
            .db
            .method(callee_id)
            .ok_or(InlineRejection::UnknownCallee)?;
        let config: &CompilerConfig = self.config;
        let level = self.graph.scope(self.scope.scope).level + 1;

        let rejection = if !callee.has_code() {
            Some(InlineRejection::NoCode)
        } else if !callee.handlers.is_empty() && !config.inline_methods_with_exception_handlers {
            Some(InlineRejection::HasExceptionHandlers)
        } else if callee.is_synchronized() && !config.inline_synchronized_methods {
            Some(InlineRejection::Synchronized)
        } else if callee.is_static() && !method_ref.holder_initialized() {
            Some(InlineRejection::HolderNotInitialized)
        } else if receiver.is_some_and(|r| self.graph.constant(r) == Some(ConstValue::Null)) {
            Some(InlineRejection::NullReceiver)
        } else if level > config.max_inline_level {
            Some(InlineRejection::TooDeep)
        } else if self.recursion_count(callee_id) > config.max_recursive_inline_level {
            Some(InlineRejection::RecursiveTooDeep)
        } else if callee.code_size() > self.scope.max_inline_size {
            Some(InlineRejection::TooLarge)
        } else if self.recursion_count(callee_id) == 0
            && (usize::from(callee.max_stack) + usize::from(callee.max_locals))
                .saturating_sub(callee.arg_slots())
                > config.inline_stack_limit
        {
            Some(InlineRejection::StackTooLarge)
        } else if self.inlined_bytes + callee.code_size() > config.desired_method_limit {
            Some(InlineRejection::BudgetExhausted)
        } else {
            None
        };
        if let Some(rejection) = rejection {
            return Err(rejection);
        }

        // Decoded last, so oversized callees are never decoded.
        let code = DecodedCode::decode(&callee.code).map_err(|error| {
            debug!(
                target: "jitfront::inline",
                callee = %callee_id,
                %error,
                "callee bytecode does not decode"
            );
            InlineRejection::MalformedCode
        })?;
        if code.has_subroutines() {
            return Err(InlineRejection::HasSubroutines);
        }
        Ok(Rc::new(code))
    }

    /// Counts the scopes on the current inlining chain that parse `method`.
    fn recursion_count(&self, method: MethodId) -> usize {
        let mut count = 0;
        let mut scope = Some(self.scope.scope);
        while let Some(id) = scope {
            let ir_scope = self.graph.scope(id);
            if ir_scope.method == method {
                count += 1;
            }
            scope = ir_scope.caller;
        }
        count
    }

    /// Parses `callee_id` into the current block.
    fn inline_full(
        &mut self,
        callee_id: MethodId,
        code: Rc<DecodedCode>,
        receiver: Option<ValueId>,
        args: &[ValueId],
        before: StateId,
    ) -> Result<(), BailoutReason> {
        let db = self.db;
        let callee: &Method = db
            .method(callee_id)
            .ok_or(BailoutReason::UnknownMethod(callee_id))?;
        let caller_bci = self.bci;
        let next_bci = self
            .scope
            .code
            .at(caller_bci as u32)
            .map(Insn::next_bci)
            .ok_or_else(|| malformed("call outside of the method"))?;

        if let Some(receiver) = receiver {
            if !self.is_non_null(receiver) {
                self.append(
                    Node::new(Instruction::NullCheck { object: receiver }, ValueType::Object)
                        .with_state_before(before),
                )?;
            }
        }

        let orig_block = self.block;
        let cont = match self.block_at(next_bci as i32) {
            Some(block) => block,
            None => {
                let block = self.graph.add_block(next_bci as i32, self.scope.scope);
                let cont = self.graph.block_mut(block);
                cont.flags |= BlockFlags::CONTINUATION;
                cont.depth_first_number = 0;
                block
            }
        };

        let max_locals = usize::from(callee.max_locals);
        let (scope, level) = self.add_callee_scope(callee_id);
        let mut blocks = BlockListBuilder::build(
            &mut self.graph,
            &code,
            scope,
            max_locals,
            &callee.handlers,
            None,
            false,
        )?;
        let start = blocks
            .block_at(0)
            .ok_or_else(|| malformed("callee has no entry block"))?;
        let start_is_loop = self.graph.block(start).is_set(BlockFlags::LOOP_HEADER);
        if !start_is_loop {
            // The entry is parsed straight into the caller's block.
            blocks.set_block_at(0, None);
        }

        let caller_state = self
            .graph
            .add_state(self.state.copy(StateKind::CallerState, caller_bci));
        let mut callee_state = ValueStack::new(scope, max_locals, Some(caller_state));
        let mut index = 0;
        for &arg in receiver.iter().chain(args) {
            if !callee_state.store_local(index, arg, |v| self.graph.ty(v)) {
                return Err(malformed(format!("arguments of {} exceed max_locals", callee.name)));
            }
            index += self.graph.ty(arg).size();
        }

        let max_inline_size = self
            .config
            .inline_size_for_level(self.scope.max_inline_size, level);
        let mut data = ScopeData::method(
            scope,
            callee_id,
            code,
            blocks,
            self.scope.has_handler,
            max_inline_size,
        );
        data.continuation = Some(cont);
        self.push_scope(data);
        self.state = callee_state;
        self.bci = -1;
        self.state.bci = -1;

        let sync_block = if callee.is_synchronized() {
            Some(self.enter_synchronized(callee, receiver)?)
        } else {
            None
        };

        if start_is_loop {
            self.bci = 0;
            self.append(Node::new(Instruction::Goto { target: start }, ValueType::Void))?;
            let block = self.block;
            self.graph.block_mut(block).add_successor(start);
            if !try_merge(
                &mut self.graph,
                start,
                Some(block),
                &self.state,
                &self.scope.blocks.requires_phi,
                self.config.selective_phi_functions,
            )? {
                return Err(BailoutReason::BlockJoinFailed);
            }
            self.scope.add_to_work_list(&mut self.graph, start);
            self.iterate_all_blocks(false)?;
        } else {
            self.iterate_all_blocks(true)?;
        }

        let elided = if self.scope.num_returns == 1 && self.block == orig_block {
            match self.scope.cleanup.take() {
                Some(Cleanup { block, state }) if block == orig_block => Some(state),
                _ => None,
            }
        } else {
            None
        };
        if elided.is_some() {
            self.graph.block_mut(orig_block).end = None;
        } else {
            let pending = mem::take(&mut self.scope.pending_returns);
            let requires_phi = &self
                .parents
                .last()
                .ok_or_else(|| malformed("callee without caller"))?
                .blocks
                .requires_phi;
            for (block, state) in pending {
                self.graph.block_mut(block).add_successor(cont);
                if !try_merge(
                    &mut self.graph,
                    cont,
                    Some(block),
                    &state,
                    requires_phi,
                    self.config.selective_phi_functions,
                )? {
                    return Err(BailoutReason::BlockJoinFailed);
                }
            }
        }

        match sync_block {
            Some(sync) if self.graph.block(sync).state.is_some() => {
                self.fill_sync_handler(sync, caller_bci)?;
            }
            _ => {
                self.pop_scope()?;
            }
        }

        self.bci = caller_bci;
        if let Some(mut state) = elided {
            state.bci = caller_bci;
            self.state = state;
            self.skip_block = false;
        } else {
            let entry = self.graph.block(cont);
            if entry.state.is_some() && !entry.is_set(BlockFlags::WAS_VISITED) {
                self.scope.add_to_work_list(&mut self.graph, cont);
            }
            self.skip_block = true;
        }
        self.inlined_bytes += callee.code_size();
        trace!(
            target: "jitfront::inline",
            callee = %callee.name,
            elided = !self.skip_block,
            inlined_bytes = self.inlined_bytes,
            "callee parsed"
        );
        Ok(())
    }

    /// Locks the monitor of a synchronized callee and installs the catch-all handler
    /// that releases it. Returns the handler's entry block.
    fn enter_synchronized(
        &mut self,
        callee: &Method,
        receiver: Option<ValueId>,
    ) -> Result<BlockId, BailoutReason> {
        let object = match receiver {
            Some(receiver) => receiver,
            None => {
                let holder = callee
                    .holder
                    .ok_or_else(|| malformed("synchronized static method without holder"))?;
                self.constant(ConstValue::Class(holder))?
            }
        };
        self.scope.sync_lock = Some(object);
        let before = self.copy_state_before();
        self.monitor_enter(object, before, -1)?;

        let sync = self.graph.add_block(-1, self.scope.scope);
        self.graph.block_mut(sync).flags |= BlockFlags::EXCEPTION_ENTRY | BlockFlags::ON_WORK_LIST;
        self.scope.handlers.push(XHandler::synchronization(sync));
        self.scope.has_handler = true;
        Ok(sync)
    }

    /// Parses the synchronization handler of an inlined callee: release the monitor
    /// and rethrow in the caller. Pops the callee scope.
    fn fill_sync_handler(&mut self, sync: BlockId, caller_bci: i32) -> Result<(), BailoutReason> {
        let saved_block = self.block;
        let saved_state = self.state.clone();

        self.scope.handlers.pop();
        let entry = self.graph.block_mut(sync);
        entry.flags |= BlockFlags::WAS_VISITED;
        let state = entry
            .state
            .as_ref()
            .ok_or(BailoutReason::ExceptionJoinFailed)?
            .copy(StateKind::Parsing, -1);
        self.block = sync;
        self.state = state;
        self.bci = -1;
        self.kill_all();

        let exception = self.append(
            Node::new(Instruction::ExceptionObject, ValueType::Object).with_flags(NodeFlags::PINNED),
        )?;
        let lock = self
            .scope
            .sync_lock
            .ok_or_else(|| malformed("synchronized callee without lock"))?;
        self.monitor_exit(lock, -1)?;

        self.pop_scope()?;
        let caller = self
            .state
            .caller
            .ok_or_else(|| malformed("callee state without caller"))?;
        self.state = self.graph.state(caller).copy(StateKind::Parsing, caller_bci);
        self.bci = caller_bci;
        self.push(ValueType::Object, exception);
        let before = self.copy_state_before();
        let exception = self.pop(ValueType::Object)?;
        self.append(
            Node::new(Instruction::Throw { exception }, ValueType::Void).with_state_before(before),
        )?;

        self.block = saved_block;
        self.state = saved_state;
        Ok(())
    }

    /// Returns the data of the innermost method scope, looking through subroutines.
    fn method_scope_mut(&mut self) -> Result<&mut ScopeData, BailoutReason> {
        if !self.scope.is_subroutine() {
            return Ok(&mut self.scope);
        }
        self.parents
            .iter_mut()
            .rev()
            .find(|data| !data.is_subroutine())
            .ok_or_else(|| malformed("subroutine outside of a method"))
    }

    /// Translates a return; in an inlined callee it becomes a jump to the
    /// continuation.
    pub(super) fn method_return(&mut self, value: Option<ValueId>) -> Result<(), BailoutReason> {
        let method = self
            .db
            .method(self.scope.method)
            .ok_or(BailoutReason::UnknownMethod(self.scope.method))?;
        let value = match value {
            Some(value) => Some(self.narrow_return(value, method.signature.ret)?),
            None => None,
        };

        if method.is_synchronized() {
            let lock = self
                .state
                .locks()
                .first()
                .copied()
                .ok_or(BailoutReason::MonitorUnderflow)?;
            self.monitor_exit(lock, self.bci)?;
        }

        let Some(cont) = self.scope.continuation else {
            self.state.clear_stack();
            self.append(Node::new(Instruction::Return { value }, ValueType::Void))?;
            return Ok(());
        };

        let caller = self
            .state
            .caller
            .ok_or_else(|| malformed("callee state without caller"))?;
        let caller_state = self.graph.state(caller);
        let mut state = caller_state.copy(StateKind::Parsing, caller_state.bci);
        if let Some(value) = value {
            state.push(value, self.graph.ty(value).size());
        }
        self.state = state;

        let block = self.block;
        let state = self.state.clone();
        let data = self.method_scope_mut()?;
        if data.num_returns == 0 {
            data.cleanup = Some(Cleanup {
                block,
                state: state.clone(),
            });
        }
        data.num_returns += 1;
        data.pending_returns.push((block, state));

        let cont_bci = self.graph.block(cont).bci;
        self.append_at(Node::new(Instruction::Goto { target: cont }, ValueType::Void), cont_bci)?;
        Ok(())
    }

    /// Applies the implicit narrowing of a sub-int return type.
    fn narrow_return(&mut self, value: ValueId, ret: BasicType) -> Result<ValueId, BailoutReason> {
        match ret {
            BasicType::Byte => self.sign_narrow(value, 24),
            BasicType::Short => self.sign_narrow(value, 16),
            BasicType::Char => self.mask(value, 0xffff),
            BasicType::Boolean => self.mask(value, 1),
            _ => Ok(value),
        }
    }

    fn sign_narrow(&mut self, value: ValueId, bits: i32) -> Result<ValueId, BailoutReason> {
        let count = self.constant(ConstValue::Int(bits))?;
        let shifted = self.append(Node::new(
            Instruction::Shift {
                op: ShiftOp::Shl,
                x: value,
                y: count,
            },
            ValueType::Int,
        ))?;
        self.append(Node::new(
            Instruction::Shift {
                op: ShiftOp::Shr,
                x: shifted,
                y: count,
            },
            ValueType::Int,
        ))
    }

    fn mask(&mut self, value: ValueId, mask: i32) -> Result<ValueId, BailoutReason> {
        let mask = self.constant(ConstValue::Int(mask))?;
        self.append(Node::new(
            Instruction::Logic {
                op: LogicOp::And,
                x: value,
                y: mask,
            },
            ValueType::Int,
        ))
    }

    /// Tracks which local holds the return address of the subroutine being parsed.
    pub(super) fn track_return_address(
        &mut self,
        index: usize,
        value: ValueId,
    ) -> Result<(), BailoutReason> {
        let scope = self.scope.scope;
        let is_address = self.graph.ty(value) == ValueType::Address;
        let Some(sub) = self.scope.subroutine.as_mut() else {
            return Ok(());
        };
        if is_address {
            sub.return_address_local = Some(index);
            let overwritten = self
                .parents
                .iter()
                .rev()
                .take_while(|data| data.is_subroutine() && data.scope == scope)
                .filter_map(|data| data.subroutine.as_ref())
                .any(|parent| parent.return_address_local == Some(index));
            if overwritten {
                return Err(BailoutReason::ReturnAddressOverwritten);
            }
        } else if sub.return_address_local == Some(index) {
            sub.return_address_local = None;
        }
        Ok(())
    }

    /// Parses the subroutine a `jsr` calls as a nested scope.
    pub(super) fn jsr(&mut self, insn: &Insn) -> Result<(), BailoutReason> {
        let Operand::Branch(dest) = insn.operand else {
            return Err(malformed("jsr without target"));
        };
        let dest = dest as i32;
        let scope = self.scope.scope;
        let reentrant = std::iter::once(&self.scope)
            .chain(self.parents.iter().rev())
            .take_while(|data| data.scope == scope)
            .filter_map(|data| data.subroutine.as_ref())
            .any(|sub| sub.entry_bci == dest);
        if reentrant {
            return Err(BailoutReason::ReentrantSubroutine);
        }

        let next_bci = insn.next_bci();
        let address = self.constant(ConstValue::Address(next_bci))?;
        self.push(ValueType::Address, address);
        let cont = self.block_for(next_bci)?;

        let handlers = self.scope.handlers.clone();
        let data = ScopeData::subroutine(&self.scope, dest, cont);
        self.push_scope(data);
        let mut cloned = Vec::with_capacity(handlers.len());
        for mut handler in handlers {
            if handler.handler_bci >= 0 {
                handler.entry_block = self.block_at(handler.handler_bci);
            }
            cloned.push(handler);
        }
        self.scope.handlers = cloned;

        let start = self
            .block_at(dest)
            .ok_or_else(|| malformed(format!("no block at jsr target {dest}")))?;
        self.append(Node::new(Instruction::Goto { target: start }, ValueType::Void))?;
        let block = self.block;
        self.graph.block_mut(block).add_successor(start);
        if !try_merge(
            &mut self.graph,
            start,
            Some(block),
            &self.state,
            &self.scope.blocks.requires_phi,
            self.config.selective_phi_functions,
        )? {
            return Err(BailoutReason::BlockJoinFailed);
        }
        self.scope.add_to_work_list(&mut self.graph, start);
        trace!(target: "jitfront::builder", entry = dest, %start, "parsing subroutine");
        self.iterate_all_blocks(false)?;

        self.pop_scope()?;
        let entry = self.graph.block(cont);
        if entry.state.is_some() && !entry.is_set(BlockFlags::WAS_VISITED) {
            self.scope.add_to_work_list(&mut self.graph, cont);
        }
        self.skip_block = true;
        Ok(())
    }

    /// Translates `ret` into a jump to the continuation of the active `jsr`.
    pub(super) fn ret(&mut self, index: u16) -> Result<(), BailoutReason> {
        let sub = self
            .scope
            .subroutine
            .as_ref()
            .ok_or(BailoutReason::RetOutsideSubroutine)?;
        if sub.return_address_local != Some(usize::from(index)) {
            return Err(BailoutReason::ComplicatedRet);
        }
        let target = sub.continuation;
        self.append(Node::new(Instruction::Goto { target }, ValueType::Void))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        assert_eq!(InlineRejection::TooLarge.to_string(), "callee is too large");
        assert_eq!(
            InlineRejection::HolderNotInitialized.to_string(),
            "callee's klass not initialized yet"
        );
        assert_eq!(InlineRejection::NullReceiver.to_string(), "receiver is the null constant");
    }
}
