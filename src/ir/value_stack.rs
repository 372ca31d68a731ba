//! Abstract interpreter state.
//!
//! A [`ValueStack`] is the symbolic frame at one program point: the operand stack,
//! the local variable array and the monitors held. While a block is being parsed the
//! builder mutates one working copy; whenever a snapshot must outlive the current
//! point (the state before a trapping node, the state handed to an exception handler,
//! the entry state of a block) a copy is taken and stored in the graph, after which
//! it is never mutated.
//!
//! # Slot Layout
//!
//! `long` and `double` values occupy two slots. The value sits in the lower slot and
//! the upper slot holds `None`, so the second half of a two-slot value can never be
//! read as a value on its own:
//!
//! ```text
//! stack:  [ v3 | v7 | None ]      v7 is a long
//! locals: [ v1 | v9 | None | None ]
//! ```
//!
//! # Inlining
//!
//! Snapshots taken inside an inlined callee link to the caller's state at the call
//! site through [`ValueStack::caller`], giving the back end the full virtual frame
//! chain for deoptimization.

use crate::ir::{ScopeId, StateId, ValueId, ValueType};

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum StateKind {
    /// The builder's working state.
    Parsing,
    /// State before a node that can trap or needs patching.
    StateBefore,
    /// State after a call, allocation or monitor operation.
    StateAfter,
    /// State handed to an exception handler; the operand stack is empty.
    ExceptionState,
    /// Exception state for a node with no local handler; only locks survive.
    EmptyExceptionState,
    /// Caller frame of an inlined callee.
    CallerState,
    /// Entry state of a block.
    BlockBegin,
}

/// A symbolic interpreter frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueStack {
    /// Inlining scope the state belongs to.
    pub scope: ScopeId,
    /// Bytecode index the snapshot describes; -1 for synthetic states.
    pub bci: i32,
    /// Snapshot purpose.
    pub kind: StateKind,
    /// Caller frame when parsing an inlined callee.
    pub caller: Option<StateId>,
    locals: Vec<Option<ValueId>>,
    stack: Vec<Option<ValueId>>,
    locks: Vec<ValueId>,
}

impl ValueStack {
    /// Creates a state with `max_locals` empty locals and an empty stack.
    #[must_use]
    pub fn new(scope: ScopeId, max_locals: usize, caller: Option<StateId>) -> Self {
        ValueStack {
            scope,
            bci: -1,
            kind: StateKind::Parsing,
            caller,
            locals: vec![None; max_locals],
            stack: Vec::new(),
            locks: Vec::new(),
        }
    }

    /// Returns a snapshot of kind `kind` at `bci`.
    ///
    /// Exception states drop the operand stack; empty exception states also drop the
    /// locals, keeping only the lock list and the caller link.
    #[must_use]
    pub fn copy(&self, kind: StateKind, bci: i32) -> Self {
        let mut copy = self.clone();
        copy.kind = kind;
        copy.bci = bci;
        match kind {
            StateKind::ExceptionState => copy.stack.clear(),
            StateKind::EmptyExceptionState => {
                copy.stack.clear();
                copy.locals.iter_mut().for_each(|slot| *slot = None);
            }
            _ => {}
        }
        copy
    }

    /// Returns `true` if `other` has the same shape: scope, stack depth, locals size
    /// and lock depth.
    #[must_use]
    pub fn is_same_shape(&self, other: &ValueStack) -> bool {
        self.scope == other.scope
            && self.stack.len() == other.stack.len()
            && self.locals.len() == other.locals.len()
            && self.locks.len() == other.locks.len()
    }

    /// Returns the number of local slots.
    #[must_use]
    pub fn locals_size(&self) -> usize {
        self.locals.len()
    }

    /// Returns the local slots.
    #[must_use]
    pub fn locals(&self) -> &[Option<ValueId>] {
        &self.locals
    }

    /// Returns the value in local `index`, if any.
    #[must_use]
    pub fn local(&self, index: usize) -> Option<ValueId> {
        self.locals.get(index).copied().flatten()
    }

    /// Overwrites local `index` without any two-slot bookkeeping.
    pub fn set_local(&mut self, index: usize, value: Option<ValueId>) {
        if let Some(slot) = self.locals.get_mut(index) {
            *slot = value;
        }
    }

    /// Stores `value` into local `index`.
    ///
    /// A two-slot value also clears `index + 1`; overwriting the upper half of a
    /// two-slot value in `index - 1` invalidates it. `ty` reports the type of the
    /// values involved. Returns `false` if the slots are out of range.
    pub fn store_local(
        &mut self,
        index: usize,
        value: ValueId,
        ty: impl Fn(ValueId) -> ValueType,
    ) -> bool {
        let size = ty(value).size().max(1);
        if index + size > self.locals.len() {
            return false;
        }
        if index > 0 {
            if let Some(prev) = self.locals[index - 1] {
                if ty(prev).is_double_word() {
                    self.locals[index - 1] = None;
                }
            }
        }
        self.locals[index] = Some(value);
        if size == 2 {
            self.locals[index + 1] = None;
        }
        true
    }

    /// Clears local `index`.
    pub fn invalidate_local(&mut self, index: usize) {
        self.set_local(index, None);
    }

    /// Returns the operand stack depth in slots.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Returns `true` if the operand stack is empty.
    #[must_use]
    pub fn is_stack_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Returns the operand stack slots, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[Option<ValueId>] {
        &self.stack
    }

    /// Returns the value in stack slot `index`, counted from the bottom.
    #[must_use]
    pub fn stack_at(&self, index: usize) -> Option<ValueId> {
        self.stack.get(index).copied().flatten()
    }

    /// Overwrites stack slot `index`, counted from the bottom.
    pub fn set_stack_at(&mut self, index: usize, value: Option<ValueId>) {
        if let Some(slot) = self.stack.get_mut(index) {
            *slot = value;
        }
    }

    /// Pushes a value occupying `size` slots.
    pub fn push(&mut self, value: ValueId, size: usize) {
        self.stack.push(Some(value));
        if size == 2 {
            self.stack.push(None);
        }
    }

    /// Pops a value occupying `size` slots. Returns `None` on underflow or when the
    /// slots do not hold a value of that size.
    pub fn pop(&mut self, size: usize) -> Option<ValueId> {
        if size == 2 {
            if self.stack.last() != Some(&None) {
                return None;
            }
            self.stack.pop();
        }
        self.stack.pop().flatten()
    }

    /// Pushes one raw slot; used by the untyped stack manipulation bytecodes.
    pub fn raw_push(&mut self, slot: Option<ValueId>) {
        self.stack.push(slot);
    }

    /// Pops one raw slot. Returns `None` on underflow.
    pub fn raw_pop(&mut self) -> Option<Option<ValueId>> {
        self.stack.pop()
    }

    /// Pops `slots` stack slots of call arguments and returns the values, first
    /// argument first. Returns `None` on underflow.
    pub fn pop_arguments(&mut self, slots: usize) -> Option<Vec<ValueId>> {
        if slots > self.stack.len() {
            return None;
        }
        let start = self.stack.len() - slots;
        Some(self.stack.drain(start..).flatten().collect())
    }

    /// Truncates the operand stack to `size` slots.
    pub fn truncate_stack(&mut self, size: usize) {
        self.stack.truncate(size);
    }

    /// Empties the operand stack.
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Clears every local.
    pub fn clear_locals(&mut self) {
        self.locals.iter_mut().for_each(|slot| *slot = None);
    }

    /// Returns the objects of the held monitors, outermost first.
    #[must_use]
    pub fn locks(&self) -> &[ValueId] {
        &self.locks
    }

    /// Returns the number of held monitors.
    #[must_use]
    pub fn locks_size(&self) -> usize {
        self.locks.len()
    }

    /// Records a monitor acquisition on `object` and returns its lock slot.
    pub fn lock(&mut self, object: ValueId) -> usize {
        self.locks.push(object);
        self.locks.len() - 1
    }

    /// Releases the innermost monitor and returns its lock slot.
    pub fn unlock(&mut self) -> Option<usize> {
        self.locks.pop().map(|_| self.locks.len())
    }

    /// Rewrites every value the state refers to.
    pub fn map_values_mut(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()).flatten() {
            *slot = f(*slot);
        }
        for lock in &mut self.locks {
            *lock = f(*lock);
        }
    }

    /// Clears every local and stack slot holding a value for which `pred` is true.
    pub fn invalidate_values(&mut self, pred: impl Fn(ValueId) -> bool) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot.is_some_and(&pred) {
                *slot = None;
            }
        }
    }

    /// Returns every value the state refers to: locals, then stack, then locks.
    pub fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.locals
            .iter()
            .chain(self.stack.iter())
            .flatten()
            .copied()
            .chain(self.locks.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty_of(long: ValueId) -> impl Fn(ValueId) -> ValueType {
        move |v| {
            if v == long {
                ValueType::Long
            } else {
                ValueType::Int
            }
        }
    }

    #[test]
    fn test_two_slot_stack() {
        let mut state = ValueStack::new(ScopeId::new(0), 0, None);
        state.push(ValueId::new(1), 1);
        state.push(ValueId::new(2), 2);
        assert_eq!(state.stack_size(), 3);
        // The upper half is not a one-slot value.
        assert_eq!(state.clone().pop(1), None);
        assert_eq!(state.pop(2), Some(ValueId::new(2)));
        assert_eq!(state.pop(1), Some(ValueId::new(1)));
        assert_eq!(state.pop(1), None);
    }

    #[test]
    fn test_store_local_invalidation() {
        let long = ValueId::new(5);
        let mut state = ValueStack::new(ScopeId::new(0), 4, None);
        assert!(state.store_local(1, long, ty_of(long)));
        assert_eq!(state.local(1), Some(long));
        assert_eq!(state.local(2), None);

        // Writing the upper half kills the long.
        assert!(state.store_local(2, ValueId::new(6), ty_of(long)));
        assert_eq!(state.local(1), None);
        assert_eq!(state.local(2), Some(ValueId::new(6)));

        assert!(!state.store_local(3, long, ty_of(long)));
    }

    #[test]
    fn test_exception_copies() {
        let mut state = ValueStack::new(ScopeId::new(0), 2, None);
        state.set_local(0, Some(ValueId::new(1)));
        state.push(ValueId::new(2), 1);
        state.lock(ValueId::new(1));

        let exc = state.copy(StateKind::ExceptionState, 4);
        assert!(exc.is_stack_empty());
        assert_eq!(exc.local(0), Some(ValueId::new(1)));
        assert_eq!(exc.bci, 4);

        let empty = state.copy(StateKind::EmptyExceptionState, 4);
        assert_eq!(empty.local(0), None);
        assert_eq!(empty.locks(), &[ValueId::new(1)]);
        assert_eq!(state.stack_size(), 1);
    }

    #[test]
    fn test_arguments_and_locks() {
        let long = ValueId::new(3);
        let mut state = ValueStack::new(ScopeId::new(0), 0, None);
        state.push(ValueId::new(1), 1);
        state.push(ValueId::new(2), 1);
        state.push(long, 2);
        assert_eq!(state.pop_arguments(3), Some(vec![ValueId::new(2), long]));
        assert_eq!(state.pop_arguments(2), None);

        assert_eq!(state.lock(ValueId::new(1)), 0);
        assert_eq!(state.lock(ValueId::new(2)), 1);
        assert_eq!(state.unlock(), Some(1));
        assert_eq!(state.locks_size(), 1);
    }

    #[test]
    fn test_map_values() {
        let mut state = ValueStack::new(ScopeId::new(0), 1, None);
        state.set_local(0, Some(ValueId::new(1)));
        state.push(ValueId::new(1), 1);
        state.map_values_mut(|v| ValueId::new(v.index() + 10));
        assert_eq!(
            state.values().collect::<Vec<_>>(),
            vec![ValueId::new(11), ValueId::new(11)]
        );
    }
}
