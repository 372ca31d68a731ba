//! Value nodes.
//!
//! Every operation the graph builder emits is one [`Node`] in the graph arena: an
//! [`Instruction`] (a closed sum over all operation kinds) plus its result type, the
//! bytecode index it came from and the side data the back end needs (state snapshots
//! for deoptimization and the exception handlers reachable from it).
//!
//! Operands are [`ValueId`]s. A node never owns its operands; several nodes may
//! consume the same value.

use bitflags::bitflags;

use crate::{
    database::{ClassId, ClassRef, FieldRef, MethodRef},
    ir::{BasicType, BlockId, ConstValue, StateId, ValueId, ValueType, XHandler},
};

/// Binary arithmetic operators; the operand type is the node's result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Shift operators; the shift count is always an `int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum ShiftOp {
    Shl,
    Shr,
    Ushr,
}

/// Bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum LogicOp {
    And,
    Or,
    Xor,
}

/// Three-way compares producing -1, 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CompareOp {
    /// `long` compare.
    Lcmp,
    /// `float` compare, NaN yields -1.
    Fcmpl,
    /// `float` compare, NaN yields 1.
    Fcmpg,
    /// `double` compare, NaN yields -1.
    Dcmpl,
    /// `double` compare, NaN yields 1.
    Dcmpg,
}

impl CompareOp {
    /// Returns the result an unordered (NaN) comparison produces.
    #[must_use]
    pub const fn unordered_result(self) -> i32 {
        match self {
            CompareOp::Fcmpl | CompareOp::Dcmpl => -1,
            _ => 1,
        }
    }
}

/// Primitive conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum ConvertOp {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
}

impl ConvertOp {
    /// Returns the operand type.
    #[must_use]
    pub const fn from_type(self) -> ValueType {
        match self {
            ConvertOp::I2L
            | ConvertOp::I2F
            | ConvertOp::I2D
            | ConvertOp::I2B
            | ConvertOp::I2C
            | ConvertOp::I2S => ValueType::Int,
            ConvertOp::L2I | ConvertOp::L2F | ConvertOp::L2D => ValueType::Long,
            ConvertOp::F2I | ConvertOp::F2L | ConvertOp::F2D => ValueType::Float,
            ConvertOp::D2I | ConvertOp::D2L | ConvertOp::D2F => ValueType::Double,
        }
    }

    /// Returns the result type.
    #[must_use]
    pub const fn to_type(self) -> ValueType {
        match self {
            ConvertOp::I2L | ConvertOp::F2L | ConvertOp::D2L => ValueType::Long,
            ConvertOp::I2F | ConvertOp::L2F | ConvertOp::D2F => ValueType::Float,
            ConvertOp::I2D | ConvertOp::L2D | ConvertOp::F2D => ValueType::Double,
            _ => ValueType::Int,
        }
    }

    /// Returns `true` for the sub-int narrowing conversions.
    #[must_use]
    pub const fn is_narrowing(self) -> bool {
        matches!(self, ConvertOp::I2B | ConvertOp::I2C | ConvertOp::I2S)
    }
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum Condition {
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,
}

impl Condition {
    /// Returns the condition that holds exactly when `self` does not.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Condition::Eql => Condition::Neq,
            Condition::Neq => Condition::Eql,
            Condition::Lss => Condition::Geq,
            Condition::Leq => Condition::Gtr,
            Condition::Gtr => Condition::Leq,
            Condition::Geq => Condition::Lss,
        }
    }

    /// Returns the condition to use when the operands are swapped.
    #[must_use]
    pub const fn mirror(self) -> Self {
        match self {
            Condition::Lss => Condition::Gtr,
            Condition::Leq => Condition::Geq,
            Condition::Gtr => Condition::Lss,
            Condition::Geq => Condition::Leq,
            other => other,
        }
    }

    /// Evaluates the condition on an ordering of `x` relative to `y`.
    #[must_use]
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Condition::Eql => ordering == Equal,
            Condition::Neq => ordering != Equal,
            Condition::Lss => ordering == Less,
            Condition::Leq => ordering != Greater,
            Condition::Gtr => ordering == Greater,
            Condition::Geq => ordering != Less,
        }
    }
}

/// Call dispatch kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

/// The state slot a phi merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhiSlot {
    /// Operand stack slot.
    Stack(usize),
    /// Local variable slot.
    Local(usize),
}

/// The operation a node performs.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Merge of one state slot at a block entry; one operand per predecessor edge.
    Phi {
        /// Owning block
        block: BlockId,
        /// Merged slot
        slot: PhiSlot,
        /// One value per predecessor, in predecessor order
        operands: Vec<ValueId>,
    },
    /// Incoming method parameter.
    Local {
        /// Local slot the parameter arrives in
        index: usize,
    },
    /// A constant.
    Constant(ConstValue),
    /// `x op y` on ints, longs, floats or doubles.
    Arithmetic {
        /// Operator
        op: ArithOp,
        /// Left operand
        x: ValueId,
        /// Right operand
        y: ValueId,
    },
    /// `x op y`, `y` an int shift count.
    Shift {
        /// Operator
        op: ShiftOp,
        /// Shifted value
        x: ValueId,
        /// Shift count
        y: ValueId,
    },
    /// Bitwise `x op y`.
    Logic {
        /// Operator
        op: LogicOp,
        /// Left operand
        x: ValueId,
        /// Right operand
        y: ValueId,
    },
    /// Arithmetic negation.
    Negate {
        /// Operand
        x: ValueId,
    },
    /// Three-way compare.
    Compare {
        /// Operator
        op: CompareOp,
        /// Left operand
        x: ValueId,
        /// Right operand
        y: ValueId,
    },
    /// Primitive conversion.
    Convert {
        /// Conversion
        op: ConvertOp,
        /// Operand
        x: ValueId,
    },
    /// Field load; `object` is `None` for statics.
    LoadField {
        /// Receiver object
        object: Option<ValueId>,
        /// Accessed field
        field: Box<FieldRef>,
    },
    /// Field store; `object` is `None` for statics.
    StoreField {
        /// Receiver object
        object: Option<ValueId>,
        /// Accessed field
        field: Box<FieldRef>,
        /// Stored value
        value: ValueId,
    },
    /// Array element load.
    LoadIndexed {
        /// Array
        array: ValueId,
        /// Index
        index: ValueId,
        /// Element type
        elem: BasicType,
    },
    /// Array element store.
    StoreIndexed {
        /// Array
        array: ValueId,
        /// Index
        index: ValueId,
        /// Stored value
        value: ValueId,
        /// Element type
        elem: BasicType,
    },
    /// Array length.
    ArrayLength {
        /// Array
        array: ValueId,
    },
    /// Object allocation.
    NewInstance {
        /// Allocated class
        klass: Box<ClassRef>,
    },
    /// Primitive array allocation.
    NewTypeArray {
        /// Length
        length: ValueId,
        /// Element type
        elem: BasicType,
    },
    /// Reference array allocation.
    NewObjectArray {
        /// Length
        length: ValueId,
        /// Element class
        klass: Box<ClassRef>,
    },
    /// Multi-dimensional array allocation.
    NewMultiArray {
        /// Array class
        klass: Box<ClassRef>,
        /// Dimension lengths, outermost first
        dims: Vec<ValueId>,
    },
    /// Checked cast; yields the object.
    CheckCast {
        /// Target class
        klass: Box<ClassRef>,
        /// Checked object
        object: ValueId,
    },
    /// Type test; yields 0 or 1.
    InstanceOf {
        /// Tested class
        klass: Box<ClassRef>,
        /// Tested object
        object: ValueId,
    },
    /// Explicit null check.
    NullCheck {
        /// Checked object
        object: ValueId,
    },
    /// Monitor acquisition.
    MonitorEnter {
        /// Locked object
        object: ValueId,
        /// Lock slot in the state
        lock: usize,
    },
    /// Monitor release.
    MonitorExit {
        /// Unlocked object
        object: ValueId,
        /// Lock slot in the state
        lock: usize,
    },
    /// Call.
    Invoke {
        /// Dispatch kind
        kind: InvokeKind,
        /// Called method
        method: Box<MethodRef>,
        /// Receiver for non-static calls
        receiver: Option<ValueId>,
        /// Arguments excluding the receiver
        args: Vec<ValueId>,
    },
    /// The exception object at the start of a handler.
    ExceptionObject,
    /// Marks the start of the OSR entry path.
    OsrEntry,
    /// A local loaded from the interpreter frame at OSR entry.
    OsrLocal {
        /// Local slot
        index: usize,
    },
    /// Unconditional jump.
    Goto {
        /// Destination
        target: BlockId,
    },
    /// Conditional branch on `x cond y`.
    If {
        /// Left operand
        x: ValueId,
        /// Condition
        cond: Condition,
        /// Right operand
        y: ValueId,
        /// Taken when the condition holds
        tsux: BlockId,
        /// Taken otherwise
        fsux: BlockId,
        /// For float compares: the outcome when an operand is NaN
        unordered_is_true: bool,
    },
    /// Dense switch.
    TableSwitch {
        /// Key
        tag: ValueId,
        /// Key of the first target
        low: i32,
        /// Targets for `low..`
        targets: Vec<BlockId>,
        /// Target for keys out of range
        default: BlockId,
    },
    /// Sparse switch.
    LookupSwitch {
        /// Key
        tag: ValueId,
        /// Keys, parallel to `targets`
        keys: Vec<i32>,
        /// Targets
        targets: Vec<BlockId>,
        /// Target when no key matches
        default: BlockId,
    },
    /// Method return.
    Return {
        /// Returned value
        value: Option<ValueId>,
    },
    /// Exception throw.
    Throw {
        /// Thrown object
        exception: ValueId,
    },
}

impl Instruction {
    /// Returns `true` for the control instructions that end a block.
    #[must_use]
    pub const fn is_block_end(&self) -> bool {
        matches!(
            self,
            Instruction::Goto { .. }
                | Instruction::If { .. }
                | Instruction::TableSwitch { .. }
                | Instruction::LookupSwitch { .. }
                | Instruction::Return { .. }
                | Instruction::Throw { .. }
        )
    }

    /// Returns the successor blocks of a block end, in branch order: for an `If` the
    /// true successor first, for switches the cases followed by the default.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instruction::Goto { target } => vec![*target],
            Instruction::If { tsux, fsux, .. } => vec![*tsux, *fsux],
            Instruction::TableSwitch {
                targets, default, ..
            }
            | Instruction::LookupSwitch {
                targets, default, ..
            } => targets
                .iter()
                .copied()
                .chain(std::iter::once(*default))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns the constant, if this is one.
    #[must_use]
    pub const fn as_constant(&self) -> Option<&ConstValue> {
        match self {
            Instruction::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Returns `true` for phis.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }

    /// Returns `true` if the value is a freshly allocated object or array.
    #[must_use]
    pub const fn is_allocation(&self) -> bool {
        matches!(
            self,
            Instruction::NewInstance { .. }
                | Instruction::NewTypeArray { .. }
                | Instruction::NewObjectArray { .. }
                | Instruction::NewMultiArray { .. }
        )
    }

    /// Returns `true` if the node is followed by a state snapshot the back end needs
    /// to resume after it (calls, allocations, monitors, block ends).
    #[must_use]
    pub const fn has_state_after(&self) -> bool {
        self.is_block_end()
            || self.is_allocation()
            || matches!(
                self,
                Instruction::Invoke { .. }
                    | Instruction::MonitorEnter { .. }
                    | Instruction::MonitorExit { .. }
            )
    }

    /// Returns all operand values in a fixed order.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        let mut values = Vec::new();
        self.for_each_operand(|v| values.push(v));
        values
    }

    /// Calls `f` on every operand value.
    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Instruction::Phi { operands, .. } => operands.iter().copied().for_each(f),
            Instruction::Arithmetic { x, y, .. }
            | Instruction::Shift { x, y, .. }
            | Instruction::Logic { x, y, .. }
            | Instruction::Compare { x, y, .. }
            | Instruction::If { x, y, .. } => {
                f(*x);
                f(*y);
            }
            Instruction::Negate { x } | Instruction::Convert { x, .. } => f(*x),
            Instruction::LoadField { object, .. } => object.iter().copied().for_each(f),
            Instruction::StoreField { object, value, .. } => {
                object.iter().copied().for_each(&mut f);
                f(*value);
            }
            Instruction::LoadIndexed { array, index, .. } => {
                f(*array);
                f(*index);
            }
            Instruction::StoreIndexed {
                array,
                index,
                value,
                ..
            } => {
                f(*array);
                f(*index);
                f(*value);
            }
            Instruction::ArrayLength { array } => f(*array),
            Instruction::NewTypeArray { length, .. } | Instruction::NewObjectArray { length, .. } => {
                f(*length)
            }
            Instruction::NewMultiArray { dims, .. } => dims.iter().copied().for_each(f),
            Instruction::CheckCast { object, .. }
            | Instruction::InstanceOf { object, .. }
            | Instruction::NullCheck { object }
            | Instruction::MonitorEnter { object, .. }
            | Instruction::MonitorExit { object, .. } => f(*object),
            Instruction::Invoke { receiver, args, .. } => {
                receiver.iter().copied().for_each(&mut f);
                args.iter().copied().for_each(f);
            }
            Instruction::TableSwitch { tag, .. } | Instruction::LookupSwitch { tag, .. } => f(*tag),
            Instruction::Return { value } => value.iter().copied().for_each(f),
            Instruction::Throw { exception } => f(*exception),
            Instruction::Local { .. }
            | Instruction::Constant(_)
            | Instruction::NewInstance { .. }
            | Instruction::ExceptionObject
            | Instruction::OsrEntry
            | Instruction::OsrLocal { .. }
            | Instruction::Goto { .. } => {}
        }
    }

    /// Replaces every operand `v` with `f(v)`.
    pub fn map_operands(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        let mut apply = |v: &mut ValueId| *v = f(*v);
        match self {
            Instruction::Phi { operands, .. } => operands.iter_mut().for_each(apply),
            Instruction::Arithmetic { x, y, .. }
            | Instruction::Shift { x, y, .. }
            | Instruction::Logic { x, y, .. }
            | Instruction::Compare { x, y, .. }
            | Instruction::If { x, y, .. } => {
                apply(x);
                apply(y);
            }
            Instruction::Negate { x } | Instruction::Convert { x, .. } => apply(x),
            Instruction::LoadField { object, .. } => object.iter_mut().for_each(apply),
            Instruction::StoreField { object, value, .. } => {
                object.iter_mut().for_each(&mut apply);
                apply(value);
            }
            Instruction::LoadIndexed { array, index, .. } => {
                apply(array);
                apply(index);
            }
            Instruction::StoreIndexed {
                array,
                index,
                value,
                ..
            } => {
                apply(array);
                apply(index);
                apply(value);
            }
            Instruction::ArrayLength { array } => apply(array),
            Instruction::NewTypeArray { length, .. } | Instruction::NewObjectArray { length, .. } => {
                apply(length)
            }
            Instruction::NewMultiArray { dims, .. } => dims.iter_mut().for_each(apply),
            Instruction::CheckCast { object, .. }
            | Instruction::InstanceOf { object, .. }
            | Instruction::NullCheck { object }
            | Instruction::MonitorEnter { object, .. }
            | Instruction::MonitorExit { object, .. } => apply(object),
            Instruction::Invoke { receiver, args, .. } => {
                receiver.iter_mut().for_each(&mut apply);
                args.iter_mut().for_each(apply);
            }
            Instruction::TableSwitch { tag, .. } | Instruction::LookupSwitch { tag, .. } => {
                apply(tag)
            }
            Instruction::Return { value } => value.iter_mut().for_each(apply),
            Instruction::Throw { exception } => apply(exception),
            Instruction::Local { .. }
            | Instruction::Constant(_)
            | Instruction::NewInstance { .. }
            | Instruction::ExceptionObject
            | Instruction::OsrEntry
            | Instruction::OsrLocal { .. }
            | Instruction::Goto { .. } => {}
        }
    }
}

bitflags! {
    /// Per-node properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u16 {
        /// Must stay in place; never removed or moved by later passes
        const PINNED = 0x0001;
        /// Performs an implicit null check of its object operand
        const NEEDS_NULL_CHECK = 0x0002;
        /// Refers to an unresolved entity and must be patched at run time
        const NEEDS_PATCHING = 0x0004;
        /// Backward branch that polls for a safepoint
        const SAFEPOINT = 0x0008;
        /// Phi with type-inconsistent inputs
        const ILLEGAL = 0x0010;
        /// Phi is on the simplifier's visiting stack
        const VISITED = 0x0020;
        /// Phi has been found to merge distinct values
        const CANNOT_SIMPLIFY = 0x0040;
    }
}

/// A value node in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// The operation.
    pub instr: Instruction,
    /// The result type tag.
    pub ty: ValueType,
    /// Bytecode index the node was built for; -1 for synthetic nodes.
    pub bci: i32,
    /// The block whose instruction list holds the node; `None` for phis, parameters
    /// and other nodes outside the instruction order.
    pub block: Option<BlockId>,
    /// Properties.
    pub flags: NodeFlags,
    /// State before the node, for nodes that can trap or need patching.
    pub state_before: Option<StateId>,
    /// State after the node, for calls, allocations, monitors and block ends.
    pub state_after: Option<StateId>,
    /// State handed to the exception handlers.
    pub exception_state: Option<StateId>,
    /// Exception handlers reachable from this node.
    pub exception_handlers: Vec<XHandler>,
    /// Replacement value once the node has been simplified away.
    pub subst: Option<ValueId>,
    /// Statically known class of a reference result. The value is an instance of
    /// this class or one of its subclasses, or null.
    pub declared: Option<ClassId>,
}

impl Node {
    /// Creates a node.
    #[must_use]
    pub fn new(instr: Instruction, ty: ValueType) -> Self {
        Node {
            instr,
            ty,
            bci: -1,
            block: None,
            flags: NodeFlags::empty(),
            state_before: None,
            state_after: None,
            exception_state: None,
            exception_handlers: Vec::new(),
            subst: None,
            declared: None,
        }
    }

    /// Creates a constant node.
    #[must_use]
    pub fn constant(value: ConstValue) -> Self {
        Node::new(Instruction::Constant(value), value.value_type())
    }

    /// Sets the state before the node.
    #[must_use]
    pub fn with_state_before(mut self, state: StateId) -> Self {
        self.state_before = Some(state);
        self
    }

    /// Sets the statically known class of the result.
    #[must_use]
    pub fn with_declared(mut self, class: Option<ClassId>) -> Self {
        self.declared = class;
        self
    }

    /// Adds flags.
    #[must_use]
    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Returns `true` if the node has been marked illegal.
    #[must_use]
    pub fn is_illegal(&self) -> bool {
        self.flags.contains(NodeFlags::ILLEGAL) || self.ty == ValueType::Illegal
    }

    /// Returns `true` if executing the node may raise an exception.
    #[must_use]
    pub fn can_trap(&self) -> bool {
        let patching = self.flags.contains(NodeFlags::NEEDS_PATCHING);
        match &self.instr {
            Instruction::Arithmetic { op, .. } => {
                matches!(op, ArithOp::Div | ArithOp::Rem)
                    && matches!(self.ty, ValueType::Int | ValueType::Long)
            }
            Instruction::LoadField { .. } | Instruction::StoreField { .. } => {
                patching || self.flags.contains(NodeFlags::NEEDS_NULL_CHECK)
            }
            Instruction::LoadIndexed { .. }
            | Instruction::StoreIndexed { .. }
            | Instruction::ArrayLength { .. }
            | Instruction::NewInstance { .. }
            | Instruction::NewTypeArray { .. }
            | Instruction::NewObjectArray { .. }
            | Instruction::NewMultiArray { .. }
            | Instruction::CheckCast { .. }
            | Instruction::NullCheck { .. }
            | Instruction::MonitorEnter { .. }
            | Instruction::Invoke { .. }
            | Instruction::Throw { .. } => true,
            Instruction::InstanceOf { .. } | Instruction::Constant(_) => patching,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_algebra() {
        use std::cmp::Ordering;
        for cond in [
            Condition::Eql,
            Condition::Neq,
            Condition::Lss,
            Condition::Leq,
            Condition::Gtr,
            Condition::Geq,
        ] {
            for ord in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
                assert_eq!(cond.negate().holds(ord), !cond.holds(ord));
                assert_eq!(cond.mirror().holds(ord.reverse()), cond.holds(ord));
            }
        }
    }

    #[test]
    fn test_operands_and_mapping() {
        let mut instr = Instruction::StoreIndexed {
            array: ValueId::new(1),
            index: ValueId::new(2),
            value: ValueId::new(3),
            elem: BasicType::Int,
        };
        assert_eq!(
            instr.operands(),
            vec![ValueId::new(1), ValueId::new(2), ValueId::new(3)]
        );
        instr.map_operands(|v| if v == ValueId::new(2) { ValueId::new(9) } else { v });
        assert_eq!(
            instr.operands(),
            vec![ValueId::new(1), ValueId::new(9), ValueId::new(3)]
        );
    }

    #[test]
    fn test_successor_order() {
        let switch = Instruction::TableSwitch {
            tag: ValueId::new(0),
            low: 0,
            targets: vec![BlockId::new(4), BlockId::new(5)],
            default: BlockId::new(6),
        };
        assert_eq!(
            switch.successors(),
            vec![BlockId::new(4), BlockId::new(5), BlockId::new(6)]
        );
        assert!(switch.is_block_end());
        assert!(Instruction::Return { value: None }.successors().is_empty());
    }

    #[test]
    fn test_trapping() {
        let div = Node::new(
            Instruction::Arithmetic {
                op: ArithOp::Div,
                x: ValueId::new(0),
                y: ValueId::new(1),
            },
            ValueType::Int,
        );
        assert!(div.can_trap());
        let fdiv = Node { ty: ValueType::Float, ..div };
        assert!(!fdiv.can_trap());
        assert!(!Node::constant(ConstValue::Int(3)).can_trap());
        assert!(Node::constant(ConstValue::Unloaded)
            .with_flags(NodeFlags::NEEDS_PATCHING)
            .can_trap());
    }
}
