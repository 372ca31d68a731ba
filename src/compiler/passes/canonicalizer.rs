//! Node canonicalization.
//!
//! The graph builder hands every node to [`Canonicalizer::canonicalize`] before the
//! node is appended. The result is either the node itself, a cheaper replacement node
//! or a value that already exists in the graph. The rules are local: they look only at
//! the node and its operands.
//!
//! ## Constant folding
//! - `int`/`long` arithmetic wraps; division and remainder by zero are left alone and
//!   `MIN / -1` yields `MIN`
//! - `float`/`double` arithmetic follows IEEE 754; remainder truncates like `fmod`
//! - shifts mask their count to 5 or 6 bits
//! - compares order NaN according to the operator variant
//! - conversions saturate and map NaN to zero
//!
//! ## Identities
//! - `x - x`, `x ^ x` → `0`; `x & x`, `x | x` → `x`
//! - `x + 0`, `x - 0`, `x * 1`, `x / 1`, `x | 0`, `x ^ 0`, `x & -1`, `x << 0` → `x`
//! - `x * 0`, `x & 0` → `0`
//! - constants move to the right of commutative operators
//!
//! ## Control
//! - `if` on identical operands or two constants → `goto`
//! - `if` on a three-way compare against a constant → `if` on the compared values
//! - a switch on a constant → `goto`
//!
//! ## Objects
//! - `instanceof` and `checkcast` of null or of a fresh allocation of a known class fold
//! - `checkcast` to a supertype of the value's declared class disappears, and so does
//!   `instanceof` when the value is also known to be non-null
//! - null checks of values known to be non-null disappear
//! - `arraylength` of a fresh array with a constant length folds
//! - a narrowing conversion feeding a store of the same width is dropped
//!
//! Integer identities are not applied to `float`/`double` operands, where `-0.0` and
//! NaN make them unsound. A replacement always has the result type of the original.

use std::cmp::Ordering;

use tracing::trace;

use crate::{
    database::{ClassRef, ProgramDatabase},
    ir::{
        ArithOp, BasicType, BlockId, CompareOp, Condition, ConstValue, ConvertOp, Graph,
        Instruction, LogicOp, Node, NodeFlags, ShiftOp, ValueId, ValueType,
    },
};

/// Result of canonicalizing one node.
#[derive(Debug, Clone)]
pub enum Canonical {
    /// Append this node; it is the original or a simpler replacement.
    Node(Node),
    /// Use this existing value instead of appending anything.
    Existing(ValueId),
}

/// Folds and simplifies nodes against the graph they are about to join.
pub struct Canonicalizer<'a> {
    graph: &'a Graph,
    db: &'a dyn ProgramDatabase,
}

/// Upper bound on successive rewrites of one node.
const MAX_REWRITES: usize = 8;

impl<'a> Canonicalizer<'a> {
    /// Creates a canonicalizer reading operands from `graph`.
    #[must_use]
    pub fn new(graph: &'a Graph, db: &'a dyn ProgramDatabase) -> Self {
        Canonicalizer { graph, db }
    }

    /// Returns the simplest form of `node`.
    ///
    /// Rewrites are applied until none matches, so canonicalizing the result again
    /// returns it unchanged.
    #[must_use]
    pub fn canonicalize(&self, node: Node) -> Canonical {
        let mut node = node;
        for _ in 0..MAX_REWRITES {
            match self.rewrite(&node) {
                None => break,
                Some(Canonical::Existing(value)) => {
                    if self.graph.ty(value) != node.ty {
                        break;
                    }
                    trace!(target: "jitfront::canon", bci = node.bci, %value, "replaced by existing value");
                    return Canonical::Existing(value);
                }
                Some(Canonical::Node(replacement)) => {
                    if replacement.ty != node.ty {
                        break;
                    }
                    node = replacement;
                }
            }
        }
        Canonical::Node(node)
    }

    fn constant(&self, value: ValueId) -> Option<ConstValue> {
        self.graph.constant(value)
    }

    fn int(&self, value: ValueId) -> Option<i32> {
        self.constant(value).and_then(|c| c.as_int())
    }

    fn rewrite(&self, node: &Node) -> Option<Canonical> {
        match &node.instr {
            Instruction::Arithmetic { op, x, y } => self.arithmetic(node, *op, *x, *y),
            Instruction::Shift { op, x, y } => self.shift(node, *op, *x, *y),
            Instruction::Logic { op, x, y } => self.logic(node, *op, *x, *y),
            Instruction::Negate { x } => negate(self.constant(*x)?).map(fold),
            Instruction::Compare { op, x, y } => self.compare(*op, *x, *y),
            Instruction::Convert { op, x } => self.convert(*op, *x),
            Instruction::If {
                x,
                cond,
                y,
                tsux,
                fsux,
                unordered_is_true,
            } => self.if_node(node, *x, *cond, *y, *tsux, *fsux, *unordered_is_true),
            Instruction::TableSwitch {
                tag,
                low,
                targets,
                default,
            } => {
                let key = self.int(*tag)?;
                let target = key
                    .checked_sub(*low)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| targets.get(i))
                    .copied()
                    .unwrap_or(*default);
                Some(goto(node, target))
            }
            Instruction::LookupSwitch {
                tag,
                keys,
                targets,
                default,
            } => {
                let key = self.int(*tag)?;
                let target = keys
                    .iter()
                    .position(|k| *k == key)
                    .map_or(*default, |i| targets[i]);
                Some(goto(node, target))
            }
            Instruction::InstanceOf { klass, object } => {
                let verdict = self.type_check(klass, *object).or_else(|| {
                    (self.is_non_null(*object) && self.is_declared_subtype(klass, *object))
                        .then_some(true)
                })?;
                Some(fold(ConstValue::Int(i32::from(verdict))))
            }
            Instruction::CheckCast { klass, object } => {
                if self.type_check(klass, *object) == Some(true)
                    || self.constant(*object) == Some(ConstValue::Null)
                    || self.is_declared_subtype(klass, *object)
                {
                    return Some(Canonical::Existing(*object));
                }
                match &self.graph.node(*object).instr {
                    Instruction::CheckCast { klass: inner, .. } if inner == klass => {
                        Some(Canonical::Existing(*object))
                    }
                    _ => None,
                }
            }
            Instruction::NullCheck { object } => self
                .is_non_null(*object)
                .then_some(Canonical::Existing(*object)),
            Instruction::ArrayLength { array } => {
                let length = match &self.graph.node(*array).instr {
                    Instruction::NewTypeArray { length, .. }
                    | Instruction::NewObjectArray { length, .. } => *length,
                    Instruction::NewMultiArray { dims, .. } => *dims.first()?,
                    _ => return None,
                };
                let length = self.int(length)?;
                (length >= 0).then(|| fold(ConstValue::Int(length)))
            }
            Instruction::StoreIndexed {
                array,
                index,
                value,
                elem,
            } => {
                let value = self.unnarrowed(*value, *elem)?;
                Some(Canonical::Node(Node {
                    instr: Instruction::StoreIndexed {
                        array: *array,
                        index: *index,
                        value,
                        elem: *elem,
                    },
                    ..node.clone()
                }))
            }
            Instruction::StoreField {
                object,
                field,
                value,
            } => {
                let value = self.unnarrowed(*value, field.ty)?;
                Some(Canonical::Node(Node {
                    instr: Instruction::StoreField {
                        object: *object,
                        field: field.clone(),
                        value,
                    },
                    ..node.clone()
                }))
            }
            _ => None,
        }
    }

    fn arithmetic(&self, node: &Node, op: ArithOp, x: ValueId, y: ValueId) -> Option<Canonical> {
        let ty = node.ty;
        if let (Some(a), Some(b)) = (self.constant(x), self.constant(y)) {
            return fold_arithmetic(op, a, b).map(fold);
        }
        if !matches!(ty, ValueType::Int | ValueType::Long) {
            return None;
        }
        if matches!(op, ArithOp::Add | ArithOp::Mul) && self.constant(x).is_some() {
            return Some(Canonical::Node(Node {
                instr: Instruction::Arithmetic { op, x: y, y: x },
                ..node.clone()
            }));
        }
        if x == y && op == ArithOp::Sub {
            return Some(fold(zero(ty)));
        }
        let rhs = self.constant(y).and_then(|c| as_i64(&c))?;
        match (op, rhs) {
            (ArithOp::Add | ArithOp::Sub, 0) | (ArithOp::Mul | ArithOp::Div, 1) => {
                Some(Canonical::Existing(x))
            }
            (ArithOp::Mul, 0) => Some(fold(zero(ty))),
            _ => None,
        }
    }

    fn shift(&self, node: &Node, op: ShiftOp, x: ValueId, y: ValueId) -> Option<Canonical> {
        let count = self.int(y)?;
        let masked = match node.ty {
            ValueType::Int => count & 0x1f,
            ValueType::Long => count & 0x3f,
            _ => return None,
        };
        if masked == 0 {
            return Some(Canonical::Existing(x));
        }
        let value = match (self.constant(x)?, op) {
            (ConstValue::Int(v), ShiftOp::Shl) => ConstValue::Int(v.wrapping_shl(masked as u32)),
            (ConstValue::Int(v), ShiftOp::Shr) => ConstValue::Int(v >> masked),
            (ConstValue::Int(v), ShiftOp::Ushr) => ConstValue::Int(((v as u32) >> masked) as i32),
            (ConstValue::Long(v), ShiftOp::Shl) => ConstValue::Long(v.wrapping_shl(masked as u32)),
            (ConstValue::Long(v), ShiftOp::Shr) => ConstValue::Long(v >> masked),
            (ConstValue::Long(v), ShiftOp::Ushr) => {
                ConstValue::Long(((v as u64) >> masked) as i64)
            }
            _ => return None,
        };
        Some(fold(value))
    }

    fn logic(&self, node: &Node, op: LogicOp, x: ValueId, y: ValueId) -> Option<Canonical> {
        let ty = node.ty;
        if let (Some(a), Some(b)) = (self.constant(x), self.constant(y)) {
            let value = match (a, b) {
                (ConstValue::Int(a), ConstValue::Int(b)) => ConstValue::Int(match op {
                    LogicOp::And => a & b,
                    LogicOp::Or => a | b,
                    LogicOp::Xor => a ^ b,
                }),
                (ConstValue::Long(a), ConstValue::Long(b)) => ConstValue::Long(match op {
                    LogicOp::And => a & b,
                    LogicOp::Or => a | b,
                    LogicOp::Xor => a ^ b,
                }),
                _ => return None,
            };
            return Some(fold(value));
        }
        if self.constant(x).is_some() {
            return Some(Canonical::Node(Node {
                instr: Instruction::Logic { op, x: y, y: x },
                ..node.clone()
            }));
        }
        if x == y {
            return Some(match op {
                LogicOp::And | LogicOp::Or => Canonical::Existing(x),
                LogicOp::Xor => fold(zero(ty)),
            });
        }
        let rhs = self.constant(y).and_then(|c| as_i64(&c))?;
        match (op, rhs) {
            (LogicOp::Or | LogicOp::Xor, 0) | (LogicOp::And, -1) => Some(Canonical::Existing(x)),
            (LogicOp::And, 0) => Some(fold(zero(ty))),
            _ => None,
        }
    }

    fn compare(&self, op: CompareOp, x: ValueId, y: ValueId) -> Option<Canonical> {
        if x == y && op == CompareOp::Lcmp {
            return Some(fold(ConstValue::Int(0)));
        }
        let ordering = match (self.constant(x)?, self.constant(y)?) {
            (ConstValue::Long(a), ConstValue::Long(b)) => Some(a.cmp(&b)),
            (ConstValue::Float(a), ConstValue::Float(b)) => a.partial_cmp(&b),
            (ConstValue::Double(a), ConstValue::Double(b)) => a.partial_cmp(&b),
            _ => return None,
        };
        let result = match ordering {
            Some(Ordering::Less) => -1,
            Some(Ordering::Equal) => 0,
            Some(Ordering::Greater) => 1,
            None => op.unordered_result(),
        };
        Some(fold(ConstValue::Int(result)))
    }

    fn convert(&self, op: ConvertOp, x: ValueId) -> Option<Canonical> {
        if let Some(value) = self.constant(x) {
            return fold_convert(op, value).map(fold);
        }
        let redundant = match &self.graph.node(x).instr {
            Instruction::Convert { op: inner, .. } => op.is_narrowing() && *inner == op,
            Instruction::LoadField { field, .. } => already_narrow(op, field.ty),
            Instruction::LoadIndexed { elem, .. } => already_narrow(op, *elem),
            _ => false,
        };
        redundant.then_some(Canonical::Existing(x))
    }

    #[allow(clippy::too_many_arguments)]
    fn if_node(
        &self,
        node: &Node,
        x: ValueId,
        cond: Condition,
        y: ValueId,
        tsux: BlockId,
        fsux: BlockId,
        unordered_is_true: bool,
    ) -> Option<Canonical> {
        if tsux == fsux {
            return Some(goto(node, tsux));
        }
        if x == y && !self.graph.ty(x).is_float_kind() {
            let target = if cond.holds(Ordering::Equal) { tsux } else { fsux };
            return Some(goto(node, target));
        }
        let (cx, cy) = (self.constant(x), self.constant(y));
        if let (Some(a), Some(b)) = (cx, cy) {
            let ordering = match (a, b) {
                (ConstValue::Int(a), ConstValue::Int(b)) => a.cmp(&b),
                (ConstValue::Null, ConstValue::Null) => Ordering::Equal,
                (ConstValue::Null, other) | (other, ConstValue::Null)
                    if other.is_non_null_object() && matches!(cond, Condition::Eql | Condition::Neq) =>
                {
                    Ordering::Less
                }
                _ => return None,
            };
            let target = if cond.holds(ordering) { tsux } else { fsux };
            return Some(goto(node, target));
        }
        if cx.is_some() {
            return Some(Canonical::Node(Node {
                instr: Instruction::If {
                    x: y,
                    cond: cond.mirror(),
                    y: x,
                    tsux,
                    fsux,
                    unordered_is_true,
                },
                ..node.clone()
            }));
        }

        // if (cmp(a, b) <cond> c) -> if (a <cond'> b)
        let rc = cy.and_then(|c| c.as_int())?;
        let Instruction::Compare { op, x: a, y: b } = self.graph.node(x).instr else {
            return None;
        };
        let sux_for = |outcome: i32| {
            if cond.holds(outcome.cmp(&rc)) {
                tsux
            } else {
                fsux
            }
        };
        let (lss, eql, gtr) = (sux_for(-1), sux_for(0), sux_for(1));
        let nan = if op.unordered_result() < 0 { lss } else { gtr };
        if lss == eql && eql == gtr {
            return Some(goto(node, lss));
        }
        let (cond, tsux, fsux) = if lss == eql {
            (Condition::Leq, lss, gtr)
        } else if lss == gtr {
            (Condition::Neq, lss, eql)
        } else {
            (Condition::Geq, eql, lss)
        };
        Some(Canonical::Node(Node {
            instr: Instruction::If {
                x: a,
                cond,
                y: b,
                tsux,
                fsux,
                unordered_is_true: nan == tsux,
            },
            ..node.clone()
        }))
    }

    /// Decides a type check statically, if possible.
    fn type_check(&self, klass: &ClassRef, object: ValueId) -> Option<bool> {
        if self.constant(object) == Some(ConstValue::Null) {
            return Some(false);
        }
        let target = klass.id?;
        match &self.graph.node(object).instr {
            Instruction::NewInstance { klass: exact } => {
                let exact = exact.id?;
                Some(exact == target || self.db.is_subclass_of(exact, target))
            }
            _ => None,
        }
    }

    /// Returns `true` if the static type of `object` is `klass` or a subclass of it,
    /// so every non-null value passes a cast to `klass`.
    fn is_declared_subtype(&self, klass: &ClassRef, object: ValueId) -> bool {
        let Some(target) = klass.id else {
            return false;
        };
        let node = self.graph.node(object);
        let declared = match &node.instr {
            Instruction::NewInstance { klass } | Instruction::CheckCast { klass, .. } => klass.id,
            _ => node.declared,
        };
        declared.is_some_and(|class| class == target || self.db.is_subclass_of(class, target))
    }

    fn is_non_null(&self, value: ValueId) -> bool {
        let node = self.graph.node(value);
        node.instr.is_allocation()
            || matches!(node.instr, Instruction::ExceptionObject)
            || node
                .instr
                .as_constant()
                .is_some_and(ConstValue::is_non_null_object)
    }

    /// Returns the operand of a narrowing conversion that a store of `elem` makes
    /// redundant.
    fn unnarrowed(&self, value: ValueId, elem: BasicType) -> Option<ValueId> {
        let Instruction::Convert { op, x } = self.graph.node(value).instr else {
            return None;
        };
        let redundant = match op {
            ConvertOp::I2B => elem == BasicType::Byte,
            ConvertOp::I2S => matches!(elem, BasicType::Short | BasicType::Char),
            ConvertOp::I2C => matches!(elem, BasicType::Char | BasicType::Short),
            _ => false,
        };
        redundant.then_some(x)
    }
}

fn fold(value: ConstValue) -> Canonical {
    Canonical::Node(Node::constant(value))
}

fn goto(node: &Node, target: BlockId) -> Canonical {
    let mut replacement = Node::new(Instruction::Goto { target }, ValueType::Void);
    replacement.bci = node.bci;
    replacement.flags = node.flags & NodeFlags::SAFEPOINT;
    replacement.state_before = node.state_before;
    Canonical::Node(replacement)
}

fn zero(ty: ValueType) -> ConstValue {
    match ty {
        ValueType::Long => ConstValue::Long(0),
        _ => ConstValue::Int(0),
    }
}

fn as_i64(value: &ConstValue) -> Option<i64> {
    match *value {
        ConstValue::Int(v) => Some(i64::from(v)),
        ConstValue::Long(v) => Some(v),
        _ => None,
    }
}

fn already_narrow(op: ConvertOp, loaded: BasicType) -> bool {
    match op {
        ConvertOp::I2B => loaded == BasicType::Byte,
        ConvertOp::I2C => loaded == BasicType::Char,
        ConvertOp::I2S => matches!(loaded, BasicType::Short | BasicType::Byte),
        _ => false,
    }
}

fn negate(value: ConstValue) -> Option<ConstValue> {
    Some(match value {
        ConstValue::Int(v) => ConstValue::Int(v.wrapping_neg()),
        ConstValue::Long(v) => ConstValue::Long(v.wrapping_neg()),
        ConstValue::Float(v) => ConstValue::Float(-v),
        ConstValue::Double(v) => ConstValue::Double(-v),
        _ => return None,
    })
}

/// Evaluates `a op b` with the bytecode semantics of the operand type.
///
/// Returns `None` for integer division or remainder by zero, which must trap at run
/// time.
#[must_use]
pub fn fold_arithmetic(op: ArithOp, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    Some(match (a, b) {
        (ConstValue::Int(a), ConstValue::Int(b)) => ConstValue::Int(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div if b == 0 => return None,
            ArithOp::Div => a.wrapping_div(b),
            ArithOp::Rem if b == 0 => return None,
            ArithOp::Rem => a.wrapping_rem(b),
        }),
        (ConstValue::Long(a), ConstValue::Long(b)) => ConstValue::Long(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div if b == 0 => return None,
            ArithOp::Div => a.wrapping_div(b),
            ArithOp::Rem if b == 0 => return None,
            ArithOp::Rem => a.wrapping_rem(b),
        }),
        (ConstValue::Float(a), ConstValue::Float(b)) => ConstValue::Float(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Rem => a % b,
        }),
        (ConstValue::Double(a), ConstValue::Double(b)) => ConstValue::Double(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Rem => a % b,
        }),
        _ => return None,
    })
}

/// Evaluates a primitive conversion of a constant.
#[must_use]
pub fn fold_convert(op: ConvertOp, value: ConstValue) -> Option<ConstValue> {
    // `as` saturates float-to-int conversions and maps NaN to 0.
    Some(match (op, value) {
        (ConvertOp::I2L, ConstValue::Int(v)) => ConstValue::Long(i64::from(v)),
        (ConvertOp::I2F, ConstValue::Int(v)) => ConstValue::Float(v as f32),
        (ConvertOp::I2D, ConstValue::Int(v)) => ConstValue::Double(f64::from(v)),
        (ConvertOp::I2B, ConstValue::Int(v)) => ConstValue::Int(i32::from(v as i8)),
        (ConvertOp::I2C, ConstValue::Int(v)) => ConstValue::Int(i32::from(v as u16)),
        (ConvertOp::I2S, ConstValue::Int(v)) => ConstValue::Int(i32::from(v as i16)),
        (ConvertOp::L2I, ConstValue::Long(v)) => ConstValue::Int(v as i32),
        (ConvertOp::L2F, ConstValue::Long(v)) => ConstValue::Float(v as f32),
        (ConvertOp::L2D, ConstValue::Long(v)) => ConstValue::Double(v as f64),
        (ConvertOp::F2I, ConstValue::Float(v)) => ConstValue::Int(v as i32),
        (ConvertOp::F2L, ConstValue::Float(v)) => ConstValue::Long(v as i64),
        (ConvertOp::F2D, ConstValue::Float(v)) => ConstValue::Double(f64::from(v)),
        (ConvertOp::D2I, ConstValue::Double(v)) => ConstValue::Int(v as i32),
        (ConvertOp::D2L, ConstValue::Double(v)) => ConstValue::Long(v as i64),
        (ConvertOp::D2F, ConstValue::Double(v)) => ConstValue::Float(v as f32),
        _ => return None,
    })
}
