//! Local value numbering.
//!
//! Pure nodes that compute the same operation on the same operands within one block
//! produce the same value. [`ValueMap`] hashes each candidate node by its operation
//! and operands and hands back the earlier node when a match exists, so the new
//! node is never appended.
//!
//! # Example
//!
//! ```text
//! v4 = add v1, v2
//! v5 = add v2, v1    // same key after normalization, v4 is reused
//! ```
//!
//! The map is cleared at every block start, so a hit is always dominated by the
//! original within straight-line code.

use std::collections::HashMap;

use crate::ir::{
    ArithOp, CompareOp, ConstValue, ConvertOp, Instruction, LogicOp, Node, NodeFlags, ShiftOp,
    ValueId, ValueType,
};

/// A hashable key for a pure operation.
///
/// Captures the operation and its operands but not the result, so two nodes with
/// the same key compute the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Constant(ConstValue),
    Arith(ArithOp, ValueType, ValueId, ValueId),
    Shift(ShiftOp, ValueType, ValueId, ValueId),
    Logic(LogicOp, ValueType, ValueId, ValueId),
    Negate(ValueType, ValueId),
    Compare(CompareOp, ValueId, ValueId),
    Convert(ConvertOp, ValueId),
}

impl ValueKey {
    /// Creates a normalized key, or `None` for nodes that must not be numbered.
    fn from_node(node: &Node) -> Option<Self> {
        if node.flags.contains(NodeFlags::NEEDS_PATCHING) || node.can_trap() {
            return None;
        }
        let commutative_int = matches!(node.ty, ValueType::Int | ValueType::Long);
        let ordered = |x: ValueId, y: ValueId| if y < x { (y, x) } else { (x, y) };
        Some(match node.instr {
            Instruction::Constant(value) => ValueKey::Constant(value),
            Instruction::Arithmetic { op, x, y } => {
                let (x, y) = if commutative_int && matches!(op, ArithOp::Add | ArithOp::Mul) {
                    ordered(x, y)
                } else {
                    (x, y)
                };
                ValueKey::Arith(op, node.ty, x, y)
            }
            Instruction::Shift { op, x, y } => ValueKey::Shift(op, node.ty, x, y),
            Instruction::Logic { op, x, y } => {
                let (x, y) = ordered(x, y);
                ValueKey::Logic(op, node.ty, x, y)
            }
            Instruction::Negate { x } => ValueKey::Negate(node.ty, x),
            Instruction::Compare { op, x, y } => ValueKey::Compare(op, x, y),
            Instruction::Convert { op, x } => ValueKey::Convert(op, x),
            _ => return None,
        })
    }
}

/// Per-block table of pure values.
#[derive(Debug, Default)]
pub struct ValueMap {
    values: HashMap<ValueKey, ValueId>,
    hits: usize,
}

impl ValueMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an existing value computing the same as `node`, if any.
    pub fn find(&mut self, node: &Node) -> Option<ValueId> {
        let key = ValueKey::from_node(node)?;
        let found = self.values.get(&key).copied();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    /// Records `id` as the value of `node`, if `node` is numberable.
    pub fn insert(&mut self, node: &Node, id: ValueId) {
        if let Some(key) = ValueKey::from_node(node) {
            self.values.entry(key).or_insert(id);
        }
    }

    /// Forgets all values.
    pub fn kill(&mut self) {
        self.values.clear();
    }

    /// Returns the number of nodes reused so far.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arith(op: ArithOp, ty: ValueType, x: usize, y: usize) -> Node {
        Node::new(
            Instruction::Arithmetic {
                op,
                x: ValueId::new(x),
                y: ValueId::new(y),
            },
            ty,
        )
    }

    #[test]
    fn test_commutative_normalization() {
        let mut map = ValueMap::new();
        map.insert(&arith(ArithOp::Add, ValueType::Int, 1, 2), ValueId::new(4));
        assert_eq!(
            map.find(&arith(ArithOp::Add, ValueType::Int, 2, 1)),
            Some(ValueId::new(4))
        );
        assert_eq!(map.find(&arith(ArithOp::Sub, ValueType::Int, 2, 1)), None);
        // Float addition keeps its operand order.
        map.insert(&arith(ArithOp::Add, ValueType::Float, 1, 2), ValueId::new(5));
        assert_eq!(map.find(&arith(ArithOp::Add, ValueType::Float, 2, 1)), None);
        assert_eq!(map.hits(), 1);
    }

    #[test]
    fn test_trapping_and_patched_nodes_are_skipped() {
        let mut map = ValueMap::new();
        let div = arith(ArithOp::Div, ValueType::Int, 1, 2);
        map.insert(&div, ValueId::new(3));
        assert_eq!(map.find(&div), None);

        let patched = Node::constant(ConstValue::Unloaded).with_flags(NodeFlags::NEEDS_PATCHING);
        map.insert(&patched, ValueId::new(6));
        assert_eq!(map.find(&patched), None);
    }

    #[test]
    fn test_kill() {
        let mut map = ValueMap::new();
        let c = Node::constant(ConstValue::Int(7));
        map.insert(&c, ValueId::new(0));
        assert_eq!(map.find(&c), Some(ValueId::new(0)));
        map.kill();
        assert_eq!(map.find(&c), None);
    }
}
