//! Redundant phi elimination.
//!
//! The graph builder creates phis eagerly: every loop header gets one per live slot
//! written in the loop, and every join gets one per slot that differed on some edge
//! at merge time. Many of them turn out to merge a single value:
//!
//! ```text
//! B1: v9 = phi [v2, v9]        // loop-carried but never changed
//! B4: v12 = phi [v9, v9, v9]   // all edges agree once v9 is known
//! ```
//!
//! [`PhiSimplifier`] resolves each phi to the one distinct value its operands agree on,
//! ignoring self references and looking through phis that were simplified already.
//! Cycles of phis are broken with a visiting mark; a phi reached again while it is
//! being visited contributes nothing. Phis that merge distinct values or an illegal
//! operand are marked [`NodeFlags::CANNOT_SIMPLIFY`] and kept.
//!
//! Substituted phis are removed from their blocks and all uses are rewritten.

use tracing::debug;

use crate::ir::{Graph, Instruction, NodeFlags, ValueId};

/// Recursion depth beyond which a phi is conservatively kept.
const MAX_DEPTH: usize = 512;

/// Removes phis that merge a single value.
#[derive(Debug, Default)]
pub struct PhiSimplifier {
    substituted: usize,
}

impl PhiSimplifier {
    /// Creates a simplifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simplifies every phi of the reachable blocks and rewrites their uses.
    ///
    /// Returns the number of phis removed.
    pub fn run(&mut self, graph: &mut Graph) -> usize {
        let phis: Vec<ValueId> = graph
            .reachable_blocks()
            .into_iter()
            .flat_map(|block| graph.block(block).phis.clone())
            .collect();
        for phi in phis {
            self.simplify(graph, phi, 0);
        }
        graph.resolve_substitutions();
        debug!(target: "jitfront::phis", removed = self.substituted, "phis simplified");
        self.substituted
    }

    fn simplify(&mut self, graph: &mut Graph, value: ValueId, depth: usize) -> ValueId {
        let value = graph.resolve(value);
        let node = graph.node(value);
        let Instruction::Phi { operands, .. } = &node.instr else {
            return value;
        };
        let operands = operands.clone();
        if node
            .flags
            .intersects(NodeFlags::VISITED | NodeFlags::CANNOT_SIMPLIFY)
        {
            return value;
        }
        if node.is_illegal() || depth > MAX_DEPTH {
            graph.node_mut(value).flags |= NodeFlags::CANNOT_SIMPLIFY;
            return value;
        }

        graph.node_mut(value).flags |= NodeFlags::VISITED;
        let mut subst: Option<ValueId> = None;
        let mut distinct = false;
        let mut resolved = Vec::with_capacity(operands.len());
        for operand in operands {
            let opnd = self.simplify(graph, operand, depth + 1);
            resolved.push(opnd);
            if opnd == value || subst == Some(opnd) {
                continue;
            }
            if graph.node(opnd).is_illegal() || subst.is_some() {
                distinct = true;
                continue;
            }
            subst = Some(opnd);
        }
        let node = graph.node_mut(value);
        node.flags.remove(NodeFlags::VISITED);
        if let Instruction::Phi { operands, .. } = &mut node.instr {
            *operands = resolved;
        }

        match subst {
            Some(subst) if !distinct => {
                node.subst = Some(subst);
                self.substituted += 1;
                subst
            }
            _ => {
                node.flags |= NodeFlags::CANNOT_SIMPLIFY;
                value
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, ConstValue, Node, PhiSlot, ScopeId, ValueType};

    struct Fixture {
        graph: Graph,
        block: BlockId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut graph = Graph::new();
            let block = graph.add_block(0, ScopeId::new(0));
            graph.start = Some(block);
            Fixture { graph, block }
        }

        fn int(&mut self, value: i32) -> ValueId {
            self.graph.add_node(Node::constant(ConstValue::Int(value)))
        }

        fn phi(&mut self, operands: Vec<ValueId>) -> ValueId {
            let slot = PhiSlot::Local(self.graph.block(self.block).phis.len());
            let phi = self.graph.add_node(Node::new(
                Instruction::Phi {
                    block: self.block,
                    slot,
                    operands,
                },
                ValueType::Int,
            ));
            self.graph.block_mut(self.block).phis.push(phi);
            phi
        }

        fn set_operands(&mut self, phi: ValueId, new: Vec<ValueId>) {
            if let Instruction::Phi { operands, .. } = &mut self.graph.node_mut(phi).instr {
                *operands = new;
            }
        }

        fn ret(&mut self, value: ValueId) -> ValueId {
            let ret = self.graph.add_node(Node::new(
                Instruction::Return { value: Some(value) },
                ValueType::Void,
            ));
            self.graph.block_mut(self.block).end = Some(ret);
            ret
        }
    }

    #[test]
    fn test_self_referencing_phi() {
        let mut f = Fixture::new();
        let c = f.int(3);
        let phi = f.phi(vec![]);
        f.set_operands(phi, vec![c, phi, phi]);
        let ret = f.ret(phi);

        assert_eq!(PhiSimplifier::new().run(&mut f.graph), 1);
        assert!(f.graph.block(f.block).phis.is_empty());
        assert_eq!(f.graph.node(ret).instr.operands(), vec![c]);
    }

    #[test]
    fn test_phi_cycle_collapses() {
        let mut f = Fixture::new();
        let c = f.int(1);
        let a = f.phi(vec![]);
        let b = f.phi(vec![]);
        f.set_operands(a, vec![c, b]);
        f.set_operands(b, vec![a, a]);
        let ret = f.ret(b);

        PhiSimplifier::new().run(&mut f.graph);
        assert_eq!(f.graph.node(ret).instr.operands(), vec![c]);
        assert!(f.graph.block(f.block).phis.is_empty());
    }

    #[test]
    fn test_distinct_operands_are_kept() {
        let mut f = Fixture::new();
        let one = f.int(1);
        let two = f.int(2);
        let phi = f.phi(vec![one, two]);
        let outer = f.phi(vec![phi, phi]);
        let ret = f.ret(outer);

        assert_eq!(PhiSimplifier::new().run(&mut f.graph), 1);
        assert_eq!(f.graph.block(f.block).phis, vec![phi]);
        assert!(f.graph.node(phi).flags.contains(NodeFlags::CANNOT_SIMPLIFY));
        assert_eq!(f.graph.node(ret).instr.operands(), vec![phi]);
    }

    #[test]
    fn test_illegal_phi_is_kept() {
        let mut f = Fixture::new();
        let one = f.int(1);
        let phi = f.phi(vec![one, one]);
        f.graph.node_mut(phi).flags |= NodeFlags::ILLEGAL;

        assert_eq!(PhiSimplifier::new().run(&mut f.graph), 0);
        assert_eq!(f.graph.block(f.block).phis, vec![phi]);
    }

    #[test]
    fn test_deep_chain() {
        let mut f = Fixture::new();
        let c = f.int(7);
        let mut prev = c;
        for _ in 0..100 {
            prev = f.phi(vec![prev, prev]);
        }
        let ret = f.ret(prev);
        assert_eq!(PhiSimplifier::new().run(&mut f.graph), 100);
        assert_eq!(f.graph.node(ret).instr.operands(), vec![c]);
    }
}
