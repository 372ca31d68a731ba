//! The graph arena.
//!
//! A [`Graph`] owns every node, block, state snapshot and inlining scope of one
//! compilation. Entities refer to each other only through ids, so inlining can
//! splice callee blocks into the caller and later passes can redirect uses without
//! any ownership juggling.
//!
//! # Structure
//!
//! - Each block lists its phis, its straight-line instructions and its terminating
//!   control node separately.
//! - Control successors are read off the block end ([`Graph::end_successors`]);
//!   exception successors are the block's handler entries.
//! - Nodes replaced after construction carry a substitution; a final
//!   [`Graph::resolve_substitutions`] pass rewrites every use.

use std::collections::HashSet;

use crate::{
    database::MethodId,
    ir::{
        Block, BlockId, ConstValue, Instruction, Node, NodeFlags, ScopeId, StateId, ValueId,
        ValueStack, ValueType,
    },
};

/// One parsing scope: the root method, an inlined callee or a subroutine copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrScope {
    /// Method whose bytecode the scope parses.
    pub method: MethodId,
    /// Enclosing scope.
    pub caller: Option<ScopeId>,
    /// Call site bci in the caller; -1 for the root.
    pub caller_bci: i32,
    /// Inlining depth; 0 for the root.
    pub level: usize,
}

/// The IR of one compilation.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    blocks: Vec<Block>,
    states: Vec<ValueStack>,
    scopes: Vec<IrScope>,
    /// Method entry block.
    pub start: Option<BlockId>,
    /// On-stack-replacement entry block, for OSR compilations.
    pub osr_entry: Option<BlockId>,
    /// State at the method entry.
    pub entry_state: Option<StateId>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node.
    pub fn add_node(&mut self, node: Node) -> ValueId {
        self.nodes.push(node);
        ValueId::new(self.nodes.len() - 1)
    }

    /// Returns a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    #[must_use]
    pub fn node(&self, id: ValueId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Returns a node mutably.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn node_mut(&mut self, id: ValueId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Returns the result type of a node.
    #[must_use]
    pub fn ty(&self, id: ValueId) -> ValueType {
        self.nodes[id.index()].ty
    }

    /// Returns the number of nodes ever created, including replaced ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterates over all nodes with their ids.
    pub fn nodes(&self) -> impl Iterator<Item = (ValueId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (ValueId::new(i), node))
    }

    /// Adds an empty block.
    pub fn add_block(&mut self, bci: i32, scope: ScopeId) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::new(id, bci, scope));
        id
    }

    /// Returns a block.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Returns a block mutably.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Iterates over all blocks, reachable or not.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Records a state snapshot.
    pub fn add_state(&mut self, state: ValueStack) -> StateId {
        self.states.push(state);
        StateId::new(self.states.len() - 1)
    }

    /// Returns a state snapshot.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    #[must_use]
    pub fn state(&self, id: StateId) -> &ValueStack {
        &self.states[id.index()]
    }

    /// Returns the number of recorded snapshots.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Adds a scope.
    pub fn add_scope(&mut self, scope: IrScope) -> ScopeId {
        self.scopes.push(scope);
        ScopeId::new(self.scopes.len() - 1)
    }

    /// Returns a scope.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &IrScope {
        &self.scopes[id.index()]
    }

    /// Returns the number of scopes.
    #[must_use]
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Follows the substitution chain of a value to its final replacement.
    #[must_use]
    pub fn resolve(&self, mut id: ValueId) -> ValueId {
        let mut steps = 0;
        while let Some(next) = self.nodes[id.index()].subst {
            if next == id || steps > self.nodes.len() {
                break;
            }
            id = next;
            steps += 1;
        }
        id
    }

    /// Returns the constant a value resolves to, if any.
    #[must_use]
    pub fn constant(&self, id: ValueId) -> Option<ConstValue> {
        self.nodes[self.resolve(id).index()]
            .instr
            .as_constant()
            .copied()
    }

    /// Returns `true` if `id` is a phi owned by `block`.
    #[must_use]
    pub fn is_phi_of(&self, id: ValueId, block: BlockId) -> bool {
        matches!(
            self.nodes[id.index()].instr,
            Instruction::Phi { block: owner, .. } if owner == block
        )
    }

    /// Returns the control successors of a block's end node.
    #[must_use]
    pub fn end_successors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks[block.index()]
            .end
            .map(|end| self.nodes[end.index()].instr.successors())
            .unwrap_or_default()
    }

    /// Returns the blocks reachable from the entries, in depth-first preorder.
    ///
    /// Edges are the control successors of each block end plus the block's exception
    /// handler entries.
    #[must_use]
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<BlockId> = self
            .osr_entry
            .iter()
            .chain(self.start.iter())
            .copied()
            .collect();
        while let Some(block) = stack.pop() {
            if !seen.insert(block) {
                continue;
            }
            order.push(block);
            let mut next = self.end_successors(block);
            next.extend(self.blocks[block.index()].exception_handlers.iter().copied());
            stack.extend(next.into_iter().rev().filter(|b| !seen.contains(b)));
        }
        order
    }

    /// Returns every value a reachable block holds: phis, instructions and the end,
    /// block by block.
    #[must_use]
    pub fn live_values(&self) -> Vec<ValueId> {
        let mut values = Vec::new();
        for block in self.reachable_blocks() {
            let block = &self.blocks[block.index()];
            values.extend(block.phis.iter().copied());
            values.extend(block.instructions.iter().copied());
            values.extend(block.end);
        }
        values
    }

    /// Rewrites every use of a substituted value to its replacement and drops
    /// substituted phis from their blocks.
    pub fn resolve_substitutions(&mut self) {
        if self.nodes.iter().all(|n| n.subst.is_none()) {
            return;
        }
        let targets: Vec<ValueId> = (0..self.nodes.len())
            .map(|i| self.resolve(ValueId::new(i)))
            .collect();
        let map = |v: ValueId| targets[v.index()];

        for node in &mut self.nodes {
            node.instr.map_operands(map);
        }
        for state in &mut self.states {
            state.map_values_mut(map);
        }
        for block in &mut self.blocks {
            block.phis.retain(|phi| targets[phi.index()] == *phi);
            block.instructions.retain(|v| targets[v.index()] == *v);
            if let Some(state) = block.state.as_mut() {
                state.map_values_mut(map);
            }
        }
    }

    /// Removes illegal phis from their blocks and from every state snapshot.
    ///
    /// A phi with an illegal operand becomes illegal too. Returns the first reachable
    /// instruction that still consumes an illegal phi; such a graph cannot be used.
    pub fn remove_illegal_phis(&mut self) -> Option<ValueId> {
        let mut illegal: HashSet<ValueId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.instr.is_phi() && n.is_illegal())
            .map(|(i, _)| ValueId::new(i))
            .collect();
        if illegal.is_empty() {
            return None;
        }
        loop {
            let spread: Vec<ValueId> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, n)| {
                    n.instr.is_phi()
                        && !illegal.contains(&ValueId::new(*i))
                        && n.instr.operands().iter().any(|op| illegal.contains(op))
                })
                .map(|(i, _)| ValueId::new(i))
                .collect();
            if spread.is_empty() {
                break;
            }
            for phi in spread {
                let node = &mut self.nodes[phi.index()];
                node.flags |= NodeFlags::ILLEGAL;
                node.ty = ValueType::Illegal;
                illegal.insert(phi);
            }
        }

        for state in &mut self.states {
            state.invalidate_values(|v| illegal.contains(&v));
        }
        for block in &mut self.blocks {
            block.phis.retain(|phi| !illegal.contains(phi));
            if let Some(state) = block.state.as_mut() {
                state.invalidate_values(|v| illegal.contains(&v));
            }
        }
        self.live_values().into_iter().find(|v| {
            !self.nodes[v.index()].instr.is_phi()
                && self.nodes[v.index()]
                    .instr
                    .operands()
                    .iter()
                    .any(|op| illegal.contains(op))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::PhiSlot;

    #[test]
    fn test_reachable_blocks() {
        let mut graph = Graph::new();
        let scope = ScopeId::new(0);
        let b0 = graph.add_block(0, scope);
        let b1 = graph.add_block(3, scope);
        let b2 = graph.add_block(6, scope);
        let dead = graph.add_block(9, scope);
        let goto = graph.add_node(Node::new(Instruction::Goto { target: b1 }, ValueType::Void));
        graph.block_mut(b0).end = Some(goto);
        graph.block_mut(b0).add_exception_handler(b2);
        let ret = graph.add_node(Node::new(Instruction::Return { value: None }, ValueType::Void));
        graph.block_mut(b1).end = Some(ret);
        graph.start = Some(b0);

        assert_eq!(graph.reachable_blocks(), vec![b0, b1, b2]);
        assert!(!graph.reachable_blocks().contains(&dead));
    }

    #[test]
    fn test_substitution() {
        let mut graph = Graph::new();
        let scope = ScopeId::new(0);
        let b0 = graph.add_block(0, scope);
        let c = graph.add_node(Node::constant(ConstValue::Int(1)));
        let phi = graph.add_node(Node::new(
            Instruction::Phi {
                block: b0,
                slot: PhiSlot::Local(0),
                operands: vec![c, c],
            },
            ValueType::Int,
        ));
        let ret = graph.add_node(Node::new(
            Instruction::Return { value: Some(phi) },
            ValueType::Void,
        ));
        graph.block_mut(b0).phis.push(phi);
        graph.block_mut(b0).end = Some(ret);
        graph.node_mut(phi).subst = Some(c);

        assert!(graph.is_phi_of(phi, b0));
        assert_eq!(graph.constant(phi), Some(ConstValue::Int(1)));
        graph.resolve_substitutions();
        assert!(graph.block(b0).phis.is_empty());
        assert_eq!(graph.node(ret).instr.operands(), vec![c]);
    }

    #[test]
    fn test_illegal_phis_are_removed() {
        let mut graph = Graph::new();
        let scope = ScopeId::new(0);
        let b0 = graph.add_block(0, scope);
        graph.start = Some(b0);
        let c = graph.add_node(Node::constant(ConstValue::Int(1)));
        let phi = |block, operands| {
            Node::new(
                Instruction::Phi {
                    block,
                    slot: PhiSlot::Local(0),
                    operands,
                },
                ValueType::Int,
            )
        };
        let bad = graph.add_node(phi(b0, vec![c]));
        graph.node_mut(bad).flags |= NodeFlags::ILLEGAL;
        let user = graph.add_node(phi(b0, vec![c, bad]));
        graph.block_mut(b0).phis = vec![bad, user];
        let mut state = ValueStack::new(scope, 1, None);
        state.set_local(0, Some(user));
        let snapshot = graph.add_state(state);
        let ret = graph.add_node(Node::new(Instruction::Return { value: None }, ValueType::Void));
        graph.block_mut(b0).end = Some(ret);

        assert_eq!(graph.remove_illegal_phis(), None);
        assert!(graph.block(b0).phis.is_empty());
        assert!(graph.node(user).is_illegal());
        assert_eq!(graph.state(snapshot).local(0), None);

        // A real use of the illegal value is reported.
        let b1 = graph.add_block(3, scope);
        let phi2 = graph.add_node(phi(b1, vec![c]));
        graph.node_mut(phi2).flags |= NodeFlags::ILLEGAL;
        graph.block_mut(b1).phis.push(phi2);
        let use_it = graph.add_node(Node::new(Instruction::Return { value: Some(phi2) }, ValueType::Void));
        graph.block_mut(b1).end = Some(use_it);
        graph.start = Some(b1);
        assert_eq!(graph.remove_illegal_phis(), Some(use_it));
    }
}
