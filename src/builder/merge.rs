//! Merging interpreter states at block entries.
//!
//! Every edge into a block hands its state to [`try_merge`]. The first arrival becomes
//! the block's entry state; each later arrival is reconciled slot by slot with it:
//!
//! - a slot that already holds a phi of the block gets the new value appended as the
//!   operand of the new edge;
//! - a slot holding the same value on every edge stays as it is;
//! - a slot that differs gets a fresh phi whose operands repeat the old value once per
//!   earlier edge and end with the new value.
//!
//! Phis therefore always carry exactly one operand per recorded predecessor. Loop
//! headers get their phis eagerly on the first arrival, since a back edge reaches them
//! only after the loop body has been parsed against the entry state.
//!
//! A local whose types disagree is dropped from the state. A phi over such a slot is
//! marked illegal and removed once the whole method has been parsed.

use crate::{
    ir::{
        BlockFlags, BlockId, Graph, Instruction, Node, NodeFlags, PhiSlot, StateKind, ValueId,
        ValueStack, ValueType,
    },
    utils::BitSet,
    BailoutReason,
};

/// Merges `new_state`, arriving over the edge from `pred`, into the entry state of
/// `target`.
///
/// `requires_phi` lists the locals written inside loops of the target's method; with
/// `selective` set, loop headers only get phis for those locals.
///
/// Returns `Ok(false)` if the states cannot be joined (different stack depth, values
/// of different types on the stack, or a new value reaching an already parsed block
/// that has no phi for it).
///
/// # Errors
/// Fails with [`BailoutReason::LockMismatch`] when the number of held monitors differs.
pub(crate) fn try_merge(
    graph: &mut Graph,
    target: BlockId,
    pred: Option<BlockId>,
    new_state: &ValueStack,
    requires_phi: &BitSet,
    selective: bool,
) -> Result<bool, BailoutReason> {
    let Some(mut existing) = graph.block_mut(target).state.take() else {
        return Ok(first_arrival(graph, target, pred, new_state, requires_phi, selective));
    };
    let merged = merge_into(graph, target, &mut existing, new_state);
    graph.block_mut(target).state = Some(existing);
    if merged? {
        if let Some(pred) = pred {
            graph.block_mut(target).predecessors.push(pred);
        }
        Ok(true)
    } else {
        Ok(false)
    }
}

fn first_arrival(
    graph: &mut Graph,
    target: BlockId,
    pred: Option<BlockId>,
    new_state: &ValueStack,
    requires_phi: &BitSet,
    selective: bool,
) -> bool {
    let block = graph.block(target);
    if block.is_set(BlockFlags::WAS_VISITED) {
        return false;
    }
    let mut state = new_state.copy(StateKind::BlockBegin, block.bci);

    if block.is_set(BlockFlags::LOOP_HEADER) {
        for i in 0..state.stack_size() {
            if let Some(value) = state.stack_at(i) {
                let phi = new_phi(graph, target, PhiSlot::Stack(i), vec![value]);
                state.set_stack_at(i, Some(phi));
            }
        }
        for i in 0..state.locals_size() {
            let Some(value) = state.local(i) else {
                continue;
            };
            let needs_phi = !selective
                || requires_phi.contains(i)
                || (graph.ty(value).is_double_word() && requires_phi.contains(i + 1));
            if needs_phi {
                let phi = new_phi(graph, target, PhiSlot::Local(i), vec![value]);
                state.set_local(i, Some(phi));
            }
        }
    }

    let block = graph.block_mut(target);
    block.state = Some(state);
    block.predecessors.extend(pred);
    true
}

fn merge_into(
    graph: &mut Graph,
    target: BlockId,
    existing: &mut ValueStack,
    new_state: &ValueStack,
) -> Result<bool, BailoutReason> {
    if !existing.is_same_shape(new_state) {
        if existing.locks_size() != new_state.locks_size() {
            return Err(BailoutReason::LockMismatch);
        }
        return Ok(false);
    }
    let n = graph.block(target).predecessors.len();

    // Existing phis get the operand of the new edge.
    for phi in graph.block(target).phis.clone() {
        let Instruction::Phi { slot, .. } = graph.node(phi).instr else {
            continue;
        };
        let incoming = match slot {
            PhiSlot::Stack(i) => new_state.stack_at(i),
            PhiSlot::Local(i) => new_state.local(i),
        };
        let legal = !graph.node(phi).is_illegal();
        let operand = match incoming {
            Some(value) if legal && graph.ty(value) == graph.ty(phi) => value,
            _ => {
                let PhiSlot::Local(index) = slot else {
                    return Ok(false);
                };
                make_illegal(graph, phi);
                existing.invalidate_local(index);
                phi
            }
        };
        if let Instruction::Phi { operands, .. } = &mut graph.node_mut(phi).instr {
            operands.push(operand);
        }
    }

    if graph.block(target).is_set(BlockFlags::WAS_VISITED) {
        // Only a loop header can be reached after parsing, and only with values
        // that already have phis.
        if !graph.block(target).is_set(BlockFlags::LOOP_HEADER) {
            return Ok(false);
        }
        for i in 0..existing.locals_size() {
            if let Some(old) = existing.local(i) {
                if !graph.is_phi_of(old, target) && new_state.local(i) != Some(old) {
                    return Ok(false);
                }
            }
        }
        for i in 0..existing.stack_size() {
            if let Some(old) = existing.stack_at(i) {
                if !graph.is_phi_of(old, target) && new_state.stack_at(i) != Some(old) {
                    return Ok(false);
                }
            }
        }
        return Ok(true);
    }

    for i in 0..existing.stack_size() {
        let Some(old) = existing.stack_at(i) else {
            continue;
        };
        if graph.is_phi_of(old, target) {
            continue;
        }
        match new_state.stack_at(i) {
            Some(new) if new == old => {}
            Some(new) if graph.ty(new) == graph.ty(old) => {
                let mut operands = vec![old; n];
                operands.push(new);
                let phi = new_phi(graph, target, PhiSlot::Stack(i), operands);
                existing.set_stack_at(i, Some(phi));
            }
            _ => return Ok(false),
        }
    }

    for i in 0..existing.locals_size() {
        let Some(old) = existing.local(i) else {
            continue;
        };
        if graph.is_phi_of(old, target) {
            continue;
        }
        match new_state.local(i) {
            Some(new) if new == old => {}
            Some(new) if graph.ty(new) == graph.ty(old) => {
                let mut operands = vec![old; n];
                operands.push(new);
                let phi = new_phi(graph, target, PhiSlot::Local(i), operands);
                existing.set_local(i, Some(phi));
            }
            _ => existing.invalidate_local(i),
        }
    }
    Ok(true)
}

fn new_phi(graph: &mut Graph, block: BlockId, slot: PhiSlot, operands: Vec<ValueId>) -> ValueId {
    let ty = graph.ty(operands[0]);
    let mut node = Node::new(Instruction::Phi { block, slot, operands }, ty);
    node.bci = graph.block(block).bci;
    let phi = graph.add_node(node);
    graph.block_mut(block).phis.push(phi);
    phi
}

fn make_illegal(graph: &mut Graph, phi: ValueId) {
    let node = graph.node_mut(phi);
    node.flags |= NodeFlags::ILLEGAL;
    node.ty = ValueType::Illegal;
}
