//! Graph construction integration tests.
//!
//! These tests drive the public compile entry points end to end:
//! 1. Assemble bytecode with `BytecodeAssembler`
//! 2. Register the method in an `InMemoryDatabase`
//! 3. Compile it with `compile_method` / `compile_osr_method`
//! 4. Inspect the reachable part of the resulting graph

use jitfront::{
    ir::{ArithOp, PhiSlot},
    prelude::*,
};

/// Registers a static method with the given body and returns its id.
fn add_static(
    db: &mut InMemoryDatabase,
    params: Vec<BasicType>,
    ret: BasicType,
    asm: &mut BytecodeAssembler,
    max_stack: u16,
    max_locals: u16,
) -> Result<MethodId> {
    let method = Method::new("test", Signature::new(params, ret))
        .with_flags(MethodFlags::STATIC)
        .with_holder(ClassId(1))
        .with_code(asm.finish()?, max_stack, max_locals);
    Ok(db.add_method(method))
}

/// All instructions held by reachable blocks.
fn live(graph: &Graph) -> Vec<&Instruction> {
    graph
        .live_values()
        .into_iter()
        .map(|v| &graph.node(v).instr)
        .collect()
}

/// The value returned by the only `Return` in the graph.
fn returned_value(graph: &Graph) -> Option<ValueId> {
    let returns: Vec<Option<ValueId>> = live(graph)
        .into_iter()
        .filter_map(|instr| match instr {
            Instruction::Return { value } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(returns.len(), 1, "expected exactly one return");
    returns[0]
}

/// Routes the builder's tracing events to the test output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn bailout_reason(result: Result<Compilation>) -> Option<BailoutReason> {
    match result {
        Err(Error::Bailout(bailout)) => Some(bailout.reason),
        _ => None,
    }
}

#[test]
fn test_constant_arithmetic_folds() -> Result<()> {
    init_tracing();
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(2).iconst(3).op(Opcode::Iadd).op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![], BasicType::Int, &mut asm, 2, 0)?;

    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;

    assert!(!live(graph)
        .iter()
        .any(|instr| matches!(instr, Instruction::Arithmetic { .. })));
    let fives = live(graph)
        .iter()
        .filter(|instr| matches!(instr, Instruction::Constant(ConstValue::Int(5))))
        .count();
    assert_eq!(fives, 1);

    let value = returned_value(graph).expect("int return");
    assert!(matches!(graph.constant(value), Some(ConstValue::Int(5))));
    assert_eq!(graph.node(value).bci, 2);
    Ok(())
}

#[test]
fn test_canonicalization_can_be_disabled() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(2).iconst(3).op(Opcode::Iadd).op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![], BasicType::Int, &mut asm, 2, 0)?;

    let config = CompilerConfig {
        canonicalize_nodes: false,
        ..CompilerConfig::default()
    };
    let compilation = compile_method(&db, id, &config)?;
    let graph = &compilation.graph;
    let value = returned_value(graph).expect("int return");
    assert!(matches!(
        graph.node(value).instr,
        Instruction::Arithmetic { op: ArithOp::Add, .. }
    ));
    Ok(())
}

#[test]
fn test_branch_on_identical_operands_becomes_goto() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iload(0)
        .iload(0)
        .branch(Opcode::IfIcmpeq, "same")
        .iconst(0)
        .op(Opcode::Ireturn);
    let same = asm.pos();
    asm.label("same").iconst(1).op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![BasicType::Int], BasicType::Int, &mut asm, 2, 1)?;

    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;

    let start = graph.start.expect("start block");
    let end = graph.block(start).end.expect("closed entry block");
    let Instruction::Goto { target } = graph.node(end).instr else {
        panic!("entry block should end in a goto");
    };
    assert_eq!(graph.block(target).bci, same as i32);
    assert_eq!(graph.reachable_blocks().len(), 2);
    assert!(!live(graph)
        .iter()
        .any(|instr| matches!(instr, Instruction::If { .. })));

    let value = returned_value(graph).expect("int return");
    assert!(matches!(graph.constant(value), Some(ConstValue::Int(1))));
    Ok(())
}

#[test]
fn test_loop_header_phi() -> Result<()> {
    init_tracing();
    // int i = 0; while (i < n) i++; return i;
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(0)
        .istore(1)
        .label("head")
        .iload(1)
        .iload(0)
        .branch(Opcode::IfIcmpge, "exit")
        .iinc(1, 1)
        .goto("head")
        .label("exit")
        .iload(1)
        .op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![BasicType::Int], BasicType::Int, &mut asm, 2, 2)?;

    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;

    let header = graph
        .reachable_blocks()
        .into_iter()
        .find(|&b| graph.block(b).is_set(BlockFlags::LOOP_HEADER))
        .expect("loop header");
    let header = graph.block(header);
    assert_eq!(header.predecessors.len(), 2);

    // Only the counter is written in the loop, so `n` needs no phi.
    assert_eq!(header.phis.len(), 1);
    let phi = header.phis[0];
    let Instruction::Phi { slot, operands, .. } = &graph.node(phi).instr else {
        panic!("phi expected");
    };
    assert_eq!(*slot, PhiSlot::Local(1));
    assert_eq!(operands.len(), header.predecessors.len());
    assert!(matches!(graph.constant(operands[0]), Some(ConstValue::Int(0))));
    assert!(matches!(
        graph.node(operands[1]).instr,
        Instruction::Arithmetic { op: ArithOp::Add, x, .. } if x == phi
    ));

    assert_eq!(returned_value(graph), Some(phi));
    assert_eq!(compilation.phis_removed, 0);
    Ok(())
}

#[test]
fn test_every_phi_has_one_operand_per_predecessor() -> Result<()> {
    // Nested diamonds and a loop, with phis on every local.
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(0)
        .istore(1)
        .label("head")
        .iload(1)
        .iload(0)
        .branch(Opcode::IfIcmpge, "exit")
        .iload(1)
        .branch(Opcode::Ifeq, "even")
        .iinc(1, 2)
        .goto("head")
        .label("even")
        .iinc(1, 1)
        .goto("head")
        .label("exit")
        .iload(1)
        .op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![BasicType::Int], BasicType::Int, &mut asm, 2, 2)?;

    let config = CompilerConfig {
        selective_phi_functions: false,
        eliminate_redundant_phis: false,
        ..CompilerConfig::default()
    };
    let compilation = compile_method(&db, id, &config)?;
    let graph = &compilation.graph;
    for block in graph.reachable_blocks() {
        let block = graph.block(block);
        for &phi in &block.phis {
            let Instruction::Phi { operands, .. } = &graph.node(phi).instr else {
                panic!("phi expected");
            };
            assert_eq!(operands.len(), block.predecessors.len());
        }
    }
    Ok(())
}

#[test]
fn test_redundant_phis_are_removed() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(0)
        .istore(1)
        .label("head")
        .iload(1)
        .iload(0)
        .branch(Opcode::IfIcmpge, "exit")
        .iinc(1, 1)
        .goto("head")
        .label("exit")
        .iload(1)
        .op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![BasicType::Int], BasicType::Int, &mut asm, 2, 2)?;

    // Without selective phis `n` gets a phi at the header that merges `n` with itself.
    let config = CompilerConfig {
        selective_phi_functions: false,
        ..CompilerConfig::default()
    };
    let compilation = compile_method(&db, id, &config)?;
    let graph = &compilation.graph;
    assert!(compilation.phis_removed >= 1);
    let live_phis = live(graph)
        .iter()
        .filter(|instr| instr.is_phi())
        .count();
    assert_eq!(live_phis, 1);
    Ok(())
}

#[test]
fn test_handler_covering_itself_bails_out() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.op(Opcode::Nop).op(Opcode::AconstNull).op(Opcode::Athrow);
    let method = Method::new("test", Signature::new(vec![], BasicType::Void))
        .with_flags(MethodFlags::STATIC)
        .with_code(asm.finish()?, 1, 0)
        .with_handler(ExceptionHandler {
            start_pc: 0,
            end_pc: 3,
            handler_pc: 1,
            catch_type: 0,
        });
    let id = db.add_method(method);

    let result = compile_method(&db, id, &CompilerConfig::default());
    assert_eq!(bailout_reason(result), Some(BailoutReason::HandlerCoversItself));
    assert_eq!(
        BailoutReason::HandlerCoversItself.to_string(),
        "exception handler covers itself"
    );
    Ok(())
}

#[test]
fn test_trapping_node_joins_handler() -> Result<()> {
    // try { return a / b; } catch (any) { return 0; }
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iload(0).iload(1).op(Opcode::Idiv).op(Opcode::Ireturn);
    let handler_pc = asm.pos();
    asm.op(Opcode::Pop).iconst(0).op(Opcode::Ireturn);
    let method = Method::new("test", Signature::new(vec![BasicType::Int; 2], BasicType::Int))
        .with_flags(MethodFlags::STATIC)
        .with_code(asm.finish()?, 2, 2)
        .with_handler(ExceptionHandler {
            start_pc: 0,
            end_pc: handler_pc,
            handler_pc,
            catch_type: 0,
        });
    let id = db.add_method(method);

    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;

    let (div, node) = graph
        .nodes()
        .find(|(_, n)| matches!(n.instr, Instruction::Arithmetic { op: ArithOp::Div, .. }))
        .expect("division");
    assert_eq!(node.exception_handlers.len(), 1);
    let entry = node.exception_handlers[0].entry_block.expect("handler entry");
    assert!(graph.block(entry).is_set(BlockFlags::EXCEPTION_ENTRY));
    assert!(graph.reachable_blocks().contains(&entry));

    let first = graph.block(entry).instructions[0];
    assert!(matches!(graph.node(first).instr, Instruction::ExceptionObject));
    // The handler's entry state never carries operand stack values.
    let state = graph.block(entry).state.as_ref().expect("merged state");
    assert!(state.is_stack_empty());

    let block = node.block.expect("appended node");
    assert!(graph.block(block).exception_handlers.contains(&entry));
    assert!(graph.block(block).instructions.contains(&div));
    Ok(())
}

#[test]
fn test_table_switch() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iload(0)
        .tableswitch(0, &["zero", "one"], "other")
        .label("zero")
        .iconst(10)
        .op(Opcode::Ireturn)
        .label("one")
        .iconst(20)
        .op(Opcode::Ireturn)
        .label("other")
        .iconst(30)
        .op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![BasicType::Int], BasicType::Int, &mut asm, 1, 1)?;

    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;
    let start = graph.start.expect("start block");
    let end = graph.block(start).end.expect("closed entry block");
    let Instruction::TableSwitch { low, targets, .. } = &graph.node(end).instr else {
        panic!("entry block should end in a table switch");
    };
    assert_eq!(*low, 0);
    assert_eq!(targets.len(), 2);
    assert_eq!(graph.reachable_blocks().len(), 4);
    Ok(())
}

#[test]
fn test_switch_on_constant_becomes_goto() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(5)
        .lookupswitch(&[(1, "one"), (5, "five")], "other")
        .label("one")
        .iconst(10)
        .op(Opcode::Ireturn);
    let five = asm.pos();
    asm.label("five")
        .iconst(50)
        .op(Opcode::Ireturn)
        .label("other")
        .iconst(0)
        .op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![], BasicType::Int, &mut asm, 1, 0)?;

    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;
    let start = graph.start.expect("start block");
    let end = graph.block(start).end.expect("closed entry block");
    let Instruction::Goto { target } = graph.node(end).instr else {
        panic!("entry block should end in a goto");
    };
    assert_eq!(graph.block(target).bci, five as i32);
    assert_eq!(graph.reachable_blocks().len(), 2);
    Ok(())
}

#[test]
fn test_subroutine_is_inlined_per_call_site() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.jsr("sub").op(Opcode::Return);
    let sub = asm.pos();
    asm.label("sub").astore(2).iconst(1).istore(3).ret(2);
    let id = add_static(&mut db, vec![], BasicType::Void, &mut asm, 1, 4)?;

    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;
    assert!(returned_value(graph).is_none());

    // The subroutine body is a private copy reached from the jsr, and its ret jumps
    // back to the bytecode after the jsr.
    let reachable = graph.reachable_blocks();
    let copy = reachable
        .iter()
        .copied()
        .find(|&b| graph.block(b).bci == sub as i32)
        .expect("subroutine copy");
    let end = graph.block(copy).end.expect("closed subroutine block");
    let Instruction::Goto { target } = graph.node(end).instr else {
        panic!("ret should become a goto");
    };
    assert_eq!(graph.block(target).bci, 3);
    Ok(())
}

#[test]
fn test_ret_outside_subroutine_bails_out() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.ret(0);
    let id = add_static(&mut db, vec![], BasicType::Void, &mut asm, 1, 1)?;
    let result = compile_method(&db, id, &CompilerConfig::default());
    assert_eq!(bailout_reason(result), Some(BailoutReason::RetOutsideSubroutine));
    Ok(())
}

#[test]
fn test_lock_mismatch_bails_out() -> Result<()> {
    // if (c != 0) monitorenter(o); return;
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iload(1)
        .branch(Opcode::Ifeq, "skip")
        .aload(0)
        .op(Opcode::Monitorenter)
        .label("skip")
        .op(Opcode::Return);
    let id = add_static(
        &mut db,
        vec![BasicType::Object, BasicType::Int],
        BasicType::Void,
        &mut asm,
        1,
        2,
    )?;
    let result = compile_method(&db, id, &CompilerConfig::default());
    assert_eq!(bailout_reason(result), Some(BailoutReason::LockMismatch));
    Ok(())
}

fn osr_loop(db: &mut InMemoryDatabase) -> Result<(MethodId, u32)> {
    let mut asm = BytecodeAssembler::new();
    asm.iconst(0).istore(1);
    let head = asm.pos();
    asm.label("head")
        .iload(1)
        .iconst(100)
        .branch(Opcode::IfIcmpge, "exit")
        .iinc(1, 1)
        .goto("head")
        .label("exit")
        .iload(1)
        .op(Opcode::Ireturn);
    let id = add_static(db, vec![], BasicType::Int, &mut asm, 2, 2)?;
    Ok((id, head))
}

#[test]
fn test_osr_entry() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let (id, head) = osr_loop(&mut db)?;

    let compilation = compile_osr_method(&db, id, head, &CompilerConfig::default())?;
    let graph = &compilation.graph;
    let osr = graph.osr_entry.expect("osr entry block");
    assert!(graph.block(osr).is_set(BlockFlags::OSR_ENTRY));

    let instrs: Vec<&Instruction> = graph
        .block(osr)
        .instructions
        .iter()
        .map(|&v| &graph.node(v).instr)
        .collect();
    assert!(matches!(instrs[0], Instruction::OsrEntry));
    assert!(instrs
        .iter()
        .any(|instr| matches!(instr, Instruction::OsrLocal { index: 1 })));

    let end = graph.block(osr).end.expect("closed osr block");
    let Instruction::Goto { target } = graph.node(end).instr else {
        panic!("osr block should jump to the loop");
    };
    assert_eq!(graph.block(target).bci, head as i32);
    // Entry, OSR entry and back edge.
    assert_eq!(graph.block(target).predecessors.len(), 3);
    Ok(())
}

#[test]
fn test_osr_at_unreached_bci_bails_out() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(1).op(Opcode::Ireturn);
    let dead = asm.pos();
    asm.iconst(2).op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![], BasicType::Int, &mut asm, 1, 0)?;

    let result = compile_osr_method(&db, id, dead, &CompilerConfig::default());
    assert_eq!(bailout_reason(result), Some(BailoutReason::OsrEntryNotVisited));
    Ok(())
}

#[test]
fn test_node_budget() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut asm = BytecodeAssembler::new();
    asm.iconst(2).iconst(3).op(Opcode::Iadd).op(Opcode::Ireturn);
    let id = add_static(&mut db, vec![], BasicType::Int, &mut asm, 2, 0)?;

    let config = CompilerConfig::default().with_instruction_count_cutoff(2);
    match compile_method(&db, id, &config) {
        Err(Error::Bailout(bailout)) => {
            assert_eq!(bailout.reason, BailoutReason::TooLarge);
            assert!(bailout.instruction_count <= 3);
        }
        other => panic!("expected a bailout, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_unknown_method() {
    let db = InMemoryDatabase::new();
    let result = compile_method(&db, MethodId(7), &CompilerConfig::default());
    assert!(matches!(result, Err(Error::MethodNotFound(MethodId(7)))));
}

#[test]
fn test_compile_methods_in_parallel() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let mut ids = Vec::new();
    for i in 0..8 {
        let mut asm = BytecodeAssembler::new();
        asm.iconst(i).iconst(1).op(Opcode::Iadd).op(Opcode::Ireturn);
        ids.push(add_static(&mut db, vec![], BasicType::Int, &mut asm, 2, 0)?);
    }
    ids.push(MethodId(99));

    let results = compile_methods(&db, &ids, &CompilerConfig::default());
    assert_eq!(results.len(), ids.len());
    for (i, result) in results.iter().take(8).enumerate() {
        let compilation = result.as_ref().expect("compiles");
        assert_eq!(compilation.method, ids[i]);
        let value = returned_value(&compilation.graph).expect("int return");
        assert!(matches!(
            compilation.graph.constant(value),
            Some(ConstValue::Int(v)) if v == i as i32 + 1
        ));
    }
    assert!(matches!(results[8], Err(Error::MethodNotFound(_))));
    Ok(())
}

#[test]
fn test_block_discovery_is_deterministic() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let (id, _) = osr_loop(&mut db)?;
    let config = CompilerConfig::default();
    let first = compile_method(&db, id, &config)?;
    let second = compile_method(&db, id, &config)?;

    let (a, b) = (&first.graph, &second.graph);
    assert_eq!(a.reachable_blocks(), b.reachable_blocks());
    for block in a.reachable_blocks() {
        let (x, y) = (a.block(block), b.block(block));
        assert_eq!(x.bci, y.bci);
        assert_eq!(x.flags, y.flags);
        assert_eq!(x.depth_first_number, y.depth_first_number);
        assert_eq!(x.successors, y.successors);
    }
    assert_eq!(first.instruction_count, second.instruction_count);
    Ok(())
}

#[test]
fn test_upcast_of_declared_values_is_removed() -> Result<()> {
    // class Sub extends Base { Base self() { return (Base) this; } }
    let (base, sub, leaf) = (ClassId(1), ClassId(2), ClassId(3));
    let mut db = InMemoryDatabase::new();
    db.set_superclass(sub, base);
    db.set_superclass(leaf, sub);
    db.set_class(1, ClassRef::loaded("Base", base));
    db.set_class(2, ClassRef::loaded("Leaf", leaf));

    let mut asm = BytecodeAssembler::new();
    asm.aload(0)
        .index_op(Opcode::Checkcast, 1)
        .op(Opcode::Areturn);
    let id = db.add_method(
        Method::new("self", Signature::new(vec![], BasicType::Object))
            .with_holder(sub)
            .with_code(asm.finish()?, 1, 1),
    );
    let compilation = compile_method(&db, id, &CompilerConfig::default())?;
    let graph = &compilation.graph;
    assert!(!live(graph)
        .iter()
        .any(|instr| matches!(instr, Instruction::CheckCast { .. })));
    let value = returned_value(graph).expect("object return");
    assert!(matches!(graph.node(value).instr, Instruction::Local { index: 0 }));

    // static Base up(Sub s) keeps no cast; static Leaf down(Sub s) keeps its cast.
    let sig = Signature::new(vec![BasicType::Object], BasicType::Object).with_param_class(0, sub);
    for (index, folds) in [(1u16, true), (2, false)] {
        let mut asm = BytecodeAssembler::new();
        asm.aload(0)
            .index_op(Opcode::Checkcast, index)
            .op(Opcode::Areturn);
        let id = db.add_method(
            Method::new("cast", sig.clone())
                .with_flags(MethodFlags::STATIC)
                .with_code(asm.finish()?, 1, 1),
        );
        let compilation = compile_method(&db, id, &CompilerConfig::default())?;
        let casts = live(&compilation.graph)
            .iter()
            .filter(|instr| matches!(instr, Instruction::CheckCast { .. }))
            .count();
        assert_eq!(casts, usize::from(!folds));
    }
    Ok(())
}
