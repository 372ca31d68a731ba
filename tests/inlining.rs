//! Inlining integration tests.
//!
//! Each test registers a caller and a callee in an `InMemoryDatabase`, compiles the
//! caller and checks both the inlining decision log and the shape of the graph.

use jitfront::{
    compiler::{InlineOutcome, InlineRejection, UnresolvedKind},
    ir::ArithOp,
    prelude::*,
};

const CALLEE_REF: u16 = 1;

fn util() -> ClassRef {
    ClassRef::loaded("Util", ClassId(1))
}

fn int_sig(params: usize) -> Signature {
    Signature::new(vec![BasicType::Int; params], BasicType::Int)
}

/// `static int inc(int x) { return x + 1; }`
fn inc_method() -> Result<Method> {
    let mut asm = BytecodeAssembler::new();
    asm.iload(0).iconst(1).op(Opcode::Iadd).op(Opcode::Ireturn);
    Ok(Method::new("inc", int_sig(1))
        .with_flags(MethodFlags::STATIC)
        .with_holder(ClassId(1))
        .with_code(asm.finish()?, 2, 1))
}

/// Registers `callee` as a static method reachable through `CALLEE_REF`.
fn add_static_callee(db: &mut InMemoryDatabase, callee: Method) -> MethodId {
    let sig = callee.signature.clone();
    let name = callee.name.clone();
    let id = db.add_method(callee);
    db.set_method_ref(
        CALLEE_REF,
        MethodRef::resolved(util(), &name, sig, id).with_static(),
    );
    id
}

/// `static int caller(int x) { return callee(x); }`
fn add_caller(db: &mut InMemoryDatabase, params: usize) -> Result<MethodId> {
    let mut asm = BytecodeAssembler::new();
    for i in 0..params {
        asm.iload(i as u16);
    }
    asm.index_op(Opcode::Invokestatic, CALLEE_REF)
        .op(Opcode::Ireturn);
    let caller = Method::new("caller", int_sig(params))
        .with_flags(MethodFlags::STATIC)
        .with_holder(ClassId(1))
        .with_code(asm.finish()?, params.max(1) as u16, params as u16);
    Ok(db.add_method(caller))
}

fn live(graph: &Graph) -> Vec<&Instruction> {
    graph
        .live_values()
        .into_iter()
        .map(|v| &graph.node(v).instr)
        .collect()
}

fn count(graph: &Graph, pred: impl Fn(&Instruction) -> bool) -> usize {
    live(graph).into_iter().filter(|instr| pred(instr)).count()
}

fn returned_value(graph: &Graph) -> Option<ValueId> {
    live(graph).into_iter().find_map(|instr| match instr {
        Instruction::Return { value } => *value,
        _ => None,
    })
}

/// Compiles `caller` and returns the outcome of its only call site.
fn single_outcome(
    db: &InMemoryDatabase,
    caller: MethodId,
    config: &CompilerConfig,
) -> Result<(InlineOutcome, Compilation)> {
    let compilation = compile_method(db, caller, config)?;
    assert_eq!(compilation.inlining.len(), 1);
    Ok((compilation.inlining[0].outcome, compilation))
}

#[test]
fn test_single_return_callee_is_spliced() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let callee = add_static_callee(&mut db, inc_method()?);
    let caller = add_caller(&mut db, 1)?;

    let compilation = compile_method(&db, caller, &CompilerConfig::default())?;
    let decision = &compilation.inlining[0];
    assert_eq!(decision.outcome, InlineOutcome::Inlined);
    assert_eq!(decision.callee, Some(callee));
    assert_eq!(decision.caller, caller);
    assert_eq!(decision.callee_name, "inc");
    assert_eq!(decision.level, 0);
    assert_eq!(decision.bci, 1);

    // The callee's body continues the caller's block: no call, no jump.
    let graph = &compilation.graph;
    assert_eq!(graph.reachable_blocks().len(), 1);
    assert_eq!(count(graph, |i| matches!(i, Instruction::Invoke { .. })), 0);
    assert_eq!(count(graph, |i| matches!(i, Instruction::Goto { .. })), 0);
    assert_eq!(graph.scope_count(), 2);

    let value = returned_value(graph).expect("int return");
    let Instruction::Arithmetic {
        op: ArithOp::Add,
        x,
        ..
    } = graph.node(value).instr
    else {
        panic!("callee's addition expected");
    };
    assert!(matches!(graph.node(x).instr, Instruction::Local { index: 0 }));
    Ok(())
}

#[test]
fn test_multiple_returns_join_in_continuation() -> Result<()> {
    // static int abs(int x) { if (x >= 0) return x; return -x; }
    let mut asm = BytecodeAssembler::new();
    asm.iload(0)
        .branch(Opcode::Ifge, "pos")
        .iload(0)
        .op(Opcode::Ineg)
        .op(Opcode::Ireturn)
        .label("pos")
        .iload(0)
        .op(Opcode::Ireturn);
    let abs = Method::new("abs", int_sig(1))
        .with_flags(MethodFlags::STATIC)
        .with_code(asm.finish()?, 1, 1);

    let mut db = InMemoryDatabase::new();
    add_static_callee(&mut db, abs);
    let caller = add_caller(&mut db, 1)?;

    let (outcome, compilation) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Inlined);

    let graph = &compilation.graph;
    let value = returned_value(graph).expect("int return");
    let Instruction::Phi {
        block, operands, ..
    } = &graph.node(value).instr
    else {
        panic!("returns should merge in a phi");
    };
    let cont = graph.block(*block);
    assert!(cont.is_set(BlockFlags::CONTINUATION));
    assert_eq!(operands.len(), 2);
    assert_eq!(cont.predecessors.len(), 2);
    assert!(operands
        .iter()
        .any(|&op| matches!(graph.node(op).instr, Instruction::Negate { .. })));
    Ok(())
}

#[test]
fn test_synchronized_callee_releases_monitor_on_exception() -> Result<()> {
    // static synchronized int div(int a, int b) { return a / b; }
    let mut asm = BytecodeAssembler::new();
    asm.iload(0).iload(1).op(Opcode::Idiv).op(Opcode::Ireturn);
    let div = Method::new("div", int_sig(2))
        .with_flags(MethodFlags::STATIC | MethodFlags::SYNCHRONIZED)
        .with_holder(ClassId(1))
        .with_code(asm.finish()?, 2, 2);

    let mut db = InMemoryDatabase::new();
    add_static_callee(&mut db, div);
    let caller = add_caller(&mut db, 2)?;

    let (outcome, compilation) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Inlined);

    let graph = &compilation.graph;
    assert_eq!(count(graph, |i| matches!(i, Instruction::MonitorEnter { .. })), 1);
    // One release on the normal return, one in the handler that rethrows.
    assert_eq!(count(graph, |i| matches!(i, Instruction::MonitorExit { .. })), 2);
    assert_eq!(count(graph, |i| matches!(i, Instruction::Throw { .. })), 1);

    let (_, division) = graph
        .nodes()
        .find(|(_, n)| matches!(n.instr, Instruction::Arithmetic { op: ArithOp::Div, .. }))
        .expect("division");
    assert_eq!(division.exception_handlers.len(), 1);
    let handler = &division.exception_handlers[0];
    assert!(handler.is_catch_all());
    let entry = handler.entry_block.expect("handler entry");
    assert_eq!(graph.block(entry).bci, -1);
    assert!(graph.reachable_blocks().contains(&entry));
    Ok(())
}

#[test]
fn test_synchronized_callee_can_be_refused() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    add_static_callee(
        &mut db,
        inc_method()?.with_flags(MethodFlags::STATIC | MethodFlags::SYNCHRONIZED),
    );
    let caller = add_caller(&mut db, 1)?;
    let config = CompilerConfig {
        inline_synchronized_methods: false,
        ..CompilerConfig::default()
    };
    let (outcome, compilation) = single_outcome(&db, caller, &config)?;
    assert_eq!(outcome, InlineOutcome::Rejected(InlineRejection::Synchronized));
    assert_eq!(
        count(&compilation.graph, |i| matches!(i, Instruction::Invoke { .. })),
        1
    );
    Ok(())
}

#[test]
fn test_large_callee_is_rejected() -> Result<()> {
    let mut asm = BytecodeAssembler::new();
    for _ in 0..40 {
        asm.op(Opcode::Nop);
    }
    asm.iload(0).op(Opcode::Ireturn);
    let big = Method::new("big", int_sig(1))
        .with_flags(MethodFlags::STATIC)
        .with_code(asm.finish()?, 1, 1);

    let mut db = InMemoryDatabase::new();
    add_static_callee(&mut db, big);
    let caller = add_caller(&mut db, 1)?;

    let (outcome, compilation) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Rejected(InlineRejection::TooLarge));
    let graph = &compilation.graph;
    let value = returned_value(graph).expect("int return");
    assert!(matches!(graph.node(value).instr, Instruction::Invoke { .. }));

    // The same callee fits the raised limits.
    let (outcome, _) = single_outcome(&db, caller, &CompilerConfig::aggressive())?;
    assert_eq!(outcome, InlineOutcome::Inlined);
    Ok(())
}

#[test]
fn test_policy_rejections() -> Result<()> {
    let cases: Vec<(Method, CompilerConfig, InlineRejection)> = vec![
        (
            Method::new("native", int_sig(1)).with_flags(MethodFlags::STATIC | MethodFlags::NATIVE),
            CompilerConfig::default(),
            InlineRejection::NoCode,
        ),
        (inc_method()?, CompilerConfig::no_inlining(), InlineRejection::Disabled),
        (
            inc_method()?,
            CompilerConfig {
                max_inline_level: 0,
                ..CompilerConfig::default()
            },
            InlineRejection::TooDeep,
        ),
        (
            inc_method()?.with_handler(ExceptionHandler {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 3,
                catch_type: 0,
            }),
            CompilerConfig {
                inline_methods_with_exception_handlers: false,
                ..CompilerConfig::default()
            },
            InlineRejection::HasExceptionHandlers,
        ),
        (
            {
                let method = inc_method()?;
                let code = method.code.clone();
                method.with_code(code, 2, 20)
            },
            CompilerConfig::default(),
            InlineRejection::StackTooLarge,
        ),
        (
            inc_method()?,
            CompilerConfig {
                desired_method_limit: 2,
                ..CompilerConfig::default()
            },
            InlineRejection::BudgetExhausted,
        ),
    ];

    for (callee, config, expected) in cases {
        let mut db = InMemoryDatabase::new();
        add_static_callee(&mut db, callee);
        let caller = add_caller(&mut db, 1)?;
        let (outcome, _) = single_outcome(&db, caller, &config)?;
        assert_eq!(outcome, InlineOutcome::Rejected(expected), "{expected}");
    }
    Ok(())
}

#[test]
fn test_undecodable_callee_keeps_the_call() -> Result<()> {
    // iload_0; bipush <missing operand>
    let mut db = InMemoryDatabase::new();
    let broken = Method::new("broken", int_sig(1))
        .with_flags(MethodFlags::STATIC)
        .with_holder(ClassId(1))
        .with_code(vec![0x1a, 0x10], 2, 1);
    add_static_callee(&mut db, broken);
    let caller = add_caller(&mut db, 1)?;

    let (outcome, compilation) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Rejected(InlineRejection::MalformedCode));
    let graph = &compilation.graph;
    assert_eq!(count(graph, |i| matches!(i, Instruction::Invoke { .. })), 1);
    let value = returned_value(graph).expect("int return");
    assert!(matches!(graph.node(value).instr, Instruction::Invoke { .. }));
    Ok(())
}

#[test]
fn test_callee_missing_from_database_keeps_the_call() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    db.set_method_ref(
        CALLEE_REF,
        MethodRef::resolved(util(), "ghost", int_sig(1), MethodId(99)).with_static(),
    );
    let caller = add_caller(&mut db, 1)?;

    let (outcome, compilation) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Rejected(InlineRejection::UnknownCallee));
    assert_eq!(
        count(&compilation.graph, |i| matches!(i, Instruction::Invoke { .. })),
        1
    );
    Ok(())
}

#[test]
fn test_uninitialized_holder_is_rejected() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let callee = db.add_method(inc_method()?);
    let lazy = ClassRef {
        name: "Lazy".to_string(),
        id: Some(ClassId(2)),
        is_initialized: false,
    };
    db.set_method_ref(
        CALLEE_REF,
        MethodRef::resolved(lazy, "inc", int_sig(1), callee).with_static(),
    );
    let caller = add_caller(&mut db, 1)?;

    let (outcome, _) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(
        outcome,
        InlineOutcome::Rejected(InlineRejection::HolderNotInitialized)
    );
    Ok(())
}

#[test]
fn test_unresolved_call_is_patched_and_hinted() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    db.set_method_ref(
        CALLEE_REF,
        MethodRef::unresolved(ClassRef::unloaded("Later"), "later", int_sig(1)),
    );
    let caller = add_caller(&mut db, 1)?;

    let (outcome, compilation) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Rejected(InlineRejection::Unresolved));
    assert_eq!(compilation.inlining[0].callee, None);
    assert!(compilation.recompile_hints.is_empty());
    let graph = &compilation.graph;
    let value = returned_value(graph).expect("int return");
    assert!(graph.node(value).flags.contains(NodeFlags::NEEDS_PATCHING));

    let config = CompilerConfig::default().with_unresolved_policy(UnresolvedPolicy::DeferRecompile);
    let (_, compilation) = single_outcome(&db, caller, &config)?;
    assert_eq!(compilation.recompile_hints.len(), 1);
    let hint = &compilation.recompile_hints[0];
    assert_eq!(hint.method, caller);
    assert_eq!(hint.bci, 1);
    assert_eq!(hint.kind, UnresolvedKind::Method("later".to_string()));
    Ok(())
}

#[test]
fn test_recursive_inlining_is_bounded() -> Result<()> {
    // static int f(int x) { return f(x); }
    let mut db = InMemoryDatabase::new();
    let caller = add_caller(&mut db, 1)?;
    db.set_method_ref(
        CALLEE_REF,
        MethodRef::resolved(util(), "caller", int_sig(1), caller).with_static(),
    );

    let compilation = compile_method(&db, caller, &CompilerConfig::default())?;
    assert_eq!(compilation.inlining.len(), 2);
    assert!(compilation.inlining.iter().any(|d| d.level == 0
        && d.outcome == InlineOutcome::Inlined));
    assert!(compilation.inlining.iter().any(|d| d.level == 1
        && d.outcome == InlineOutcome::Rejected(InlineRejection::RecursiveTooDeep)));
    assert_eq!(
        count(&compilation.graph, |i| matches!(i, Instruction::Invoke { .. })),
        1
    );
    Ok(())
}

/// Registers `int get()` on `Box` and a static caller `int f(Object o) { return o.get(); }`.
fn add_virtual_call(db: &mut InMemoryDatabase, is_final: bool, null_receiver: bool) -> Result<(MethodId, MethodId)> {
    let mut asm = BytecodeAssembler::new();
    asm.iconst(7).op(Opcode::Ireturn);
    let get = db.add_method(
        Method::new("get", Signature::new(vec![], BasicType::Int))
            .with_holder(ClassId(3))
            .with_code(asm.finish()?, 1, 1),
    );
    let reference = MethodRef::resolved(
        ClassRef::loaded("Box", ClassId(3)),
        "get",
        Signature::new(vec![], BasicType::Int),
        get,
    );
    let reference = if is_final {
        reference.with_final()
    } else {
        reference
    };
    db.set_method_ref(CALLEE_REF, reference);

    let mut asm = BytecodeAssembler::new();
    if null_receiver {
        asm.op(Opcode::AconstNull);
    } else {
        asm.aload(0);
    }
    asm.index_op(Opcode::Invokevirtual, CALLEE_REF)
        .op(Opcode::Ireturn);
    let caller = db.add_method(
        Method::new("f", Signature::new(vec![BasicType::Object], BasicType::Int))
            .with_flags(MethodFlags::STATIC)
            .with_code(asm.finish()?, 1, 1),
    );
    Ok((get, caller))
}

#[test]
fn test_virtual_call_binding() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let (get, caller) = add_virtual_call(&mut db, false, false)?;
    let (outcome, _) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Rejected(InlineRejection::NotBindable));

    // With a single known implementation the call binds and inlines; the receiver
    // gets an explicit null check.
    db.set_monomorphic_target(get, get);
    let (outcome, compilation) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Inlined);
    let graph = &compilation.graph;
    assert_eq!(count(graph, |i| matches!(i, Instruction::NullCheck { .. })), 1);
    let value = returned_value(graph).expect("int return");
    assert!(matches!(graph.constant(value), Some(ConstValue::Int(7))));
    Ok(())
}

#[test]
fn test_null_receiver_is_rejected() -> Result<()> {
    let mut db = InMemoryDatabase::new();
    let (_, caller) = add_virtual_call(&mut db, true, true)?;
    let (outcome, _) = single_outcome(&db, caller, &CompilerConfig::default())?;
    assert_eq!(outcome, InlineOutcome::Rejected(InlineRejection::NullReceiver));
    assert_eq!(
        InlineRejection::NullReceiver.to_string(),
        "receiver is the null constant"
    );
    Ok(())
}
