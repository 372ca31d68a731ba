#![allow(unused)]
extern crate jitfront;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use jitfront::prelude::*;
use std::hint::black_box;

/// `static int inc(int x) { return x + 1; }`, reachable through pool index 1.
fn add_callee(db: &mut InMemoryDatabase) {
    let mut asm = BytecodeAssembler::new();
    asm.iload(0).iconst(1).op(Opcode::Iadd).op(Opcode::Ireturn);
    let sig = Signature::new(vec![BasicType::Int], BasicType::Int);
    let inc = db.add_method(
        Method::new("inc", sig.clone())
            .with_flags(MethodFlags::STATIC)
            .with_code(asm.finish().unwrap(), 2, 1),
    );
    db.set_method_ref(
        1,
        MethodRef::resolved(ClassRef::loaded("Util", ClassId(1)), "inc", sig, inc).with_static(),
    );
}

/// A method with `loops` consecutive counting loops, each calling `inc` and
/// branching on the counter.
fn add_loops(db: &mut InMemoryDatabase, loops: usize) -> MethodId {
    let mut asm = BytecodeAssembler::new();
    asm.iconst(0).istore(1);
    for i in 0..loops {
        let head = format!("head{i}");
        let exit = format!("exit{i}");
        let odd = format!("odd{i}");
        asm.iconst(0)
            .istore(2)
            .label(&head)
            .iload(2)
            .iload(0)
            .branch(Opcode::IfIcmpge, &exit)
            .iload(2)
            .iconst(1)
            .op(Opcode::Iand)
            .branch(Opcode::Ifne, &odd)
            .iload(1)
            .iload(2)
            .op(Opcode::Iadd)
            .istore(1)
            .label(&odd)
            .iload(1)
            .index_op(Opcode::Invokestatic, 1)
            .istore(1)
            .iinc(2, 1)
            .goto(&head)
            .label(&exit);
    }
    asm.iload(1).op(Opcode::Ireturn);
    let code = asm.finish().unwrap();
    db.add_method(
        Method::new("loops", Signature::new(vec![BasicType::Int], BasicType::Int))
            .with_flags(MethodFlags::STATIC)
            .with_code(code, 2, 3),
    )
}

/// Benchmark single-method compiles of growing size.
fn bench_compile_method(c: &mut Criterion) {
    let config = CompilerConfig::default();
    let mut group = c.benchmark_group("compile_method");
    for loops in [1usize, 8, 24] {
        let mut db = InMemoryDatabase::new();
        add_callee(&mut db);
        let id = add_loops(&mut db, loops);
        let size = db.method(id).map_or(0, Method::code_size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("loops_{loops}"), |b| {
            b.iter(|| {
                let compilation = compile_method(black_box(&db), id, &config).unwrap();
                black_box(compilation)
            });
        });
    }
    group.finish();
}

/// Benchmark parallel compiles of independent methods.
fn bench_compile_methods(c: &mut Criterion) {
    let config = CompilerConfig::default();
    let mut db = InMemoryDatabase::new();
    add_callee(&mut db);
    let ids: Vec<MethodId> = (0..64).map(|i| add_loops(&mut db, 1 + i % 8)).collect();

    let mut group = c.benchmark_group("compile_methods");
    group.throughput(Throughput::Elements(ids.len() as u64));
    group.bench_function("parallel_64", |b| {
        b.iter(|| black_box(compile_methods(black_box(&db), &ids, &config)));
    });
    group.bench_function("sequential_64", |b| {
        b.iter(|| {
            let results: Vec<_> = ids
                .iter()
                .map(|&id| compile_method(&db, id, &config))
                .collect();
            black_box(results)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_compile_method, bench_compile_methods);
criterion_main!(benches);
