//! Benchmarks for the dataflow analyzer.
//!
//! - Straight-line arithmetic
//! - A counting loop that needs several passes to reach a fixpoint
//! - String builder chains that fold to literals
//! - Cached versus uncached frame lookups

extern crate dekotlin;

use criterion::{criterion_group, criterion_main, Criterion};
use dekotlin::{
    analysis::{Analyzer, FrameCache},
    ir::{opcodes::*, Insn, LabelId, LdcValue, Method, MethodAccess},
};
use std::hint::black_box;

const STRING_BUILDER: &str = "java/lang/StringBuilder";

fn method(desc: &str, insns: Vec<Insn>) -> Method {
    let mut method = Method::new(MethodAccess::STATIC, "bench", desc);
    method.instructions.extend(insns);
    method
}

/// `((0 + 1) + 2) + ... + n`
fn arithmetic(n: i32) -> Method {
    let mut insns = vec![Insn::push_int(0)];
    for i in 1..=n {
        insns.push(Insn::push_int(i));
        insns.push(Insn::simple(IADD));
    }
    insns.push(Insn::simple(IRETURN));
    method("()I", insns)
}

/// Nested counting loops over `depth` locals.
fn loops(depth: u16) -> Method {
    let mut insns = Vec::new();
    let mut heads = Vec::new();
    for var in 0..depth {
        let head = LabelId::new();
        insns.push(Insn::simple(ICONST_0));
        insns.push(Insn::var(ISTORE, var));
        insns.push(Insn::label(head));
        heads.push((var, head));
    }
    for (var, head) in heads.into_iter().rev() {
        insns.push(Insn::iinc(var, 1));
        insns.push(Insn::var(ILOAD, var));
        insns.push(Insn::int(BIPUSH, 10));
        insns.push(Insn::jump(IF_ICMPLT, head));
    }
    insns.push(Insn::simple(RETURN));
    method("()V", insns)
}

/// `new StringBuilder().append("s0")...append("sn").toString()`
fn builder(n: usize) -> Method {
    let mut insns = vec![
        Insn::type_insn(NEW, STRING_BUILDER),
        Insn::simple(DUP),
        Insn::method(INVOKESPECIAL, STRING_BUILDER, "<init>", "()V"),
    ];
    for i in 0..n {
        insns.push(Insn::ldc(LdcValue::String(format!("s{}", i))));
        insns.push(Insn::method(
            INVOKEVIRTUAL,
            STRING_BUILDER,
            "append",
            "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
        ));
    }
    insns.push(Insn::method(
        INVOKEVIRTUAL,
        STRING_BUILDER,
        "toString",
        "()Ljava/lang/String;",
    ));
    insns.push(Insn::simple(ARETURN));
    method("()Ljava/lang/String;", insns)
}

fn bench_arithmetic(c: &mut Criterion) {
    let method = arithmetic(256);
    c.bench_function("analyze_arithmetic_256", |b| {
        b.iter(|| {
            let frames = Analyzer::new("bench/A", black_box(&method)).analyze().unwrap();
            black_box(frames)
        });
    });
}

fn bench_loops(c: &mut Criterion) {
    let method = loops(8);
    c.bench_function("analyze_nested_loops_8", |b| {
        b.iter(|| {
            let frames = Analyzer::new("bench/A", black_box(&method)).analyze().unwrap();
            black_box(frames)
        });
    });
}

fn bench_builder(c: &mut Criterion) {
    let method = builder(64);
    c.bench_function("analyze_string_builder_64", |b| {
        b.iter(|| {
            let frames = Analyzer::new("bench/A", black_box(&method)).analyze().unwrap();
            black_box(frames)
        });
    });
}

fn bench_cached(c: &mut Criterion) {
    let method = builder(64);
    let cache = FrameCache::new();
    cache.frames("bench/A", &method).unwrap();
    c.bench_function("frame_cache_hit", |b| {
        b.iter(|| black_box(cache.frames("bench/A", black_box(&method)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_arithmetic,
    bench_loops,
    bench_builder,
    bench_cached
);
criterion_main!(benches);
