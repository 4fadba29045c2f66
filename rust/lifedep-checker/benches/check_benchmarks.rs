//! Benchmark suite for module checking.
//!
//! Measures signature resolution alone, a single long body, and whole
//! modules checked sequentially and in parallel.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lifedep_checker::checker::ir::{
    DependsOn, Expr, FunctionDecl, Param, SelfModifier, Signature, Stmt, Type,
};
use lifedep_checker::{check_function, check_module, resolve_signature, CheckOptions, Module};

// ---------------------------------------------------------------------------
// Benchmark modules
// ---------------------------------------------------------------------------

fn array() -> Type {
    Type::escapable("Array")
}

fn span_ty() -> Type {
    Type::nonescapable("Span")
}

fn library() -> Module {
    Module::new()
        .with_function(FunctionDecl::new(Signature::function("makeArray", array()), vec![]))
        .with_function(FunctionDecl::new(
            Signature::function("span", span_ty())
                .param(Param::new("a", array()).borrowing())
                .returns_depending_on(DependsOn::on("a")),
            vec![],
        ))
        .with_function(FunctionDecl::new(
            Signature::method("drop", span_ty(), span_ty())
                .self_modifier(SelfModifier::Consuming)
                .returns_depending_on(DependsOn::on_self()),
            vec![],
        ))
}

/// One body of `links` chained copies off a borrowed array.
fn chain_body(links: usize) -> Vec<Stmt> {
    let mut body = vec![
        Stmt::var("a", array(), Some(Expr::call("makeArray", vec![]))),
        Stmt::let_("s0", span_ty(), Expr::call("span", vec![Expr::var("a")])),
    ];
    for i in 1..=links {
        body.push(Stmt::let_(
            format!("s{}", i),
            span_ty(),
            Expr::method(Expr::var(format!("s{}", i - 1)), "drop", vec![]),
        ));
        body.push(Stmt::use_(format!("s{}", i)));
    }
    body.push(Stmt::mutate("a"));
    body
}

fn wide_module(functions: usize) -> Module {
    (0..functions).fold(library(), |module, i| {
        module.with_function(FunctionDecl::new(
            Signature::function(format!("client{}", i), Type::unit()),
            chain_body(20),
        ))
    })
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_resolve_signature(c: &mut Criterion) {
    let sig = Signature::function("pick", span_ty())
        .param(Param::new("a", array()).borrowing())
        .param(Param::new("b", span_ty()))
        .param(Param::new("c", array()).inout())
        .returns_depending_on(DependsOn::on("b"));
    c.bench_function("resolve_signature", |b| b.iter(|| resolve_signature(black_box(&sig))));
}

fn bench_long_body(c: &mut Criterion) {
    let module = library().with_function(FunctionDecl::new(
        Signature::function("main", Type::unit()),
        chain_body(500),
    ));
    let options = CheckOptions::sequential();
    c.bench_function("check_long_body", |b| {
        b.iter(|| check_function(black_box(&module), "main", &options))
    });
}

fn bench_module(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_module");
    for functions in [16, 256] {
        let module = wide_module(functions);
        group.bench_with_input(BenchmarkId::new("sequential", functions), &module, |b, m| {
            b.iter(|| check_module(m, &CheckOptions::sequential()))
        });
        group.bench_with_input(BenchmarkId::new("parallel", functions), &module, |b, m| {
            b.iter(|| check_module(m, &CheckOptions::default()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve_signature, bench_long_body, bench_module);
criterion_main!(benches);
