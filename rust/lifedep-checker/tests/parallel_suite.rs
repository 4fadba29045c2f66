//! Parallel and sequential checking must agree exactly.

use lifedep_checker::checker::ir::{DependsOn, Expr, FunctionDecl, Param, SelfModifier, Signature, Stmt, Type};
use lifedep_checker::{check_module, CheckOptions, Module};

fn array() -> Type {
    Type::escapable("Array")
}

fn span_ty() -> Type {
    Type::nonescapable("Span")
}

/// A library plus `n` clients, every third of which is broken in a
/// different way.
fn module(n: usize) -> Module {
    let mut module = Module::new()
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
        ));
    for i in 0..n {
        let name = format!("client{}", i);
        let body = match i % 3 {
            0 => vec![
                Stmt::var("a", array(), Some(Expr::call("makeArray", vec![]))).at(1),
                Stmt::let_("s", span_ty(), Expr::call("span", vec![Expr::var("a")])).at(2),
                Stmt::use_("s").at(3),
                Stmt::mutate("a").at(4),
            ],
            1 => vec![
                Stmt::var("a", array(), Some(Expr::call("makeArray", vec![]))).at(1),
                Stmt::let_("s", span_ty(), Expr::call("span", vec![Expr::var("a")])).at(2),
                Stmt::mutate("a").at(3),
                Stmt::use_("s").at(4),
                Stmt::use_("missing").at(5),
            ],
            _ => vec![
                Stmt::let_("a", array(), Expr::call("makeArray", vec![])).at(1),
                Stmt::mutate("a").at(2),
                Stmt::let_("x", array(), Expr::consume("a")).at(3),
                Stmt::use_("a").at(4),
            ],
        };
        module = module.with_function(FunctionDecl::new(Signature::function(name, Type::unit()), body));
    }
    module
}

#[test]
fn parallel_matches_sequential() {
    let module = module(60);
    let parallel = check_module(&module, &CheckOptions::default()).unwrap();
    let sequential = check_module(&module, &CheckOptions::sequential()).unwrap();
    assert_eq!(parallel, sequential);
    assert!(parallel.has_errors());
}

#[test]
fn dedicated_pool_matches_sequential() {
    let module = module(30);
    let pooled = CheckOptions {
        jobs: Some(3),
        ..CheckOptions::default()
    };
    assert_eq!(
        check_module(&module, &pooled).unwrap(),
        check_module(&module, &CheckOptions::sequential()).unwrap()
    );
}

#[test]
fn repeated_runs_are_identical() {
    let module = module(24);
    let first = check_module(&module, &CheckOptions::default()).unwrap();
    for _ in 0..5 {
        assert_eq!(check_module(&module, &CheckOptions::default()).unwrap(), first);
    }
}

#[test]
fn reports_follow_declaration_order() {
    let module = module(12);
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    let indices: Vec<usize> = report.functions.iter().map(|f| f.decl_index).collect();
    assert_eq!(indices, (0..module.functions.len()).collect::<Vec<_>>());
    let mut last = 0;
    for d in &report.diagnostics {
        assert!(d.decl_index >= last);
        last = d.decl_index;
    }
}
