//! End-to-end checks of whole modules through `check_module`.

use lifedep_checker::checker::dependency::{AccessMode, DependencyKind, RootKind};
use lifedep_checker::checker::error::ErrorKind;
use lifedep_checker::checker::ir::{
    DependsOn, Expr, FunctionDecl, Global, Param, SelfModifier, Signature, Stmt, Type,
};
use lifedep_checker::checker::propagate::{Context, FunctionChecker};
use lifedep_checker::checker::signature::{DependencySource, SignatureIndex};
use lifedep_checker::{check_module, parse_module, resolve_signature, CheckOptions, Module};

fn array() -> Type {
    Type::escapable("Array")
}

fn span_ty() -> Type {
    Type::nonescapable("Span")
}

fn library() -> Module {
    Module::new()
        .with_global(Global::new("EMPTY", array()))
        .with_function(FunctionDecl::new(Signature::function("makeArray", array()), vec![]))
        .with_function(FunctionDecl::new(
            Signature::function("span", span_ty())
                .param(Param::new("a", array()).borrowing())
                .returns_depending_on(DependsOn::on("a")),
            vec![],
        ))
        .with_function(FunctionDecl::new(
            Signature::method("view", array(), span_ty()),
            vec![],
        ))
        .with_function(FunctionDecl::new(
            Signature::method("drop", span_ty(), span_ty())
                .self_modifier(SelfModifier::Consuming)
                .returns_depending_on(DependsOn::on_self()),
            vec![],
        ))
}

fn kinds(module: &Module) -> Vec<ErrorKind> {
    let report = check_module(module, &CheckOptions::default()).unwrap();
    report.diagnostics.iter().map(|d| d.kind).collect()
}

// ── Borrow then mutate ──────────────────────────────────────────────

#[test]
fn mutating_a_borrowed_array_while_its_span_is_live() {
    let module = library().with_function(FunctionDecl::new(
        Signature::function("main", Type::unit()),
        vec![
            Stmt::var("a", array(), Some(Expr::call("makeArray", vec![]))).at(1),
            Stmt::let_("s", span_ty(), Expr::call("span", vec![Expr::var("a")])).at(2),
            Stmt::mutate("a").at(3),
            Stmt::use_("s").at(4),
        ],
    ));
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    let diagnostics: Vec<_> = report.diagnostics.iter().collect();
    assert_eq!(diagnostics.len(), 1, "{}", report.diagnostics.render_plain());
    let d = diagnostics[0];
    assert!(matches!(
        d.kind,
        ErrorKind::ExclusivityViolationError | ErrorKind::DanglingDependencyError
    ));
    assert!(d.message.contains("'a'"), "{}", d.message);
    assert_eq!(d.function, "main");
    assert_eq!(d.span.line, 4);
}

#[test]
fn same_program_from_json() {
    let json = r#"{
      "functions": [
        {"signature": {"name": "makeArray", "kind": "function", "result": {"name": "Array"}}},
        {"signature": {
           "name": "span", "kind": "function",
           "params": [{"name": "a", "ty": {"name": "Array"}, "modifier": "borrowing"}],
           "result": {"name": "Span", "escapability": "nonescapable"},
           "result_depends_on": {"targets": [{"target": "param", "name": "a"}]}
        }},
        {"signature": {"name": "main", "kind": "function",
                       "result": {"name": "()", "bitwise_copyable": true}},
         "body": [
           {"stmt": "let", "name": "a", "ty": {"name": "Array"}, "mutable": true,
            "init": {"expr": "call", "callee": "makeArray"}, "span": {"line": 2, "col": 5}},
           {"stmt": "let", "name": "s", "ty": {"name": "Span", "escapability": "nonescapable"},
            "init": {"expr": "call", "callee": "span", "args": [{"expr": "var", "name": "a"}]},
            "span": {"line": 3, "col": 5}},
           {"stmt": "mutate", "name": "a", "span": {"line": 4, "col": 5}},
           {"stmt": "use", "name": "s", "span": {"line": 5, "col": 5}}
         ]}
      ]
    }"#;
    let module = parse_module(json).unwrap();
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    assert_eq!(report.diagnostics.len(), 1, "{}", report.diagnostics.render_plain());
    let d = report.diagnostics.iter().next().unwrap();
    assert_eq!(d.code, "E0005");
    assert_eq!((d.span.line, d.span.col), (5, 5));
}

// ── Consuming self copies the scoped root ───────────────────────────

#[test]
fn consuming_method_result_is_copied_from_scoped_root() {
    let module = library();
    let index = SignatureIndex::build(&module);
    let options = CheckOptions::default();
    let ctx = Context {
        module: &module,
        index: &index,
        options: &options,
    };
    let sig = Signature::function("main", Type::unit());
    let resolved = resolve_signature(&sig).unwrap();
    let mut checker = FunctionChecker::new(ctx, sig, resolved);
    checker.run(&[
        Stmt::let_("arr", array(), Expr::call("makeArray", vec![])),
        Stmt::let_("s", span_ty(), Expr::method(Expr::var("arr"), "view", vec![])),
        Stmt::let_("r", span_ty(), Expr::method(Expr::var("s"), "drop", vec![])),
    ]);
    assert_eq!(checker.dependency_kinds_of("r"), vec![DependencyKind::Copied]);
    let roots = checker.roots_of("r");
    assert_eq!(roots.len(), 1);
    assert!(matches!(
        roots[0],
        RootKind::Scoped {
            access: AccessMode::Borrowing,
            ..
        }
    ));
    assert_eq!(checker.root_name(&roots[0]), Some("arr"));
    assert!(checker.finish().is_empty());
}

#[test]
fn copied_result_used_after_array_scope_ends() {
    let module = library().with_function(FunctionDecl::new(
        Signature::function("main", Type::unit()),
        vec![
            Stmt::var("r", span_ty(), None).at(1),
            Stmt::block(vec![
                Stmt::let_("arr", array(), Expr::call("makeArray", vec![])).at(3),
                Stmt::let_("s", span_ty(), Expr::method(Expr::var("arr"), "view", vec![])).at(4),
                Stmt::assign("r", Expr::method(Expr::var("s"), "drop", vec![])).at(5),
            ])
            .at(2),
            Stmt::use_("r").at(7),
        ],
    ));
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    let d: Vec<_> = report.diagnostics.iter().collect();
    assert_eq!(d.len(), 1, "{}", report.diagnostics.render_plain());
    assert_eq!(d[0].kind, ErrorKind::DanglingDependencyError);
    assert!(d[0].message.contains("'arr'"), "{}", d[0].message);
    assert_eq!(d[0].span.line, 7);
}

// ── Immortal initializer ────────────────────────────────────────────

#[test]
fn immortal_initializer_from_module_constant() {
    let module = library().with_function(FunctionDecl::new(
        Signature::initializer("init", span_ty()).returns_depending_on(DependsOn::immortal()),
        vec![Stmt::ret(Expr::construct(span_ty(), vec![Expr::global("EMPTY")]))],
    ));
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    assert!(report.diagnostics.is_empty(), "{}", report.diagnostics.render_plain());
    let signature = report.function("init").unwrap().signature.as_ref().unwrap();
    let deps = signature.result.as_ref().unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].kind, DependencyKind::Immortal);
    assert_eq!(deps[0].source, DependencySource::Immortal);
}

// ── Ambiguous inference ─────────────────────────────────────────────

#[test]
fn two_borrowed_candidates_are_ambiguous() {
    let module = Module::new().with_function(FunctionDecl::new(
        Signature::function("g", Type::nonescapable("NEType"))
            .param(Param::new("a", Type::escapable("A")).borrowing())
            .param(Param::new("b", Type::escapable("B")).borrowing()),
        vec![],
    ));
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    let d: Vec<_> = report.diagnostics.iter().collect();
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].kind, ErrorKind::AmbiguousDependencyError);
    assert!(d[0].message.contains("'a'") && d[0].message.contains("'b'"), "{}", d[0].message);
    assert!(report.function("g").unwrap().signature.is_none());
}

// ── Consuming an escapable source ───────────────────────────────────

#[test]
fn consuming_escapable_source_is_rejected_before_the_body() {
    let module = Module::new().with_function(FunctionDecl::new(
        Signature::function("bad", Type::nonescapable("Bar"))
            .param(Param::new("x", Type::escapable("Foo")).consuming())
            .returns_depending_on(DependsOn::on("x")),
        // Never analysed: both of these would otherwise be reported.
        vec![Stmt::use_("nope"), Stmt::mutate("x")],
    ));
    assert_eq!(kinds(&module), vec![ErrorKind::IllegalConsumingDependencyError]);
}

// ── Whole-module behaviour ──────────────────────────────────────────

#[test]
fn clean_module_has_no_diagnostics() {
    let module = library().with_function(FunctionDecl::new(
        Signature::function("main", Type::unit()),
        vec![
            Stmt::var("a", array(), Some(Expr::call("makeArray", vec![]))),
            Stmt::let_("s", span_ty(), Expr::call("span", vec![Expr::var("a")])),
            Stmt::use_("s"),
            Stmt::mutate("a"),
        ],
    ));
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    assert!(!report.has_errors());
    assert_eq!(report.functions.len(), 5);
    assert!(report.functions.iter().all(|f| f.errors == 0 && f.warnings == 0));
}

#[test]
fn each_declaration_is_checked_independently() {
    let module = Module::new()
        .with_function(FunctionDecl::new(
            Signature::function("first", Type::unit()),
            vec![Stmt::use_("missing").at(1)],
        ))
        .with_function(FunctionDecl::new(
            Signature::function("second", Type::unit()),
            vec![
                Stmt::let_("x", Type::unit(), Expr::unit()).at(1),
                Stmt::let_("x", Type::unit(), Expr::unit()).at(2),
            ],
        ));
    let report = check_module(&module, &CheckOptions::default()).unwrap();
    let first: Vec<_> = report.diagnostics.for_function("first").map(|d| d.kind).collect();
    let second: Vec<_> = report.diagnostics.for_function("second").map(|d| d.kind).collect();
    assert_eq!(first, vec![ErrorKind::UnresolvedNameError]);
    assert_eq!(second, vec![ErrorKind::DuplicateBindingError]);
    assert_eq!(report.function("first").unwrap().errors, 1);
    assert_eq!(report.function("second").unwrap().errors, 1);
}
