//! Property tests for signature resolution and copy chains.

use lifedep_checker::checker::dependency::{DependencyKind, RootKind};
use lifedep_checker::checker::error::{ErrorKind, LifetimeError};
use lifedep_checker::checker::ir::{
    DependsOn, Expr, FunctionDecl, Param, ParamModifier, SelfModifier, Signature, Stmt, Type,
};
use lifedep_checker::checker::propagate::{Context, FunctionChecker};
use lifedep_checker::checker::signature::{inference_candidates, DependencySource, SignatureIndex};
use lifedep_checker::{resolve_signature, CheckOptions, Module};
use proptest::prelude::*;

fn arb_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::escapable("Array")),
        Just(Type::escapable("Int").bitwise()),
        Just(Type::nonescapable("Span")),
        Just(Type::escapable("Unique").noncopyable()),
    ]
}

fn arb_modifier() -> impl Strategy<Value = Option<ParamModifier>> {
    prop_oneof![
        Just(None),
        Just(Some(ParamModifier::Borrowing)),
        Just(Some(ParamModifier::Consuming)),
        Just(Some(ParamModifier::Inout)),
    ]
}

fn arb_signature() -> impl Strategy<Value = Signature> {
    prop::collection::vec((arb_type(), arb_modifier()), 0..5).prop_map(|params| {
        params.into_iter().enumerate().fold(
            Signature::function("f", Type::nonescapable("Span")),
            |sig, (i, (ty, modifier))| {
                let mut param = Param::new(format!("p{}", i), ty);
                param.modifier = modifier;
                sig.param(param)
            },
        )
    })
}

fn is_consuming_escapable(sig: &Signature, index: usize) -> bool {
    let param = &sig.params[index];
    param.modifier == Some(ParamModifier::Consuming) && param.ty.is_escapable_in(&sig.escapable_generics)
}

proptest! {
    #[test]
    fn resolution_is_deterministic(sig in arb_signature()) {
        prop_assert_eq!(resolve_signature(&sig), resolve_signature(&sig));
    }

    #[test]
    fn inference_needs_exactly_one_candidate(sig in arb_signature()) {
        let candidates = inference_candidates(&sig);
        let resolved = resolve_signature(&sig);
        match candidates.as_slice() {
            [index] if !is_consuming_escapable(&sig, *index) => {
                let resolved = resolved.unwrap();
                prop_assert!(resolved.inferred);
                let deps = resolved.result.unwrap();
                prop_assert_eq!(deps.len(), 1);
                prop_assert_eq!(
                    &deps[0].source,
                    &DependencySource::Param { index: *index, name: format!("p{}", index) }
                );
            }
            [_] => {
                let errors = resolved.unwrap_err();
                prop_assert!(errors.iter().any(|e| e.kind() == ErrorKind::IllegalConsumingDependencyError));
            }
            _ => {
                let errors = resolved.unwrap_err();
                prop_assert!(errors.iter().any(|e| e.kind() == ErrorKind::AmbiguousDependencyError));
            }
        }
    }

    /// Writing down what inference picked resolves to the same dependency.
    #[test]
    fn inferred_dependency_is_a_fixed_point(sig in arb_signature()) {
        if let Ok(resolved) = resolve_signature(&sig) {
            let deps = resolved.result.clone().unwrap();
            let annotated = sig.clone().returns_depending_on(DependsOn::on(deps[0].source.to_string()));
            let again = resolve_signature(&annotated).unwrap();
            prop_assert_eq!(again.result, resolved.result);
            prop_assert!(!again.inferred);
        }
    }

    #[test]
    fn copy_chains_end_at_their_root(len in 1usize..24) {
        let span = Type::nonescapable("Span");
        let array = Type::escapable("Array");
        let module = Module::new()
            .with_function(FunctionDecl::new(Signature::function("makeArray", array.clone()), vec![]))
            .with_function(FunctionDecl::new(Signature::method("view", array.clone(), span.clone()), vec![]))
            .with_function(FunctionDecl::new(
                Signature::method("drop", span.clone(), span.clone())
                    .self_modifier(SelfModifier::Consuming)
                    .returns_depending_on(DependsOn::on_self()),
                vec![],
            ));
        let index = SignatureIndex::build(&module);
        let options = CheckOptions::default();
        let ctx = Context { module: &module, index: &index, options: &options };
        let sig = Signature::function("main", Type::unit());
        let resolved = resolve_signature(&sig).unwrap();
        let mut checker = FunctionChecker::new(ctx, sig, resolved);

        let mut body = vec![
            Stmt::let_("arr", array, Expr::call("makeArray", vec![])),
            Stmt::let_("s0", span.clone(), Expr::method(Expr::var("arr"), "view", vec![])),
        ];
        for i in 1..=len {
            body.push(Stmt::let_(
                format!("s{}", i),
                span.clone(),
                Expr::method(Expr::var(format!("s{}", i - 1)), "drop", vec![]),
            ));
        }
        checker.run(&body);

        let last = format!("s{}", len);
        prop_assert_eq!(checker.dependency_kinds_of(&last), vec![DependencyKind::Copied]);
        let roots = checker.roots_of(&last);
        prop_assert_eq!(roots.len(), 1);
        let is_scoped = matches!(roots[0], RootKind::Scoped { .. });
        prop_assert!(is_scoped);
        prop_assert_eq!(checker.root_name(&roots[0]), Some("arr"));
        let errors: Vec<LifetimeError> = checker.finish();
        prop_assert!(errors.is_empty(), "{:?}", errors);
    }
}
