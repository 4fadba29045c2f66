//! Propagation engine. Walks a function body in program order, attaches a
//! dependency set to every nonescapable value it produces and reports every
//! ownership or lifetime violation.
//!
//! Invalidation is deferred: ending, consuming or conflicting with a source
//! marks the bindings whose scoped roots sit on it, and the error is raised
//! at the next use of such a binding. A dependent that is never used again
//! is not an error.

use crate::checker::bindings::{
    BindingId, BindingState, BindingTable, Declaration, Origin, PendingInvalidation, ScopeId,
};
use crate::checker::conventions::Convention;
use crate::checker::dependency::{
    resolve_kind, AccessMode, DepId, DependencyGraph, DependencyKind, Dependent, Edge, RootCache,
    RootKind,
};
use crate::checker::error::{Invalidation, LifetimeError};
use crate::checker::ir::{
    Call, ClosureExpr, DeclKind, Expr, FunctionDecl, GenericEnv, Global, Module, Param, Signature,
    Stmt, Type,
};
use crate::checker::signature::{
    resolve_signature, DependencySource, ResolvedDependency, ResolvedSignature, SignatureIndex,
};
use crate::checker::span::Span;
use crate::diagnostics::suggest_similar;
use crate::{CheckOptions, ImmortalMode};

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Read-only inputs shared by every body analysis of a module.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub module: &'a Module,
    pub index: &'a SignatureIndex<'a>,
    pub options: &'a CheckOptions,
}

/// How an expression's value is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Borrow,
    /// Value position: moves noncopyable values, copies the rest.
    Take,
    Mutate,
}

impl From<Convention> for Usage {
    fn from(convention: Convention) -> Self {
        match convention {
            Convention::Borrowing => Usage::Borrow,
            Convention::Consuming => Usage::Take,
            Convention::Mutating => Usage::Mutate,
        }
    }
}

/// Event on a binding that may break scoped dependencies held on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
    Consume,
    EndOfScope,
}

impl Access {
    fn conflict(self, held: AccessMode) -> Option<Invalidation> {
        match (self, held) {
            (Access::Read, AccessMode::Borrowing) => None,
            (Access::Read, AccessMode::Mutating) => Some(Invalidation::Accessed),
            (Access::Write, _) => Some(Invalidation::Written),
            (Access::Consume, _) => Some(Invalidation::Consumed),
            (Access::EndOfScope, _) => Some(Invalidation::OutOfScope),
        }
    }
}

/// An evaluated expression.
#[derive(Debug, Clone)]
struct Value {
    ty: Type,
    escapable: bool,
    deps: Vec<DepId>,
    /// The binding the value was read from, for plain binding reads.
    place: Option<BindingId>,
}

impl Value {
    fn escapable(ty: Type) -> Self {
        Self {
            ty,
            escapable: true,
            deps: Vec::new(),
            place: None,
        }
    }

    fn fresh(ty: Type, deps: Vec<DepId>) -> Self {
        Self {
            ty,
            escapable: false,
            deps,
            place: None,
        }
    }
}

struct Argument {
    value: Option<Value>,
    convention: Convention,
}

// ── Function checker ────────────────────────────────────────────────

pub struct FunctionChecker<'a> {
    ctx: Context<'a>,
    name: String,
    signature: Signature,
    resolved: ResolvedSignature,
    env: GenericEnv,
    bindings: BindingTable,
    graph: DependencyGraph,
    root_cache: RootCache,
    errors: Vec<LifetimeError>,
    function_scope: ScopeId,
    param_bindings: Vec<Option<BindingId>>,
    self_binding: Option<BindingId>,
    current_span: Span,
    temporaries: usize,
    closures: usize,
}

impl<'a> FunctionChecker<'a> {
    /// Set up the entry state: `self` and every parameter are live, and
    /// nonescapable ones carry the dependency their caller provided.
    pub fn new(ctx: Context<'a>, signature: Signature, resolved: ResolvedSignature) -> Self {
        let mut bindings = BindingTable::new();
        let function_scope = bindings.push_scope();
        let mut checker = Self {
            ctx,
            name: signature.name.clone(),
            env: signature.escapable_generics.clone(),
            signature,
            resolved,
            bindings,
            graph: DependencyGraph::new(),
            root_cache: RootCache::new(),
            errors: Vec::new(),
            function_scope,
            param_bindings: Vec::new(),
            self_binding: None,
            current_span: Span::dummy(),
            temporaries: 0,
            closures: 0,
        };

        if let (Some(convention), Some(ty)) = (
            checker.resolved.conventions.self_convention,
            checker.signature.self_type.clone(),
        ) {
            let escapable = ty.is_escapable_in(&checker.env);
            let decl = Declaration::parameter("self", ty, escapable, convention)
                .origin(Origin::SelfParam)
                .at(checker.signature.span);
            checker.self_binding = checker.declare_parameter(decl);
        }

        let params: Vec<(Param, Convention)> = checker
            .signature
            .params
            .iter()
            .cloned()
            .zip(checker.resolved.conventions.params.iter().copied())
            .collect();
        for (param, convention) in params {
            let escapable = param.ty.is_escapable_in(&checker.env);
            let decl = Declaration::parameter(param.name, param.ty, escapable, convention)
                .at(param.span);
            let id = checker.declare_parameter(decl);
            checker.param_bindings.push(id);
        }
        checker
    }

    fn declare_parameter(&mut self, decl: Declaration) -> Option<BindingId> {
        let span = decl.span;
        let escapable = decl.escapable;
        let id = match self.bindings.declare(decl) {
            Ok(id) => id,
            Err(e) => {
                self.report(e, span);
                return None;
            }
        };
        let deps = if escapable {
            Vec::new()
        } else {
            let dependent = self.dependent(id);
            self.edge(dependent, Edge::Caller { param: id }, span)
                .into_iter()
                .collect()
        };
        self.bindings.initialize(id, deps);
        Some(id)
    }

    /// Analyse `body` in the function scope.
    pub fn run(&mut self, body: &[Stmt]) {
        debug!(function = %self.name, statements = body.len(), "checking body");
        for stmt in body {
            self.stmt(stmt);
        }
    }

    /// Check what `inout` parameters hand back to the caller, close the
    /// function scope and return every error found.
    pub fn finish(mut self) -> Vec<LifetimeError> {
        let span = self.signature.span;
        let params = self.param_bindings.clone();
        for (index, id) in params.into_iter().enumerate() {
            let Some(id) = id else { continue };
            let binding = self.bindings.get(id);
            if binding.escapable || binding.convention != Some(Convention::Mutating) {
                continue;
            }
            let Some(deps) = binding.deps().map(<[DepId]>::to_vec) else {
                continue;
            };
            let contract = self
                .resolved
                .params
                .get(index)
                .cloned()
                .flatten()
                .unwrap_or_default();
            let label = format!("'{}'", binding.name);
            self.check_outgoing(&label, &deps, &contract, Some(id), span);
        }
        self.close_scope(self.function_scope, span);
        trace!(function = %self.name, edges = self.graph.len(), errors = self.errors.len(), "body checked");
        self.errors
    }

    // ── Statements ──────────────────────────────────────────────

    fn stmt(&mut self, stmt: &Stmt) {
        if !stmt.span().is_dummy() {
            self.current_span = stmt.span();
        }
        match stmt {
            Stmt::Block { body, span } => {
                let scope = self.bindings.push_scope();
                for s in body {
                    self.stmt(s);
                }
                self.close_scope(scope, *span);
            }
            _ => {
                // Temporaries materialized while evaluating the statement
                // are destroyed when it completes.
                let outer = self
                    .bindings
                    .current_scope()
                    .unwrap_or(self.function_scope);
                let temporaries = self.bindings.push_scope();
                self.simple_stmt(stmt, outer);
                self.close_scope(temporaries, stmt.span());
            }
        }
    }

    fn simple_stmt(&mut self, stmt: &Stmt, outer: ScopeId) {
        match stmt {
            Stmt::Let {
                name,
                ty,
                mutable,
                init,
                span,
            } => {
                let value = init.as_ref().map(|e| self.expr(e, Usage::Take));
                let escapable = ty.is_escapable_in(&self.env);
                let decl = Declaration::local(name.clone(), ty.clone(), escapable)
                    .mutable(*mutable)
                    .at(*span);
                let id = match self.bindings.declare_in(outer, decl) {
                    Ok(id) => id,
                    Err(e) => {
                        self.report(e, *span);
                        return;
                    }
                };
                if let Some(value) = value {
                    let deps = match value {
                        Some(v) => self.store(id, v, *span),
                        None => Vec::new(),
                    };
                    self.bindings.initialize(id, deps);
                }
            }
            Stmt::Assign {
                target,
                value,
                span,
            } => {
                let value = self.expr(value, Usage::Take);
                let Some(id) = self.resolve_name(target, *span) else {
                    return;
                };
                let state = self.bindings.get(id).state.clone();
                let was_live = match state {
                    BindingState::Uninitialized => false,
                    BindingState::OutOfScope => return,
                    BindingState::Live(_) | BindingState::Consumed { .. } => {
                        if let Err(e) = self.bindings.check_writable(id) {
                            self.report(e, *span);
                            return;
                        }
                        self.bindings.get(id).is_live()
                    }
                };
                if was_live {
                    self.access(id, Access::Write, *span);
                }
                let deps = match value {
                    Some(v) => self.store(id, v, *span),
                    None => Vec::new(),
                };
                if was_live && !self.bindings.get(id).escapable {
                    if let Err(e) = self.bindings.reassign(id, deps) {
                        self.report(e, *span);
                    }
                } else {
                    self.bindings.initialize(id, deps);
                }
            }
            Stmt::Eval { expr, .. } => {
                self.expr(expr, Usage::Borrow);
            }
            Stmt::Use { name, span } => {
                if let Some(id) = self.resolve_name(name, *span) {
                    self.use_binding(id, Usage::Borrow, false, *span);
                }
            }
            Stmt::Mutate { name, span } => {
                if let Some(id) = self.resolve_name(name, *span) {
                    self.use_binding(id, Usage::Mutate, false, *span);
                }
            }
            Stmt::Return { value, span } => {
                if let Some(expr) = value {
                    if let Some(v) = self.expr(expr, Usage::Take) {
                        self.check_return(v, *span);
                    }
                }
            }
            // Blocks open their own scope in `stmt` and never reach here.
            Stmt::Block { .. } => {}
        }
    }

    /// Dependency set `id` takes on when `value` is stored into it.
    fn store(&mut self, id: BindingId, value: Value, span: Span) -> Vec<DepId> {
        let binding = self.bindings.get(id);
        if binding.escapable {
            return Vec::new();
        }
        let dependent = self.dependent(id);
        match value.place {
            Some(source) if value.escapable => {
                let ty = self.bindings.get(source).ty.name.clone();
                self.report(
                    LifetimeError::CopyOfEscapable {
                        source_name: self.bindings.display_name(source).to_string(),
                        ty,
                        span,
                    },
                    span,
                );
                Vec::new()
            }
            Some(source) => value
                .deps
                .iter()
                .filter_map(|parent| {
                    self.edge(
                        dependent.clone(),
                        Edge::Copied {
                            source,
                            parent: *parent,
                        },
                        span,
                    )
                })
                .collect(),
            None => {
                for dep in &value.deps {
                    self.graph.relabel(*dep, dependent.clone());
                }
                value.deps
            }
        }
    }

    // ── Expressions ─────────────────────────────────────────────

    fn expr(&mut self, expr: &Expr, usage: Usage) -> Option<Value> {
        match expr {
            Expr::Var { name, span } => {
                let id = self.resolve_name(name, *span)?;
                self.use_binding(id, usage, false, *span)
            }
            Expr::Consume { name, span } => {
                let id = self.resolve_name(name, *span)?;
                self.use_binding(id, Usage::Take, true, *span)
            }
            Expr::Global { name, span } => self.global(name, *span),
            Expr::Unit { .. } => Some(Value::escapable(Type::unit())),
            Expr::Call(call) => self.call(call),
            Expr::Construct { ty, parts, span } => self.construct(ty, parts, *span),
            Expr::Closure(closure) => self.closure(closure),
        }
    }

    /// Access a binding: validate its state, raise any pending invalidation,
    /// then apply the access and its effect on dependents.
    fn use_binding(
        &mut self,
        id: BindingId,
        usage: Usage,
        explicit_consume: bool,
        span: Span,
    ) -> Option<Value> {
        let span = or_span(span, self.current_span);
        if !self.check_usable(id, span) {
            return None;
        }
        let binding = self.bindings.get(id);
        let value = Value {
            ty: binding.ty.clone(),
            escapable: binding.escapable,
            deps: binding.deps().map(<[DepId]>::to_vec).unwrap_or_default(),
            place: Some(id),
        };

        let consumes = explicit_consume || (usage == Usage::Take && !value.ty.copyable);
        if consumes && binding.convention == Some(Convention::Borrowing) {
            let name = self.bindings.display_name(id).to_string();
            self.report(LifetimeError::ConsumeOfBorrowed { name, span }, span);
            self.access(id, Access::Read, span);
        } else if consumes {
            self.access(id, Access::Consume, span);
            self.bindings.consume(id, span);
            trace!(binding = %self.bindings.name(id), "consumed");
        } else if usage == Usage::Mutate {
            if let Err(e) = self.bindings.check_writable(id) {
                self.report(e, span);
            }
            self.access(id, Access::Write, span);
        } else {
            self.access(id, Access::Read, span);
        }
        Some(value)
    }

    fn check_usable(&mut self, id: BindingId, span: Span) -> bool {
        let binding = self.bindings.get(id);
        let err = match &binding.state {
            BindingState::Live(_) => None,
            BindingState::Uninitialized => Some(LifetimeError::UninitializedUse {
                name: binding.name.clone(),
                span,
            }),
            BindingState::Consumed { at } => Some(LifetimeError::UseAfterConsume {
                name: binding.name.clone(),
                consumed_at: *at,
                span,
            }),
            BindingState::OutOfScope => return false,
        };
        if let Some(err) = err {
            self.report(err, span);
            return false;
        }
        self.report_invalidation(id, span);
        true
    }

    fn report_invalidation(&mut self, id: BindingId, span: Span) {
        let Some(pending) = self.bindings.take_invalidation(id) else {
            return;
        };
        let dependent = self.bindings.display_name(id).to_string();
        let source = self.bindings.display_name(pending.source).to_string();
        let happened = located(pending.cause.describe(), pending.at);
        let err = match pending.cause {
            Invalidation::OutOfScope | Invalidation::Consumed => LifetimeError::DanglingDependency {
                dependent: format!("'{}'", dependent),
                source_name: source,
                reason: happened,
                span,
            },
            Invalidation::Written | Invalidation::Accessed => {
                LifetimeError::ExclusivityViolation {
                    detail: format!(
                        "it {} while '{}' still depends on it",
                        happened, dependent
                    ),
                    name: source,
                    span,
                }
            }
        };
        self.report(err, span);
    }

    fn global(&mut self, name: &str, span: Span) -> Option<Value> {
        let global = self.lookup_global(name, span)?;
        if global.ty.is_escapable_in(&self.env) {
            return Some(Value::escapable(global.ty.clone()));
        }
        self.warn_transient(global, span);
        let dep = self.edge(Dependent::Value, Edge::Immortal, span)?;
        Some(Value::fresh(global.ty.clone(), vec![dep]))
    }

    fn lookup_global(&mut self, name: &str, span: Span) -> Option<&'a Global> {
        let module = self.ctx.module;
        let found = module.global(name);
        if found.is_none() {
            let names: Vec<&str> = module.globals.iter().map(|g| g.name.as_str()).collect();
            self.report(
                LifetimeError::UnresolvedName {
                    what: "global",
                    name: name.to_string(),
                    similar: suggest_similar(name, &names, 2),
                    span,
                },
                span,
            );
        }
        found
    }

    fn warn_transient(&mut self, global: &Global, span: Span) {
        if self.ctx.options.immortal_mode == ImmortalMode::Strict && global.transient {
            self.report(
                LifetimeError::TransientImmortal {
                    global: global.name.clone(),
                    span,
                },
                span,
            );
        }
    }

    fn construct(&mut self, ty: &Type, parts: &[Expr], span: Span) -> Option<Value> {
        let span = or_span(span, self.current_span);
        let escapable = ty.is_escapable_in(&self.env);
        let mut deps = Vec::new();
        for part in parts {
            match part {
                // Module constants and `()` are immortal components.
                Expr::Global {
                    name,
                    span: part_span,
                } => {
                    let at = or_span(*part_span, span);
                    if let Some(global) = self.lookup_global(name, at) {
                        if !escapable {
                            self.warn_transient(global, at);
                        }
                    }
                }
                Expr::Unit { .. } => {}
                _ => {
                    let Some(value) = self.expr(part, Usage::Take) else {
                        continue;
                    };
                    if !escapable {
                        let at = or_span(part.span(), span);
                        deps.extend(self.derive(&value, Convention::Borrowing, false, at));
                    }
                }
            }
        }
        if escapable {
            return Some(Value::escapable(ty.clone()));
        }
        if deps.is_empty() {
            deps.extend(self.edge(Dependent::Value, Edge::Immortal, span));
        }
        Some(Value::fresh(ty.clone(), deps))
    }

    // ── Calls ───────────────────────────────────────────────────

    fn call(&mut self, call: &Call) -> Option<Value> {
        let span = or_span(call.span, self.current_span);
        let ctx = self.ctx;
        let Some(entry) = ctx.index.get(&call.callee) else {
            self.report(
                LifetimeError::UnresolvedName {
                    what: "function",
                    name: call.callee.clone(),
                    similar: suggest_similar(&call.callee, &ctx.index.names(), 2),
                    span,
                },
                span,
            );
            self.evaluate_loose(call);
            return None;
        };
        let signature = entry.signature;
        let mut env = signature.escapable_generics.clone();
        env.extend(call.escapable_generics.iter().cloned());
        let result_escapable = signature.result.is_escapable_in(&env);
        let opaque = |ty: &Type| {
            if result_escapable {
                Value::escapable(ty.clone())
            } else {
                Value::fresh(ty.clone(), Vec::new())
            }
        };

        // A callee with a rejected signature reports its own errors.
        let Ok(resolved) = &entry.resolved else {
            self.evaluate_loose(call);
            return Some(opaque(&signature.result));
        };

        let expects_receiver = resolved.conventions.self_convention.is_some();
        if call.args.len() != signature.params.len() || call.receiver.is_some() != expects_receiver
        {
            self.report(
                LifetimeError::ArgumentCount {
                    callee: call.callee.clone(),
                    expected: signature.params.len() + usize::from(expects_receiver),
                    found: call.args.len() + usize::from(call.receiver.is_some()),
                    span,
                },
                span,
            );
            self.evaluate_loose(call);
            return Some(opaque(&signature.result));
        }

        let receiver = match (&call.receiver, resolved.conventions.self_convention) {
            (Some(expr), Some(convention)) => Some(Argument {
                value: self.expr(expr, Usage::from(convention)),
                convention,
            }),
            _ => None,
        };
        let args: Vec<Argument> = call
            .args
            .iter()
            .zip(&resolved.conventions.params)
            .map(|(expr, convention)| Argument {
                value: self.expr(expr, Usage::from(*convention)),
                convention: *convention,
            })
            .collect();
        self.check_overlap(&call.callee, receiver.iter().chain(args.iter()), span);

        for (index, targets) in resolved.params.iter().enumerate() {
            let Some(targets) = targets else { continue };
            let Some(place) = args[index].value.as_ref().and_then(|v| v.place) else {
                continue;
            };
            if self.bindings.get(place).escapable {
                continue;
            }
            let deps = self.call_dependencies(targets, receiver.as_ref(), &args, span);
            let dependent = self.dependent(place);
            for dep in &deps {
                self.graph.relabel(*dep, dependent.clone());
            }
            if let Err(e) = self.bindings.reassign(place, deps) {
                self.report(e, span);
            }
        }

        if result_escapable {
            return Some(Value::escapable(signature.result.clone()));
        }
        let deps = match &resolved.result {
            Some(targets) => self.call_dependencies(targets, receiver.as_ref(), &args, span),
            None => Vec::new(),
        };
        trace!(callee = %call.callee, deps = deps.len(), "call result");
        Some(Value::fresh(signature.result.clone(), deps))
    }

    /// Instantiate a callee's declared dependencies against the actual
    /// arguments of one call.
    fn call_dependencies(
        &mut self,
        targets: &[ResolvedDependency],
        receiver: Option<&Argument>,
        args: &[Argument],
        span: Span,
    ) -> Vec<DepId> {
        let mut deps = Vec::new();
        for target in targets {
            let argument = match &target.source {
                DependencySource::Immortal => {
                    deps.extend(self.edge(Dependent::Value, Edge::Immortal, span));
                    continue;
                }
                DependencySource::SelfValue => receiver,
                DependencySource::Param { index, .. } => args.get(*index),
            };
            let Some(value) = argument.and_then(|a| a.value.as_ref()) else {
                continue;
            };
            let convention = target.convention.unwrap_or(Convention::Borrowing);
            deps.extend(self.derive(value, convention, target.scoped_requested, span));
        }
        deps
    }

    /// Dependencies a new value takes on from `value`, per the resolution
    /// table re-applied to the actual escapability of `value`.
    fn derive(
        &mut self,
        value: &Value,
        convention: Convention,
        scoped: bool,
        span: Span,
    ) -> Vec<DepId> {
        let label = match value.place {
            Some(id) => self.bindings.display_name(id).to_string(),
            None => "a temporary value".to_string(),
        };
        let resolution = match resolve_kind(convention, value.escapable, scoped, &label) {
            Ok(r) => r,
            Err(e) => {
                self.report(e, span);
                return Vec::new();
            }
        };
        match resolution.kind {
            DependencyKind::Immortal => self
                .edge(Dependent::Value, Edge::Immortal, span)
                .into_iter()
                .collect(),
            DependencyKind::Copied => match value.place {
                Some(source) => value
                    .deps
                    .iter()
                    .filter_map(|parent| {
                        self.edge(
                            Dependent::Value,
                            Edge::Copied {
                                source,
                                parent: *parent,
                            },
                            span,
                        )
                    })
                    .collect(),
                None => value.deps.clone(),
            },
            DependencyKind::Scoped => {
                let access = resolution.access.unwrap_or(AccessMode::Borrowing);
                let source = match value.place {
                    Some(source) => Some(source),
                    None => self.materialize(value, span),
                };
                source
                    .and_then(|source| {
                        self.edge(Dependent::Value, Edge::Scoped { source, access }, span)
                    })
                    .into_iter()
                    .collect()
            }
        }
    }

    /// Give an argument value a binding that lives until the end of the
    /// current statement.
    fn materialize(&mut self, value: &Value, span: Span) -> Option<BindingId> {
        let name = format!("$tmp{}", self.temporaries);
        self.temporaries += 1;
        let decl = Declaration::local(name, value.ty.clone(), value.escapable)
            .origin(Origin::Temporary)
            .at(span);
        match self.bindings.declare(decl) {
            Ok(id) => {
                self.bindings.initialize(id, value.deps.clone());
                Some(id)
            }
            Err(e) => {
                self.report(e, span);
                None
            }
        }
    }

    /// Exclusivity within a single call: an `inout` argument may not alias
    /// any other argument.
    fn check_overlap<'v>(
        &mut self,
        callee: &str,
        args: impl Iterator<Item = &'v Argument>,
        span: Span,
    ) {
        let places: Vec<(BindingId, Convention)> = args
            .filter_map(|a| Some((a.value.as_ref()?.place?, a.convention)))
            .collect();
        let mut reported = HashSet::new();
        for (i, (place, convention)) in places.iter().enumerate() {
            let clash = places.iter().enumerate().any(|(j, (other, other_convention))| {
                i != j
                    && other == place
                    && (convention.is_exclusive() || other_convention.is_exclusive())
            });
            if clash && reported.insert(*place) {
                let name = self.bindings.display_name(*place).to_string();
                self.report(
                    LifetimeError::ExclusivityViolation {
                        detail: format!(
                            "'{}' is passed 'inout' to '{}' and accessed again in the same call",
                            name, callee
                        ),
                        name,
                        span,
                    },
                    span,
                );
            }
        }
        // A later argument of this call may have broken an earlier one.
        for (place, _) in &places {
            if self.bindings.get(*place).is_live() {
                self.report_invalidation(*place, span);
            }
        }
    }

    fn evaluate_loose(&mut self, call: &Call) {
        if let Some(receiver) = &call.receiver {
            self.expr(receiver, Usage::Borrow);
        }
        for arg in &call.args {
            self.expr(arg, Usage::Borrow);
        }
    }

    // ── Closures ────────────────────────────────────────────────

    /// A closure is a synthetic declaration whose parameters are its
    /// captures. Its body is checked on its own; the enclosing function sees
    /// a capture access per convention.
    fn closure(&mut self, closure: &ClosureExpr) -> Option<Value> {
        let span = or_span(closure.span, self.current_span);
        let mut signature = Signature::new(
            format!("{}::closure#{}", self.name, self.closures),
            DeclKind::Closure,
            closure.result.clone(),
        );
        self.closures += 1;
        signature.result_depends_on = closure.result_depends_on.clone();
        signature.escapable_generics = self.env.clone();
        signature.span = span;

        let mut captured = Vec::new();
        for capture in &closure.captures {
            let at = or_span(capture.span, span);
            let Some(id) = self.resolve_name(&capture.name, at) else {
                continue;
            };
            let mut param = Param::new(capture.name.clone(), self.bindings.get(id).ty.clone());
            param.modifier = capture.modifier;
            param.span = at;
            signature.params.push(param);
            captured.push((id, at));
        }

        let resolved = match resolve_signature(&signature) {
            Ok(resolved) => resolved,
            Err(errors) => {
                for e in errors {
                    self.report(e, span);
                }
                return None;
            }
        };

        let conventions = resolved.conventions.params.clone();
        let mut nested = FunctionChecker::new(self.ctx, signature, resolved);
        nested.current_span = span;
        nested.run(&closure.body);
        self.errors.extend(nested.finish());

        let mut deps = Vec::new();
        for ((id, at), convention) in captured.into_iter().zip(conventions) {
            let Some(value) = self.use_binding(id, Usage::from(convention), false, at) else {
                continue;
            };
            if closure.escaping {
                if !value.escapable {
                    self.report(
                        LifetimeError::DanglingDependency {
                            dependent: "an escaping closure".to_string(),
                            source_name: self.bindings.display_name(id).to_string(),
                            reason: "is nonescapable and cannot be captured by an escaping closure"
                                .to_string(),
                            span: at,
                        },
                        at,
                    );
                }
                continue;
            }
            match convention {
                // An owned escapable capture moves into the closure.
                Convention::Consuming if value.escapable => {}
                Convention::Consuming => {
                    deps.extend(self.derive(&value, convention, false, at));
                }
                Convention::Borrowing | Convention::Mutating => {
                    deps.extend(self.derive(&value, convention, true, at));
                }
            }
        }

        let ty = Type::closure(closure.escaping);
        if closure.escaping {
            return Some(Value::escapable(ty));
        }
        if deps.is_empty() {
            deps.extend(self.edge(Dependent::Value, Edge::Immortal, span));
        }
        Some(Value::fresh(ty, deps))
    }

    // ── Returns ─────────────────────────────────────────────────

    fn check_return(&mut self, value: Value, span: Span) {
        let Some(contract) = self.resolved.result.clone() else {
            return;
        };
        if value.escapable {
            return;
        }
        let label = format!("the result of '{}'", self.name);
        self.check_outgoing(&label, &value.deps, &contract, None, span);
    }

    /// Every root of a value leaving the function must be immortal, or a
    /// parameter the contract lists (scoped roots need a scoped entry).
    fn check_outgoing(
        &mut self,
        label: &str,
        deps: &[DepId],
        contract: &[ResolvedDependency],
        own: Option<BindingId>,
        span: Span,
    ) {
        let roots = match self.graph.roots(deps) {
            Ok(roots) => roots,
            Err(e) => {
                self.report(e, span);
                return;
            }
        };
        for root in roots {
            let (source, allowed) = match root {
                RootKind::Immortal => continue,
                RootKind::Caller(param) => (
                    param,
                    Some(param) == own || self.in_contract(contract, param, None),
                ),
                RootKind::Scoped { source, .. } => (
                    source,
                    self.in_contract(contract, source, Some(DependencyKind::Scoped)),
                ),
            };
            if allowed {
                continue;
            }
            let binding = self.bindings.get(source);
            let reason = match root {
                RootKind::Caller(_) => "is not one of its declared dependency sources".to_string(),
                _ if binding.is_parameter() => {
                    "is only borrowed for the duration of the call".to_string()
                }
                _ => format!("is destroyed when '{}' returns", self.name),
            };
            let source_name = self.bindings.display_name(source).to_string();
            self.report(
                LifetimeError::DanglingDependency {
                    dependent: label.to_string(),
                    source_name,
                    reason,
                    span,
                },
                span,
            );
        }
    }

    fn in_contract(
        &self,
        contract: &[ResolvedDependency],
        binding: BindingId,
        kind: Option<DependencyKind>,
    ) -> bool {
        contract.iter().any(|dep| {
            let source = match &dep.source {
                DependencySource::Param { index, .. } => {
                    self.param_bindings.get(*index).copied().flatten()
                }
                DependencySource::SelfValue => self.self_binding,
                DependencySource::Immortal => None,
            };
            source == Some(binding) && kind.map_or(true, |k| dep.kind == k)
        })
    }

    // ── Scopes and access tracking ──────────────────────────────

    fn close_scope(&mut self, scope: ScopeId, span: Span) {
        let span = or_span(span, self.current_span);
        for id in self.bindings.end_scope(scope) {
            self.access(id, Access::EndOfScope, span);
        }
    }

    /// Apply an access on `source` to every live binding whose scoped root
    /// sits on it, and transitively to bindings scoped on those.
    fn access(&mut self, source: BindingId, kind: Access, span: Span) {
        // Scoped roots held by every live binding, keyed by the binding the
        // access scope sits on.
        let mut held_on: HashMap<BindingId, Vec<(BindingId, AccessMode)>> = HashMap::new();
        let graph = &self.graph;
        let cache = &mut self.root_cache;
        for (id, binding) in self.bindings.live() {
            let Some(roots) = binding.deps().and_then(|deps| cache.roots(graph, deps).ok()) else {
                continue;
            };
            for root in roots {
                if let RootKind::Scoped { source, access } = root {
                    held_on.entry(source).or_default().push((id, access));
                }
            }
        }

        let mut queue: VecDeque<(BindingId, Option<Invalidation>)> =
            VecDeque::from([(source, None)]);
        let mut seen = HashSet::new();
        while let Some((current, inherited)) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let mut hits: Vec<(BindingId, Invalidation)> = Vec::new();
            for (id, access) in held_on.get(&current).into_iter().flatten() {
                if *id == current || hits.iter().any(|(hit, _)| hit == id) {
                    continue;
                }
                if let Some(cause) = inherited.or_else(|| kind.conflict(*access)) {
                    hits.push((*id, cause));
                }
            }
            for (id, cause) in hits {
                trace!(
                    dependent = %self.bindings.name(id),
                    source = %self.bindings.name(source),
                    cause = cause.describe(),
                    "dependency invalidated"
                );
                self.bindings.invalidate(
                    id,
                    PendingInvalidation {
                        source,
                        cause,
                        at: span,
                    },
                );
                queue.push_back((id, Some(cause)));
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    fn resolve_name(&mut self, name: &str, span: Span) -> Option<BindingId> {
        let found = self.bindings.resolve(name);
        if found.is_none() {
            let similar = suggest_similar(name, &self.bindings.visible_names(), 2);
            self.report(
                LifetimeError::UnresolvedName {
                    what: "binding",
                    name: name.to_string(),
                    similar,
                    span,
                },
                span,
            );
        }
        found
    }

    fn dependent(&self, id: BindingId) -> Dependent {
        Dependent::Binding(id, self.bindings.name(id).to_string())
    }

    fn edge(&mut self, dependent: Dependent, edge: Edge, span: Span) -> Option<DepId> {
        match self.graph.add_edge(&self.bindings, dependent, edge) {
            Ok(id) => {
                trace!(dep = id.0, ?edge, "edge");
                Some(id)
            }
            Err(e) => {
                self.report(e, span);
                None
            }
        }
    }

    fn report(&mut self, err: LifetimeError, span: Span) {
        let err = err.at(span).at(self.current_span);
        debug!(function = %self.name, kind = %err.kind(), "{}", err);
        self.errors.push(err);
    }

    // ── Inspection ──────────────────────────────────────────────

    /// Roots of the visible binding `name`, or nothing if it holds no value.
    pub fn roots_of(&self, name: &str) -> Vec<RootKind> {
        self.bindings
            .resolve(name)
            .and_then(|id| self.bindings.get(id).deps())
            .and_then(|deps| self.graph.roots(deps).ok())
            .unwrap_or_default()
    }

    /// Kinds of the edges the visible binding `name` holds directly.
    pub fn dependency_kinds_of(&self, name: &str) -> Vec<DependencyKind> {
        self.bindings
            .resolve(name)
            .and_then(|id| self.bindings.get(id).deps())
            .map(|deps| deps.iter().map(|d| self.graph.get(*d).kind).collect())
            .unwrap_or_default()
    }

    /// Name of the binding a root points at.
    pub fn root_name(&self, root: &RootKind) -> Option<&str> {
        root.binding().map(|id| self.bindings.name(id))
    }
}

fn located(what: &str, at: Span) -> String {
    if at.is_dummy() {
        what.to_string()
    } else {
        format!("{} at {}", what, at)
    }
}

fn or_span(span: Span, fallback: Span) -> Span {
    if span.is_dummy() {
        fallback
    } else {
        span
    }
}

// ── Declarations ────────────────────────────────────────────────────

/// Outcome of checking one declaration.
#[derive(Debug, Clone)]
pub struct DeclarationCheck {
    /// `None` when the signature was rejected and the body skipped.
    pub signature: Option<ResolvedSignature>,
    pub errors: Vec<LifetimeError>,
}

/// Validate the signature of `decl` and, if it is sound, its body.
pub fn check_declaration(ctx: Context<'_>, decl: &FunctionDecl) -> DeclarationCheck {
    let resolved = match ctx.index.get(decl.name()) {
        Some(entry) if std::ptr::eq(entry.signature, &decl.signature) => entry.resolved.clone(),
        _ => resolve_signature(&decl.signature),
    };
    match resolved {
        Err(errors) => {
            debug!(function = %decl.name(), errors = errors.len(), "signature rejected, body skipped");
            DeclarationCheck {
                signature: None,
                errors,
            }
        }
        Ok(resolved) => {
            let mut checker = FunctionChecker::new(ctx, decl.signature.clone(), resolved.clone());
            checker.run(&decl.body);
            DeclarationCheck {
                signature: Some(resolved),
                errors: checker.finish(),
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
