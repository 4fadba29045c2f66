//! Input IR consumed by the checker.
//!
//! The IR is produced by an external front end after name resolution and
//! ordinary type checking. It carries just enough structure to drive the
//! ownership and lifetime-dependency analysis: declarations with their
//! ownership modifiers and `dependsOn` annotations, and a straight-line
//! statement sequence with explicit scope boundaries.
//!
//! Every type here is serde-(de)serializable so that modules can be fed to
//! the `lifedep` CLI as JSON.

use crate::checker::span::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Generic parameters statically known to conform to `Escapable`.
pub type GenericEnv = BTreeSet<String>;

// ── Types ───────────────────────────────────────────────────────────

/// Whether values of a type may outlive the scope that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escapability {
    #[default]
    Escapable,
    Nonescapable,
    /// Escapable exactly when the named generic parameter is known to
    /// conform to `Escapable`.
    Conditional { generic: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub name: String,
    #[serde(default)]
    pub escapability: Escapability,
    #[serde(default = "default_true")]
    pub copyable: bool,
    #[serde(default)]
    pub bitwise_copyable: bool,
    #[serde(default)]
    pub non_escaping_closure: bool,
}

fn default_true() -> bool {
    true
}

impl Type {
    /// An ordinary escapable, copyable, non-trivial type.
    pub fn escapable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            escapability: Escapability::Escapable,
            copyable: true,
            bitwise_copyable: false,
            non_escaping_closure: false,
        }
    }

    /// A copyable nonescapable type (e.g. `Span`).
    pub fn nonescapable(name: impl Into<String>) -> Self {
        Self {
            escapability: Escapability::Nonescapable,
            ..Self::escapable(name)
        }
    }

    /// A type whose escapability follows a generic parameter.
    pub fn conditional(name: impl Into<String>, generic: impl Into<String>) -> Self {
        Self {
            escapability: Escapability::Conditional {
                generic: generic.into(),
            },
            ..Self::escapable(name)
        }
    }

    /// The empty tuple `()`.
    pub fn unit() -> Self {
        Self::escapable("()").bitwise()
    }

    /// Closure type. Non-escaping closures are nonescapable values.
    pub fn closure(escaping: bool) -> Self {
        if escaping {
            Self::escapable("closure")
        } else {
            Self {
                non_escaping_closure: true,
                ..Self::nonescapable("closure")
            }
        }
    }

    pub fn noncopyable(mut self) -> Self {
        self.copyable = false;
        self.bitwise_copyable = false;
        self
    }

    pub fn bitwise(mut self) -> Self {
        self.copyable = true;
        self.bitwise_copyable = true;
        self
    }

    /// Escapability of the type given the generic parameters known to be
    /// `Escapable` at this point.
    pub fn is_escapable_in(&self, env: &GenericEnv) -> bool {
        match &self.escapability {
            Escapability::Escapable => true,
            Escapability::Nonescapable => false,
            Escapability::Conditional { generic } => env.contains(generic),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match &self.escapability {
            Escapability::Escapable => {}
            Escapability::Nonescapable => write!(f, " (~Escapable)")?,
            Escapability::Conditional { generic } => {
                write!(f, " (~Escapable unless {}: Escapable)", generic)?
            }
        }
        if !self.copyable {
            write!(f, " (~Copyable)")?;
        }
        Ok(())
    }
}

// ── Declarations ────────────────────────────────────────────────────

/// Ownership modifier written on a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamModifier {
    Borrowing,
    Consuming,
    Inout,
}

/// Ownership modifier written on a method (applies to `self`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfModifier {
    Borrowing,
    Consuming,
    Mutating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    Function,
    Method,
    Initializer,
    Setter,
    Closure,
}

impl DeclKind {
    /// Initializers and setters take their parameters `consuming` by default.
    pub fn defaults_to_consuming(self) -> bool {
        matches!(self, DeclKind::Initializer | DeclKind::Setter)
    }
}

/// One entry of a `dependsOn(...)` list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum DependsOnTarget {
    Param {
        name: String,
        #[serde(default)]
        scoped: bool,
    },
    SelfValue {
        #[serde(default)]
        scoped: bool,
    },
    Immortal,
}

impl DependsOnTarget {
    pub fn param(name: impl Into<String>) -> Self {
        DependsOnTarget::Param {
            name: name.into(),
            scoped: false,
        }
    }

    pub fn scoped_param(name: impl Into<String>) -> Self {
        DependsOnTarget::Param {
            name: name.into(),
            scoped: true,
        }
    }

    pub fn is_scoped(&self) -> bool {
        match self {
            DependsOnTarget::Param { scoped, .. } | DependsOnTarget::SelfValue { scoped } => {
                *scoped
            }
            DependsOnTarget::Immortal => false,
        }
    }
}

impl fmt::Display for DependsOnTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependsOnTarget::Param { name, scoped } => {
                if *scoped {
                    write!(f, "scoped {}", name)
                } else {
                    write!(f, "{}", name)
                }
            }
            DependsOnTarget::SelfValue { scoped } => {
                if *scoped {
                    write!(f, "scoped self")
                } else {
                    write!(f, "self")
                }
            }
            DependsOnTarget::Immortal => write!(f, "immortal"),
        }
    }
}

/// An explicit `dependsOn(...)` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependsOn {
    pub targets: Vec<DependsOnTarget>,
    #[serde(default)]
    pub span: Span,
}

impl DependsOn {
    pub fn new(targets: Vec<DependsOnTarget>) -> Self {
        Self {
            targets,
            span: Span::dummy(),
        }
    }

    pub fn on(name: impl Into<String>) -> Self {
        Self::new(vec![DependsOnTarget::param(name)])
    }

    pub fn on_self() -> Self {
        Self::new(vec![DependsOnTarget::SelfValue { scoped: false }])
    }

    pub fn immortal() -> Self {
        Self::new(vec![DependsOnTarget::Immortal])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub modifier: Option<ParamModifier>,
    /// Dependency of the value this (`inout`) parameter holds after the call.
    #[serde(default)]
    pub depends_on: Option<DependsOn>,
    #[serde(default)]
    pub span: Span,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            modifier: None,
            depends_on: None,
            span: Span::dummy(),
        }
    }

    pub fn borrowing(mut self) -> Self {
        self.modifier = Some(ParamModifier::Borrowing);
        self
    }

    pub fn consuming(mut self) -> Self {
        self.modifier = Some(ParamModifier::Consuming);
        self
    }

    pub fn inout(mut self) -> Self {
        self.modifier = Some(ParamModifier::Inout);
        self
    }

    pub fn depends_on(mut self, deps: DependsOn) -> Self {
        self.depends_on = Some(deps);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub kind: DeclKind,
    #[serde(default)]
    pub self_type: Option<Type>,
    #[serde(default)]
    pub self_modifier: Option<SelfModifier>,
    #[serde(default)]
    pub params: Vec<Param>,
    pub result: Type,
    #[serde(default)]
    pub result_depends_on: Option<DependsOn>,
    /// Where-clause `T: Escapable` requirements.
    #[serde(default)]
    pub escapable_generics: GenericEnv,
    #[serde(default)]
    pub span: Span,
}

impl Signature {
    pub fn new(name: impl Into<String>, kind: DeclKind, result: Type) -> Self {
        Self {
            name: name.into(),
            kind,
            self_type: None,
            self_modifier: None,
            params: Vec::new(),
            result,
            result_depends_on: None,
            escapable_generics: GenericEnv::new(),
            span: Span::dummy(),
        }
    }

    pub fn function(name: impl Into<String>, result: Type) -> Self {
        Self::new(name, DeclKind::Function, result)
    }

    pub fn method(name: impl Into<String>, self_type: Type, result: Type) -> Self {
        let mut sig = Self::new(name, DeclKind::Method, result);
        sig.self_type = Some(self_type);
        sig
    }

    pub fn initializer(name: impl Into<String>, result: Type) -> Self {
        Self::new(name, DeclKind::Initializer, result)
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn self_modifier(mut self, modifier: SelfModifier) -> Self {
        self.self_modifier = Some(modifier);
        self
    }

    pub fn returns_depending_on(mut self, deps: DependsOn) -> Self {
        self.result_depends_on = Some(deps);
        self
    }

    pub fn where_escapable(mut self, generic: impl Into<String>) -> Self {
        self.escapable_generics.insert(generic.into());
        self
    }

    pub fn find_param(&self, name: &str) -> Option<(usize, &Param)> {
        self.params.iter().enumerate().find(|(_, p)| p.name == name)
    }
}

// ── Bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    /// `let`/`var` declaration with an optional initializer.
    Let {
        name: String,
        ty: Type,
        #[serde(default)]
        mutable: bool,
        #[serde(default)]
        init: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    Assign {
        target: String,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    /// Evaluate an expression for its effects.
    Eval {
        expr: Expr,
        #[serde(default)]
        span: Span,
    },
    /// Read access to a binding.
    Use {
        name: String,
        #[serde(default)]
        span: Span,
    },
    /// In-place write access to a binding (e.g. `a.append(x)`).
    Mutate {
        name: String,
        #[serde(default)]
        span: Span,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// Lexical scope.
    Block {
        body: Vec<Stmt>,
        #[serde(default)]
        span: Span,
    },
}

impl Stmt {
    pub fn let_(name: impl Into<String>, ty: Type, init: Expr) -> Self {
        Stmt::Let {
            name: name.into(),
            ty,
            mutable: false,
            init: Some(init),
            span: Span::dummy(),
        }
    }

    pub fn var(name: impl Into<String>, ty: Type, init: Option<Expr>) -> Self {
        Stmt::Let {
            name: name.into(),
            ty,
            mutable: true,
            init,
            span: Span::dummy(),
        }
    }

    /// Declaration without an initializer.
    pub fn declare(name: impl Into<String>, ty: Type) -> Self {
        Stmt::Let {
            name: name.into(),
            ty,
            mutable: false,
            init: None,
            span: Span::dummy(),
        }
    }

    pub fn assign(target: impl Into<String>, value: Expr) -> Self {
        Stmt::Assign {
            target: target.into(),
            value,
            span: Span::dummy(),
        }
    }

    pub fn eval(expr: Expr) -> Self {
        Stmt::Eval {
            expr,
            span: Span::dummy(),
        }
    }

    pub fn use_(name: impl Into<String>) -> Self {
        Stmt::Use {
            name: name.into(),
            span: Span::dummy(),
        }
    }

    pub fn mutate(name: impl Into<String>) -> Self {
        Stmt::Mutate {
            name: name.into(),
            span: Span::dummy(),
        }
    }

    pub fn ret(value: Expr) -> Self {
        Stmt::Return {
            value: Some(value),
            span: Span::dummy(),
        }
    }

    pub fn block(body: Vec<Stmt>) -> Self {
        Stmt::Block {
            body,
            span: Span::dummy(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Eval { span, .. }
            | Stmt::Use { span, .. }
            | Stmt::Mutate { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Block { span, .. } => *span,
        }
    }

    /// Place the statement on `line`.
    pub fn at(mut self, line: usize) -> Self {
        let new = Span::line(line);
        match &mut self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Eval { span, .. }
            | Stmt::Use { span, .. }
            | Stmt::Mutate { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Block { span, .. } => *span = new,
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum Expr {
    /// Plain use of a binding (borrow, or implicit copy).
    Var {
        name: String,
        #[serde(default)]
        span: Span,
    },
    /// `consume x`.
    Consume {
        name: String,
        #[serde(default)]
        span: Span,
    },
    /// Module-level constant.
    Global {
        name: String,
        #[serde(default)]
        span: Span,
    },
    /// `()`.
    Unit {
        #[serde(default)]
        span: Span,
    },
    Call(Call),
    /// Aggregate construction from component values.
    Construct {
        ty: Type,
        #[serde(default)]
        parts: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    Closure(ClosureExpr),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var {
            name: name.into(),
            span: Span::dummy(),
        }
    }

    pub fn consume(name: impl Into<String>) -> Self {
        Expr::Consume {
            name: name.into(),
            span: Span::dummy(),
        }
    }

    pub fn global(name: impl Into<String>) -> Self {
        Expr::Global {
            name: name.into(),
            span: Span::dummy(),
        }
    }

    pub fn unit() -> Self {
        Expr::Unit { span: Span::dummy() }
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            callee: callee.into(),
            receiver: None,
            args,
            escapable_generics: GenericEnv::new(),
            span: Span::dummy(),
        })
    }

    pub fn method(receiver: Expr, callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            callee: callee.into(),
            receiver: Some(Box::new(receiver)),
            args,
            escapable_generics: GenericEnv::new(),
            span: Span::dummy(),
        })
    }

    pub fn construct(ty: Type, parts: Vec<Expr>) -> Self {
        Expr::Construct {
            ty,
            parts,
            span: Span::dummy(),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Var { span, .. }
            | Expr::Consume { span, .. }
            | Expr::Global { span, .. }
            | Expr::Unit { span }
            | Expr::Construct { span, .. } => *span,
            Expr::Call(call) => call.span,
            Expr::Closure(closure) => closure.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Call {
    pub callee: String,
    #[serde(default)]
    pub receiver: Option<Box<Expr>>,
    #[serde(default)]
    pub args: Vec<Expr>,
    /// Generic parameters of the callee known `Escapable` at this call site.
    #[serde(default)]
    pub escapable_generics: GenericEnv,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capture {
    pub name: String,
    #[serde(default)]
    pub modifier: Option<ParamModifier>,
    #[serde(default)]
    pub span: Span,
}

impl Capture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifier: None,
            span: Span::dummy(),
        }
    }

    pub fn with(mut self, modifier: ParamModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureExpr {
    #[serde(default)]
    pub captures: Vec<Capture>,
    #[serde(default)]
    pub escaping: bool,
    pub result: Type,
    #[serde(default)]
    pub result_depends_on: Option<DependsOn>,
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

// ── Module ──────────────────────────────────────────────────────────

/// Module-level `let` constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    /// Wraps a transient resource (raw pointer, file descriptor, ...).
    #[serde(default)]
    pub transient: bool,
}

impl Global {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            transient: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub signature: Signature,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

impl FunctionDecl {
    pub fn new(signature: Signature, body: Vec<Stmt>) -> Self {
        Self { signature, body }
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }
}

/// A concrete declaration claiming to satisfy a protocol requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conformance {
    pub requirement: Signature,
    /// Name of the witness function in the module.
    pub witness: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub globals: Vec<Global>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
    #[serde(default)]
    pub conformances: Vec<Conformance>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, global: Global) -> Self {
        self.globals.push(global);
        self
    }

    pub fn with_function(mut self, decl: FunctionDecl) -> Self {
        self.functions.push(decl);
        self
    }

    pub fn with_conformance(mut self, requirement: Signature, witness: impl Into<String>) -> Self {
        self.conformances.push(Conformance {
            requirement,
            witness: witness.into(),
        });
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_escapability_follows_env() {
        let ty = Type::conditional("Box", "T");
        let mut env = GenericEnv::new();
        assert!(!ty.is_escapable_in(&env));
        env.insert("T".to_string());
        assert!(ty.is_escapable_in(&env));
    }

    #[test]
    fn closure_types() {
        let ne = Type::closure(false);
        assert!(ne.non_escaping_closure);
        assert!(!ne.is_escapable_in(&GenericEnv::new()));
        assert!(Type::closure(true).is_escapable_in(&GenericEnv::new()));
    }

    #[test]
    fn module_json_defaults() {
        let json = r#"{
            "functions": [{
                "signature": {
                    "name": "span",
                    "kind": "function",
                    "params": [{"name": "a", "ty": {"name": "Array"}, "modifier": "borrowing"}],
                    "result": {"name": "Span", "escapability": "nonescapable"},
                    "result_depends_on": {"targets": [{"target": "param", "name": "a"}]}
                },
                "body": [{"stmt": "use", "name": "a"}]
            }]
        }"#;
        let module: Module = serde_json::from_str(json).expect("valid module json");
        let decl = module.function("span").expect("span declared");
        assert_eq!(decl.signature.params[0].modifier, Some(ParamModifier::Borrowing));
        assert!(decl.signature.params[0].ty.copyable);
        assert_eq!(
            decl.signature.result_depends_on.as_ref().map(|d| d.targets.len()),
            Some(1)
        );
    }

    #[test]
    fn stmt_at_sets_line() {
        let s = Stmt::use_("x").at(7);
        assert_eq!(s.span().line, 7);
    }
}
