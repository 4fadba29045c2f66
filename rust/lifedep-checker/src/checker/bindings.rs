//! Binding table: live bindings of one function body.
//!
//! Bindings live in a flat arena indexed by [`BindingId`]; lexical scopes are
//! a stack of frames that remember which bindings they introduced. Nothing
//! is ever removed from the arena, so ids stay valid after a scope ends and
//! diagnostics can still name the destroyed binding.

use crate::checker::conventions::Convention;
use crate::checker::dependency::DepId;
use crate::checker::error::{Invalidation, LifetimeError};
use crate::checker::ir::Type;
use crate::checker::span::Span;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Where a binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Parameter,
    SelfParam,
    /// Materialized argument value that lives until the end of a statement.
    Temporary,
}

/// Per-binding state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    Uninitialized,
    /// Holds a value. Nonescapable values carry their dependency set.
    Live(Vec<DepId>),
    Consumed { at: Span },
    OutOfScope,
}

/// A scoped dependency of this binding was broken by an access to its source.
/// Reported on the binding's next use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvalidation {
    pub source: BindingId,
    pub cause: Invalidation,
    pub at: Span,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub ty: Type,
    /// Escapability resolved against the generic environment of the body.
    pub escapable: bool,
    pub convention: Option<Convention>,
    pub mutable: bool,
    pub origin: Origin,
    pub scope: ScopeId,
    pub declared_at: Span,
    pub state: BindingState,
    pub(crate) invalidated: Option<PendingInvalidation>,
}

impl Binding {
    pub fn deps(&self) -> Option<&[DepId]> {
        match &self.state {
            BindingState::Live(deps) => Some(deps),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, BindingState::Live(_))
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.origin, Origin::Parameter | Origin::SelfParam)
    }
}

/// Everything needed to introduce a binding.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub ty: Type,
    pub escapable: bool,
    pub convention: Option<Convention>,
    pub mutable: bool,
    pub origin: Origin,
    pub span: Span,
}

impl Declaration {
    pub fn local(name: impl Into<String>, ty: Type, escapable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            escapable,
            convention: None,
            mutable: false,
            origin: Origin::Local,
            span: Span::dummy(),
        }
    }

    pub fn parameter(
        name: impl Into<String>,
        ty: Type,
        escapable: bool,
        convention: Convention,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            escapable,
            convention: Some(convention),
            // Owned parameters may be mutated in place.
            mutable: matches!(convention, Convention::Mutating | Convention::Consuming),
            origin: Origin::Parameter,
            span: Span::dummy(),
        }
    }

    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone)]
struct ScopeFrame {
    id: ScopeId,
    /// Bindings introduced by this scope, in declaration order.
    bindings: Vec<BindingId>,
}

#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: Vec<Binding>,
    scopes: Vec<ScopeFrame>,
    next_scope: usize,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scopes ──────────────────────────────────────────────────

    pub fn push_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;
        self.scopes.push(ScopeFrame {
            id,
            bindings: Vec::new(),
        });
        id
    }

    pub fn current_scope(&self) -> Option<ScopeId> {
        self.scopes.last().map(|s| s.id)
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Destroy every binding declared in `scope` (and in any scope still
    /// nested inside it). Returns the destroyed bindings, most recently
    /// declared first.
    pub fn end_scope(&mut self, scope: ScopeId) -> Vec<BindingId> {
        let mut destroyed = Vec::new();
        if !self.scopes.iter().any(|s| s.id == scope) {
            return destroyed;
        }
        while let Some(frame) = self.scopes.pop() {
            for id in frame.bindings.iter().rev() {
                self.bindings[id.0].state = BindingState::OutOfScope;
                destroyed.push(*id);
            }
            if frame.id == scope {
                break;
            }
        }
        destroyed
    }

    // ── Declarations ────────────────────────────────────────────

    /// Register a new binding in the innermost scope.
    pub fn declare(&mut self, decl: Declaration) -> Result<BindingId, LifetimeError> {
        let scope = match self.current_scope() {
            Some(scope) => scope,
            None => self.push_scope(),
        };
        self.declare_in(scope, decl)
    }

    /// Register a new binding in an enclosing `scope`. Falls back to the
    /// innermost scope when `scope` is no longer open.
    pub fn declare_in(
        &mut self,
        scope: ScopeId,
        decl: Declaration,
    ) -> Result<BindingId, LifetimeError> {
        let frame_index = match self.scopes.iter().rposition(|s| s.id == scope) {
            Some(index) => index,
            None if self.scopes.is_empty() => {
                self.push_scope();
                0
            }
            None => self.scopes.len() - 1,
        };
        let frame = &self.scopes[frame_index];
        if let Some(existing) = frame
            .bindings
            .iter()
            .find(|id| self.bindings[id.0].name == decl.name)
        {
            return Err(LifetimeError::DuplicateBinding {
                name: decl.name,
                first: self.bindings[existing.0].declared_at,
                span: decl.span,
            });
        }

        let id = BindingId(self.bindings.len());
        let scope = frame.id;
        self.bindings.push(Binding {
            name: decl.name,
            ty: decl.ty,
            escapable: decl.escapable,
            convention: decl.convention,
            mutable: decl.mutable,
            origin: decl.origin,
            scope,
            declared_at: decl.span,
            state: BindingState::Uninitialized,
            invalidated: None,
        });
        self.scopes[frame_index].bindings.push(id);
        Ok(id)
    }

    // ── State changes ───────────────────────────────────────────

    /// First assignment. Legal for any binding still `Uninitialized`.
    pub fn initialize(&mut self, id: BindingId, deps: Vec<DepId>) {
        let binding = &mut self.bindings[id.0];
        binding.state = BindingState::Live(deps);
        binding.invalidated = None;
    }

    /// Replace the dependency of a mutable nonescapable binding. The old
    /// dependency is simply dropped.
    pub fn reassign(&mut self, id: BindingId, deps: Vec<DepId>) -> Result<(), LifetimeError> {
        self.check_writable(id)?;
        let binding = &mut self.bindings[id.0];
        if binding.escapable {
            return Err(LifetimeError::ImmutableBinding {
                name: binding.name.clone(),
                reason: "escapable values carry no lifetime dependency",
                span: Span::dummy(),
            });
        }
        binding.state = BindingState::Live(deps);
        binding.invalidated = None;
        Ok(())
    }

    /// Whether `id` may be written once already initialized.
    pub fn check_writable(&self, id: BindingId) -> Result<(), LifetimeError> {
        let binding = &self.bindings[id.0];
        if binding.mutable || binding.state == BindingState::Uninitialized {
            return Ok(());
        }
        let reason = match binding.origin {
            Origin::Local => "it is declared with 'let'",
            Origin::Parameter => "parameters are immutable unless declared 'inout' or 'consuming'",
            Origin::SelfParam => "'self' is immutable in a non-mutating method",
            Origin::Temporary => "temporary values cannot be assigned",
        };
        Err(LifetimeError::ImmutableBinding {
            name: binding.name.clone(),
            reason,
            span: Span::dummy(),
        })
    }

    pub fn consume(&mut self, id: BindingId, at: Span) {
        self.bindings[id.0].state = BindingState::Consumed { at };
    }

    pub(crate) fn invalidate(&mut self, id: BindingId, pending: PendingInvalidation) {
        let binding = &mut self.bindings[id.0];
        if binding.invalidated.is_none() {
            binding.invalidated = Some(pending);
        }
    }

    pub(crate) fn take_invalidation(&mut self, id: BindingId) -> Option<PendingInvalidation> {
        self.bindings[id.0].invalidated.take()
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Read accessor: type, convention and current dependency set.
    pub fn lookup(&self, id: BindingId) -> (&Type, Option<Convention>, Option<&[DepId]>) {
        let b = &self.bindings[id.0];
        (&b.ty, b.convention, b.deps())
    }

    pub fn get(&self, id: BindingId) -> &Binding {
        &self.bindings[id.0]
    }

    pub fn name(&self, id: BindingId) -> &str {
        &self.bindings[id.0].name
    }

    /// Name used in diagnostics.
    pub fn display_name(&self, id: BindingId) -> &str {
        let b = &self.bindings[id.0];
        match b.origin {
            Origin::Temporary => "a temporary value",
            _ => &b.name,
        }
    }

    /// Innermost visible binding called `name`.
    pub fn resolve(&self, name: &str) -> Option<BindingId> {
        self.scopes.iter().rev().find_map(|frame| {
            frame
                .bindings
                .iter()
                .rev()
                .find(|id| {
                    let b = &self.bindings[id.0];
                    b.origin != Origin::Temporary && b.name == name
                })
                .copied()
        })
    }

    /// Names visible from the innermost scope.
    pub fn visible_names(&self) -> Vec<&str> {
        self.scopes
            .iter()
            .flat_map(|frame| frame.bindings.iter())
            .map(|id| &self.bindings[id.0])
            .filter(|b| b.origin != Origin::Temporary)
            .map(|b| b.name.as_str())
            .collect()
    }

    pub fn live(&self) -> impl Iterator<Item = (BindingId, &Binding)> {
        self.bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_live())
            .map(|(i, b)| (BindingId(i), b))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str) -> Declaration {
        Declaration::local(name, Type::nonescapable("Span"), false)
    }

    #[test]
    fn duplicate_in_same_scope_is_rejected() {
        let mut table = BindingTable::new();
        table.push_scope();
        table.declare(local("x").at(Span::line(1))).unwrap();
        let err = table.declare(local("x").at(Span::line(2))).unwrap_err();
        assert!(
            matches!(err, LifetimeError::DuplicateBinding { ref name, first, .. } if name == "x" && first.line == 1),
            "got: {:?}",
            err
        );
    }

    #[test]
    fn shadowing_in_inner_scope_is_allowed() {
        let mut table = BindingTable::new();
        table.push_scope();
        let outer = table.declare(local("x")).unwrap();
        let inner_scope = table.push_scope();
        let inner = table.declare(local("x")).unwrap();
        assert_eq!(table.resolve("x"), Some(inner));
        table.end_scope(inner_scope);
        assert_eq!(table.resolve("x"), Some(outer));
        assert_eq!(table.get(inner).state, BindingState::OutOfScope);
    }

    #[test]
    fn end_scope_returns_bindings_newest_first() {
        let mut table = BindingTable::new();
        let scope = table.push_scope();
        let a = table.declare(local("a")).unwrap();
        let b = table.declare(local("b")).unwrap();
        assert_eq!(table.end_scope(scope), vec![b, a]);
        assert_eq!(table.depth(), 0);
    }

    #[test]
    fn reassign_requires_mutable_binding() {
        let mut table = BindingTable::new();
        table.push_scope();
        let x = table.declare(local("x")).unwrap();
        table.initialize(x, vec![]);
        let err = table.reassign(x, vec![]).unwrap_err();
        assert!(matches!(err, LifetimeError::ImmutableBinding { .. }));

        let y = table.declare(local("y").mutable(true)).unwrap();
        table.initialize(y, vec![]);
        assert!(table.reassign(y, vec![DepId(3)]).is_ok());
        assert_eq!(table.lookup(y).2, Some(&[DepId(3)][..]));
    }

    #[test]
    fn reassign_rejects_escapable_binding() {
        let mut table = BindingTable::new();
        table.push_scope();
        let a = table
            .declare(Declaration::local("a", Type::escapable("Array"), true).mutable(true))
            .unwrap();
        table.initialize(a, vec![]);
        assert!(table.reassign(a, vec![]).is_err());
    }

    #[test]
    fn inout_parameters_are_mutable() {
        let decl = Declaration::parameter("p", Type::nonescapable("Span"), false, Convention::Mutating);
        assert!(decl.mutable);
        let decl = Declaration::parameter("q", Type::nonescapable("Span"), false, Convention::Borrowing);
        assert!(!decl.mutable);
    }

    #[test]
    fn declare_in_targets_enclosing_scope() {
        let mut table = BindingTable::new();
        let outer = table.push_scope();
        let stmt = table.push_scope();
        let x = table.declare_in(outer, local("x")).unwrap();
        let tmp = table
            .declare(local("$tmp0").origin(Origin::Temporary))
            .unwrap();
        assert_eq!(table.end_scope(stmt), vec![tmp]);
        assert_eq!(table.resolve("x"), Some(x));
        assert_eq!(table.get(x).scope, outer);
    }

    #[test]
    fn temporaries_are_not_resolvable() {
        let mut table = BindingTable::new();
        table.push_scope();
        let tmp = table
            .declare(local("$tmp0").origin(Origin::Temporary))
            .unwrap();
        assert_eq!(table.resolve("$tmp0"), None);
        assert_eq!(table.display_name(tmp), "a temporary value");
        assert!(table.visible_names().is_empty());
    }

    #[test]
    fn lookup_never_mutates() {
        let mut table = BindingTable::new();
        table.push_scope();
        let x = table.declare(local("x")).unwrap();
        let before = table.get(x).state.clone();
        let _ = table.lookup(x);
        let _ = table.lookup(x);
        assert_eq!(table.get(x).state, before);
    }
}
