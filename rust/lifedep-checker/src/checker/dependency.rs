//! Dependency graph: lifetime-dependency edges of one function body.
//!
//! Edges are stored in a flat arena and referenced by [`DepId`]. A copied
//! edge points at the parent edge it inherits from, so every dependency
//! forms a chain that ends in a *root*: a scoped access on some binding, the
//! immortal sentinel, or the caller-provided dependency of a parameter.
//!
//! ## Resolution table
//!
//! | convention            | source       | result                       |
//! |-----------------------|--------------|------------------------------|
//! | consuming             | nonescapable | copied (`scoped` is illegal) |
//! | borrowing / mutating  | nonescapable | copied, or scoped if asked   |
//! | borrowing / mutating  | escapable    | scoped                       |
//! | consuming             | escapable    | illegal                      |

use crate::checker::bindings::{BindingId, BindingTable};
use crate::checker::conventions::Convention;
use crate::checker::error::LifetimeError;
use crate::checker::span::Span;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DepId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Scoped,
    Copied,
    Immortal,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Scoped => write!(f, "scoped"),
            DependencyKind::Copied => write!(f, "copied"),
            DependencyKind::Immortal => write!(f, "immortal"),
        }
    }
}

/// Kind of access a scoped dependency holds open on its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Borrowing,
    Mutating,
}

impl AccessMode {
    pub fn from_convention(convention: Convention) -> Self {
        match convention {
            Convention::Mutating => AccessMode::Mutating,
            Convention::Borrowing | Convention::Consuming => AccessMode::Borrowing,
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Borrowing => write!(f, "borrowing"),
            AccessMode::Mutating => write!(f, "mutating"),
        }
    }
}

/// Who holds a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependent {
    Binding(BindingId, String),
    /// The returned value of the function being analysed.
    Result,
    /// An intermediate value not (yet) stored in a binding.
    Value,
}

impl fmt::Display for Dependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependent::Binding(_, name) => write!(f, "{}", name),
            Dependent::Result => write!(f, "the result"),
            Dependent::Value => write!(f, "a temporary value"),
        }
    }
}

/// Edge to insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Holds an access scope open on `source`.
    Scoped { source: BindingId, access: AccessMode },
    /// Inherits `parent`, which `source` currently holds.
    Copied { source: BindingId, parent: DepId },
    /// The dependency a nonescapable parameter arrives with.
    Caller { param: BindingId },
    Immortal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub kind: DependencyKind,
    /// `None` for immortal edges.
    pub source: Option<BindingId>,
    pub access: Option<AccessMode>,
    pub parent: Option<DepId>,
    pub dependent: Dependent,
}

/// Where a dependency chain ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Scoped { source: BindingId, access: AccessMode },
    Immortal,
    /// Bounded by whatever the caller passed for this parameter.
    Caller(BindingId),
}

impl RootKind {
    pub fn binding(&self) -> Option<BindingId> {
        match self {
            RootKind::Scoped { source, .. } => Some(*source),
            RootKind::Caller(param) => Some(*param),
            RootKind::Immortal => None,
        }
    }
}

/// Kind and access mode picked by the resolution table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub kind: DependencyKind,
    pub access: Option<AccessMode>,
}

/// Apply the resolution table to one dependency source.
pub fn resolve_kind(
    convention: Convention,
    source_escapable: bool,
    scoped_requested: bool,
    source_name: &str,
) -> Result<Resolution, LifetimeError> {
    match (convention, source_escapable) {
        (Convention::Consuming, true) => Err(LifetimeError::IllegalConsumingDependency {
            source_name: source_name.to_string(),
            reason: "is destroyed before any access scope could be established",
            span: Span::dummy(),
        }),
        (Convention::Consuming, false) if scoped_requested => {
            Err(LifetimeError::IllegalConsumingDependency {
                source_name: source_name.to_string(),
                reason: "cannot be scoped: the source is gone when the call completes",
                span: Span::dummy(),
            })
        }
        (Convention::Consuming, false) => Ok(Resolution {
            kind: DependencyKind::Copied,
            access: None,
        }),
        (_, false) if !scoped_requested => Ok(Resolution {
            kind: DependencyKind::Copied,
            access: None,
        }),
        (c, _) => Ok(Resolution {
            kind: DependencyKind::Scoped,
            access: Some(AccessMode::from_convention(c)),
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: Vec<Dependency>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge after validating it against the source binding.
    pub fn add_edge(
        &mut self,
        bindings: &BindingTable,
        dependent: Dependent,
        edge: Edge,
    ) -> Result<DepId, LifetimeError> {
        let dep = match edge {
            Edge::Scoped { source, access } => Dependency {
                kind: DependencyKind::Scoped,
                source: Some(source),
                access: Some(access),
                parent: None,
                dependent,
            },
            Edge::Copied { source, parent } => {
                let binding = bindings.get(source);
                if binding.escapable {
                    return Err(LifetimeError::CopyOfEscapable {
                        source_name: binding.name.clone(),
                        ty: binding.ty.name.clone(),
                        span: Span::dummy(),
                    });
                }
                Dependency {
                    kind: DependencyKind::Copied,
                    source: Some(source),
                    access: None,
                    parent: Some(parent),
                    dependent,
                }
            }
            Edge::Caller { param } => Dependency {
                kind: DependencyKind::Copied,
                source: Some(param),
                access: None,
                parent: None,
                dependent,
            },
            Edge::Immortal => Dependency {
                kind: DependencyKind::Immortal,
                source: None,
                access: None,
                parent: None,
                dependent,
            },
        };
        let id = DepId(self.edges.len());
        self.edges.push(dep);
        Ok(id)
    }

    /// Name the holder of an edge created for a then-anonymous value.
    pub fn relabel(&mut self, id: DepId, dependent: Dependent) {
        let dep = &mut self.edges[id.0];
        if dep.dependent == Dependent::Value {
            dep.dependent = dependent;
        }
    }

    pub fn get(&self, id: DepId) -> &Dependency {
        &self.edges[id.0]
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Follow copied edges to the root of `dep`'s chain.
    pub fn chain_root(&self, dep: DepId) -> Result<RootKind, LifetimeError> {
        self.walk(dep).map(|(root, _)| root)
    }

    /// Number of copied edges between `dep` and its root.
    pub fn chain_depth(&self, dep: DepId) -> Result<usize, LifetimeError> {
        self.walk(dep).map(|(_, steps)| steps)
    }

    /// Roots of a whole dependency set, deduplicated, in first-seen order.
    pub fn roots(&self, deps: &[DepId]) -> Result<Vec<RootKind>, LifetimeError> {
        let mut roots = Vec::new();
        for dep in deps {
            let root = self.chain_root(*dep)?;
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        Ok(roots)
    }

    fn walk(&self, start: DepId) -> Result<(RootKind, usize), LifetimeError> {
        let mut visited = HashSet::new();
        let mut current = start;
        let mut steps = 0;
        loop {
            if !visited.insert(current) {
                return Err(self.cyclic(start));
            }
            match self.step(current)? {
                Step::Root(root) => return Ok((root, steps)),
                Step::Parent(parent) => {
                    current = parent;
                    steps += 1;
                }
            }
        }
    }

    /// One link of a chain: either the root it ends in or the parent it
    /// inherits from.
    fn step(&self, id: DepId) -> Result<Step, LifetimeError> {
        let dep = &self.edges[id.0];
        let missing_source = || LifetimeError::CyclicDependency {
            dependent: dep.dependent.to_string(),
            span: Span::dummy(),
        };
        match (dep.kind, dep.parent) {
            (DependencyKind::Immortal, _) => Ok(Step::Root(RootKind::Immortal)),
            (DependencyKind::Scoped, _) => {
                let source = dep.source.ok_or_else(missing_source)?;
                let access = dep.access.unwrap_or(AccessMode::Borrowing);
                Ok(Step::Root(RootKind::Scoped { source, access }))
            }
            (DependencyKind::Copied, None) => {
                let param = dep.source.ok_or_else(missing_source)?;
                Ok(Step::Root(RootKind::Caller(param)))
            }
            (DependencyKind::Copied, Some(parent)) => Ok(Step::Parent(parent)),
        }
    }

    fn cyclic(&self, start: DepId) -> LifetimeError {
        LifetimeError::CyclicDependency {
            dependent: self.edges[start.0].dependent.to_string(),
            span: Span::dummy(),
        }
    }
}

enum Step {
    Root(RootKind),
    Parent(DepId),
}

/// Memoized chain roots for one graph. An edge's parent never changes once
/// inserted, so a root computed for an edge stays valid, and a chain is
/// walked only up to its first already-resolved ancestor.
#[derive(Debug, Clone, Default)]
pub struct RootCache {
    roots: HashMap<DepId, RootKind>,
}

impl RootCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain_root(
        &mut self,
        graph: &DependencyGraph,
        dep: DepId,
    ) -> Result<RootKind, LifetimeError> {
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        let mut current = dep;
        let root = loop {
            if let Some(root) = self.roots.get(&current) {
                break *root;
            }
            if !visited.insert(current) {
                return Err(graph.cyclic(dep));
            }
            path.push(current);
            match graph.step(current)? {
                Step::Root(root) => break root,
                Step::Parent(parent) => current = parent,
            }
        };
        for id in path {
            self.roots.insert(id, root);
        }
        Ok(root)
    }

    /// Roots of a dependency set, deduplicated, in first-seen order.
    pub fn roots(
        &mut self,
        graph: &DependencyGraph,
        deps: &[DepId],
    ) -> Result<Vec<RootKind>, LifetimeError> {
        let mut roots = Vec::new();
        for dep in deps {
            let root = self.chain_root(graph, *dep)?;
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        Ok(roots)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
