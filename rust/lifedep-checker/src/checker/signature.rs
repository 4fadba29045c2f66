//! Signature validation and dependency inference.
//!
//! Resolving a signature fixes, before any body is looked at, the ownership
//! convention of every parameter and of `self`, and the dependency sources
//! of every nonescapable position: the result and any `inout` parameter that
//! carries a `dependsOn` annotation.
//!
//! Inference rule for a nonescapable result without an annotation:
//!
//! - methods (and setters) depend on `self`;
//! - everything else depends on the unique parameter that is nonescapable,
//!   or non-bitwise-copyable with an explicit ownership modifier. Zero or
//!   several such parameters is an `AmbiguousDependency` error.

use crate::checker::conventions::{self, Convention, ResolvedConventions};
use crate::checker::dependency::{resolve_kind, AccessMode, DependencyKind};
use crate::checker::error::LifetimeError;
use crate::checker::ir::{DependsOn, DependsOnTarget, Module, Param, Signature};
use crate::diagnostics::suggest_similar;

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, trace};

/// Which value a resolved dependency points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DependencySource {
    Param { index: usize, name: String },
    SelfValue,
    Immortal,
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencySource::Param { name, .. } => write!(f, "{}", name),
            DependencySource::SelfValue => write!(f, "self"),
            DependencySource::Immortal => write!(f, "immortal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResolvedDependency {
    pub source: DependencySource,
    pub kind: DependencyKind,
    pub access: Option<AccessMode>,
    /// `scoped` was written on the annotation.
    pub scoped_requested: bool,
    pub convention: Option<Convention>,
}

impl fmt::Display for ResolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.access {
            Some(access) => write!(f, "{} {} ({})", self.kind, self.source, access),
            None => write!(f, "{} {}", self.kind, self.source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSignature {
    pub name: String,
    pub conventions: ResolvedConventions,
    /// `None` when the result is escapable.
    pub result: Option<Vec<ResolvedDependency>>,
    /// Per parameter: the dependency its new value takes on (`inout`
    /// nonescapable parameters with a `dependsOn` annotation only).
    pub params: Vec<Option<Vec<ResolvedDependency>>>,
    /// The result dependency came from the inference rule.
    pub inferred: bool,
}

// ── Resolution ──────────────────────────────────────────────────────

/// Validate `sig` and resolve every convention and dependency in it.
pub fn resolve_signature(sig: &Signature) -> Result<ResolvedSignature, Vec<LifetimeError>> {
    let conventions = conventions::resolve_signature(sig)?;
    let mut errors = Vec::new();
    let env = &sig.escapable_generics;

    let (result, inferred) = if sig.result.is_escapable_in(env) {
        if sig.result_depends_on.is_some() {
            debug!(function = %sig.name, "ignoring dependsOn on escapable result");
        }
        (None, false)
    } else {
        match sig.result_depends_on.as_ref().filter(|d| !d.targets.is_empty()) {
            Some(annotation) => (
                Some(resolve_annotation(sig, &conventions, annotation, &mut errors)),
                false,
            ),
            None => (infer_result(sig, &conventions, &mut errors), true),
        }
    };

    let params = sig
        .params
        .iter()
        .zip(&conventions.params)
        .map(|(param, convention)| {
            resolve_param_position(sig, &conventions, param, *convention, &mut errors)
        })
        .collect();

    if errors.is_empty() {
        trace!(function = %sig.name, ?result, "signature resolved");
        Ok(ResolvedSignature {
            name: sig.name.clone(),
            conventions,
            result,
            params,
            inferred,
        })
    } else {
        Err(errors)
    }
}

fn resolve_param_position(
    sig: &Signature,
    conventions: &ResolvedConventions,
    param: &Param,
    convention: Convention,
    errors: &mut Vec<LifetimeError>,
) -> Option<Vec<ResolvedDependency>> {
    let annotation = param.depends_on.as_ref()?;
    if param.ty.is_escapable_in(&sig.escapable_generics) {
        debug!(function = %sig.name, param = %param.name, "ignoring dependsOn on escapable parameter");
        return None;
    }
    if convention != Convention::Mutating {
        errors.push(LifetimeError::ImmutableBinding {
            name: param.name.clone(),
            reason: "only 'inout' parameters can take on a new dependency",
            span: annotation.span,
        });
        return None;
    }
    Some(resolve_annotation(sig, conventions, annotation, errors))
}

fn resolve_annotation(
    sig: &Signature,
    conventions: &ResolvedConventions,
    annotation: &DependsOn,
    errors: &mut Vec<LifetimeError>,
) -> Vec<ResolvedDependency> {
    let mut resolved: Vec<ResolvedDependency> = Vec::new();
    for target in &annotation.targets {
        let dep = match target {
            DependsOnTarget::Immortal => Ok(immortal()),
            DependsOnTarget::Param { name, scoped } => match sig.find_param(name) {
                Some((index, param)) => resolve_source(
                    sig,
                    DependencySource::Param {
                        index,
                        name: name.clone(),
                    },
                    conventions.params[index],
                    param.ty.is_escapable_in(&sig.escapable_generics),
                    *scoped,
                ),
                None => {
                    let names: Vec<&str> = sig.params.iter().map(|p| p.name.as_str()).collect();
                    Err(LifetimeError::UnresolvedName {
                        what: "parameter",
                        name: name.clone(),
                        similar: suggest_similar(name, &names, 2),
                        span: annotation.span,
                    })
                }
            },
            DependsOnTarget::SelfValue { scoped } => {
                match (conventions.self_convention, sig.self_type.as_ref()) {
                    (Some(convention), Some(self_ty)) => resolve_source(
                        sig,
                        DependencySource::SelfValue,
                        convention,
                        self_ty.is_escapable_in(&sig.escapable_generics),
                        *scoped,
                    ),
                    _ => Err(LifetimeError::UnresolvedName {
                        what: "parameter",
                        name: "self".to_string(),
                        similar: Vec::new(),
                        span: annotation.span,
                    }),
                }
            }
        };
        match dep {
            Ok(dep) => {
                if !resolved.iter().any(|r| r.source == dep.source) {
                    resolved.push(dep);
                }
            }
            Err(e) => errors.push(e.at(annotation.span)),
        }
    }
    resolved
}

fn resolve_source(
    sig: &Signature,
    source: DependencySource,
    convention: Convention,
    escapable: bool,
    scoped: bool,
) -> Result<ResolvedDependency, LifetimeError> {
    let resolution = resolve_kind(convention, escapable, scoped, &source.to_string())
        .map_err(|e| e.at(sig.span))?;
    Ok(ResolvedDependency {
        source,
        kind: resolution.kind,
        access: resolution.access,
        scoped_requested: scoped,
        convention: Some(convention),
    })
}

fn immortal() -> ResolvedDependency {
    ResolvedDependency {
        source: DependencySource::Immortal,
        kind: DependencyKind::Immortal,
        access: None,
        scoped_requested: false,
        convention: None,
    }
}

/// Parameters the inference rule may pick as the result's source.
pub fn inference_candidates(sig: &Signature) -> Vec<usize> {
    sig.params
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            !p.ty.is_escapable_in(&sig.escapable_generics)
                || (!p.ty.bitwise_copyable && p.modifier.is_some())
        })
        .map(|(i, _)| i)
        .collect()
}

fn infer_result(
    sig: &Signature,
    conventions: &ResolvedConventions,
    errors: &mut Vec<LifetimeError>,
) -> Option<Vec<ResolvedDependency>> {
    if let (Some(convention), Some(self_ty)) = (conventions.self_convention, sig.self_type.as_ref())
    {
        let escapable = self_ty.is_escapable_in(&sig.escapable_generics);
        return match resolve_source(sig, DependencySource::SelfValue, convention, escapable, false) {
            Ok(dep) => Some(vec![dep]),
            Err(e) => {
                errors.push(e);
                Some(Vec::new())
            }
        };
    }

    let candidates = inference_candidates(sig);
    match candidates.as_slice() {
        [index] => {
            let param = &sig.params[*index];
            let source = DependencySource::Param {
                index: *index,
                name: param.name.clone(),
            };
            let escapable = param.ty.is_escapable_in(&sig.escapable_generics);
            match resolve_source(sig, source, conventions.params[*index], escapable, false) {
                Ok(dep) => Some(vec![dep]),
                Err(e) => {
                    errors.push(e);
                    Some(Vec::new())
                }
            }
        }
        _ => {
            errors.push(LifetimeError::AmbiguousDependency {
                function: sig.name.clone(),
                position: "the result".to_string(),
                candidates: candidates
                    .iter()
                    .map(|i| sig.params[*i].name.clone())
                    .collect(),
                span: sig.span,
            });
            Some(Vec::new())
        }
    }
}

// ── Conformance ─────────────────────────────────────────────────────

/// Check that `witness` has the same resolved ownership and dependency
/// shape as the protocol `requirement` it implements.
pub fn check_conformance(requirement: &Signature, witness: &Signature) -> Vec<LifetimeError> {
    let mismatch = |detail: String| LifetimeError::ConformanceMismatch {
        requirement: requirement.name.clone(),
        witness: witness.name.clone(),
        detail,
        span: witness.span,
    };

    let (req, wit) = match (resolve_signature(requirement), resolve_signature(witness)) {
        (Ok(req), Ok(wit)) => (req, wit),
        (Err(errors), _) => return errors,
        // The witness reports its own signature errors when it is checked.
        (_, Err(_)) => return Vec::new(),
    };

    let mut errors = Vec::new();
    if requirement.params.len() != witness.params.len() {
        errors.push(mismatch(format!(
            "expected {} parameter(s), found {}",
            requirement.params.len(),
            witness.params.len()
        )));
        return errors;
    }
    if req.conventions.self_convention != wit.conventions.self_convention {
        errors.push(mismatch(format!(
            "'self' is {} but the requirement expects {}",
            describe_convention(wit.conventions.self_convention),
            describe_convention(req.conventions.self_convention)
        )));
    }
    for (index, (r, w)) in req
        .conventions
        .params
        .iter()
        .zip(&wit.conventions.params)
        .enumerate()
    {
        if r != w {
            errors.push(mismatch(format!(
                "parameter {} ('{}') is {} but the requirement expects {}",
                index + 1,
                witness.params[index].name,
                w,
                r
            )));
        }
    }
    if shape(&req.result) != shape(&wit.result) {
        errors.push(mismatch(format!(
            "result depends on {} but the requirement declares {}",
            describe_deps(&wit.result),
            describe_deps(&req.result)
        )));
    }
    for (index, (r, w)) in req.params.iter().zip(&wit.params).enumerate() {
        if shape(r) != shape(w) {
            errors.push(mismatch(format!(
                "parameter {} ('{}') depends on {} but the requirement declares {}",
                index + 1,
                witness.params[index].name,
                describe_deps(w),
                describe_deps(r)
            )));
        }
    }
    errors
}

/// Name-independent shape of a dependency list.
fn shape(
    deps: &Option<Vec<ResolvedDependency>>,
) -> Option<Vec<(Option<usize>, bool, DependencyKind, Option<AccessMode>)>> {
    deps.as_ref().map(|deps| {
        let mut shape: Vec<_> = deps
            .iter()
            .map(|d| match &d.source {
                DependencySource::Param { index, .. } => (Some(*index), false, d.kind, d.access),
                DependencySource::SelfValue => (None, true, d.kind, d.access),
                DependencySource::Immortal => (None, false, d.kind, d.access),
            })
            .collect();
        shape.sort_by_key(|(index, is_self, _, _)| (*index, *is_self));
        shape
    })
}

fn describe_convention(c: Option<Convention>) -> String {
    c.map_or_else(|| "absent".to_string(), |c| c.to_string())
}

fn describe_deps(deps: &Option<Vec<ResolvedDependency>>) -> String {
    match deps {
        None => "nothing".to_string(),
        Some(deps) if deps.is_empty() => "nothing".to_string(),
        Some(deps) => deps
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

// ── Module index ────────────────────────────────────────────────────

/// A declaration together with its resolved signature.
#[derive(Debug)]
pub struct IndexEntry<'m> {
    pub decl_index: usize,
    pub signature: &'m Signature,
    pub resolved: Result<ResolvedSignature, Vec<LifetimeError>>,
}

/// Resolved signatures of every declaration in a module, shared read-only
/// by all per-declaration analyses.
#[derive(Debug, Default)]
pub struct SignatureIndex<'m> {
    entries: HashMap<&'m str, IndexEntry<'m>>,
}

impl<'m> SignatureIndex<'m> {
    pub fn build(module: &'m Module) -> Self {
        let mut entries = HashMap::new();
        for (decl_index, decl) in module.functions.iter().enumerate() {
            entries.entry(decl.name()).or_insert_with(|| IndexEntry {
                decl_index,
                signature: &decl.signature,
                resolved: resolve_signature(&decl.signature),
            });
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry<'m>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<&'m str> {
        let mut names: Vec<&'m str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

// ── Tests ───────────────────────────────────────────────────────────
