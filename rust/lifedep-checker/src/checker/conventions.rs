//! Convention resolver: effective ownership convention of parameters and
//! `self`.
//!
//! Pure functions of a declaration: the same signature always resolves to the
//! same conventions.

use crate::checker::error::LifetimeError;
use crate::checker::ir::{DeclKind, Param, ParamModifier, SelfModifier, Signature};
use serde::Serialize;
use std::fmt;

/// How a value is passed into a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    Borrowing,
    Consuming,
    Mutating,
}

impl Convention {
    /// `true` when the callee gets exclusive (write) access for the duration
    /// of the call.
    pub fn is_exclusive(self) -> bool {
        self == Convention::Mutating
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Borrowing => write!(f, "borrowing"),
            Convention::Consuming => write!(f, "consuming"),
            Convention::Mutating => write!(f, "mutating"),
        }
    }
}

/// Resolved conventions of a whole signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConventions {
    /// One entry per parameter, in declaration order.
    pub params: Vec<Convention>,
    /// `None` for declarations without `self`.
    pub self_convention: Option<Convention>,
}

/// Effective convention of one parameter.
pub fn resolve_param(kind: DeclKind, param: &Param) -> Result<Convention, LifetimeError> {
    match param.modifier {
        Some(ParamModifier::Consuming) if param.ty.non_escaping_closure => {
            Err(LifetimeError::InvalidConvention {
                param: param.name.clone(),
                reason: "non-escaping closures are always borrowed",
                span: param.span,
            })
        }
        Some(ParamModifier::Consuming) => Ok(Convention::Consuming),
        Some(ParamModifier::Borrowing) => Ok(Convention::Borrowing),
        Some(ParamModifier::Inout) => Ok(Convention::Mutating),
        // A non-escaping closure argument is borrowed even where the
        // declaration context would default to consuming.
        None if param.ty.non_escaping_closure => Ok(Convention::Borrowing),
        None if kind.defaults_to_consuming() => Ok(Convention::Consuming),
        None => Ok(Convention::Borrowing),
    }
}

/// Effective convention of `self`, if the declaration has one.
pub fn resolve_self(sig: &Signature) -> Option<Convention> {
    match sig.kind {
        DeclKind::Method => Some(match sig.self_modifier {
            Some(SelfModifier::Consuming) => Convention::Consuming,
            Some(SelfModifier::Mutating) => Convention::Mutating,
            Some(SelfModifier::Borrowing) | None => Convention::Borrowing,
        }),
        // Setters always mutate the instance they are called on.
        DeclKind::Setter => Some(Convention::Mutating),
        DeclKind::Function | DeclKind::Initializer | DeclKind::Closure => None,
    }
}

/// Resolve every convention of `sig`, collecting all errors.
pub fn resolve_signature(sig: &Signature) -> Result<ResolvedConventions, Vec<LifetimeError>> {
    let mut params = Vec::with_capacity(sig.params.len());
    let mut errors = Vec::new();
    for param in &sig.params {
        match resolve_param(sig.kind, param) {
            Ok(c) => params.push(c),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(ResolvedConventions {
            params,
            self_convention: resolve_self(sig),
        })
    } else {
        Err(errors)
    }
}
