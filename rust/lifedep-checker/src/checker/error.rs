//! Ownership and lifetime-dependency errors.

use crate::checker::span::Span;
use serde::Serialize;
use strum::{Display, EnumCount, EnumIter};
use thiserror::Error;

/// Stable classification of every diagnostic the checker can emit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Display,
    EnumIter,
    EnumCount,
)]
pub enum ErrorKind {
    DuplicateBindingError,
    ImmutableBindingError,
    InvalidConventionError,
    CopyOfEscapableError,
    IllegalConsumingDependencyError,
    AmbiguousDependencyError,
    CyclicDependencyError,
    DanglingDependencyError,
    UseAfterConsumeError,
    ExclusivityViolationError,
    UnresolvedNameError,
    UninitializedUseError,
    ArgumentCountError,
    ConformanceMismatchError,
    TransientImmortalWarning,
}

impl ErrorKind {
    pub fn is_warning(self) -> bool {
        matches!(self, ErrorKind::TransientImmortalWarning)
    }
}

/// Why a scoped dependency stopped being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// The source went out of scope.
    OutOfScope,
    /// The source was consumed.
    Consumed,
    /// The source was written while a borrowing dependency was held.
    Written,
    /// The source was accessed while a mutating dependency was held.
    Accessed,
}

impl Invalidation {
    pub fn describe(self) -> &'static str {
        match self {
            Invalidation::OutOfScope => "went out of scope",
            Invalidation::Consumed => "was consumed",
            Invalidation::Written => "was mutated",
            Invalidation::Accessed => "was accessed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifetimeError {
    #[error("'{name}' is already declared in this scope (first declared at {first})")]
    DuplicateBinding { name: String, first: Span, span: Span },

    #[error("cannot assign to '{name}': {reason}")]
    ImmutableBinding {
        name: String,
        reason: &'static str,
        span: Span,
    },

    #[error("'consuming' cannot be applied to parameter '{param}': {reason}")]
    InvalidConvention {
        param: String,
        reason: &'static str,
        span: Span,
    },

    #[error("cannot consume '{name}': it is borrowed and the caller still owns it")]
    ConsumeOfBorrowed { name: String, span: Span },

    #[error("cannot copy a lifetime dependency from '{source_name}': values of escapable type '{ty}' carry no dependency")]
    CopyOfEscapable {
        source_name: String,
        ty: String,
        span: Span,
    },

    #[error("dependency on consumed '{source_name}' {reason}")]
    IllegalConsumingDependency {
        source_name: String,
        reason: &'static str,
        span: Span,
    },

    #[error("cannot infer the lifetime dependency of {position} in '{function}': {}", candidates_text(.candidates))]
    AmbiguousDependency {
        function: String,
        position: String,
        candidates: Vec<String>,
        span: Span,
    },

    #[error("lifetime dependency chain of '{dependent}' is cyclic")]
    CyclicDependency { dependent: String, span: Span },

    /// `dependent` is rendered as given, so binding names arrive quoted.
    #[error("{dependent} depends on '{source_name}', which {reason}")]
    DanglingDependency {
        dependent: String,
        source_name: String,
        reason: String,
        span: Span,
    },

    #[error("'{name}' used after being consumed at {consumed_at}")]
    UseAfterConsume {
        name: String,
        consumed_at: Span,
        span: Span,
    },

    #[error("overlapping access to '{name}': {detail}")]
    ExclusivityViolation {
        name: String,
        detail: String,
        span: Span,
    },

    #[error("cannot find {what} '{name}' in scope")]
    UnresolvedName {
        what: &'static str,
        name: String,
        similar: Vec<String>,
        span: Span,
    },

    #[error("'{name}' used before being initialized")]
    UninitializedUse { name: String, span: Span },

    #[error("'{callee}' expects {expected} argument(s) but {found} were supplied")]
    ArgumentCount {
        callee: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("'{witness}' does not match requirement '{requirement}': {detail}")]
    ConformanceMismatch {
        requirement: String,
        witness: String,
        detail: String,
        span: Span,
    },

    #[error("immortal value composed from transient global '{global}'")]
    TransientImmortal { global: String, span: Span },
}

fn candidates_text(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "no parameter qualifies as a dependency source".to_string()
    } else {
        let quoted: Vec<String> = candidates.iter().map(|c| format!("'{}'", c)).collect();
        format!("candidates are {}", quoted.join(", "))
    }
}

impl LifetimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifetimeError::DuplicateBinding { .. } => ErrorKind::DuplicateBindingError,
            LifetimeError::ImmutableBinding { .. } => ErrorKind::ImmutableBindingError,
            LifetimeError::InvalidConvention { .. } | LifetimeError::ConsumeOfBorrowed { .. } => {
                ErrorKind::InvalidConventionError
            }
            LifetimeError::CopyOfEscapable { .. } => ErrorKind::CopyOfEscapableError,
            LifetimeError::IllegalConsumingDependency { .. } => {
                ErrorKind::IllegalConsumingDependencyError
            }
            LifetimeError::AmbiguousDependency { .. } => ErrorKind::AmbiguousDependencyError,
            LifetimeError::CyclicDependency { .. } => ErrorKind::CyclicDependencyError,
            LifetimeError::DanglingDependency { .. } => ErrorKind::DanglingDependencyError,
            LifetimeError::UseAfterConsume { .. } => ErrorKind::UseAfterConsumeError,
            LifetimeError::ExclusivityViolation { .. } => ErrorKind::ExclusivityViolationError,
            LifetimeError::UnresolvedName { .. } => ErrorKind::UnresolvedNameError,
            LifetimeError::UninitializedUse { .. } => ErrorKind::UninitializedUseError,
            LifetimeError::ArgumentCount { .. } => ErrorKind::ArgumentCountError,
            LifetimeError::ConformanceMismatch { .. } => ErrorKind::ConformanceMismatchError,
            LifetimeError::TransientImmortal { .. } => ErrorKind::TransientImmortalWarning,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            LifetimeError::DuplicateBinding { span, .. }
            | LifetimeError::ImmutableBinding { span, .. }
            | LifetimeError::InvalidConvention { span, .. }
            | LifetimeError::ConsumeOfBorrowed { span, .. }
            | LifetimeError::CopyOfEscapable { span, .. }
            | LifetimeError::IllegalConsumingDependency { span, .. }
            | LifetimeError::AmbiguousDependency { span, .. }
            | LifetimeError::CyclicDependency { span, .. }
            | LifetimeError::DanglingDependency { span, .. }
            | LifetimeError::UseAfterConsume { span, .. }
            | LifetimeError::ExclusivityViolation { span, .. }
            | LifetimeError::UnresolvedName { span, .. }
            | LifetimeError::UninitializedUse { span, .. }
            | LifetimeError::ArgumentCount { span, .. }
            | LifetimeError::ConformanceMismatch { span, .. }
            | LifetimeError::TransientImmortal { span, .. } => *span,
        }
    }

    /// Attach a span to an error raised by a component that had none.
    pub fn at(mut self, at: Span) -> Self {
        match &mut self {
            LifetimeError::DuplicateBinding { span, .. }
            | LifetimeError::ImmutableBinding { span, .. }
            | LifetimeError::InvalidConvention { span, .. }
            | LifetimeError::ConsumeOfBorrowed { span, .. }
            | LifetimeError::CopyOfEscapable { span, .. }
            | LifetimeError::IllegalConsumingDependency { span, .. }
            | LifetimeError::AmbiguousDependency { span, .. }
            | LifetimeError::CyclicDependency { span, .. }
            | LifetimeError::DanglingDependency { span, .. }
            | LifetimeError::UseAfterConsume { span, .. }
            | LifetimeError::ExclusivityViolation { span, .. }
            | LifetimeError::UnresolvedName { span, .. }
            | LifetimeError::UninitializedUse { span, .. }
            | LifetimeError::ArgumentCount { span, .. }
            | LifetimeError::ConformanceMismatch { span, .. }
            | LifetimeError::TransientImmortal { span, .. } => {
                if span.is_dummy() {
                    *span = at;
                }
            }
        }
        self
    }

    /// Help lines shown under the diagnostic.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            LifetimeError::AmbiguousDependency { candidates, .. } => {
                if candidates.is_empty() {
                    vec!["annotate the result with 'dependsOn(immortal)' or add a source parameter".to_string()]
                } else {
                    candidates
                        .iter()
                        .map(|c| format!("add 'dependsOn({})' to pick a source", c))
                        .collect()
                }
            }
            LifetimeError::IllegalConsumingDependency { source_name, .. } => vec![format!(
                "take '{}' 'borrowing' instead, or depend on a different source",
                source_name
            )],
            LifetimeError::InvalidConvention { param, .. } => {
                vec![format!("remove 'consuming' from '{}'", param)]
            }
            LifetimeError::ConsumeOfBorrowed { name, .. } => {
                vec![format!("take '{}' 'consuming' to give up ownership, or copy it", name)]
            }
            LifetimeError::UseAfterConsume { name, .. } => {
                vec![format!("copy '{}' before consuming it, or borrow it instead", name)]
            }
            LifetimeError::DanglingDependency { source_name, .. } => vec![format!(
                "keep '{}' alive and unmodified until the last use of the dependent value",
                source_name
            )],
            LifetimeError::UnresolvedName { similar, .. } => similar
                .iter()
                .map(|s| format!("did you mean '{}'?", s))
                .collect(),
            LifetimeError::ImmutableBinding { name, .. } => {
                vec![format!("declare '{}' with 'var' to allow reassignment", name)]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::DanglingDependencyError.to_string(), "DanglingDependencyError");
        assert_eq!(ErrorKind::UseAfterConsumeError.to_string(), "UseAfterConsumeError");
    }

    #[test]
    fn only_transient_immortal_is_a_warning() {
        let warnings: Vec<ErrorKind> = ErrorKind::iter().filter(|k| k.is_warning()).collect();
        assert_eq!(warnings, vec![ErrorKind::TransientImmortalWarning]);
    }

    #[test]
    fn ambiguous_message_lists_candidates() {
        let err = LifetimeError::AmbiguousDependency {
            function: "g".into(),
            position: "the result".into(),
            candidates: vec!["a".into(), "b".into()],
            span: Span::dummy(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a', 'b'"), "got: {}", msg);
        assert_eq!(err.suggestions().len(), 2);
    }

    #[test]
    fn dangling_message_names_both_ends() {
        let err = LifetimeError::DanglingDependency {
            dependent: "'s'".into(),
            source_name: "arr".into(),
            reason: "went out of scope".into(),
            span: Span::line(4),
        };
        assert_eq!(err.to_string(), "'s' depends on 'arr', which went out of scope");
        assert_eq!(err.kind(), ErrorKind::DanglingDependencyError);
    }

    #[test]
    fn at_only_fills_missing_spans() {
        let err = LifetimeError::UninitializedUse {
            name: "x".into(),
            span: Span::line(3),
        };
        assert_eq!(err.at(Span::line(9)).span().line, 3);
        let err = LifetimeError::UninitializedUse {
            name: "x".into(),
            span: Span::dummy(),
        };
        assert_eq!(err.at(Span::line(9)).span().line, 9);
    }
}
