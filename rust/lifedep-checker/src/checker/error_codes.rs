//! Stable codes for every diagnostic kind.
//!
//! Code ranges:
//!   E0001–E0099  Binding and access errors
//!   E0100–E0199  Signature errors
//!   E0200–E0299  Dependency errors
//!   E0300–E0399  Name and shape errors
//!   W0001–W0099  Warnings

use crate::checker::error::ErrorKind;
use strum::IntoEnumIterator;

pub fn error_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::DuplicateBindingError => "E0001",
        ErrorKind::ImmutableBindingError => "E0002",
        ErrorKind::UseAfterConsumeError => "E0003",
        ErrorKind::UninitializedUseError => "E0004",
        ErrorKind::ExclusivityViolationError => "E0005",

        ErrorKind::InvalidConventionError => "E0100",
        ErrorKind::IllegalConsumingDependencyError => "E0101",
        ErrorKind::AmbiguousDependencyError => "E0102",
        ErrorKind::ConformanceMismatchError => "E0103",

        ErrorKind::CopyOfEscapableError => "E0200",
        ErrorKind::CyclicDependencyError => "E0201",
        ErrorKind::DanglingDependencyError => "E0202",

        ErrorKind::UnresolvedNameError => "E0300",
        ErrorKind::ArgumentCountError => "E0301",

        ErrorKind::TransientImmortalWarning => "W0001",
    }
}

/// Short documentation for `code`, or `None` for an unknown code.
pub fn error_doc(code: &str) -> Option<&'static str> {
    let doc = match code {
        "E0001" => "A name was declared twice in the same scope. Rename one of the bindings or move it into a nested block.",
        "E0002" => "A binding that is not mutable was written. Declare it with 'var', or take the parameter 'inout' or 'consuming'.",
        "E0003" => "A value was used after ownership of it was given away. Copy it before consuming it, or borrow it instead.",
        "E0004" => "A binding was read before any value was assigned to it. Assign it on every path before the first use.",
        "E0005" => "Two accesses to the same value overlap and at least one of them writes. Finish using the dependent value before mutating its source.",

        "E0100" => "An ownership convention was violated. Non-escaping closures are always borrowed, and a borrowed parameter or 'self' cannot be consumed because the caller still owns it.",
        "E0101" => "A lifetime dependency targets a parameter that is consumed. A consumed escapable value cannot anchor an access scope, and a consumed value cannot be depended on with 'scoped'.",
        "E0102" => "A nonescapable result has no annotation and the inference rule found zero or several candidate sources. Add an explicit 'dependsOn(...)'.",
        "E0103" => "A declaration implementing a protocol requirement resolves to different conventions or dependencies than the requirement. Make the two signatures agree.",

        "E0200" => "A lifetime dependency was copied from a value of escapable type. Only nonescapable values carry a dependency that can be copied.",
        "E0201" => "Following copied dependencies did not reach a root. This indicates an internal inconsistency in the dependency graph.",
        "E0202" => "A value outlives the source it depends on, either because the source ended, was consumed, or is not a declared source of the function result.",

        "E0300" => "A binding, function, global or parameter name could not be found. Check the spelling against the suggestions.",
        "E0301" => "A call supplies a different number of arguments than the callee declares.",

        "W0001" => "An immortal value was composed from a global marked transient. Immortality of such values is not checked; verify the resource really lives for the whole program.",

        _ => return None,
    };
    Some(doc)
}

/// Every code with its documentation, in code order.
pub fn all_error_codes() -> Vec<(&'static str, &'static str)> {
    let mut codes: Vec<(&'static str, &'static str)> = ErrorKind::iter()
        .filter_map(|kind| {
            let code = error_code(kind);
            error_doc(code).map(|doc| (code, doc))
        })
        .collect();
    codes.sort_by_key(|(code, _)| *code);
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strum::EnumCount;

    #[test]
    fn codes_are_unique() {
        let codes: HashSet<&str> = ErrorKind::iter().map(error_code).collect();
        assert_eq!(codes.len(), ErrorKind::COUNT);
    }

    #[test]
    fn every_code_is_documented() {
        for kind in ErrorKind::iter() {
            assert!(error_doc(error_code(kind)).is_some(), "{} has no documentation", kind);
        }
        assert_eq!(all_error_codes().len(), ErrorKind::COUNT);
    }

    #[test]
    fn warnings_use_w_prefix() {
        for kind in ErrorKind::iter() {
            assert_eq!(kind.is_warning(), error_code(kind).starts_with('W'), "{}", kind);
        }
    }

    #[test]
    fn unknown_code() {
        assert_eq!(error_doc("E9999"), None);
    }
}
