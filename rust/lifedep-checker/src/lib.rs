//! Lifedep Checker
//!
//! Static ownership-convention and lifetime-dependency checking for
//! nonescapable values. Input is a [`Module`] of declarations in a small IR;
//! output is a set of resolved signatures and ordered [`Diagnostics`].

pub mod checker;
pub mod colors;
pub mod diagnostics;

pub use checker::ir::Module;
pub use checker::signature::{check_conformance, resolve_signature, ResolvedSignature};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};

use checker::error::LifetimeError;
use checker::ir::FunctionDecl;
use checker::propagate::{check_declaration, Context};
use checker::signature::SignatureIndex;
use diagnostics::{suggest_similar, DiagnosticSink};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, info_span};

// ── Check options ───────────────────────────────────────────────────

/// How `dependsOn(immortal)` claims are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImmortalMode {
    /// Immortal edges are accepted without inspection (default).
    #[default]
    Trusted,
    /// Additionally warn when an immortal value is built from a global
    /// marked transient. Never rejects a program `Trusted` accepts.
    Strict,
}

/// Options controlling a module check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    pub immortal_mode: ImmortalMode,
    /// Analyse declarations concurrently. Default: `true`.
    pub parallel: bool,
    /// Worker threads for parallel analysis. `None` uses the global pool.
    pub jobs: Option<usize>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            immortal_mode: ImmortalMode::default(),
            parallel: true,
            jobs: None,
        }
    }
}

impl CheckOptions {
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// Failures of the checking process itself. Findings about the analysed
/// program are never errors; they are [`Diagnostics`].
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid module: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// ── Reports ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionReport {
    pub name: String,
    pub decl_index: usize,
    /// `None` when the signature was rejected and the body was not analysed.
    pub signature: Option<ResolvedSignature>,
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReport {
    /// One entry per declaration, in declaration order.
    pub functions: Vec<FunctionReport>,
    pub diagnostics: Diagnostics,
}

impl ModuleReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionReport> {
        self.functions.iter().find(|f| f.name == name)
    }
}

// ── Entry points ────────────────────────────────────────────────────

/// Parse a module from its JSON form.
pub fn parse_module(json: &str) -> Result<Module, CheckError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_module(path: &Path) -> Result<Module, CheckError> {
    let text = std::fs::read_to_string(path).map_err(|source| CheckError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_module(&text)
}

/// Check every declaration and conformance of `module`.
///
/// Declarations are independent once signatures are resolved, so they are
/// analysed concurrently unless `options.parallel` is off. The result is the
/// same either way.
pub fn check_module(module: &Module, options: &CheckOptions) -> Result<ModuleReport, CheckError> {
    let span = info_span!(
        "check_module",
        functions = module.functions.len(),
        parallel = options.parallel
    );
    let _enter = span.enter();

    let index = SignatureIndex::build(module);
    let sink = DiagnosticSink::new();
    let ctx = Context {
        module,
        index: &index,
        options,
    };

    let functions = match options.jobs {
        Some(jobs) if options.parallel => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
            pool.install(|| check_all(ctx, &sink))
        }
        _ => check_all(ctx, &sink),
    };
    check_conformances(module, &sink);

    let diagnostics = sink.drain();
    info!(
        functions = functions.len(),
        errors = diagnostics.errors().count(),
        warnings = diagnostics.warnings().count(),
        "module checked"
    );
    Ok(ModuleReport {
        functions,
        diagnostics,
    })
}

/// Check a single declaration of `module` by name.
pub fn check_function(
    module: &Module,
    name: &str,
    options: &CheckOptions,
) -> Option<(FunctionReport, Diagnostics)> {
    let decl_index = module.functions.iter().position(|f| f.name() == name)?;
    let index = SignatureIndex::build(module);
    let sink = DiagnosticSink::new();
    let ctx = Context {
        module,
        index: &index,
        options,
    };
    let report = check_one(ctx, decl_index, &module.functions[decl_index], &sink);
    Some((report, sink.drain()))
}

fn check_all(ctx: Context<'_>, sink: &DiagnosticSink) -> Vec<FunctionReport> {
    let check = |(decl_index, decl): (usize, &FunctionDecl)| check_one(ctx, decl_index, decl, sink);
    if ctx.options.parallel {
        ctx.module.functions.par_iter().enumerate().map(check).collect()
    } else {
        ctx.module.functions.iter().enumerate().map(check).collect()
    }
}

fn check_one(
    ctx: Context<'_>,
    decl_index: usize,
    decl: &FunctionDecl,
    sink: &DiagnosticSink,
) -> FunctionReport {
    let span = info_span!("declaration", function = %decl.name(), decl_index);
    let _enter = span.enter();
    let result = check_declaration(ctx, decl);
    let warnings = result.errors.iter().filter(|e| e.kind().is_warning()).count();
    debug!(
        function = %decl.name(),
        errors = result.errors.len() - warnings,
        warnings,
        "declaration checked"
    );
    sink.report_all(&result.errors, decl.name(), decl_index);
    FunctionReport {
        name: decl.name().to_string(),
        decl_index,
        signature: result.signature,
        errors: result.errors.len() - warnings,
        warnings,
    }
}

/// Conformance diagnostics sort after every declaration's own.
fn check_conformances(module: &Module, sink: &DiagnosticSink) {
    let base = module.functions.len();
    for (i, conformance) in module.conformances.iter().enumerate() {
        let errors = match module.function(&conformance.witness) {
            Some(witness) => check_conformance(&conformance.requirement, &witness.signature),
            None => {
                let names: Vec<&str> = module.functions.iter().map(|f| f.name()).collect();
                vec![LifetimeError::UnresolvedName {
                    what: "function",
                    name: conformance.witness.clone(),
                    similar: suggest_similar(&conformance.witness, &names, 2),
                    span: conformance.requirement.span,
                }]
            }
        };
        sink.report_all(&errors, &conformance.witness, base + i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checker::error::ErrorKind;
    use checker::ir::{DependsOn, Param, Signature, Stmt, Type};

    fn module() -> Module {
        let span = Type::nonescapable("Span");
        Module::new()
            .with_function(FunctionDecl::new(
                Signature::function("g", span.clone())
                    .param(Param::new("a", Type::escapable("A")).borrowing())
                    .param(Param::new("b", Type::escapable("B")).borrowing()),
                vec![Stmt::use_("a")],
            ))
            .with_function(FunctionDecl::new(
                Signature::function("ok", span)
                    .param(Param::new("a", Type::escapable("A")).borrowing())
                    .returns_depending_on(DependsOn::on("a")),
                vec![],
            ))
    }

    #[test]
    fn options_default() {
        let options = CheckOptions::default();
        assert_eq!(options.immortal_mode, ImmortalMode::Trusted);
        assert!(options.parallel);
        assert_eq!(options.jobs, None);
    }

    #[test]
    fn options_from_json_fill_defaults() {
        let options: CheckOptions = serde_json::from_str(r#"{"immortal_mode": "strict"}"#).unwrap();
        assert_eq!(options.immortal_mode, ImmortalMode::Strict);
        assert!(options.parallel);
    }

    #[test]
    fn report_covers_every_declaration() {
        let report = check_module(&module(), &CheckOptions::default()).unwrap();
        assert_eq!(report.functions.len(), 2);
        assert!(report.function("g").unwrap().signature.is_none());
        assert!(report.function("ok").unwrap().signature.is_some());
        let kinds: Vec<ErrorKind> = report.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ErrorKind::AmbiguousDependencyError]);
        assert!(report.has_errors());
    }

    #[test]
    fn check_single_function() {
        let (report, diagnostics) = check_function(&module(), "ok", &CheckOptions::default()).unwrap();
        assert_eq!(report.decl_index, 1);
        assert!(diagnostics.is_empty());
        assert!(check_function(&module(), "missing", &CheckOptions::default()).is_none());
    }

    #[test]
    fn dedicated_pool() {
        let options = CheckOptions {
            jobs: Some(2),
            ..CheckOptions::default()
        };
        let report = check_module(&module(), &options).unwrap();
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn parse_error_is_a_check_error() {
        let err = parse_module("{ not json").unwrap_err();
        assert!(matches!(err, CheckError::Json(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_module(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, CheckError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
