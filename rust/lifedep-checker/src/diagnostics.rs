//! Diagnostics: rendering, suggestions and the shared sink that analyses
//! report into.

use crate::checker::error::{ErrorKind, LifetimeError};
use crate::checker::error_codes::error_code;
use crate::checker::span::Span;
use crate::colors::{bold, cyan, red, yellow};

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One reported problem, tied to the declaration it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    /// Declaration the problem was found in.
    pub function: String,
    pub decl_index: usize,
    pub file: Option<String>,
    pub span: Span,
    pub suggestions: Vec<String>,
    /// Order of arrival within the declaration.
    #[serde(skip)]
    pub seq: usize,
}

impl Diagnostic {
    pub fn from_error(
        error: &LifetimeError,
        function: impl Into<String>,
        decl_index: usize,
        seq: usize,
    ) -> Self {
        let kind = error.kind();
        Self {
            severity: if kind.is_warning() {
                Severity::Warning
            } else {
                Severity::Error
            },
            code: error_code(kind),
            kind,
            message: error.to_string(),
            function: function.into(),
            decl_index,
            file: None,
            span: error.span(),
            suggestions: error.suggestions(),
            seq,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    fn location(&self) -> Option<String> {
        match (&self.file, self.span.is_dummy()) {
            (Some(file), false) => Some(format!("{}:{}:{}", file, self.span.line, self.span.col)),
            (Some(file), true) => Some(file.clone()),
            (None, false) => Some(format!("{}:{}", self.span.line, self.span.col)),
            (None, true) => None,
        }
    }

    fn sort_key(&self) -> (usize, usize, usize, usize) {
        (self.decl_index, self.span.line, self.span.col, self.seq)
    }

    /// Render with ANSI colors for terminal
    pub fn render_ansi(&self) -> String {
        let mut out = String::new();

        let severity_label = match self.severity {
            Severity::Error => red("error"),
            Severity::Warning => yellow("warning"),
        };
        out.push_str(&format!("{}[{}]: ", severity_label, bold(self.code)));
        out.push_str(&bold(&self.message));
        out.push('\n');

        if let Some(location) = self.location() {
            out.push_str(&format!("  {} {}\n", cyan("-->"), location));
        }
        out.push_str(&format!("   {} in '{}'\n", cyan("|"), self.function));

        if !self.suggestions.is_empty() {
            for suggestion in &self.suggestions {
                out.push_str(&format!("   {} {}: {}\n", cyan("="), cyan("help"), suggestion));
            }
        }

        out
    }

    /// Render without colors (for logs, tests)
    pub fn render_plain(&self) -> String {
        let mut out = String::new();

        let severity_label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        out.push_str(&format!("{}[{}]: {}\n", severity_label, self.code, self.message));

        if let Some(location) = self.location() {
            out.push_str(&format!("  --> {}\n", location));
        }
        out.push_str(&format!("   | in '{}'\n", self.function));

        for suggestion in &self.suggestions {
            out.push_str(&format!("   = help: {}\n", suggestion));
        }

        out
    }
}

// Edit distance for suggestions
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut row = vec![0; b_len + 1];
    for i in 1..=a_len {
        row[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            row[j] = (prev[j] + 1).min(row[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut row);
    }

    prev[b_len]
}

/// Up to three candidates within `max_distance` edits of `name`, closest
/// first.
pub fn suggest_similar(name: &str, candidates: &[&str], max_distance: usize) -> Vec<String> {
    let mut matches: Vec<(usize, String)> = candidates
        .iter()
        .filter(|c| **c != name)
        .filter_map(|c| {
            let d = edit_distance(name, c);
            if d <= max_distance {
                Some((d, c.to_string()))
            } else {
                None
            }
        })
        .collect();

    matches.sort();
    matches.dedup();
    matches.into_iter().map(|(_, s)| s).take(3).collect()
}

// ── Sink ────────────────────────────────────────────────────────────

/// Append-only collection point shared by concurrent analyses.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    items: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the errors of one declaration, numbered in arrival order.
    pub fn report_all(&self, errors: &[LifetimeError], function: &str, decl_index: usize) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.extend(
            errors
                .iter()
                .enumerate()
                .map(|(seq, e)| Diagnostic::from_error(e, function, decl_index, seq)),
        );
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything reported so far, in deterministic order.
    pub fn drain(&self) -> Diagnostics {
        let items = std::mem::take(&mut *self.items.lock().unwrap_or_else(PoisonError::into_inner));
        Diagnostics::new(items)
    }
}

/// Ordered, re-iterable diagnostics: by declaration, then position, then
/// arrival.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(mut items: Vec<Diagnostic>) -> Self {
        items.sort_by_key(Diagnostic::sort_key);
        Self { items }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn for_function<'d>(&'d self, function: &'d str) -> impl Iterator<Item = &'d Diagnostic> {
        self.items.iter().filter(move |d| d.function == function)
    }

    /// Set the file every diagnostic is reported against.
    pub fn with_file(self, file: &str) -> Self {
        Self {
            items: self.items.into_iter().map(|d| d.with_file(file)).collect(),
        }
    }

    pub fn render_plain(&self) -> String {
        self.items
            .iter()
            .map(Diagnostic::render_plain)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render_ansi(&self) -> String {
        self.items
            .iter()
            .map(Diagnostic::render_ansi)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<'d> IntoIterator for &'d Diagnostics {
    type Item = &'d Diagnostic;
    type IntoIter = std::slice::Iter<'d, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
