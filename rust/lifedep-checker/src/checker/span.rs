use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location placeholder carried through the IR.
///
/// The checker never reads source text; spans come from whatever front end
/// produced the IR and are only used to order and locate diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the start in the source
    #[serde(default)]
    pub start: usize,
    /// Byte offset of the end (exclusive) in the source
    #[serde(default)]
    pub end: usize,
    /// 1-based line number
    #[serde(default)]
    pub line: usize,
    /// 1-based column number
    #[serde(default)]
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { start, end, line, col }
    }

    /// Span pointing at the start of `line`. Handy for hand-built IR.
    pub fn line(line: usize) -> Self {
        Self { start: 0, end: 0, line, col: 1 }
    }

    pub fn dummy() -> Self {
        Self::default()
    }

    pub fn is_dummy(&self) -> bool {
        self.line == 0
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
            col: if self.line <= other.line { self.col } else { other.col },
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dummy() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}", self.line, self.col)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_earliest_line() {
        let a = Span::new(10, 12, 3, 5);
        let b = Span::new(2, 4, 1, 7);
        let m = a.merge(b);
        assert_eq!(m.start, 2);
        assert_eq!(m.end, 12);
        assert_eq!(m.line, 1);
        assert_eq!(m.col, 7);
    }

    #[test]
    fn dummy_display() {
        assert_eq!(Span::dummy().to_string(), "<unknown>");
        assert_eq!(Span::line(4).to_string(), "4:1");
    }
}
