use std::ops::Range;

/// Location of a token in its source text.
///
/// Lines are 1-based, columns are 0-based and counted in characters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Span {
    /// Returns the byte range in the source code for the span.
    pub fn byte_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Returns a span covering both spans, assuming `self` comes first.
    pub fn join(&self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end.max(self.end),
            line: self.line,
            column: self.column,
            end_line: other.end_line,
            end_column: other.end_column,
        }
    }
}

impl Spanned for Span {
    fn span(&self) -> Span {
        *self
    }
}

/// Trait for types which contain a span
pub trait Spanned {
    fn span(&self) -> Span;
}
