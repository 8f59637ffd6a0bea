//! Rendering of source snippets for diagnostics.
use std::{fmt::Write, ops::Range};

const SNIPPET_SIZE: usize = 80;

/// A position in a source file, lines are 1-based and columns 0-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// Returns the line and column of a byte offset into `source`.
///
/// Offsets past the end of the source are clamped to the end.
pub fn location(source: &str, offset: usize) -> Location {
    let offset = offset.min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|x| x + 1).unwrap_or(0);
    Location {
        line,
        column: before[line_start..].chars().count(),
    }
}

/// Render an error message with the offending line and a caret marker underneath.
///
/// ```text
/// message
/// --> origin:3:5
///   |
/// 3 | inst(FOO, (a -- b) {
///   |     ^^^
/// ```
pub fn render_block(
    source: &str,
    range: Range<usize>,
    origin: Option<&str>,
    message: &str,
) -> String {
    let start = location(source, range.start);
    let end = location(source, range.end.max(range.start));

    let line = source.lines().nth(start.line - 1).unwrap_or("");
    let columns = if start.line != end.line || end.column <= start.column {
        1
    } else {
        end.column - start.column
    };

    let (snippet, offset, truncated_start, truncated_end) =
        extract_snippet(line, start.column, columns);

    let gutter = start.line.ilog10() as usize + 1;

    let mut buf = String::new();
    writeln!(buf, "{message}").unwrap();
    match origin {
        Some(origin) => writeln!(buf, "--> {origin}:{}:{}", start.line, start.column + 1),
        None => writeln!(buf, "--> {}:{}", start.line, start.column + 1),
    }
    .unwrap();
    writeln!(buf, "{:>gutter$} |", " ").unwrap();
    write!(buf, "{:>gutter$} | ", start.line).unwrap();

    let mut offset = offset;
    if truncated_start {
        buf.push_str("...");
        offset += 3;
    }
    buf.push_str(snippet);
    if truncated_end {
        buf.push_str("...");
    }
    buf.push('\n');

    write!(buf, "{:>gutter$} | ", " ").unwrap();
    buf.extend(std::iter::repeat_n(' ', offset));
    buf.extend(std::iter::repeat_n('^', columns.min(SNIPPET_SIZE)));
    buf.push('\n');
    buf
}

fn extract_snippet(line: &str, start_col: usize, columns: usize) -> (&str, usize, bool, bool) {
    let line_columns = line.chars().count();
    if line_columns < SNIPPET_SIZE {
        return (line, start_col, false, false);
    }

    if start_col + columns <= SNIPPET_SIZE {
        return (slice_chars(line, 0..SNIPPET_SIZE), start_col, false, true);
    }

    let around = SNIPPET_SIZE.saturating_sub(columns) / 2;
    let start = start_col.saturating_sub(around);
    let end = (start + SNIPPET_SIZE).min(line_columns);
    (
        slice_chars(line, start..end),
        start_col - start,
        start > 0,
        end < line_columns,
    )
}

fn slice_chars(line: &str, range: Range<usize>) -> &str {
    let mut indices = line.char_indices().map(|(idx, _)| idx).chain([line.len()]);
    let start = indices.by_ref().nth(range.start).unwrap_or(line.len());
    let end = if range.is_empty() {
        start
    } else {
        indices.nth(range.end - range.start - 1).unwrap_or(line.len())
    };
    &line[start..end]
}

fn floor_char_boundary(s: &str, mut offset: usize) -> usize {
    while !s.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn location_of_offsets() {
        let src = "ab\ncde\n\nf";
        assert_eq!(location(src, 0), Location { line: 1, column: 0 });
        assert_eq!(location(src, 4), Location { line: 2, column: 1 });
        assert_eq!(location(src, 8), Location { line: 4, column: 0 });
        assert_eq!(location(src, 100), Location { line: 4, column: 1 });
    }

    #[test]
    fn render_points_at_range() {
        let src = "inst(A) {}\nsupr(B) = A;\n";
        let rendered = render_block(src, 11..15, Some("bytecodes.c"), "Unexpected token");
        let expected = "Unexpected token\n--> bytecodes.c:2:1\n  |\n2 | supr(B) = A;\n  | ^^^^\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn render_truncates_long_lines() {
        let mut src = "x".repeat(200);
        src.push_str(" bad ");
        src.push_str(&"y".repeat(200));
        let rendered = render_block(&src, 201..204, None, "msg");
        let snippet_line = rendered.lines().nth(3).unwrap();
        assert!(snippet_line.contains("...x"));
        assert!(snippet_line.contains("bad"));
        assert!(snippet_line.ends_with("..."));
        let marker = rendered.lines().nth(4).unwrap();
        assert_eq!(marker.trim_end().matches('^').count(), 3);
    }
}
