//! Re-emission of C tokens with consistent indentation.
use token::{Delimiter, Token, TokenKind};

#[derive(Clone, Copy)]
struct Position {
    line: usize,
    end_column: usize,
}

/// Writes tokens and generated lines, keeping the intra-line spacing of the source but
/// indenting lines by brace and parenthesis depth.
pub struct CWriter {
    out: String,
    indents: Vec<usize>,
    last: Option<Position>,
    newline: bool,
}

fn is_label(txt: &str) -> bool {
    !txt.starts_with("pop_") && txt.trim_end().ends_with(':')
}

fn net(txt: &str, open: char, close: char) -> isize {
    txt.matches(open).count() as isize - txt.matches(close).count() as isize
}

impl CWriter {
    /// A writer whose lines start `indent` levels deep.
    pub fn new(indent: usize) -> Self {
        CWriter {
            out: String::new(),
            indents: (0..=indent).map(|x| x * 4).collect(),
            last: None,
            newline: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn indent(&self) -> usize {
        self.indents.last().copied().unwrap_or(0)
    }

    fn pad(&mut self, n: usize) {
        self.out.extend(std::iter::repeat_n(' ', n));
    }

    fn pop_indent(&mut self) {
        if self.indents.len() > 1 {
            self.indents.pop();
        }
    }

    fn push_paren_indent(&mut self) {
        let indent = self.indent();
        let offset = match self.last {
            Some(last) => {
                let offset = last.end_column.saturating_sub(1);
                if offset <= indent || offset > 40 {
                    indent + 4
                } else {
                    offset
                }
            }
            None => indent + 4,
        };
        self.indents.push(offset);
    }

    fn set_position(&mut self, tkn: &Token) {
        match self.last {
            Some(last) if last.line < tkn.span.line => {
                self.out.push('\n');
                self.pad(self.indent());
            }
            Some(last) => self.pad(tkn.span.column.saturating_sub(last.end_column)),
            None if self.newline => self.pad(self.indent()),
            None => {}
        }
        self.last = Some(Position {
            line: tkn.span.end_line,
            end_column: tkn.span.end_column,
        });
        self.newline = false;
    }

    /// Write `txt` where `tkn` would have been written.
    pub fn emit_at(&mut self, txt: &str, tkn: &Token) {
        self.set_position(tkn);
        self.out.push_str(txt);
    }

    /// Treat `tkn` as written, for tokens folded into replacement text.
    pub fn skip_to(&mut self, tkn: &Token) {
        if self.last.is_some() {
            self.last = Some(Position {
                line: tkn.span.end_line,
                end_column: tkn.span.end_column,
            });
        }
    }

    pub fn emit_token(&mut self, tkn: &Token) {
        match tkn.kind {
            TokenKind::Comment if tkn.text.contains('\n') => self.emit_multiline_comment(tkn),
            TokenKind::Directive => {
                // Directives always start in the first column.
                self.start_line();
                self.out.push_str(&tkn.text);
                self.out.push('\n');
                self.last = None;
            }
            TokenKind::Close(d) => {
                if matches!(d, Delimiter::Parenthesis | Delimiter::Brace) {
                    self.pop_indent();
                }
                self.set_position(tkn);
                self.out.push_str(&tkn.text);
            }
            TokenKind::Open(d) => {
                self.set_position(tkn);
                self.out.push_str(&tkn.text);
                match d {
                    Delimiter::Parenthesis => self.push_paren_indent(),
                    Delimiter::Brace => self.indents.push(self.indent() + 4),
                    Delimiter::Bracket => {}
                }
            }
            _ => {
                self.set_position(tkn);
                self.out.push_str(&tkn.text);
            }
        }
    }

    fn emit_multiline_comment(&mut self, tkn: &Token) {
        self.set_position(tkn);
        for (idx, line) in tkn.text.split_inclusive('\n').enumerate() {
            let text = line.trim_start();
            if idx != 0 {
                let spaces = self.indent() + if text.starts_with('*') { 1 } else { 3 };
                self.pad(spaces);
            }
            self.out.push_str(text);
        }
    }

    /// Write generated text, which may open or close parentheses and braces.
    pub fn emit_str(&mut self, txt: &str) {
        if net(txt, '(', ')') < 0 {
            self.pop_indent();
        }
        if net(txt, '{', '}') < 0 || is_label(txt) {
            self.pop_indent();
        }

        if self.newline && !txt.is_empty() {
            if !txt.starts_with('\n') {
                self.pad(self.indent());
            }
            self.newline = false;
        }
        self.out.push_str(txt);
        if txt.ends_with('\n') {
            self.newline = true;
            self.last = None;
        }

        if net(txt, '(', ')') > 0 {
            self.push_paren_indent();
        }
        if is_label(txt) || net(txt, '{', '}') > 0 {
            self.indents.push(self.indent() + 4);
        }
    }

    /// Write text verbatim, without indentation.
    pub fn emit_text(&mut self, txt: &str) {
        if txt.is_empty() {
            return;
        }
        self.out.push_str(txt);
        self.newline = txt.ends_with('\n');
        self.last = None;
    }

    /// Make sure the next output starts on a fresh line.
    pub fn start_line(&mut self) {
        if !self.newline {
            self.out.push('\n');
        }
        self.newline = true;
        self.last = None;
    }
}
