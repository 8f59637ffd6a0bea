use crate::{Delimiter, LexError, Span, Token, TokenKind, tokenize_range};
use std::{cell::Cell, fmt, ops::Range};

/// A tokenized source with delimiters matched up.
pub struct TokenBuffer {
    tokens: Box<[Token]>,
    /// For every open or close delimiter the index of its partner.
    partner: Box<[usize]>,
    /// Span used when the cursor runs off the end of the buffer.
    eof: Span,
}

impl TokenBuffer {
    pub fn new(src: &str) -> Result<Self, LexError> {
        Self::from_range(src, 0..src.len())
    }

    /// Tokenize only `range` of `src`, keeping spans relative to all of `src`.
    pub fn from_range(src: &str, range: Range<usize>) -> Result<Self, LexError> {
        let tokens = tokenize_range(src, range.clone())?;
        let eof = match tokens.last() {
            Some(t) => Span {
                start: t.span.end,
                end: t.span.end,
                line: t.span.end_line,
                column: t.span.end_column,
                end_line: t.span.end_line,
                end_column: t.span.end_column,
            },
            None => Span {
                start: range.start,
                end: range.start,
                ..Span::default()
            },
        };
        Self::from_tokens(tokens, eof)
    }

    pub fn from_tokens(tokens: Vec<Token>, eof: Span) -> Result<Self, LexError> {
        let mut partner = vec![usize::MAX; tokens.len()];
        let mut stack: Vec<(usize, Delimiter)> = Vec::new();
        for (idx, t) in tokens.iter().enumerate() {
            match t.kind {
                TokenKind::Open(d) => stack.push((idx, d)),
                TokenKind::Close(d) => {
                    let Some((open, open_d)) = stack.pop() else {
                        return Err(LexError::Unmatched {
                            text: t.text.clone(),
                            span: t.span,
                        });
                    };
                    if open_d != d {
                        return Err(LexError::Mismatched {
                            expected: open_d.close(),
                            found: t.text.clone(),
                            span: t.span,
                        });
                    }
                    partner[open] = idx;
                    partner[idx] = open;
                }
                _ => {}
            }
        }
        if let Some((open, _)) = stack.pop() {
            return Err(LexError::Unmatched {
                text: tokens[open].text.clone(),
                span: tokens[open].span,
            });
        }

        Ok(TokenBuffer {
            tokens: tokens.into_boxed_slice(),
            partner: partner.into_boxed_slice(),
            eof,
        })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn as_slice(&self) -> TokenSlice<'_> {
        TokenSlice {
            buffer: self,
            cur: Cell::new(0),
            end: self.tokens.len(),
        }
    }
}

/// A cursor over part of a [`TokenBuffer`].
///
/// The cursor is advanced through a shared reference so parsers can take `&TokenSlice` and
/// backtrack by cloning and restoring. Comments and directives are skipped by every lookup
/// but remain reachable through [`TokenSlice::raw`].
#[derive(Clone)]
pub struct TokenSlice<'a> {
    buffer: &'a TokenBuffer,
    cur: Cell<usize>,
    end: usize,
}

impl<'a> TokenSlice<'a> {
    fn significant(&self) -> usize {
        let mut idx = self.cur.get();
        while idx < self.end && self.buffer.tokens[idx].is_trivia() {
            idx += 1;
        }
        idx
    }

    pub fn cur(&self) -> Option<&'a Token> {
        let idx = self.significant();
        if idx < self.end {
            Some(&self.buffer.tokens[idx])
        } else {
            None
        }
    }

    /// The `n`th significant token after the current one.
    pub fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        let slice = self.clone();
        for _ in 0..n {
            slice.advance_tree();
        }
        slice.cur()
    }

    pub fn format_cur<'b>(&'b self) -> FormatToken<'b> {
        FormatToken(self.cur())
    }

    pub fn advance(&self) {
        let idx = self.significant();
        self.cur.set((idx + 1).min(self.end));
    }

    /// Advance past the current token, or past the whole group if it opens one.
    pub fn advance_tree(&self) {
        if self.group().is_some() {
            self.advance_group();
        } else {
            self.advance();
        }
    }

    pub fn restore(&self, other: Self) {
        assert_eq!(self.end, other.end);
        self.cur.set(other.cur.get())
    }

    pub fn ident(&self) -> Option<&'a Token> {
        self.cur().filter(|t| t.kind == TokenKind::Ident)
    }

    pub fn punct(&self) -> Option<&'a Token> {
        self.cur().filter(|t| t.kind == TokenKind::Punct)
    }

    /// The delimiter and the contents of the group opened by the current token.
    pub fn group(&self) -> Option<(Delimiter, Self)> {
        let idx = self.significant();
        let t = self.buffer.tokens.get(idx).filter(|_| idx < self.end)?;
        let TokenKind::Open(d) = t.kind else {
            return None;
        };
        Some((
            d,
            TokenSlice {
                buffer: self.buffer,
                cur: Cell::new(idx + 1),
                end: self.buffer.partner[idx],
            },
        ))
    }

    pub fn advance_group(&self) {
        let idx = self.significant();
        let Some(TokenKind::Open(_)) = self.buffer.tokens.get(idx).map(|t| t.kind) else {
            panic!(
                "Tried to advance past a group, while the current token wasn't the start of a group"
            )
        };
        self.cur.set(self.buffer.partner[idx] + 1);
    }

    pub fn is_empty(&self) -> bool {
        self.significant() == self.end
    }

    /// Remaining tokens of the slice, comments and directives included.
    pub fn raw(&self) -> &'a [Token] {
        &self.buffer.tokens[self.cur.get()..self.end]
    }

    /// Span of the current token, or of the end of the slice.
    pub fn span(&self) -> Span {
        if let Some(t) = self.cur() {
            return t.span;
        }
        // The closing delimiter of the enclosing group, if any.
        match self.buffer.tokens.get(self.end) {
            Some(t) => t.span,
            None => self.buffer.eof,
        }
    }

    /// Span of the last token before the cursor.
    pub fn prev_span(&self) -> Span {
        self.buffer.tokens[..self.cur.get()]
            .iter()
            .rev()
            .find(|t| !t.is_trivia())
            .map(|t| t.span)
            .unwrap_or_else(|| self.span())
    }
}

pub struct FormatToken<'a>(Option<&'a Token>);

impl fmt::Display for FormatToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(t) => write!(f, "`{}`", t.text),
            None => write!(f, "eof"),
        }
    }
}
