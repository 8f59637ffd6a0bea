use std::{fmt, ops::Range};

use crate::{LexError, Span, Spanned};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delimiter {
    Parenthesis,
    Bracket,
    Brace,
}

impl Delimiter {
    pub fn open(self) -> &'static str {
        match self {
            Delimiter::Parenthesis => "(",
            Delimiter::Bracket => "[",
            Delimiter::Brace => "{",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            Delimiter::Parenthesis => ")",
            Delimiter::Bracket => "]",
            Delimiter::Brace => "}",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Char,
    Comment,
    /// A preprocessor line, including continuation lines.
    Directive,
    Punct,
    Open(Delimiter),
    Close(Delimiter),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    /// Comments and preprocessor lines, tokens which carry no meaning for the parser.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Comment | TokenKind::Directive)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Spanned for Token {
    fn span(&self) -> Span {
        self.span
    }
}

// Longest first, the lexer takes the first match.
const PUNCTUATION: &[&str] = &[
    ">>=", "<<=", "...", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "##", "+", "-", "*", "/", "%", "&", "|", "^", "!",
    "~", "<", ">", "=", "?", ":", ";", ",", ".", "#",
];

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    end: usize,
    line: usize,
    column: usize,
    /// Only whitespace has been seen since the start of the current line.
    line_start: bool,
    tokens: Vec<Token>,
}

/// Split `src` into tokens.
pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    tokenize_range(src, 0..src.len())
}

/// Split the given byte range of `src` into tokens.
///
/// Spans stay relative to the whole of `src`, so diagnostics point at the right line.
pub fn tokenize_range(src: &str, range: Range<usize>) -> Result<Vec<Token>, LexError> {
    let before = &src[..range.start];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count())
        .unwrap_or(0);
    let mut lexer = Lexer {
        src,
        pos: range.start,
        end: range.end,
        line,
        column,
        line_start: before.rsplit('\n').next().is_none_or(|l| l.trim().is_empty()),
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..self.end]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
            self.line_start = true;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span_from(&self, start: (usize, usize, usize)) -> Span {
        Span {
            start: start.0,
            end: self.pos,
            line: start.1,
            column: start.2,
            end_line: self.line,
            end_column: self.column,
        }
    }

    fn push(&mut self, kind: TokenKind, start: (usize, usize, usize)) {
        let span = self.span_from(start);
        self.tokens.push(Token {
            kind,
            text: self.src[span.start..span.end].to_string(),
            span,
        });
        if kind != TokenKind::Comment {
            self.line_start = false;
        }
    }

    fn run(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }

            let start = (self.pos, self.line, self.column);
            match c {
                '/' if self.peek_nth(1) == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                    self.push(TokenKind::Comment, start);
                }
                '/' if self.peek_nth(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(LexError::Unterminated {
                                    what: "block comment",
                                    span: self.span_from(start),
                                });
                            }
                        }
                    }
                    self.push(TokenKind::Comment, start);
                }
                '#' if self.line_start => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                        if c == '\\' && self.peek() == Some('\n') {
                            self.bump();
                        }
                    }
                    self.push(TokenKind::Directive, start);
                }
                '"' => self.quoted('"', TokenKind::Str, start)?,
                '\'' => self.quoted('\'', TokenKind::Char, start)?,
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit())) =>
                {
                    self.number();
                    self.push(TokenKind::Number, start);
                }
                c if c.is_alphabetic() || c == '_' || c == '$' => {
                    while self
                        .peek()
                        .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
                    {
                        self.bump();
                    }
                    let ident = &self.src[start.0..self.pos];
                    // Encoding prefixes of string and character literals.
                    match (ident, self.peek()) {
                        ("L" | "u" | "U" | "u8", Some('"')) => {
                            self.quoted('"', TokenKind::Str, start)?
                        }
                        ("L" | "u" | "U" | "u8", Some('\'')) => {
                            self.quoted('\'', TokenKind::Char, start)?
                        }
                        _ => self.push(TokenKind::Ident, start),
                    }
                }
                '(' | '[' | '{' => {
                    self.bump();
                    self.push(TokenKind::Open(delimiter(c)), start);
                }
                ')' | ']' | '}' => {
                    self.bump();
                    self.push(TokenKind::Close(delimiter(c)), start);
                }
                _ => {
                    let Some(punct) = PUNCTUATION.iter().find(|p| self.rest().starts_with(**p))
                    else {
                        self.bump();
                        return Err(LexError::UnexpectedChar {
                            ch: c,
                            span: self.span_from(start),
                        });
                    };
                    for _ in 0..punct.len() {
                        self.bump();
                    }
                    self.push(TokenKind::Punct, start);
                }
            }
        }
        Ok(())
    }

    fn quoted(
        &mut self,
        quote: char,
        kind: TokenKind,
        start: (usize, usize, usize),
    ) -> Result<(), LexError> {
        // opening quote
        self.bump();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('\n') | None => {
                    return Err(LexError::Unterminated {
                        what: if quote == '"' {
                            "string literal"
                        } else {
                            "character literal"
                        },
                        span: self.span_from(start),
                    });
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        self.push(kind, start);
        Ok(())
    }

    fn number(&mut self) {
        let hex = matches!(self.rest().get(..2), Some("0x" | "0X"));
        while let Some(c) = self.peek() {
            let exponent = if hex {
                matches!(c, 'p' | 'P')
            } else {
                matches!(c, 'e' | 'E')
            };
            if exponent && matches!(self.peek_nth(1), Some('+' | '-')) {
                self.bump();
                self.bump();
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '\'' {
                self.bump();
            } else {
                break;
            }
        }
    }
}

fn delimiter(c: char) -> Delimiter {
    match c {
        '(' | ')' => Delimiter::Parenthesis,
        '[' | ']' => Delimiter::Bracket,
        _ => Delimiter::Brace,
    }
}
