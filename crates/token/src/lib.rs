//! Lexing of C-like source text.
//!
//! The lexer keeps comments and preprocessor lines as tokens so that generated code can be
//! re-emitted with the layout of the source it came from.
mod buffer;
mod lexer;
mod span;
pub mod token;

pub use buffer::{FormatToken, TokenBuffer, TokenSlice};
pub use lexer::{Delimiter, Token, TokenKind, tokenize, tokenize_range};
pub use span::{Span, Spanned};
pub use token::{Lex, Peek};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character `{ch}`")]
    UnexpectedChar { ch: char, span: Span },
    #[error("unterminated {what}")]
    Unterminated { what: &'static str, span: Span },
    #[error("unmatched `{text}`")]
    Unmatched { text: String, span: Span },
    #[error("mismatched delimiter, expected `{expected}` found `{found}`")]
    Mismatched {
        expected: &'static str,
        found: String,
        span: Span,
    },
}

impl Spanned for LexError {
    fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::Unterminated { span, .. }
            | LexError::Unmatched { span, .. }
            | LexError::Mismatched { span, .. } => *span,
        }
    }
}
