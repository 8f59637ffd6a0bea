use std::{fmt, io, path::PathBuf};

use thiserror::Error;
use token::Span;

/// An error in the definition source, pointing at the offending token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{rendered}")]
pub struct SyntaxError {
    pub message: String,
    pub filename: String,
    /// 1-based.
    pub line: usize,
    /// 1-based.
    pub column: usize,
    /// The message with a snippet of the source line.
    pub rendered: String,
}

impl SyntaxError {
    pub fn new<M: fmt::Display>(src: &str, filename: &str, span: Span, message: M) -> Self {
        let message = message.to_string();
        let rendered =
            common::render::render_block(src, span.byte_range(), Some(filename), &message);
        SyntaxError {
            message,
            filename: filename.to_string(),
            line: span.line,
            column: span.column + 1,
            rendered,
        }
    }
}

/// A known macro used in a shape the rewriter can't handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("{instruction}:{line}: `{op}` expects {expected} argument(s), found {found}")]
    Arity {
        instruction: String,
        op: &'static str,
        expected: usize,
        found: usize,
        line: usize,
    },
    #[error("{instruction}:{line}: expected `(` after `{op}`")]
    MissingArguments {
        instruction: String,
        op: &'static str,
        line: usize,
    },
    #[error("{instruction}:{line}: expected `;` after `{op}(...)`")]
    MissingSemicolon {
        instruction: String,
        op: &'static str,
        line: usize,
    },
    #[error("{instruction}:{line}: the label of `ERROR_IF` must be an identifier")]
    InvalidLabel { instruction: String, line: usize },
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error("super-instruction `{sup}` uses unknown instruction `{name}`")]
    UnknownInstruction { sup: String, name: String },
    #[error("family `{family}` names unknown instruction `{member}`")]
    UnknownFamilyMember { family: String, member: String },
    #[error("instruction `{inst}` is a member of both `{first}` and `{second}`")]
    MultipleFamilies {
        inst: String,
        first: String,
        second: String,
    },
    #[error("missing `{0}` marker")]
    MissingMarker(&'static str),
    #[error("failed to access `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
