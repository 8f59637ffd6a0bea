use std::{io, path::PathBuf, process::ExitStatus};

use stencil::ReadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unsupported target `{0}`")]
    UnknownTarget(String),
    #[error("can't find `{0}`, is LLVM installed?")]
    ToolNotFound(String),
    #[error("failed to run `{tool}`")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("`{tool}` exited with {status}:\n{stderr}")]
    Tool {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to read the stencils of `{opname}`")]
    Read {
        opname: String,
        #[source]
        source: ReadError,
    },
    #[error("`{}` not found, configure the build first", .0.display())]
    MissingPyconfig(PathBuf),
    #[error("failed to access `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> BuildError {
        let path = path.into();
        move |source| BuildError::Io { path, source }
    }
}
