//! Copy-and-patch stencils: reading compiled templates back out of object files, resolving
//! their relocations and writing them out as tables.
use std::{io, path::PathBuf};

use thiserror::Error;

pub mod hole;
pub mod reader;
pub mod schema;
pub mod stencil;
pub mod writer;

pub use hole::{Hole, HoleKind, HoleValue};
pub use reader::{Coff, Elf, Format, MachO, ObjectFormat, read_group, read_readobj};
pub use stencil::{Stencil, StencilGroup};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to parse readobj output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed readobj output: {0}")]
    MalformedOutput(String),
    #[error("unexpected section `{name}` of type `{kind}`")]
    UnexpectedSection { name: String, kind: String },
    #[error("relocation section `{0}` must link to a section and define no symbols")]
    InvalidRelocationSection(String),
    #[error("unsupported relocation {0}")]
    UnsupportedRelocation(String),
    #[error("relocations apply to unknown section {0}")]
    UnknownSection(usize),
    #[error("symbol `{0}` is defined twice")]
    DuplicateSymbol(String),
    #[error("section `{0}` has no data")]
    MissingSectionData(String),
    #[error("the entry point must be at the start of the code, found {0}")]
    BadEntry(String),
    #[error("hole at {offset:#x} is outside the body of {size:#x} bytes")]
    HoleOutOfBounds { offset: usize, size: usize },
    #[error("invalid object file: {0}")]
    Object(#[from] object::read::Error),
    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
