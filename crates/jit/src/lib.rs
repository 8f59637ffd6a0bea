//! Building copy-and-patch stencils: compiling the template for every executor case with LLVM
//! and writing the resulting tables, skipped when nothing changed.
pub mod builder;
pub mod digest;
mod error;
pub mod targets;
pub mod toolchain;

pub use builder::{BuildStatus, Config, Reader, opnames};
pub use error::BuildError;
pub use targets::{Target, get_target};
pub use toolchain::{LlvmToolchain, Toolchain};
