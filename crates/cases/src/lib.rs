//! Generator of interpreter dispatch code from instruction definitions.
use std::{fs, ops::Range, path::Path};

pub mod analysis;
pub mod cwriter;
pub mod emitter;
mod error;
pub mod executor;
pub mod parser;
pub mod stack;
pub mod tier1;

pub use error::{GenerateError, RewriteError, SyntaxError};
pub use stack::StackStyle;

pub const BEGIN_MARKER: &str = "// BEGIN BYTECODES //";
pub const END_MARKER: &str = "// END BYTECODES //";

/// Byte range of the definitions between the begin and end marker lines.
pub fn extract_bytecodes(text: &str) -> Result<Range<usize>, GenerateError> {
    let mut start = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        match start {
            None if trimmed == BEGIN_MARKER => start = Some(offset + line.len()),
            Some(start) if trimmed == END_MARKER => return Ok(start..offset),
            _ => {}
        }
        offset += line.len();
    }
    Err(GenerateError::MissingMarker(if start.is_none() {
        BEGIN_MARKER
    } else {
        END_MARKER
    }))
}

/// Generate the cases for the definitions in `text`, `filename` is used in diagnostics and
/// the generated header.
pub fn generate(text: &str, filename: &str, style: StackStyle) -> Result<String, GenerateError> {
    let region = extract_bytecodes(text)?;
    let defs = parser::parse_region(text, region, filename)?;
    let analysis = analysis::analyze(&defs)?;
    tracing::info!(
        instructions = defs.instructions.len(),
        supers = defs.supers.len(),
        families = defs.families.len(),
        "read definitions from {filename}"
    );

    let out = match style {
        StackStyle::Tier1 => tier1::write_tier1(&analysis, filename)?,
        StackStyle::Executor => executor::write_executor(&analysis, filename)?,
    };
    Ok(out)
}

/// Read `input`, generate its cases and write them to `output`.
pub fn generate_cases(input: &Path, output: &Path, style: StackStyle) -> Result<(), GenerateError> {
    let text = fs::read_to_string(input).map_err(|source| GenerateError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let filename = input.display().to_string();
    let out = generate(&text, &filename, style)?;
    fs::write(output, out).map_err(|source| GenerateError::Io {
        path: output.to_path_buf(),
        source,
    })?;
    tracing::info!("wrote {}", output.display());
    Ok(())
}
