//! Content hash of everything a stencil build depends on.
use std::{
    fs,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

use crate::{BuildError, targets::Target};

/// Every file below `dir`, sorted by path.
fn walk(dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).map_err(BuildError::io(&dir))? {
            let path = entry.map_err(BuildError::io(&dir))?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn read(path: &Path) -> Result<Vec<u8>, BuildError> {
    fs::read(path).map_err(BuildError::io(path))
}

/// Version and source hash of this generator.
pub const GENERATOR: &str = env!("COPATCH_GENERATOR");

/// The inputs of a build besides the target.
#[derive(Clone, Debug)]
pub struct Inputs<'a> {
    pub executor_cases: &'a Path,
    pub pyconfig: &'a Path,
    /// Directory holding the templates.
    pub templates: &'a Path,
    /// Distinguishes output formats written from the same inputs.
    pub output_format: &'a str,
    /// The generator writing the output, [`GENERATOR`] outside of tests.
    pub generator: &'a str,
}

/// Hex SHA-256 over the target parameters and the contents of every input.
pub fn compute_digest(target: &Target, inputs: &Inputs<'_>) -> Result<String, BuildError> {
    if !inputs.pyconfig.exists() {
        return Err(BuildError::MissingPyconfig(inputs.pyconfig.to_path_buf()));
    }
    let mut hasher = Sha256::new();
    hasher.update(target.triple.as_bytes());
    hasher.update((target.alignment as u64).to_le_bytes());
    hasher.update(target.prefix.as_bytes());
    hasher.update(inputs.output_format.as_bytes());
    hasher.update(inputs.generator.as_bytes());
    hasher.update(read(inputs.executor_cases)?);
    hasher.update(read(inputs.pyconfig)?);
    for file in walk(inputs.templates)? {
        hasher.update(read(&file)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::targets::get_target;

    #[test]
    fn any_input_changes_the_digest() {
        let dir = tempfile::tempdir().unwrap();
        let cases = dir.path().join("executor_cases.c.h");
        let pyconfig = dir.path().join("pyconfig.h");
        let templates = dir.path().join("jit");
        fs::create_dir_all(templates.join("nested")).unwrap();
        fs::write(&cases, "case NOP: {}").unwrap();
        fs::write(&pyconfig, "#define X 1").unwrap();
        fs::write(templates.join("template.c"), "int x;").unwrap();
        fs::write(templates.join("nested/shim.h"), "int y;").unwrap();

        let target = get_target("x86_64-unknown-linux-gnu").unwrap();
        let inputs = Inputs {
            executor_cases: &cases,
            pyconfig: &pyconfig,
            templates: &templates,
            output_format: "c",
            generator: GENERATOR,
        };
        let digest = compute_digest(&target, &inputs).unwrap();
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, compute_digest(&target, &inputs).unwrap());

        let other = get_target("aarch64-unknown-linux-gnu").unwrap();
        assert_ne!(digest, compute_digest(&other, &inputs).unwrap());
        let rust = Inputs {
            output_format: "rust",
            ..inputs.clone()
        };
        assert_ne!(digest, compute_digest(&target, &rust).unwrap());
        let upgraded = Inputs {
            generator: "0.2.0+0000",
            ..inputs.clone()
        };
        assert_ne!(digest, compute_digest(&target, &upgraded).unwrap());

        fs::write(templates.join("nested/shim.h"), "int z;").unwrap();
        let changed = compute_digest(&target, &inputs).unwrap();
        assert_ne!(digest, changed);
        fs::write(&cases, "case NOP: { }").unwrap();
        assert_ne!(changed, compute_digest(&target, &inputs).unwrap());

        fs::remove_file(&pyconfig).unwrap();
        assert!(matches!(
            compute_digest(&target, &inputs),
            Err(BuildError::MissingPyconfig(_))
        ));
    }
}
