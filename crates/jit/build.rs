use std::{
    fs,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            walk(&path, files);
        } else {
            files.push(path);
        }
    }
}

/// Hash the sources deciding what the stencil tables look like, so upgrading the generator
/// invalidates tables it built before.
fn main() {
    let mut files = Vec::new();
    for dir in ["src", "../stencil/src"] {
        println!("cargo::rerun-if-changed={dir}");
        walk(Path::new(dir), &mut files);
    }
    files.sort();

    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(fs::read(&file).unwrap());
    }
    println!(
        "cargo::rustc-env=COPATCH_GENERATOR={}+{}",
        std::env::var("CARGO_PKG_VERSION").unwrap(),
        hex::encode(hasher.finalize())
    );
}
