//! Snapshot style test runner.
//!
//! A test case is a `.txt` file containing the input, a separator line and the expected output.
//! Running with `RESULTS=accept` fills in cases which have no expected output yet,
//! `RESULTS=overwrite` also replaces mismatching expectations.
use std::{
    panic::Location,
    path::{Path, PathBuf},
};

pub static SEPARATOR: &str = "----------";

/// Returns the directory containing the source file of the caller.
#[track_caller]
pub fn current_file_path() -> PathBuf {
    let workspace = env!("CARGO_MANIFEST_DIR")
        .strip_suffix("crates/common")
        .expect("common crate moved from the workspace layout");
    let file = Location::caller().file();
    Path::new(workspace)
        .join(file)
        .parent()
        .expect("source file without a parent directory")
        .canonicalize()
        .expect("failed to canonicalize test directory")
}

enum Update {
    Never,
    Accept,
    Overwrite,
}

struct TestCase {
    input: String,
    expected: Option<String>,
    path: PathBuf,
}

/// Run `f` on every test case under `path` and compare against the expected output.
///
/// Panics after all cases ran if any of them failed.
pub fn string_test_runner<F: Fn(&str) -> String>(path: &Path, f: F) {
    let mut cases = Vec::new();
    collect_cases(path, &mut cases);
    cases.sort_by(|a, b| a.path.cmp(&b.path));

    let update = match std::env::var("RESULTS").as_deref() {
        Ok("overwrite") => Update::Overwrite,
        Ok("accept") => Update::Accept,
        _ => Update::Never,
    };

    let mut failed = 0;
    for case in cases {
        let output = f(&case.input);
        let output = output.trim();

        let write = match case.expected.as_deref() {
            Some(expected) if expected == output => continue,
            Some(expected) => {
                println!("Test `{}` failed", case.path.display());
                println!("# Expected:\n{expected}");
                println!("# Got:\n{output}");
                matches!(update, Update::Overwrite)
            }
            None => {
                println!("Test `{}` had no results", case.path.display());
                println!("# Got:\n{output}");
                matches!(update, Update::Accept | Update::Overwrite)
            }
        };
        failed += 1;

        if write {
            std::fs::write(
                &case.path,
                format!("{}\n{SEPARATOR}\n{output}\n", case.input),
            )
            .unwrap();
        }
    }

    if failed != 0 {
        panic!("{failed} snapshot test(s) failed")
    }
}

fn collect_cases(dir: &Path, cases: &mut Vec<TestCase>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_cases(&path, cases);
            continue;
        }
        if path.extension().and_then(|x| x.to_str()) != Some("txt") {
            continue;
        }

        let source = std::fs::read_to_string(&path).unwrap();
        let (input, expected) = match source.find(SEPARATOR) {
            Some(sep) => (
                &source[..sep],
                Some(source[sep + SEPARATOR.len()..].trim().to_string()),
            ),
            None => (source.as_str(), None),
        };
        cases.push(TestCase {
            input: input.trim_end().to_string(),
            expected,
            path,
        })
    }
}

#[test]
fn test_current_file_dir() {
    assert!(
        current_file_path()
            .display()
            .to_string()
            .ends_with("/crates/common/src/test")
    );
}

#[test]
fn string_test_test() {
    string_test_runner(&current_file_path().join("string_tests"), |x| {
        x.lines()
            .map(|line| line.to_uppercase())
            .collect::<Vec<_>>()
            .join("\n")
    });
}
