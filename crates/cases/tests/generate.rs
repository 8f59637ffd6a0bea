use std::fs;

use copatch_cases::{GenerateError, StackStyle, generate_cases};

const BYTECODES: &str = "\
#include \"Python.h\"

// BEGIN BYTECODES //
inst(NOP) {
}

inst(POP_TOP, (value --)) {
    DECREF_INPUTS();
}

inst(RETURN_VALUE, (retval --)) {
    return retval;
}
// END BYTECODES //
";

#[test]
fn writes_both_styles() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bytecodes.c");
    fs::write(&input, BYTECODES).unwrap();

    let tier1 = dir.path().join("generated_cases.c.h");
    generate_cases(&input, &tier1, StackStyle::Tier1).unwrap();
    let tier1 = fs::read_to_string(tier1).unwrap();
    assert!(tier1.starts_with("// This file is generated by copatch cases\n"));
    assert!(tier1.contains(&input.display().to_string()));
    assert!(tier1.contains("        TARGET(POP_TOP) {\n"));
    assert_eq!(tier1.matches("DISPATCH();").count(), 2);

    let executor = dir.path().join("executor_cases.c.h");
    generate_cases(&input, &executor, StackStyle::Executor).unwrap();
    let executor = fs::read_to_string(executor).unwrap();
    let labels: Vec<_> = executor
        .lines()
        .filter(|x| x.starts_with("        case "))
        .collect();
    assert_eq!(
        labels,
        [
            "        case NOP: {",
            "        case POP_TOP: {",
            "        case RETURN_VALUE: {"
        ]
    );
    assert_eq!(executor.matches("break;").count(), 2);
}

#[test]
fn missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.c");
    let err = generate_cases(&input, &dir.path().join("out.h"), StackStyle::Tier1).unwrap_err();
    assert!(matches!(err, GenerateError::Io { path, .. } if path == input));
}

#[test]
fn failed_generation_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bytecodes.c");
    fs::write(&input, "// BEGIN BYTECODES //\ninst(A) { DEOPT_IF(); }\n// END BYTECODES //\n")
        .unwrap();
    let output = dir.path().join("out.h");
    assert!(generate_cases(&input, &output, StackStyle::Executor).is_err());
    assert!(!output.exists());
}
