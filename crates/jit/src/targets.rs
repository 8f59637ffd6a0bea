//! The hosts stencils can be built for.
use regex::RegexSet;
use stencil::ObjectFormat;

use crate::BuildError;

/// Code generation parameters of a host triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub triple: String,
    pub format: ObjectFormat,
    /// Alignment of the code of every stencil.
    pub alignment: usize,
    /// Prefix the platform adds to C symbol names.
    pub prefix: &'static str,
    /// The `-mcmodel` to compile with.
    pub model: &'static str,
}

struct Pattern {
    pattern: &'static str,
    format: ObjectFormat,
    alignment: usize,
    prefix: &'static str,
    model: &'static str,
}

const TARGETS: &[Pattern] = &[
    Pattern {
        pattern: r"aarch64-apple-darwin.*",
        format: ObjectFormat::MachO,
        alignment: 8,
        prefix: "_",
        model: "large",
    },
    Pattern {
        pattern: r"aarch64-.*-linux-gnu",
        format: ObjectFormat::Elf,
        alignment: 8,
        prefix: "",
        model: "large",
    },
    Pattern {
        pattern: r"i686-pc-windows-msvc",
        format: ObjectFormat::Coff,
        alignment: 1,
        prefix: "_",
        model: "medium",
    },
    Pattern {
        pattern: r"x86_64-apple-darwin.*",
        format: ObjectFormat::MachO,
        alignment: 1,
        prefix: "_",
        model: "large",
    },
    Pattern {
        pattern: r"x86_64-pc-windows-msvc",
        format: ObjectFormat::Coff,
        alignment: 1,
        prefix: "",
        model: "large",
    },
    Pattern {
        pattern: r"x86_64-.*-linux-gnu",
        format: ObjectFormat::Elf,
        alignment: 1,
        prefix: "",
        model: "large",
    },
];

/// The target for a host triple, the first matching pattern wins.
pub fn get_target(triple: &str) -> Result<Target, BuildError> {
    let set = RegexSet::new(TARGETS.iter().map(|x| format!("^(?:{})$", x.pattern)))?;
    let Some(idx) = set.matches(triple).iter().next() else {
        return Err(BuildError::UnknownTarget(triple.to_string()));
    };
    let pattern = &TARGETS[idx];
    Ok(Target {
        triple: triple.to_string(),
        format: pattern.format,
        alignment: pattern.alignment,
        prefix: pattern.prefix,
        model: pattern.model,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn triples() {
        let target = get_target("aarch64-apple-darwin23.4.0").unwrap();
        assert_eq!((target.format, target.alignment, target.prefix), (ObjectFormat::MachO, 8, "_"));

        let target = get_target("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!((target.format, target.alignment, target.prefix), (ObjectFormat::Elf, 1, ""));

        let target = get_target("i686-pc-windows-msvc").unwrap();
        assert_eq!((target.format, target.prefix), (ObjectFormat::Coff, "_"));

        assert!(matches!(
            get_target("x86_64-unknown-linux-musl"),
            Err(BuildError::UnknownTarget(_))
        ));
        assert!(get_target("xx86_64-pc-windows-msvc").is_err());
    }
}
