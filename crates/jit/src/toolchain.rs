//! The LLVM tools stencils are compiled and inspected with.
use std::{
    path::Path,
    process::{Command, Output},
};

use regex::Regex;

use crate::BuildError;

/// LLVM major versions known to produce usable stencils.
pub const LLVM_VERSIONS: &[u32] = &[16, 17, 18, 19];

const READOBJ_ARGS: &[&str] = &[
    "--elf-output-style=JSON",
    "--expand-relocs",
    "--section-data",
    "--section-relocations",
    "--section-symbols",
    "--sections",
];

pub trait Toolchain: Sync {
    /// Compile with `clang`, the arguments include the output path.
    fn clang(&self, args: &[String]) -> Result<(), BuildError>;

    /// Disassembly of `object` with its relocations, if available.
    fn objdump(&self, object: &Path) -> Option<String>;

    /// The section listing of `object` as JSON.
    fn readobj(&self, object: &Path) -> Result<String, BuildError>;
}

/// LLVM tools found on the `PATH`.
#[derive(Clone, Debug)]
pub struct LlvmToolchain {
    clang: String,
    objdump: Option<String>,
    readobj: String,
}

fn run(tool: &str, args: &[String]) -> Result<Output, BuildError> {
    tracing::debug!("{tool} {}", args.join(" "));
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|source| BuildError::Spawn {
            tool: tool.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(BuildError::Tool {
            tool: tool.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}

/// The major version printed by `<tool> --version`.
pub fn parse_version(output: &str) -> Option<u32> {
    let re = Regex::new(r"version\s+(\d+)\.\d+\.\d+").ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

fn tool_version(tool: &str) -> Option<u32> {
    let output = Command::new(tool).arg("--version").output().ok()?;
    parse_version(&String::from_utf8_lossy(&output.stdout))
}

/// Find `tool` unversioned or suffixed with one of `versions`, newest first.
pub fn find_tool(tool: &str, versions: &[u32]) -> Result<String, BuildError> {
    if tool_version(tool).is_some_and(|x| versions.contains(&x)) {
        return Ok(tool.to_string());
    }
    let mut versions = versions.to_vec();
    versions.sort_unstable_by(|a, b| b.cmp(a));
    for version in versions {
        let path = format!("{tool}-{version}");
        if tool_version(&path) == Some(version) {
            return Ok(path);
        }
    }
    Err(BuildError::ToolNotFound(tool.to_string()))
}

impl LlvmToolchain {
    /// Locate the tools, `version` restricts the accepted LLVM versions to a single one.
    pub fn find(version: Option<u32>) -> Result<Self, BuildError> {
        let versions: Vec<u32> = match version {
            Some(version) => LLVM_VERSIONS
                .iter()
                .copied()
                .filter(|x| *x == version)
                .collect(),
            None => LLVM_VERSIONS.to_vec(),
        };
        let toolchain = LlvmToolchain {
            clang: find_tool("clang", &versions)?,
            objdump: find_tool("llvm-objdump", &versions).ok(),
            readobj: find_tool("llvm-readobj", &versions)?,
        };
        tracing::info!(
            clang = %toolchain.clang,
            readobj = %toolchain.readobj,
            objdump = toolchain.objdump.as_deref().unwrap_or("-"),
            "found llvm"
        );
        Ok(toolchain)
    }
}

impl Toolchain for LlvmToolchain {
    fn clang(&self, args: &[String]) -> Result<(), BuildError> {
        run(&self.clang, args)?;
        Ok(())
    }

    fn objdump(&self, object: &Path) -> Option<String> {
        let objdump = self.objdump.as_ref()?;
        let args = [
            "--disassemble".to_string(),
            "--reloc".to_string(),
            object.display().to_string(),
        ];
        match run(objdump, &args) {
            Ok(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Err(e) => {
                tracing::debug!("no disassembly: {e}");
                None
            }
        }
    }

    fn readobj(&self, object: &Path) -> Result<String, BuildError> {
        let mut args: Vec<String> = READOBJ_ARGS.iter().map(|x| x.to_string()).collect();
        args.push(object.display().to_string());
        let output = run(&self.readobj, &args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn versions() {
        assert_eq!(
            parse_version("Ubuntu clang version 18.1.3 (1ubuntu1)\nTarget: x86_64-pc-linux-gnu\n"),
            Some(18)
        );
        assert_eq!(
            parse_version("LLVM (http://llvm.org/):\n  LLVM version 16.0.6\n  Optimized build.\n"),
            Some(16)
        );
        assert_eq!(parse_version("gcc (GCC) 13.2.0"), None);
    }

    #[test]
    fn missing_tool() {
        assert!(matches!(
            find_tool("copatch-no-such-tool", LLVM_VERSIONS),
            Err(BuildError::ToolNotFound(_))
        ));
    }
}
