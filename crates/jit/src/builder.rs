//! Compiling the template once per opcode and writing the stencil tables.
use std::{
    collections::BTreeSet,
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use hashbrown::HashMap;
use rayon::prelude::*;
use regex::Regex;
use stencil::{StencilGroup, writer::OutputFormat};

use crate::{
    BuildError,
    digest::{GENERATOR, Inputs, compute_digest},
    targets::Target,
    toolchain::Toolchain,
};

/// How section listings are obtained from object files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reader {
    /// Parse the JSON output of `llvm-readobj`.
    #[default]
    Readobj,
    /// Parse ELF objects directly.
    Native,
}

/// Paths and options of a stencil build.
#[derive(Clone, Debug)]
pub struct Config {
    pub target: Target,
    /// Root of the source tree, include paths are relative to it.
    pub root: PathBuf,
    pub executor_cases: PathBuf,
    pub template: PathBuf,
    pub trampoline: PathBuf,
    pub pyconfig: PathBuf,
    pub output: PathBuf,
    pub output_format: OutputFormat,
    pub reader: Reader,
    pub debug: bool,
    /// Concurrent compilations, the available parallelism if unset.
    pub jobs: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStatus {
    /// The output was up to date.
    Cached,
    Built { stencils: usize },
}

/// Names of every `case NAME: {` in the executor cases, sorted.
pub fn opnames(executor_cases: &str) -> Result<Vec<String>, BuildError> {
    let re = Regex::new(r"\n {8}case (\w+): \{\n")?;
    let names: BTreeSet<_> = re
        .captures_iter(executor_cases)
        .filter_map(|x| x.get(1))
        .map(|x| x.as_str().to_string())
        .collect();
    Ok(names.into_iter().collect())
}

/// Expand tabs to columns of eight.
fn expand_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        if c == '\t' {
            let width = 8 - out.chars().count() % 8;
            out.extend(std::iter::repeat_n(' ', width));
        } else {
            out.push(c);
        }
    }
    out
}

fn disassembly_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| expand_tabs(line).trim().to_string())
        .collect()
}

/// The digest line the output starts with.
fn digest_line(digest: &str) -> String {
    format!("// {digest}\n")
}

fn is_cached(output: &Path, digest: &str) -> bool {
    let Ok(text) = fs::read_to_string(output) else {
        return false;
    };
    text.starts_with(&digest_line(digest))
}

impl Config {
    fn output_format_name(&self) -> &'static str {
        match self.output_format {
            OutputFormat::C => "c",
            OutputFormat::Rust => "rust",
        }
    }

    /// The arguments compiling `source` for `opname` into `object`.
    pub fn clang_args(&self, opname: &str, source: &Path, object: &Path) -> Vec<String> {
        let include = |path: &Path| format!("-I{}", path.display());
        let mut args = vec![
            format!("--target={}", self.target.triple),
            "-DPy_BUILD_CORE".to_string(),
            if self.debug { "-D_DEBUG" } else { "-DNDEBUG" }.to_string(),
            format!("-D_JIT_OPCODE={opname}"),
            "-D_PyJIT_ACTIVE".to_string(),
            "-D_Py_JIT".to_string(),
            "-I.".to_string(),
            include(&self.root.join("Include")),
            include(&self.root.join("Include").join("internal")),
            include(&self.root.join("Include").join("internal").join("mimalloc")),
            include(&self.root.join("Python")),
        ];
        if let Some(dir) = self.pyconfig.parent() {
            args.push(include(dir));
        }
        args.extend(
            [
                "-O3",
                "-c",
                "-fno-asynchronous-unwind-tables",
                "-fno-builtin",
                "-fno-jump-tables",
                "-fno-pic",
                "-fno-stack-protector",
            ]
            .map(String::from),
        );
        args.push(format!("-mcmodel={}", self.target.model));
        args.push("-o".to_string());
        args.push(object.display().to_string());
        args.push("-std=c11".to_string());
        args.push(source.display().to_string());
        args
    }

    fn compile(
        &self,
        toolchain: &dyn Toolchain,
        opname: &str,
        source: &Path,
        work: &Path,
    ) -> Result<StencilGroup, BuildError> {
        let object = work.join(format!("{opname}.o"));
        toolchain.clang(&self.clang_args(opname, source, &object))?;

        let read_error = |source| BuildError::Read {
            opname: opname.to_string(),
            source,
        };
        let target = &self.target;
        let mut group = match self.reader {
            Reader::Readobj => {
                let output = toolchain.readobj(&object)?;
                target
                    .format
                    .read_readobj(target.prefix, &output)
                    .map_err(read_error)?
            }
            Reader::Native => target
                .format
                .read_object(target.prefix, &object)
                .map_err(read_error)?,
        };
        if let Some(output) = toolchain.objdump(&object) {
            group.code.disassembly = disassembly_lines(&output);
        }
        group
            .process_relocations(target.alignment)
            .map_err(read_error)?;
        tracing::debug!(
            opname,
            code = group.code.body.len(),
            data = group.data.body.len(),
            "built stencil"
        );
        Ok(group)
    }

    fn build_stencils(
        &self,
        toolchain: &dyn Toolchain,
        opnames: &[String],
    ) -> Result<HashMap<String, StencilGroup>, BuildError> {
        let work = tempfile::tempdir().map_err(BuildError::io(std::env::temp_dir()))?;
        let mut jobs: Vec<(&str, &Path)> = vec![("trampoline", self.trampoline.as_path())];
        jobs.extend(opnames.iter().map(|x| (x.as_str(), self.template.as_path())));

        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = self.jobs {
            pool = pool.num_threads(threads);
        }
        let pool = pool.build()?;
        tracing::info!(
            stencils = jobs.len(),
            threads = pool.current_num_threads(),
            "compiling"
        );

        let groups = pool.install(|| {
            jobs.par_iter()
                .map(|(opname, source)| {
                    let group = self.compile(toolchain, opname, source, work.path())?;
                    Ok((opname.to_string(), group))
                })
                .collect::<Result<Vec<_>, BuildError>>()
        })?;
        Ok(groups.into_iter().collect())
    }

    fn digest(&self) -> Result<String, BuildError> {
        let templates = self.template.parent().unwrap_or(Path::new("."));
        let inputs = Inputs {
            executor_cases: &self.executor_cases,
            pyconfig: &self.pyconfig,
            templates,
            output_format: self.output_format_name(),
            generator: GENERATOR,
        };
        compute_digest(&self.target, &inputs)
    }

    /// Whether the output was built from the current inputs, no tool is run to find out.
    pub fn is_up_to_date(&self) -> Result<bool, BuildError> {
        Ok(is_cached(&self.output, &self.digest()?))
    }

    /// Build the stencils unless the output is up to date.
    ///
    /// The output is replaced only once every stencil is built.
    pub fn build(&self, toolchain: &dyn Toolchain) -> Result<BuildStatus, BuildError> {
        let digest = self.digest()?;
        if is_cached(&self.output, &digest) {
            tracing::info!("{} is up to date", self.output.display());
            return Ok(BuildStatus::Cached);
        }

        let cases =
            fs::read_to_string(&self.executor_cases).map_err(BuildError::io(&self.executor_cases))?;
        let opnames = opnames(&cases)?;
        let groups = self.build_stencils(toolchain, &opnames)?;

        let mut text = digest_line(&digest);
        text.push_str(&self.output_format.write(&groups));

        let dir = match self.output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(BuildError::io(dir))?;
        file.write_all(text.as_bytes())
            .map_err(BuildError::io(file.path()))?;
        file.persist(&self.output)
            .map_err(|e| BuildError::io(&self.output)(e.error))?;
        tracing::info!(
            stencils = groups.len(),
            "wrote {}",
            self.output.display()
        );
        Ok(BuildStatus::Built {
            stencils: groups.len(),
        })
    }
}
