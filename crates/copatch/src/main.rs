use std::path::PathBuf;

use anyhow::{Context, Result};
use cases::StackStyle;
use clap::{Args, Parser, Subcommand, ValueEnum};
use jit::{BuildStatus, Config, LlvmToolchain, Reader};
use stencil::writer::OutputFormat;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

#[derive(Parser)]
#[command(name = "copatch", about = "Interpreter case generator and JIT stencil builder")]
struct Cli {
    /// Log every tool invocation.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the tier 1 interpreter cases.
    Cases(Generate),
    /// Generate the tier 2 executor cases.
    Executor(Generate),
    /// Compile the executor cases into JIT stencils.
    Stencils(Stencils),
}

#[derive(Args)]
struct Generate {
    /// The instruction definitions.
    #[arg(short, long, default_value = "Python/bytecodes.c")]
    input: PathBuf,
    /// Defaults to `Python/generated_cases.c.h` or `Python/executor_cases.c.h`.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReaderArg {
    Readobj,
    Native,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    C,
    Rust,
}

#[derive(Args)]
struct Stencils {
    /// Target triple to compile for.
    #[arg(env = "COPATCH_TRIPLE")]
    triple: String,
    /// Only use this LLVM major version.
    #[arg(long, env = "COPATCH_LLVM_VERSION")]
    llvm_version: Option<u32>,
    /// Root of the source tree.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Directory holding `pyconfig.h`, the root if unset.
    #[arg(long)]
    pyconfig_dir: Option<PathBuf>,
    #[arg(long, default_value = "Python/executor_cases.c.h")]
    executor_cases: PathBuf,
    #[arg(long, default_value = "Tools/jit/template.c")]
    template: PathBuf,
    #[arg(long, default_value = "Tools/jit/trampoline.c")]
    trampoline: PathBuf,
    #[arg(short, long, default_value = "Python/jit_stencils.h")]
    output: PathBuf,
    #[arg(long, value_enum, default_value = "readobj")]
    reader: ReaderArg,
    #[arg(long, value_enum, default_value = "c")]
    format: FormatArg,
    /// Compile the stencils with `_DEBUG` instead of `NDEBUG`.
    #[arg(long)]
    debug: bool,
    /// Concurrent compilations, the available parallelism if unset.
    #[arg(short, long)]
    jobs: Option<usize>,
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn generate(args: Generate, style: StackStyle) -> Result<()> {
    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(match style {
            StackStyle::Tier1 => "Python/generated_cases.c.h",
            StackStyle::Executor => "Python/executor_cases.c.h",
        })
    });
    cases::generate_cases(&args.input, &output, style)
        .with_context(|| format!("failed to generate cases from {}", args.input.display()))
}

fn stencils(args: Stencils) -> Result<()> {
    let target = jit::get_target(&args.triple)?;
    let root = args.root;
    let pyconfig = args.pyconfig_dir.unwrap_or_else(|| root.clone());
    let config = Config {
        target,
        executor_cases: root.join(args.executor_cases),
        template: root.join(args.template),
        trampoline: root.join(args.trampoline),
        pyconfig: pyconfig.join("pyconfig.h"),
        output: root.join(args.output),
        output_format: match args.format {
            FormatArg::C => OutputFormat::C,
            FormatArg::Rust => OutputFormat::Rust,
        },
        reader: match args.reader {
            ReaderArg::Readobj => Reader::Readobj,
            ReaderArg::Native => Reader::Native,
        },
        debug: args.debug,
        jobs: args.jobs,
        root,
    };
    if config.is_up_to_date()? {
        tracing::info!("{} is up to date", config.output.display());
        return Ok(());
    }
    let toolchain = LlvmToolchain::find(args.llvm_version).context("failed to find LLVM")?;
    let status = config
        .build(&toolchain)
        .with_context(|| format!("failed to build stencils for {}", args.triple))?;
    if let BuildStatus::Built { stencils } = status {
        tracing::info!("built {stencils} stencils");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Cases(args) => generate(args, StackStyle::Tier1),
        Command::Executor(args) => generate(args, StackStyle::Executor),
        Command::Stencils(args) => stencils(args),
    }
}
