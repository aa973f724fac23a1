//! bsc: The bscript compiler CLI.
//!
//! Usage:
//!   bsc [options] [path...]
//!
//! Directories are compiled as source roots, files as single modules named
//! after their file stem. Without paths, `bscript.json` in the current
//! directory (or the one given with `-p`) describes the build.

mod console;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use bscript_compiler::{Session, SessionError, SessionOptions, Toolchain};
use bscript_diagnostics::FatalError;
use bscript_options::{find_project_file, parse_config_file, ConfigError, ProjectConfig};
use clap::Parser as ClapParser;

use crate::console::ConsoleSink;

/// Output directory used when neither the command line nor the project names
/// one.
const DEFAULT_OUT_DIR: &str = "out";

#[derive(ClapParser, Debug)]
#[command(name = "bsc", version, about = "bscript - a concurrent bscript compiler")]
struct Cli {
    /// Source directories or `.bs` files to compile.
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to bscript.json, or a directory containing one.
    #[arg(short = 'p', long = "project")]
    project: Option<PathBuf>,

    /// Directory bytecode is written into.
    #[arg(long = "outDir", alias = "out-dir")]
    out_dir: Option<PathBuf>,

    /// Directory of modules compiled for reference only. Repeatable.
    #[arg(long = "import", value_name = "DIR")]
    imports: Vec<PathBuf>,

    /// Number of worker threads (0 runs everything on the main thread).
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Also write a `.bsa` assembly listing next to each `.bsc` file.
    #[arg(long = "emitAssembly", alias = "emit-assembly")]
    emit_assembly: bool,

    /// Treat warnings as errors.
    #[arg(long = "warningsAsErrors", alias = "warnings-as-errors")]
    warnings_as_errors: bool,

    /// List all files that are part of the compilation.
    #[arg(long = "listFiles", alias = "list-files")]
    list_files: bool,

    /// Enable colored diagnostics when stderr is a terminal.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pretty: bool,

    /// Log scheduling details (`-vv` for per-stage traces).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
enum CliError {
    #[error(transparent)]
    #[diagnostic(code(bsc::config))]
    Config(#[from] ConfigError),

    #[error("no project file found at '{}'", .0.display())]
    #[diagnostic(code(bsc::config), help("pass a directory containing bscript.json or the file itself"))]
    MissingProject(PathBuf),

    #[error("no input files found")]
    #[diagnostic(code(bsc::inputs), help("pass source directories or files, or run in a directory with bscript.json"))]
    NoInputs,

    #[error(transparent)]
    #[diagnostic(code(bsc::io))]
    Session(SessionError),

    #[error("compilation aborted: {0}")]
    #[diagnostic(code(bsc::fatal))]
    Fatal(#[from] FatalError),
}

impl From<SessionError> for CliError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Fatal(fatal) => CliError::Fatal(fatal),
            other => CliError::Session(other),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "bscript_compiler=debug,bscript_jobs=debug,info",
        _ => "trace",
    };
    // Diagnostics are printed by the console sink, not as log events.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true).with_thread_names(verbose > 1))
        .with(filter)
        .try_init();
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let start = Instant::now();
    let config = load_project(cli)?;

    let mut options = SessionOptions::from_compiler_options(&config.compiler_options());
    if let Some(workers) = cli.workers {
        options.workers = workers;
    }
    options.emit_assembly |= cli.emit_assembly;
    options.warnings_as_errors |= cli.warnings_as_errors;

    let out_dir = cli
        .out_dir
        .clone()
        .or_else(|| config.out_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));

    let color = cli.pretty && console::stderr_is_terminal();
    let sink = Arc::new(ConsoleSink::new(color));
    let mut session = Session::with_toolchain(options, Toolchain::default(), sink);

    let imports = config.imports.iter().flatten().map(PathBuf::from).chain(cli.imports.iter().cloned());
    for dir in imports {
        session.add_import_directory(&dir)?;
    }
    for dir in config.sources.iter().flatten() {
        session.add_source_directory(Path::new(dir), &out_dir)?;
    }
    for path in &cli.paths {
        if path.is_dir() {
            session.add_source_directory(path, &out_dir)?;
        } else {
            let root = path.parent().unwrap_or_else(|| Path::new(""));
            session.create_node(path, root, Some(&out_dir))?;
        }
    }
    if session.nodes().is_empty() {
        return Err(CliError::NoInputs);
    }

    if cli.list_files {
        for node in session.nodes() {
            println!("{}", node.file());
        }
    }

    let summary = session.drive_all_to_completion()?;
    tracing::debug!(progress = ?session.progress_counts(), "final node progress");
    if let Some(footer) = console::render_footer(summary.errors, start.elapsed().as_secs_f64(), color) {
        eprintln!("{footer}");
    }
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

/// The project named with `-p`, or `bscript.json` in the current directory
/// when no paths were given. Paths alone build without a project.
fn load_project(cli: &Cli) -> Result<ProjectConfig, CliError> {
    if let Some(project) = &cli.project {
        let file = find_project_file(project).ok_or_else(|| CliError::MissingProject(project.clone()))?;
        return Ok(parse_config_file(&file)?);
    }
    if cli.paths.is_empty() {
        if let Some(file) = find_project_file(Path::new(".")) {
            return Ok(parse_config_file(&file)?);
        }
    }
    Ok(ProjectConfig::default())
}
