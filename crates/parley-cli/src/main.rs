//! Parley CLI - Command-line interface for the Parley compiler and VM
//!
//! Input files hold JSON-serialized analyzed trees: either one
//! `SourceFile` or an array of them. All files named on the command line
//! form one compilation unit.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use parley_core::ast::SourceFile;
use parley_core::bytecode::disassemble_chunk;
use parley_core::{ExecutionResult, Module, ModuleCompiler, ParleyConfig, VirtualMachine};

/// Exit code for a runtime trap
const EXIT_TRAP: u8 = 1;

/// Exit code for compile errors or unreadable input
const EXIT_COMPILE: u8 = 2;

/// Environment variable holding a tracing filter
const LOG_ENV: &str = "PARLEY_LOG";

#[derive(Parser)]
#[command(name = "parley")]
#[command(version = parley_core::VERSION)]
#[command(about = "The Parley bytecode compiler and virtual machine", long_about = None)]
struct Cli {
    /// Log more (-v debug, -vv trace); overrides PARLEY_LOG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ./parley.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Name of the compiled module
    #[arg(long, global = true)]
    module: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a compilation unit
    Run {
        /// Analyzed source files (JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the elapsed execution time
        #[arg(long)]
        time: bool,

        /// Maximum call depth
        #[arg(long)]
        max_frames: Option<usize>,

        /// Trace every executed instruction (needs -vv)
        #[arg(long)]
        trace: bool,
    },

    /// Compile a compilation unit and print the bytecode of every chunk
    Disasm {
        /// Analyzed source files (JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Compile a compilation unit and report diagnostics
    Check {
        /// Analyzed source files (JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// One input file: a single source file or several
#[derive(Deserialize)]
#[serde(untagged)]
enum UnitFile {
    One(SourceFile),
    Many(Vec<SourceFile>),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(EXIT_COMPILE)
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(module) = cli.module {
        config.compiler.module_name = module;
    }

    match cli.command {
        Commands::Run {
            files,
            time,
            max_frames,
            trace,
        } => {
            if let Some(max_frames) = max_frames {
                config.vm.max_frames = max_frames;
            }
            if trace {
                config.vm.trace_execution = true;
            }
            run_unit(&config, &files, time)
        }
        Commands::Disasm { files } => disassemble_unit(&config, &files),
        Commands::Check { files } => check_unit(&config, &files),
    }
}

fn load_config(path: Option<&Path>) -> Result<ParleyConfig> {
    let config = match path {
        Some(path) => ParleyConfig::load(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read the working directory")?;
            ParleyConfig::discover(cwd)?
        }
    };
    debug!(?config, "loaded configuration");
    Ok(config)
}

fn load_unit(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        let unit: UnitFile = serde_json::from_str(&text)
            .with_context(|| format!("'{}' is not an analyzed source file", path.display()))?;
        match unit {
            UnitFile::One(file) => files.push(file),
            UnitFile::Many(many) => files.extend(many),
        }
    }
    Ok(files)
}

/// Compile the unit, printing diagnostics on failure
fn compile_unit(config: &ParleyConfig, paths: &[PathBuf]) -> Result<Option<Module>> {
    let files = load_unit(paths)?;
    match ModuleCompiler::new(config.compiler.clone()).compile(&files) {
        Ok(module) => Ok(Some(module)),
        Err(errors) => {
            for error in &errors {
                eprintln!("error: {error}");
            }
            eprintln!(
                "{} error{} in module '{}'",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                config.compiler.module_name
            );
            Ok(None)
        }
    }
}

fn run_unit(config: &ParleyConfig, paths: &[PathBuf], time: bool) -> Result<ExitCode> {
    let Some(module) = compile_unit(config, paths)? else {
        return Ok(ExitCode::from(EXIT_COMPILE));
    };

    let mut vm = VirtualMachine::new(module, config.vm.clone())?;
    match vm.execute() {
        ExecutionResult::Ok { value, elapsed } => {
            println!("{value}");
            if time {
                println!("elapsed: {elapsed:.3?}");
            }
            Ok(ExitCode::SUCCESS)
        }
        ExecutionResult::Error(message) => {
            eprintln!("runtime error: {message}");
            Ok(ExitCode::from(EXIT_TRAP))
        }
    }
}

fn disassemble_unit(config: &ParleyConfig, paths: &[PathBuf]) -> Result<ExitCode> {
    let Some(module) = compile_unit(config, paths)? else {
        return Ok(ExitCode::from(EXIT_COMPILE));
    };

    let mut chunks: Vec<_> = module
        .chunks
        .values()
        .chain(module.value_initializers.values())
        .collect();
    chunks.sort_by(|a, b| a.name.cmp(&b.name));
    for chunk in chunks {
        println!("{}", disassemble_chunk(chunk));
    }
    Ok(ExitCode::SUCCESS)
}

fn check_unit(config: &ParleyConfig, paths: &[PathBuf]) -> Result<ExitCode> {
    let Some(module) = compile_unit(config, paths)? else {
        return Ok(ExitCode::from(EXIT_COMPILE));
    };
    println!(
        "ok: module '{}', {} chunks, {} values",
        module.name,
        module.chunks.len(),
        module.value_initializers.len()
    );
    Ok(ExitCode::SUCCESS)
}
