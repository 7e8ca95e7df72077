use anyhow::Result;
use clap::{ArgAction, Parser};
use colored::Colorize;
use spunge::config::{self, Options};
use spunge::RunReport;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "spunge")]
#[command(about = "Accumulate data and write to storage when complete", long_about = None)]
#[command(version)]
struct Cli {
    /// File to replace with the accumulated input
    #[arg(value_name = "TARGET")]
    targets: Vec<PathBuf>,

    /// Read input from this file instead of stdin
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Back up the target to this path ({file}, {dir} and {base} are expanded)
    #[arg(short, long, value_name = "TEMPLATE")]
    backup: Option<String>,

    /// Write atomically. Only needed with --memory
    #[arg(short, long)]
    atomic: bool,

    /// Accumulate data in memory
    #[arg(short, long)]
    memory: bool,

    /// Put the staging file in this directory. Must be on the target's filesystem
    #[arg(short, long, value_name = "TEMPLATE")]
    tmpdir: Option<String>,

    /// Keep staging files around when something goes wrong
    #[arg(short = 'd', long)]
    leave_dirty: bool,

    /// Load defaults from this TOML file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log more (repeat for more detail)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let verbose = cli.verbose > 0;

    match cmd_sponge(cli) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            if verbose {
                eprintln!("{} {:?}", "error:".red().bold(), err);
            } else {
                eprintln!("{} {}", "error:".red().bold(), err);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn cmd_sponge(cli: Cli) -> Result<RunReport> {
    // 1. Merge file defaults and validate before touching anything
    let options = Options {
        targets: cli.targets,
        input: cli.input,
        backup: cli.backup,
        tmpdir: cli.tmpdir,
        memory: cli.memory,
        atomic: cli.atomic,
        leave_dirty: cli.leave_dirty,
        default_mode: None,
        chunk_size: None,
    };
    let settings = config::load_settings(options, cli.config.as_deref())?;
    log::debug!(
        "Sponging into {} ({} mode)",
        settings.target.display(),
        settings.mode
    );

    // 2. Run
    Ok(spunge::run(&settings)?)
}
