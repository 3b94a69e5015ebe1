//! CLI surface (spec §6): `--once`, `--interval`, `--log-level`,
//! `--test-connection`, `--file`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "metacam",
    about = "Poll a drive folder for MetaCam packages, validate and process them, and record results to a tracking sheet",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Run a single poll/drain pass and exit instead of looping forever.
    #[arg(long = "once")]
    pub once: bool,

    /// Poll interval in seconds, overriding CHECK_INTERVAL.
    #[arg(long = "interval")]
    pub interval: Option<u64>,

    /// Log verbosity, overriding LOG_LEVEL (error, warn, info, debug, trace).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Verify drive and sheets connectivity, then exit 0 (reachable) or 1.
    #[arg(long = "test-connection")]
    pub test_connection: bool,

    /// Process a single local archive directly, skipping the drive monitor.
    #[arg(long = "file")]
    pub file: Option<PathBuf>,

    /// Path to a TOML configuration file, overriding the default search path.
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

/// Tracks which fields the user actually passed on the command line, so
/// `settings::resolve` can tell "CLI default value" apart from "CLI
/// value the user typed", the way the teacher's `CliSources` struct
/// disambiguates clap's implicit defaults from explicit ones.
#[derive(Debug, Default)]
pub struct CliSources {
    pub interval_from_cli: bool,
    pub log_level_from_cli: bool,
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let args = CliArgs::parse();
    let sources = CliSources {
        interval_from_cli: args.interval.is_some(),
        log_level_from_cli: args.log_level.is_some(),
    };
    (args, sources)
}
