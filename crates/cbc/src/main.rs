mod capture;
mod cmd;
mod config;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use cbc_frame::Granularity;
use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "cbc", version, about = "CBC carrier board serial protocol tool")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "CBC_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    /// Session configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "CBC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Frame padding granularity in bytes (4, 8, 16 or 32).
    #[arg(long, value_name = "BYTES", value_parser = config::parse_granularity, global = true)]
    granularity: Option<Granularity>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit::USAGE
            } else {
                exit::SUCCESS
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = config::load(cli.config.as_deref(), cli.granularity)
        .and_then(|config| cmd::run(cli.command, format, &config));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
