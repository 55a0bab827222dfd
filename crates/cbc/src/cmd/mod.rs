use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use cbc_mux::{resolve_channel, SessionConfig};
use clap::{Args, Subcommand};

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod channels;
pub mod decode;
pub mod encode;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode one frame and print it.
    Encode(EncodeArgs),
    /// Decode a captured byte stream into frames.
    Decode(DecodeArgs),
    /// Show the channel table.
    Channels(ChannelsArgs),
    /// Send data on a channel through a serial device.
    Send(SendArgs),
    /// Read frames from a serial device and print them.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: &SessionConfig) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format, config),
        Command::Decode(args) => decode::run(args, format, config),
        Command::Channels(args) => channels::run(args, format, config),
        Command::Send(args) => send::run(args, format, config),
        Command::Listen(args) => listen::run(args, format, config),
        Command::Version(args) => version::run(args),
    }
}

/// Accept a channel number or name (`dlt`, `cbc-raw3`, `19`).
pub fn parse_channel(value: &str) -> Result<usize, String> {
    resolve_channel(value)
        .map(|info| info.id)
        .ok_or_else(|| format!("unknown channel: {value}"))
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// String payload.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Hex payload (whitespace ignored).
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
}

impl PayloadArgs {
    /// The payload bytes; stdin when no source flag is given.
    pub fn resolve(&self) -> CliResult<Vec<u8>> {
        if let Some(data) = &self.data {
            return Ok(data.as_bytes().to_vec());
        }
        if let Some(text) = &self.hex {
            return decode_hex(text);
        }
        if let Some(path) = &self.file {
            return fs::read(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
        }
        let mut input = Vec::new();
        std::io::stdin()
            .read_to_end(&mut input)
            .map_err(|err| io_error("failed reading stdin", err))?;
        Ok(input)
    }
}

pub fn decode_hex(text: &str) -> CliResult<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    hex::decode(compact).map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex: {err}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Channel number or name.
    #[arg(long, short = 'c', value_parser = parse_channel)]
    pub channel: usize,
    /// Frame priority (default: the channel's configured priority).
    #[arg(long, short = 'p', value_parser = clap::value_parser!(u8).range(0..=7))]
    pub priority: Option<u8>,
    /// Sequence counter to stamp.
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=3))]
    pub sequence: u8,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub input: PayloadArgs,
    /// Only show these channels (comma-separated numbers or names).
    #[arg(long, value_delimiter = ',', value_parser = parse_channel)]
    pub channels: Option<Vec<usize>>,
    /// Fail when the stream contained corrupt or incomplete frames.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug, Default)]
pub struct ChannelsArgs {}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Serial device path.
    pub device: PathBuf,
    /// Channel number or name.
    #[arg(long, short = 'c', value_parser = parse_channel)]
    pub channel: usize,
    /// Override the channel priority for this send.
    #[arg(long, short = 'p', value_parser = clap::value_parser!(u8).range(0..=7))]
    pub priority: Option<u8>,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Split data over several frames instead of truncating it to one.
    #[arg(long)]
    pub split: bool,
    /// Line speed.
    #[arg(long, default_value_t = cbc_transport::DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Treat the device as a plain file (append frames, no termios setup).
    #[arg(long)]
    pub no_tty: bool,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Serial device path.
    pub device: PathBuf,
    /// Filter to specific channels (comma-separated numbers or names).
    #[arg(long, value_delimiter = ',', value_parser = parse_channel)]
    pub channels: Option<Vec<usize>>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up after this long (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Line speed.
    #[arg(long, default_value_t = cbc_transport::DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Treat the device as a plain file and stop at end of file.
    #[arg(long)]
    pub no_tty: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
