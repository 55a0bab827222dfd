use cbc_mux::{CbcSession, SessionConfig};
use cbc_transport::MemorySink;
use tracing::debug;

use crate::capture::{default_channels, FrameCapture};
use crate::cmd::DecodeArgs;
use crate::exit::{mux_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_frames, print_stats, OutputFormat};

/// Bytes fed per receive call, so captured buffers go back to the pool
/// long before it runs dry.
const DECODE_CHUNK: usize = 64;

pub fn run(args: DecodeArgs, format: OutputFormat, config: &SessionConfig) -> CliResult<i32> {
    let input = args.input.resolve()?;
    let session = CbcSession::init(config.clone(), MemorySink::new())
        .map_err(|err| mux_error("invalid configuration", err))?;

    let channels = args.channels.clone().unwrap_or_else(default_channels);
    let capture = FrameCapture::attach(&session, &channels)?;

    let mut records = Vec::new();
    for chunk in input.chunks(DECODE_CHUNK) {
        records.extend(capture.feed(&session, chunk)?);
    }

    let stats = session.stats();
    let incomplete = session.link().unconsumed_rx_bytes();
    debug!(
        input = input.len(),
        frames = records.len(),
        incomplete,
        "decode finished"
    );

    print_frames(&records, format);
    print_stats(&stats, incomplete, format);

    let corrupt = stats.checksum_errors + stats.oversize_frames;
    if args.strict && (corrupt > 0 || incomplete > 0) {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "stream contained {corrupt} corrupt frame(s) and {incomplete} trailing byte(s)"
            ),
        ));
    }
    Ok(SUCCESS)
}
