use std::fs::File;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cbc_frame::RING_SIZE;
use cbc_mux::{CbcSession, SessionConfig};
use cbc_transport::MemorySink;
use tracing::{debug, info};

use crate::capture::{default_channels, FrameCapture};
use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{io_error, mux_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat, config: &SessionConfig) -> CliResult<i32> {
    let deadline = match &args.timeout {
        Some(timeout) => Some(Instant::now() + parse_duration(timeout)?),
        None => None,
    };

    let mut source = open_source(&args)?;
    // Nothing is transmitted while listening.
    let session = CbcSession::init(config.clone(), MemorySink::new())
        .map_err(|err| mux_error("invalid configuration", err))?;
    let channels = args.channels.clone().unwrap_or_else(default_channels);
    let capture = FrameCapture::attach(&session, &channels)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(device = %args.device.display(), channels = channels.len(), "listening");

    let mut chunk = [0u8; RING_SIZE];
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(CliError::new(
                TIMEOUT,
                format!("timed out after {printed} frame(s)"),
            ));
        }

        let n = match source.read(&mut chunk) {
            Ok(0) if args.no_tty => {
                debug!("end of input");
                break;
            }
            Ok(0) => continue,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("read failed", err)),
        };

        for record in capture.feed(&session, &chunk[..n])? {
            print_frame(&record, format);
            printed = printed.saturating_add(1);

            if args.count.is_some_and(|count| printed >= count) {
                return Ok(SUCCESS);
            }
        }
    }

    let stats = session.stats();
    debug!(
        frames = stats.frames_received,
        skipped = stats.bytes_skipped,
        checksum_errors = stats.checksum_errors,
        "listen finished"
    );
    Ok(SUCCESS)
}

fn open_source(args: &ListenArgs) -> CliResult<Box<dyn Read>> {
    if args.no_tty {
        let file = File::open(&args.device)
            .map_err(|err| io_error(&format!("failed opening {}", args.device.display()), err))?;
        return Ok(Box::new(file));
    }
    open_serial(args)
}

#[cfg(unix)]
fn open_serial(args: &ListenArgs) -> CliResult<Box<dyn Read>> {
    let port = cbc_transport::SerialPort::open(&args.device, args.baud)
        .map_err(|err| crate::exit::transport_error("open failed", err))?;
    Ok(Box::new(port))
}

#[cfg(not(unix))]
fn open_serial(args: &ListenArgs) -> CliResult<Box<dyn Read>> {
    Err(CliError::new(
        crate::exit::USAGE,
        format!(
            "serial devices are not supported on this platform; use --no-tty for {}",
            args.device.display()
        ),
    ))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
