use std::fs::OpenOptions;

use cbc_frame::MAX_PAYLOAD;
use cbc_mux::{channel_info, CbcSession, SessionConfig};
use cbc_transport::{ByteSink, WriteSink};
use tracing::info;

use crate::cmd::SendArgs;
use crate::exit::{
    io_error, mux_error, transport_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_send_report, OutputFormat, SendReport};

pub fn run(args: SendArgs, format: OutputFormat, config: &SessionConfig) -> CliResult<i32> {
    let info = channel_info(args.channel)
        .ok_or_else(|| CliError::new(USAGE, format!("unknown channel {}", args.channel)))?;
    if !info.kind.is_writable() {
        return Err(CliError::new(
            USAGE,
            format!("channel {} ({}) is read-only", info.id, info.name),
        ));
    }

    let data = args.payload.resolve()?;
    let sink = open_sink(&args)?;
    let session =
        CbcSession::init(config.clone(), sink).map_err(|err| mux_error("invalid configuration", err))?;
    if let Some(priority) = args.priority {
        session
            .set_priority(args.channel, priority)
            .map_err(|err| mux_error("invalid priority", err))?;
    }

    let capacity = MAX_PAYLOAD - info.kind.payload_offset();
    let chunks: Vec<&[u8]> = if args.split && !data.is_empty() {
        data.chunks(capacity).collect()
    } else {
        vec![data.as_slice()]
    };

    let mut sent = 0usize;
    for chunk in chunks {
        sent += session
            .transmit_data(args.channel, chunk)
            .map_err(|err| mux_error("send failed", err))?;
    }

    let stats = session.stats();
    if stats.send_failures > 0 {
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!(
                "{} of {} frame(s) were rejected by {}",
                stats.send_failures,
                stats.send_failures + stats.frames_sent,
                args.device.display()
            ),
        ));
    }

    info!(
        channel = args.channel,
        bytes = sent,
        frames = stats.frames_sent,
        "data sent"
    );
    print_send_report(
        &SendReport {
            device: args.device.display().to_string(),
            channel: args.channel,
            channel_name: info.name,
            bytes: sent,
            frames: stats.frames_sent,
        },
        format,
    );
    Ok(SUCCESS)
}

fn open_sink(args: &SendArgs) -> CliResult<Box<dyn ByteSink>> {
    if args.no_tty {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.device)
            .map_err(|err| io_error(&format!("failed opening {}", args.device.display()), err))?;
        return Ok(Box::new(WriteSink::new(file)));
    }
    open_serial(args)
}

#[cfg(unix)]
fn open_serial(args: &SendArgs) -> CliResult<Box<dyn ByteSink>> {
    let port = cbc_transport::SerialPort::open(&args.device, args.baud)
        .map_err(|err| transport_error("open failed", err))?;
    Ok(Box::new(WriteSink::new(port)))
}

#[cfg(not(unix))]
fn open_serial(args: &SendArgs) -> CliResult<Box<dyn ByteSink>> {
    Err(CliError::new(
        USAGE,
        format!(
            "serial devices are not supported on this platform; use --no-tty for {}",
            args.device.display()
        ),
    ))
}
