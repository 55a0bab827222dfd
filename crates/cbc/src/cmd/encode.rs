use bytes::{Bytes, BytesMut};
use cbc_frame::{encode_frame, MAX_PAYLOAD};
use cbc_mux::channel::write_raw_header;
use cbc_mux::{channel_info, ChannelKind, CbcSession, SessionConfig, RAW_HEADER_SIZE};
use cbc_transport::MemorySink;

use crate::cmd::EncodeArgs;
use crate::exit::{link_error, mux_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_encoded, EncodedFrame, OutputFormat};

pub fn run(args: EncodeArgs, format: OutputFormat, config: &SessionConfig) -> CliResult<i32> {
    let info = channel_info(args.channel)
        .ok_or_else(|| CliError::new(USAGE, format!("unknown channel {}", args.channel)))?;

    let priority = match args.priority {
        Some(priority) => priority,
        None => effective_priority(args.channel, config)?,
    };

    let data = args.payload.resolve()?;
    let payload = build_payload(info.kind, &data)?;

    let mut wire = BytesMut::new();
    let frame_length = encode_frame(
        args.channel as u8,
        priority,
        args.sequence,
        &payload,
        config.link.granularity,
        &mut wire,
    )
    .map_err(|err| link_error("encode failed", err))?;

    print_encoded(
        &EncodedFrame {
            channel: args.channel,
            channel_name: info.name,
            priority,
            sequence: args.sequence,
            frame_length,
            frame: wire.freeze(),
        },
        format,
    );
    Ok(SUCCESS)
}

/// Priority a session built from `config` would use for `channel`.
fn effective_priority(channel: usize, config: &SessionConfig) -> CliResult<u8> {
    let session = CbcSession::init(config.clone(), MemorySink::new())
        .map_err(|err| mux_error("invalid configuration", err))?;
    session
        .get_priority(channel)
        .map_err(|err| mux_error("invalid channel", err))
}

/// Payload bytes as they go on the wire, raw sub-header included.
fn build_payload(kind: ChannelKind, data: &[u8]) -> CliResult<Bytes> {
    let offset = kind.payload_offset();
    if data.len() + offset > MAX_PAYLOAD {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "payload of {} bytes does not fit one frame (max {})",
                data.len(),
                MAX_PAYLOAD - offset
            ),
        ));
    }

    let mut payload = vec![0u8; offset];
    if kind == ChannelKind::Raw {
        write_raw_header(&mut payload[..RAW_HEADER_SIZE], data.len() as u16);
    }
    payload.extend_from_slice(data);
    Ok(Bytes::from(payload))
}
