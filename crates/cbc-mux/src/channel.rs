//! The CBC channel plan.
//!
//! Channel numbers are fixed by the carrier board firmware. Each channel has
//! a kind that decides how its payload is framed and what a reader sees.

use bytes::Bytes;
use cbc_frame::{FrameBuffer, CHANNEL_COUNT, CHECKSUM_SIZE, HEADER_SIZE};
use serde::Serialize;
use tracing::warn;

pub const PMT: usize = 0;
pub const LIFECYCLE: usize = 1;
pub const SIGNALS: usize = 2;
pub const EARLY_SIGNALS: usize = 3;
pub const DIAGNOSIS: usize = 4;
pub const DLT: usize = 5;
pub const LINDA: usize = 6;
/// First of the twelve raw channels.
pub const RAW_FIRST: usize = 7;
pub const RAW_COUNT: usize = 12;
/// Outbound traffic mirror.
pub const DEBUG_OUT: usize = 19;
/// Inbound traffic mirror.
pub const DEBUG_IN: usize = 20;

/// Size of the sub-header that starts every raw channel payload.
pub const RAW_HEADER_SIZE: usize = 3;

/// Transport marker written as the first raw sub-header byte.
pub const RAW_DIRECT_TRANSPORT: u8 = 0x00;

/// How a channel frames its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Payload region as-is, padding included.
    Default,
    /// Payload prefixed by a marker byte and a little-endian u16 length.
    Raw,
    /// Sees whole frames; cannot be written.
    Debug,
    /// Reserved for board services; routed and written exactly like `Default`.
    Hidden,
}

impl ChannelKind {
    /// Whether outbound data may be written to this kind of channel.
    pub fn is_writable(self) -> bool {
        !matches!(self, ChannelKind::Debug)
    }

    /// Bytes reserved in front of user data in an outbound payload.
    pub fn payload_offset(self) -> usize {
        match self {
            ChannelKind::Raw => RAW_HEADER_SIZE,
            _ => 0,
        }
    }

    /// The bytes a reader of this channel sees for a received frame.
    pub fn payload_view(self, buffer: &FrameBuffer) -> Bytes {
        let contents = buffer.lock();
        let frame = contents.frame();
        if frame.len() <= HEADER_SIZE + CHECKSUM_SIZE {
            return Bytes::new();
        }
        let region = &frame[HEADER_SIZE..frame.len() - CHECKSUM_SIZE];

        match self {
            ChannelKind::Default | ChannelKind::Hidden => Bytes::copy_from_slice(region),
            ChannelKind::Debug => Bytes::copy_from_slice(frame),
            ChannelKind::Raw => {
                if region.len() <= RAW_HEADER_SIZE {
                    warn!(
                        frame_length = frame.len(),
                        "frame too short for a raw sub-header"
                    );
                    return Bytes::new();
                }
                let raw_length = usize::from(u16::from_le_bytes([region[1], region[2]]));
                let body = &region[RAW_HEADER_SIZE..];
                if raw_length > body.len() {
                    warn!(
                        raw_length,
                        payload_length = region.len(),
                        "raw length is longer than payload"
                    );
                    return Bytes::copy_from_slice(body);
                }
                Bytes::copy_from_slice(&body[..raw_length])
            }
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelKind::Default => "default",
            ChannelKind::Raw => "raw",
            ChannelKind::Debug => "debug",
            ChannelKind::Hidden => "hidden",
        };
        f.write_str(name)
    }
}

/// Write the raw sub-header for `length` bytes of user data into `dst[..3]`.
pub fn write_raw_header(dst: &mut [u8], length: u16) {
    dst[0] = RAW_DIRECT_TRANSPORT;
    dst[1..RAW_HEADER_SIZE].copy_from_slice(&length.to_le_bytes());
}

/// Static description of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub id: usize,
    pub name: &'static str,
    pub kind: ChannelKind,
    pub default_priority: u8,
}

const fn info(id: usize, name: &'static str, kind: ChannelKind, default_priority: u8) -> ChannelInfo {
    ChannelInfo {
        id,
        name,
        kind,
        default_priority,
    }
}

/// The channel table, indexed by channel number.
pub const CHANNELS: [ChannelInfo; CHANNEL_COUNT] = [
    info(PMT, "cbc-pmt", ChannelKind::Hidden, 6),
    info(LIFECYCLE, "cbc-lifecycle", ChannelKind::Default, 6),
    info(SIGNALS, "cbc-signals", ChannelKind::Default, 3),
    info(EARLY_SIGNALS, "cbc-early-signals", ChannelKind::Default, 3),
    info(DIAGNOSIS, "cbc-diagnosis", ChannelKind::Default, 2),
    info(DLT, "cbc-dlt", ChannelKind::Default, 6),
    info(LINDA, "cbc-linda", ChannelKind::Hidden, 6),
    info(7, "cbc-raw0", ChannelKind::Raw, 3),
    info(8, "cbc-raw1", ChannelKind::Raw, 3),
    info(9, "cbc-raw2", ChannelKind::Raw, 3),
    info(10, "cbc-raw3", ChannelKind::Raw, 3),
    info(11, "cbc-raw4", ChannelKind::Raw, 3),
    info(12, "cbc-raw5", ChannelKind::Raw, 3),
    info(13, "cbc-raw6", ChannelKind::Raw, 3),
    info(14, "cbc-raw7", ChannelKind::Raw, 3),
    info(15, "cbc-raw8", ChannelKind::Raw, 3),
    info(16, "cbc-raw9", ChannelKind::Raw, 3),
    info(17, "cbc-raw10", ChannelKind::Raw, 3),
    info(18, "cbc-raw11", ChannelKind::Raw, 3),
    info(DEBUG_OUT, "cbc-debug-out", ChannelKind::Debug, 3),
    info(DEBUG_IN, "cbc-debug-in", ChannelKind::Debug, 3),
];

/// Look up a channel by number.
pub fn channel_info(id: usize) -> Option<&'static ChannelInfo> {
    CHANNELS.get(id)
}

/// Look up a channel by name, with or without the `cbc-` prefix.
pub fn channel_by_name(name: &str) -> Option<&'static ChannelInfo> {
    let wanted = name.strip_prefix("cbc-").unwrap_or(name);
    CHANNELS
        .iter()
        .find(|channel| channel.name.strip_prefix("cbc-") == Some(wanted))
}

/// Parse a channel given as a number or a name.
pub fn resolve_channel(value: &str) -> Option<&'static ChannelInfo> {
    match value.parse::<usize>() {
        Ok(id) => channel_info(id),
        Err(_) => channel_by_name(value),
    }
}

#[cfg(test)]
mod tests {
    use cbc_frame::{BufferPool, Granularity};

    use super::*;

    fn received(pool: &BufferPool, payload: &[u8]) -> FrameBuffer {
        let mut wire = bytes::BytesMut::new();
        cbc_frame::encode_frame(RAW_FIRST as u8, 3, 0, payload, Granularity::Four, &mut wire)
            .unwrap();
        let buffer = pool.get_buffer().unwrap();
        {
            let mut contents = buffer.lock();
            contents.data[..wire.len()].copy_from_slice(&wire);
            contents.frame_length = wire.len();
            contents.payload_length = wire.len() - HEADER_SIZE - CHECKSUM_SIZE;
        }
        buffer
    }

    #[test]
    fn table_is_indexed_by_id() {
        for (index, channel) in CHANNELS.iter().enumerate() {
            assert_eq!(channel.id, index);
            assert!(channel.default_priority <= cbc_frame::MAX_PRIORITY);
        }
        let raw = CHANNELS
            .iter()
            .filter(|c| c.kind == ChannelKind::Raw)
            .count();
        assert_eq!(raw, RAW_COUNT);
        assert_eq!(CHANNELS[RAW_FIRST + RAW_COUNT - 1].name, "cbc-raw11");
    }

    #[test]
    fn lookup_by_name_and_number() {
        assert_eq!(channel_by_name("cbc-dlt").map(|c| c.id), Some(DLT));
        assert_eq!(channel_by_name("raw3").map(|c| c.id), Some(10));
        assert_eq!(resolve_channel("19").map(|c| c.kind), Some(ChannelKind::Debug));
        assert!(resolve_channel("21").is_none());
        assert!(resolve_channel("nope").is_none());
    }

    #[test]
    fn raw_view_honours_sub_header() {
        let pool = BufferPool::new(2);
        let mut payload = vec![0u8; RAW_HEADER_SIZE];
        write_raw_header(&mut payload, 5);
        payload.extend_from_slice(b"hello");

        let buffer = received(&pool, &payload);
        assert_eq!(ChannelKind::Raw.payload_view(&buffer).as_ref(), b"hello");

        let region = ChannelKind::Default.payload_view(&buffer);
        assert_eq!(&region[..payload.len()], payload.as_slice());
        assert!(region[payload.len()..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn raw_view_clamps_lying_length() {
        let pool = BufferPool::new(1);
        let mut payload = vec![0u8; RAW_HEADER_SIZE];
        write_raw_header(&mut payload, 500);
        payload.extend_from_slice(b"abc");

        let buffer = received(&pool, &payload);
        let view = ChannelKind::Raw.payload_view(&buffer);
        assert_eq!(&view[..3], b"abc");
        assert_eq!(view.len(), buffer.payload_length() - RAW_HEADER_SIZE);
    }

    #[test]
    fn debug_view_is_whole_frame() {
        let pool = BufferPool::new(1);
        let buffer = received(&pool, b"xyz");
        let view = ChannelKind::Debug.payload_view(&buffer);
        assert_eq!(view.len(), buffer.frame_length());
        assert_eq!(view[0], cbc_frame::SOF);
    }

    #[test]
    fn hidden_kind_behaves_like_default() {
        let pool = BufferPool::new(1);
        let buffer = received(&pool, b"pmt");
        assert_eq!(
            ChannelKind::Hidden.payload_view(&buffer),
            ChannelKind::Default.payload_view(&buffer)
        );
        assert!(ChannelKind::Hidden.is_writable());
        assert_eq!(ChannelKind::Hidden.payload_offset(), 0);
    }

    #[test]
    fn raw_header_layout() {
        let mut header = [0xAAu8; RAW_HEADER_SIZE];
        write_raw_header(&mut header, 0x0102);
        assert_eq!(header, [RAW_DIRECT_TRANSPORT, 0x02, 0x01]);
    }
}
