//! CBC link layer: framing, checksums and the buffer pool behind it.
//!
//! Every frame on the wire is laid out as:
//! - SOF marker `0x05`
//! - a length byte: 2-bit rolling sequence counter + 5-bit service length
//! - a channel byte: 3-bit priority + 5-bit channel index
//! - payload, padded with `0xFF` to the configured granularity
//! - a one-byte two's-complement checksum
//!
//! The receive side resynchronises on corrupt input one byte at a time and
//! never hands out a frame whose checksum does not match.

pub mod buffer;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod queue;
pub mod ring;

pub use buffer::{BufferPool, FrameBuffer, FrameData, BUFFER_SIZE};
pub use codec::{
    encode_frame, frame_length_for, Frame, FrameHeader, CHECKSUM_SIZE, FILL_BYTE, HEADER_SIZE,
    MAX_CHANNEL_INDEX, MAX_FRAME_SIZE, MAX_PAYLOAD, MAX_PRIORITY, MIN_FRAME_SIZE, SOF,
};
pub use config::{Granularity, LinkConfig};
pub use error::{ChecksumError, LinkError, Result};
pub use link::{LinkLayer, LinkStats, MAX_FRAMES_PER_DRAIN, TX_QUEUE_LENGTH};
pub use queue::BufferQueue;
pub use ring::{RxRing, RING_SIZE};

/// Depth of a channel endpoint queue.
pub const QUEUE_LENGTH: usize = 16;

/// Number of logical channels in the reference channel plan.
pub const CHANNEL_COUNT: usize = 21;

/// Default pool size: one full queue per channel.
pub const DEFAULT_POOL_SIZE: usize = QUEUE_LENGTH * CHANNEL_COUNT;
