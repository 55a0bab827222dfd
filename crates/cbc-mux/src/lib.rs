//! CBC channel multiplexing.
//!
//! Routes frames delivered by the link layer to per-channel receivers, and
//! frames from channels to the link layer. [`CbcSession`] bundles the two
//! into the stack a host talks to.

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod multiplexer;
pub mod receiver;
pub mod session;

pub use channel::{
    channel_by_name, channel_info, resolve_channel, ChannelInfo, ChannelKind, CHANNELS,
    RAW_DIRECT_TRANSPORT, RAW_HEADER_SIZE,
};
pub use endpoint::{ChannelEndpoint, MAX_OPEN_ENDPOINTS};
pub use error::{MuxError, Result};
pub use multiplexer::Multiplexer;
pub use receiver::{BufferReceiver, ChannelReceiver, DataReceiver};
pub use session::{CbcSession, Received, SessionConfig};
