use std::time::Duration;

use cbc_frame::LinkError;

/// Errors that can occur in multiplexer and session operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Channel number outside the channel table.
    #[error("invalid channel {0}")]
    InvalidChannel(usize),

    /// Priority does not fit the 3-bit header field.
    #[error("invalid priority {0} (max 7)")]
    InvalidPriority(u8),

    /// No free buffer to carry outbound data.
    #[error("no frame buffer available")]
    ResourceExhausted,

    /// The channel only mirrors traffic and cannot be written.
    #[error("channel {0} does not accept writes")]
    WriteNotSupported(usize),

    /// Nothing arrived on an endpoint in time.
    #[error("channel {channel} already has {max} open endpoints")]
    Busy { channel: usize, max: usize },

    #[error("endpoint is not open on channel {0}")]
    EndpointNotOpen(usize),

    #[error("receive timed out after {0:?}")]
    Timeout(Duration),

    /// Link-layer error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

impl MuxError {
    /// Whether retrying later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MuxError::ResourceExhausted | MuxError::Timeout(_) => true,
            MuxError::Link(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
