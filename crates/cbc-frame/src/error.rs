/// Errors reported by checksum verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumError {
    /// A checksum over zero bytes was requested.
    #[error("checksum requested over an empty range")]
    InvalidParameter,

    /// The stored checksum does not match the bytes it covers.
    #[error("checksum mismatch (expected {expected:#04x}, computed {computed:#04x})")]
    Mismatch { expected: u8, computed: u8 },
}

impl ChecksumError {
    /// The recomputed checksum, when one could be computed.
    pub fn computed(&self) -> Option<u8> {
        match self {
            ChecksumError::InvalidParameter => None,
            ChecksumError::Mismatch { computed, .. } => Some(*computed),
        }
    }
}

/// Errors surfaced by the link layer.
///
/// Corrupt input never shows up here: the receiver resynchronises on its
/// own and only counts and logs those events.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No free buffer in the pool. Retry once buffers are released.
    #[error("buffer pool exhausted")]
    PoolExhausted,

    /// The transmit queue is full. Retry after a drain.
    #[error("transmit queue full")]
    QueueFull,

    /// The payload does not fit in a single frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A caller passed an out-of-range value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The transmit mutex could not be acquired.
    #[error("transmit lock unavailable")]
    LockPoisoned,
}

impl LinkError {
    /// Whether retrying later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::PoolExhausted | LinkError::QueueFull)
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
