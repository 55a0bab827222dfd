use std::path::PathBuf;

/// Errors that can occur at the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device at the specified path.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The path does not refer to a terminal device.
    #[error("{path} is not a tty")]
    NotATty { path: PathBuf },

    /// The requested baud rate has no termios equivalent.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    /// An I/O error occurred while sending bytes.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink has been closed.
    #[error("transport closed")]
    Closed,

    /// A failure requested through [`MemorySink::fail_next`](crate::MemorySink::fail_next).
    #[error("injected send failure")]
    Injected,
}

pub type Result<T> = std::result::Result<T, TransportError>;
