//! CBC carrier board communication over a serial line.
//!
//! The CBC protocol multiplexes up to 32 logical channels over one UART
//! using small checksummed frames with a rolling sequence counter.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte sinks and the raw-mode serial port
//! - [`frame`]: frame codec, checksums, buffer pool and the link layer
//! - [`mux`]: channel table, multiplexer, endpoints and sessions (behind `mux` feature)

/// Re-export transport types.
pub mod transport {
    pub use cbc_transport::*;
}

/// Re-export link layer types.
pub mod frame {
    pub use cbc_frame::*;
}

/// Re-export multiplexer types (requires `mux` feature).
#[cfg(feature = "mux")]
pub mod mux {
    pub use cbc_mux::*;
}
