//! Byte transport boundary for the CBC serial protocol.
//!
//! The protocol core never touches a device directly. It hands finished
//! frames to a [`ByteSink`] and is fed received bytes by whoever owns the
//! link. This crate provides:
//! - [`WriteSink`] over any `std::io::Write` (files, pipes, sockets)
//! - [`MemorySink`] that records frames in memory (loopback, tests, tooling)
//! - [`SerialPort`], a raw-mode serial tty (Unix)

pub mod error;
pub mod sink;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use sink::{ByteSink, MemorySink, WriteSink};

#[cfg(unix)]
pub use serial::SerialPort;

/// Baud rate used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
