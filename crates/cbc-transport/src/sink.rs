use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, TransportError};

/// Outbound transport primitive: push one finished frame onto the wire.
///
/// Called by the link layer with its transmit mutex held, so calls for one
/// link never overlap. Implementations must not call back into the link.
pub trait ByteSink: Send + Sync {
    /// Send `bytes` as one unit. A failed send is not retried by the caller.
    fn send_bytes(&self, bytes: &[u8]) -> Result<()>;
}

impl<S: ByteSink + ?Sized> ByteSink for Arc<S> {
    fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        (**self).send_bytes(bytes)
    }
}

impl<S: ByteSink + ?Sized> ByteSink for Box<S> {
    fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        (**self).send_bytes(bytes)
    }
}

/// A [`ByteSink`] over any `Write` stream (serial port, file, pipe).
pub struct WriteSink<W> {
    inner: Mutex<W>,
}

impl<W: Write + Send> WriteSink<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Consume the sink and return the inner writer.
    pub fn into_inner(self) -> W {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ByteSink for WriteSink<W> {
    fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| TransportError::Closed)?;

        inner.write_all(bytes).map_err(|err| match err.kind() {
            ErrorKind::WriteZero => TransportError::Closed,
            _ => TransportError::Io(err),
        })?;

        loop {
            match inner.flush() {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        trace!(len = bytes.len(), "wrote frame");
        Ok(())
    }
}

impl<W> std::fmt::Debug for WriteSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSink").finish_non_exhaustive()
    }
}

/// Records every sent frame in memory.
///
/// Used as a loopback for tooling and as the transport double in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<Vec<Bytes>>,
    fail_remaining: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail with [`TransportError::Injected`].
    pub fn fail_next(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Snapshot of the frames sent so far.
    pub fn frames(&self) -> Vec<Bytes> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return the frames sent so far.
    pub fn take(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.frames.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// All sent bytes concatenated in send order.
    pub fn concatenated(&self) -> Vec<u8> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|frame| frame.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSink for MemorySink {
    fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        let failed = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Injected);
        }

        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Bytes::copy_from_slice(bytes));
        Ok(())
    }
}
