//! The CBC link layer.
//!
//! Receive path: bytes are pushed into a 256-byte ring by
//! [`LinkLayer::on_bytes_received`]; [`LinkLayer::process_rx`] scans the
//! ring for start-of-frame markers, validates length and checksum, tracks
//! the rolling sequence counter and hands every good frame to the caller
//! in a pool buffer. Corrupt input is skipped one byte at a time until the
//! stream lines up with a valid frame again.
//!
//! Transmit path: [`LinkLayer::assemble_for_transmission`] lays out header
//! and padding, queues the buffer and drains the queue. The drain stamps
//! each frame with the TX sequence counter and checksum right before it is
//! sent, so frames carry consecutive sequence numbers in send order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cbc_transport::ByteSink;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::buffer::{BufferPool, FrameBuffer};
use crate::checksum;
use crate::codec::{
    self, decode_frame_length, CHECKSUM_SIZE, FILL_BYTE, HEADER_SIZE, MAX_FRAME_SIZE,
    MIN_FRAME_SIZE, SEQUENCE_MASK, SOF,
};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::queue::BufferQueue;
use crate::ring::RxRing;

/// Upper bound on frames sent by one drain call.
pub const MAX_FRAMES_PER_DRAIN: usize = 50;

/// Depth of the transmit queue.
pub const TX_QUEUE_LENGTH: usize = 64;

struct RxState {
    ring: RxRing,
    /// Length of a frame whose header has been seen but whose bytes have not all arrived.
    bytes_expected: usize,
    rx_sequence: u8,
    /// Bytes skipped since the last start-of-frame.
    skipped_run: usize,
    /// Whether the current skipped run contains anything besides idle fill.
    log_skipped: bool,
    last_frame_valid: bool,
}

impl RxState {
    fn new() -> Self {
        Self {
            ring: RxRing::new(),
            bytes_expected: 0,
            rx_sequence: 0,
            skipped_run: 0,
            log_skipped: false,
            last_frame_valid: false,
        }
    }

    fn report_skipped(&mut self) {
        if self.skipped_run > 0 && self.log_skipped {
            warn!(skipped = self.skipped_run, "skipped bytes before start of frame");
        }
        self.skipped_run = 0;
        self.log_skipped = false;
    }
}

struct TxState {
    queue: BufferQueue<FrameBuffer, TX_QUEUE_LENGTH>,
    tx_sequence: u8,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    bytes_skipped: AtomicU64,
    checksum_errors: AtomicU64,
    sequence_errors: AtomicU64,
    oversize_frames: AtomicU64,
    send_failures: AtomicU64,
    pool_exhausted: AtomicU64,
    queue_full: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of link layer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    /// Bytes dropped while searching for a start-of-frame marker.
    pub bytes_skipped: u64,
    pub checksum_errors: u64,
    pub sequence_errors: u64,
    pub oversize_frames: u64,
    pub send_failures: u64,
    pub pool_exhausted: u64,
    pub queue_full: u64,
}

/// One CBC link: receive ring, transmit queue and the buffer pool.
pub struct LinkLayer<S> {
    sink: S,
    config: LinkConfig,
    pool: BufferPool,
    rx: Mutex<RxState>,
    tx: Mutex<TxState>,
    counters: Counters,
}

impl<S: ByteSink> LinkLayer<S> {
    /// Initialise a link sending through `sink`.
    pub fn new(config: LinkConfig, sink: S) -> Self {
        debug!(
            granularity = %config.granularity,
            pool_size = config.pool_size,
            "initialising link layer"
        );
        Self {
            sink,
            pool: BufferPool::new(config.pool_size),
            config,
            rx: Mutex::new(RxState::new()),
            tx: Mutex::new(TxState {
                queue: BufferQueue::new(),
                tx_sequence: 0,
            }),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn rx_state(&self) -> MutexGuard<'_, RxState> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append received bytes to the ring.
    ///
    /// Returns how many bytes were accepted; the rest must be offered again
    /// after [`process_rx`](Self::process_rx) has made room.
    pub fn on_bytes_received(&self, bytes: &[u8]) -> usize {
        let accepted = self.rx_state().ring.push(bytes);
        if accepted < bytes.len() {
            trace!(
                offered = bytes.len(),
                accepted,
                "receive ring full, applying back-pressure"
            );
        }
        accepted
    }

    /// Free space in the receive ring.
    pub fn rx_free_space(&self) -> usize {
        self.rx_state().ring.free_space()
    }

    /// Bytes in the receive ring that are neither delivered nor idle fill
    /// after a valid frame. At end of input these are a cut-off frame or
    /// noise too short to scan.
    pub fn unconsumed_rx_bytes(&self) -> usize {
        let rx = self.rx_state();
        let available = rx.ring.available();
        let mut fill = 0;
        if rx.last_frame_valid {
            while fill < available && rx.ring.peek(fill) == FILL_BYTE {
                fill += 1;
            }
        }
        available - fill
    }

    /// Extract every complete, valid frame from the ring and pass each to
    /// `deliver`, in stream order.
    ///
    /// Returns the number of frames delivered. Stops quietly when the ring
    /// holds only part of a frame. If the pool has no buffer for a valid
    /// frame, returns [`LinkError::PoolExhausted`] and leaves that frame in
    /// the ring for the next call.
    ///
    /// `deliver` runs with the receive state locked and must not call back
    /// into the receive path.
    pub fn process_rx<F>(&self, mut deliver: F) -> Result<usize>
    where
        F: FnMut(FrameBuffer),
    {
        let mut rx = self.rx_state();
        let mut delivered = 0usize;

        loop {
            let available = rx.ring.available();
            if available < MIN_FRAME_SIZE || available < rx.bytes_expected {
                break;
            }

            let first = rx.ring.peek(0);
            if first != SOF {
                rx.ring.release(1);
                rx.skipped_run += 1;
                bump(&self.counters.bytes_skipped);
                if !(rx.last_frame_valid && first == FILL_BYTE) {
                    rx.log_skipped = true;
                }
                continue;
            }

            rx.report_skipped();

            let frame_length = decode_frame_length(rx.ring.peek(1));
            if frame_length > MAX_FRAME_SIZE {
                warn!(
                    frame_length,
                    max = MAX_FRAME_SIZE,
                    "frame length exceeds maximum, resynchronising"
                );
                bump(&self.counters.oversize_frames);
                rx.ring.release(1);
                rx.last_frame_valid = false;
                continue;
            }

            if available < frame_length {
                trace!(frame_length, available, "waiting for rest of frame");
                rx.bytes_expected = frame_length;
                break;
            }

            let mut frame = [0u8; MAX_FRAME_SIZE];
            rx.ring.copy_out(&mut frame[..frame_length]);

            let stored = frame[frame_length - CHECKSUM_SIZE];
            if let Err(err) = checksum::check(&frame[..frame_length - CHECKSUM_SIZE], stored) {
                warn!(
                    expected = stored,
                    computed = err.computed(),
                    frame_length,
                    "checksum mismatch, resynchronising"
                );
                bump(&self.counters.checksum_errors);
                rx.ring.release(1);
                rx.bytes_expected = 0;
                rx.last_frame_valid = false;
                continue;
            }

            let Some(buffer) = self.pool.get_buffer() else {
                warn!(frame_length, "no free buffer for received frame, deferring");
                bump(&self.counters.pool_exhausted);
                return Err(LinkError::PoolExhausted);
            };

            let sequence = frame[1] & SEQUENCE_MASK;
            if sequence != rx.rx_sequence {
                warn!(
                    expected = rx.rx_sequence,
                    received = sequence,
                    "sequence mismatch, adopting received counter"
                );
                bump(&self.counters.sequence_errors);
                rx.rx_sequence = sequence;
            }
            rx.rx_sequence = (rx.rx_sequence + 1) & SEQUENCE_MASK;

            {
                let mut contents = buffer.lock();
                contents.data[..frame_length].copy_from_slice(&frame[..frame_length]);
                contents.frame_length = frame_length;
                contents.payload_length = frame_length - HEADER_SIZE - CHECKSUM_SIZE;
            }

            trace!(
                channel = frame[2] >> 3,
                frame_length,
                sequence,
                "frame received"
            );
            deliver(buffer);

            rx.ring.release(frame_length);
            rx.bytes_expected = 0;
            rx.last_frame_valid = true;
            bump(&self.counters.frames_received);
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Lay out `buffer` as a frame for `channel` and queue it, without draining.
    ///
    /// The payload must already be in place from byte 3 with
    /// `payload_length` set. The queue takes its own reference.
    pub fn queue_for_transmission(
        &self,
        channel: u8,
        priority: u8,
        buffer: &FrameBuffer,
    ) -> Result<()> {
        let mut tx = self.prepare_and_lock(channel, priority, buffer)?;
        self.enqueue_locked(&mut tx, buffer)
    }

    /// Lay out `buffer` as a frame, queue it and drain the queue.
    pub fn assemble_for_transmission(
        &self,
        channel: u8,
        priority: u8,
        buffer: &FrameBuffer,
    ) -> Result<()> {
        let mut tx = self.prepare_and_lock(channel, priority, buffer)?;
        self.enqueue_locked(&mut tx, buffer)?;
        self.drain_locked(&mut tx);
        Ok(())
    }

    fn prepare_and_lock(
        &self,
        channel: u8,
        priority: u8,
        buffer: &FrameBuffer,
    ) -> Result<MutexGuard<'_, TxState>> {
        {
            let mut contents = buffer.lock();
            let payload_length = contents.payload_length;
            let frame_length = codec::prepare_frame(
                &mut contents.data,
                payload_length,
                channel,
                priority,
                self.config.granularity,
            )?;
            contents.frame_length = frame_length;
        }

        self.tx.lock().map_err(|_| {
            error!("transmit lock unavailable");
            LinkError::LockPoisoned
        })
    }

    fn enqueue_locked(&self, tx: &mut TxState, buffer: &FrameBuffer) -> Result<()> {
        if let Err(rejected) = tx.queue.enqueue(buffer.clone()) {
            drop(rejected);
            bump(&self.counters.queue_full);
            warn!(capacity = TX_QUEUE_LENGTH, "transmit queue full, frame dropped");
            return Err(LinkError::QueueFull);
        }
        Ok(())
    }

    /// Send up to [`MAX_FRAMES_PER_DRAIN`] queued frames.
    ///
    /// Returns how many frames the transport accepted. Frames the transport
    /// rejects are logged and released, not retried.
    pub fn transmit_drain(&self) -> Result<usize> {
        let mut tx = self.tx.lock().map_err(|_| {
            error!("transmit lock unavailable, skipping drain");
            LinkError::LockPoisoned
        })?;
        Ok(self.drain_locked(&mut tx))
    }

    fn drain_locked(&self, tx: &mut TxState) -> usize {
        let mut sent = 0usize;

        for _ in 0..MAX_FRAMES_PER_DRAIN {
            if tx.queue.is_empty() {
                break;
            }
            let Some(buffer) = tx.queue.dequeue() else {
                break;
            };

            {
                let mut contents = buffer.lock();
                let frame_length = contents.frame_length;
                let frame = &mut contents.data[..frame_length];
                codec::seal_frame(frame, tx.tx_sequence);

                match self.sink.send_bytes(frame) {
                    Ok(()) => {
                        trace!(
                            frame_length,
                            sequence = tx.tx_sequence,
                            "frame sent"
                        );
                        tx.tx_sequence = (tx.tx_sequence + 1) & SEQUENCE_MASK;
                        bump(&self.counters.frames_sent);
                        sent += 1;
                    }
                    Err(err) => {
                        error!(error = %err, frame_length, "transmit failed, frame dropped");
                        bump(&self.counters.send_failures);
                    }
                }
            }

            buffer.release();
        }

        if !tx.queue.is_empty() {
            debug!(
                pending = tx.queue.len(),
                "drain limit reached, frames left queued"
            );
        }
        sent
    }

    /// Frames waiting in the transmit queue.
    pub fn pending_transmissions(&self) -> usize {
        self.tx
            .lock()
            .map(|tx| tx.queue.len())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> LinkStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        LinkStats {
            frames_received: load(&self.counters.frames_received),
            frames_sent: load(&self.counters.frames_sent),
            bytes_skipped: load(&self.counters.bytes_skipped),
            checksum_errors: load(&self.counters.checksum_errors),
            sequence_errors: load(&self.counters.sequence_errors),
            oversize_frames: load(&self.counters.oversize_frames),
            send_failures: load(&self.counters.send_failures),
            pool_exhausted: load(&self.counters.pool_exhausted),
            queue_full: load(&self.counters.queue_full),
        }
    }

    /// Shut the link down.
    ///
    /// Sends what the drain limit allows, discards anything still queued,
    /// clears the receive ring, then frees the pool. If buffers are still
    /// held elsewhere the link is handed back; it stays usable, but the
    /// discarded frames and ring contents are gone.
    pub fn close(self) -> std::result::Result<(), Self> {
        if let Ok(mut tx) = self.tx.lock() {
            self.drain_locked(&mut tx);
            let mut discarded = 0usize;
            while let Some(buffer) = tx.queue.dequeue() {
                buffer.release();
                discarded += 1;
            }
            if discarded > 0 {
                warn!(discarded, "discarded queued frames on close");
            }
        }

        self.rx_state().ring.clear();

        if self.pool.all_free() {
            debug!("link layer closed");
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<S> std::fmt::Debug for LinkLayer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkLayer")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
