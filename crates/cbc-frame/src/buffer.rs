//! Fixed-capacity pool of reference-counted frame buffers.
//!
//! The pool allocates every buffer once, up front. A [`FrameBuffer`] is a
//! counted reference to one pool slot: cloning it increments the slot's
//! reference count, dropping it (or calling [`FrameBuffer::release`])
//! decrements it. When the count reaches zero the slot is scrubbed and
//! returns to the free list.
//!
//! Running out of buffers is a normal back-pressure condition, reported as
//! `None` from [`BufferPool::get_buffer`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::codec::{CHECKSUM_SIZE, HEADER_SIZE};

/// Bytes of storage in every buffer (one maximum-size frame).
pub const BUFFER_SIZE: usize = crate::codec::MAX_FRAME_SIZE;

/// Contents of one pool slot.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Raw frame storage. The payload of an outbound frame starts at [`HEADER_SIZE`].
    pub data: [u8; BUFFER_SIZE],
    /// Total frame bytes (header, payload, padding, checksum).
    pub frame_length: usize,
    /// Logical payload bytes, excluding padding, including any raw sub-header.
    pub payload_length: usize,
}

impl FrameData {
    const fn empty() -> Self {
        Self {
            data: [0u8; BUFFER_SIZE],
            frame_length: 0,
            payload_length: 0,
        }
    }

    fn scrub(&mut self) {
        self.data.fill(0);
        self.frame_length = 0;
        self.payload_length = 0;
    }

    /// The frame bytes, `data[..frame_length]`.
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.frame_length.min(BUFFER_SIZE)]
    }

    /// Space available to an outbound payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_SIZE..BUFFER_SIZE - CHECKSUM_SIZE]
    }
}

struct Slot {
    refcount: AtomicUsize,
    contents: Mutex<FrameData>,
}

struct PoolShared {
    slots: Box<[Slot]>,
    /// Indices of slots with a zero reference count.
    free: Mutex<Vec<usize>>,
    exhausted: AtomicU64,
}

impl PoolShared {
    fn free_list(&self) -> MutexGuard<'_, Vec<usize>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, index: usize) {
        let slot = &self.slots[index];
        let previous = slot.refcount.fetch_sub(1, Ordering::AcqRel);
        match previous {
            0 => {
                // Undo the wrap so the slot does not look permanently busy.
                slot.refcount.store(0, Ordering::Release);
                error!(index, "buffer released with zero reference count");
            }
            1 => {
                slot.contents
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .scrub();
                self.free_list().push(index);
            }
            _ => {}
        }
    }
}

/// A fixed set of frame buffers shared by one link.
///
/// Cloning the pool clones the handle, not the buffers.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Allocate a pool of exactly `num_blocks` buffers, all free.
    pub fn new(num_blocks: usize) -> Self {
        let slots = (0..num_blocks)
            .map(|_| Slot {
                refcount: AtomicUsize::new(0),
                contents: Mutex::new(FrameData::empty()),
            })
            .collect();
        // Reversed so a fresh pool hands out the lowest index first.
        let free = (0..num_blocks).rev().collect();

        debug!(num_blocks, "created buffer pool");
        Self {
            shared: Arc::new(PoolShared {
                slots,
                free: Mutex::new(free),
                exhausted: AtomicU64::new(0),
            }),
        }
    }

    /// Take a free buffer with a reference count of one.
    ///
    /// Returns `None` when every buffer is in use.
    pub fn get_buffer(&self) -> Option<FrameBuffer> {
        let index = {
            let mut free = self.shared.free_list();
            free.pop()
        };

        let Some(index) = index else {
            self.shared.exhausted.fetch_add(1, Ordering::Relaxed);
            debug!(capacity = self.capacity(), "buffer pool exhausted");
            return None;
        };

        let slot = &self.shared.slots[index];
        {
            let mut contents = slot.contents.lock().unwrap_or_else(PoisonError::into_inner);
            contents.frame_length = 0;
            contents.payload_length = 0;
        }
        slot.refcount.store(1, Ordering::Release);

        Some(FrameBuffer {
            shared: Arc::clone(&self.shared),
            index,
        })
    }

    /// Number of buffers owned by the pool.
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.shared.free_list().len()
    }

    /// How many times `get_buffer` found the pool empty.
    pub fn exhausted_count(&self) -> u64 {
        self.shared.exhausted.load(Ordering::Relaxed)
    }

    /// Indices of buffers with a non-zero reference count.
    pub fn outstanding(&self) -> Vec<usize> {
        self.shared
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.refcount.load(Ordering::Acquire) > 0)
            .map(|(index, _)| index)
            .collect()
    }

    /// Whether every buffer is free. Logs the outstanding ones otherwise.
    pub fn all_free(&self) -> bool {
        let free = self.shared.free_list();
        if free.len() == self.capacity() {
            return true;
        }
        drop(free);

        let outstanding = self.outstanding();
        warn!(?outstanding, "buffer pool still has outstanding buffers");
        false
    }

    /// Tear the pool down if no buffer is in use; hand it back otherwise.
    pub fn try_free(self) -> std::result::Result<(), BufferPool> {
        if self.all_free() {
            debug!(capacity = self.capacity(), "freed buffer pool");
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

/// A counted reference to one pool buffer.
///
/// `clone()` increments the reference count, drop decrements it. Contents
/// are reached through [`FrameBuffer::lock`].
pub struct FrameBuffer {
    shared: Arc<PoolShared>,
    index: usize,
}

impl FrameBuffer {
    /// Slot index inside the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current reference count of the underlying slot.
    pub fn ref_count(&self) -> usize {
        self.shared.slots[self.index].refcount.load(Ordering::Acquire)
    }

    /// Lock the buffer contents.
    pub fn lock(&self) -> MutexGuard<'_, FrameData> {
        self.shared.slots[self.index]
            .contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn frame_length(&self) -> usize {
        self.lock().frame_length
    }

    pub fn payload_length(&self) -> usize {
        self.lock().payload_length
    }

    /// Copy `payload` into the outbound payload area and set `payload_length`.
    ///
    /// Returns the number of bytes copied; anything beyond the buffer is cut.
    pub fn fill_payload(&self, payload: &[u8]) -> usize {
        let mut contents = self.lock();
        let area = contents.payload_mut();
        let n = payload.len().min(area.len());
        area[..n].copy_from_slice(&payload[..n]);
        contents.payload_length = n;
        n
    }

    /// Copy of the frame bytes.
    pub fn frame_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.lock().frame())
    }

    /// Copy of the payload region of a complete frame (padding included).
    pub fn payload_bytes(&self) -> Bytes {
        let contents = self.lock();
        let end = contents.frame_length.saturating_sub(CHECKSUM_SIZE);
        if end <= HEADER_SIZE {
            return Bytes::new();
        }
        Bytes::copy_from_slice(&contents.data[HEADER_SIZE..end])
    }

    /// Whether both handles refer to the same pool slot.
    pub fn ptr_eq(&self, other: &FrameBuffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.index == other.index
    }

    /// Drop this reference explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Clone for FrameBuffer {
    fn clone(&self) -> Self {
        self.shared.slots[self.index]
            .refcount
            .fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
            index: self.index,
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.shared.release(self.index);
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("index", &self.index)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_of_four_exhausts_on_fifth() {
        let pool = BufferPool::new(4);
        let mut held: Vec<FrameBuffer> = (0..4).map(|_| pool.get_buffer().unwrap()).collect();

        assert!(pool.get_buffer().is_none());
        assert_eq!(pool.exhausted_count(), 1);

        held.pop().unwrap().release();
        let again = pool.get_buffer();
        assert!(again.is_some());
        assert!(pool.get_buffer().is_none());
    }

    #[test]
    fn fresh_pool_hands_out_lowest_index_first() {
        let pool = BufferPool::new(3);
        let a = pool.get_buffer().unwrap();
        let b = pool.get_buffer().unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
    }

    #[test]
    fn allocation_starts_with_one_reference_and_empty_lengths() {
        let pool = BufferPool::new(1);
        let buffer = pool.get_buffer().unwrap();
        assert_eq!(buffer.ref_count(), 1);
        assert_eq!(buffer.frame_length(), 0);
        assert_eq!(buffer.payload_length(), 0);
    }

    #[test]
    fn clone_keeps_slot_alive_until_last_release() {
        let pool = BufferPool::new(1);
        let first = pool.get_buffer().unwrap();
        let second = first.clone();
        assert_eq!(first.ref_count(), 2);
        assert!(first.ptr_eq(&second));

        drop(first);
        assert_eq!(second.ref_count(), 1);
        assert_eq!(pool.available(), 0);

        second.release();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn release_scrubs_contents() {
        let pool = BufferPool::new(1);
        let buffer = pool.get_buffer().unwrap();
        buffer.fill_payload(b"secret");
        buffer.lock().frame_length = 12;
        buffer.release();

        let reused = pool.get_buffer().unwrap();
        let contents = reused.lock();
        assert!(contents.data.iter().all(|b| *b == 0));
        assert_eq!(contents.frame_length, 0);
    }

    #[test]
    fn fill_payload_truncates_to_buffer() {
        let pool = BufferPool::new(1);
        let buffer = pool.get_buffer().unwrap();
        let copied = buffer.fill_payload(&[0xAB; 200]);
        assert_eq!(copied, BUFFER_SIZE - HEADER_SIZE - CHECKSUM_SIZE);
        assert_eq!(buffer.payload_length(), copied);
        assert_eq!(buffer.lock().data[HEADER_SIZE], 0xAB);
    }

    #[test]
    fn try_free_refuses_with_outstanding_buffers() {
        let pool = BufferPool::new(2);
        let held = pool.get_buffer().unwrap();
        assert_eq!(pool.outstanding(), vec![0]);

        let pool = pool.try_free().unwrap_err();
        drop(held);
        assert!(pool.outstanding().is_empty());
        assert!(pool.try_free().is_ok());
    }

    #[test]
    fn buffers_outlive_pool_handle() {
        let pool = BufferPool::new(1);
        let buffer = pool.get_buffer().unwrap();
        drop(pool);
        buffer.fill_payload(b"still valid");
        assert_eq!(buffer.payload_length(), 11);
    }

    #[test]
    fn concurrent_get_and_release() {
        let pool = BufferPool::new(8);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(buffer) = pool.get_buffer() {
                            let copy = buffer.clone();
                            drop(buffer);
                            copy.release();
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(pool.available(), 8);
        assert!(pool.outstanding().is_empty());
    }

    #[test]
    fn payload_bytes_of_short_frame_is_empty() {
        let pool = BufferPool::new(1);
        let buffer = pool.get_buffer().unwrap();
        assert!(buffer.payload_bytes().is_empty());
        assert!(buffer.frame_bytes().is_empty());
    }
}
