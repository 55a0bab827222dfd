/// Size of the receive window.
pub const RING_SIZE: usize = 256;

/// Receive byte window indexed by wrapping 8-bit cursors.
///
/// `current` is the next unread byte, `next` the next free slot. One slot
/// stays empty so that a full ring and an empty ring look different, which
/// leaves room for 255 unread bytes.
pub struct RxRing {
    data: [u8; RING_SIZE],
    current: u8,
    next: u8,
}

impl RxRing {
    pub fn new() -> Self {
        Self {
            data: [0u8; RING_SIZE],
            current: 0,
            next: 0,
        }
    }

    /// Unread bytes.
    pub fn available(&self) -> usize {
        usize::from(self.next.wrapping_sub(self.current))
    }

    /// Bytes that can be pushed without overwriting unread data.
    pub fn free_space(&self) -> usize {
        RING_SIZE - 1 - self.available()
    }

    /// Append as many of `bytes` as fit. Returns how many were taken.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.free_space());
        for byte in &bytes[..accepted] {
            self.data[usize::from(self.next)] = *byte;
            self.next = self.next.wrapping_add(1);
        }
        accepted
    }

    /// Unread byte at `offset` from the read cursor.
    pub fn peek(&self, offset: usize) -> u8 {
        self.data[usize::from(self.current.wrapping_add(offset as u8))]
    }

    /// Copy `dst.len()` unread bytes without consuming them.
    pub fn copy_out(&self, dst: &mut [u8]) {
        for (offset, slot) in dst.iter_mut().enumerate() {
            *slot = self.peek(offset);
        }
    }

    /// Consume up to `count` unread bytes.
    pub fn release(&mut self, count: usize) {
        let count = count.min(self.available());
        self.current = self.current.wrapping_add(count as u8);
    }

    /// Drop all unread bytes.
    pub fn clear(&mut self) {
        self.current = self.next;
    }
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RxRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxRing")
            .field("current", &self.current)
            .field("next", &self.next)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_respects_capacity() {
        let mut ring = RxRing::new();
        assert_eq!(ring.push(&[0xAA; 300]), 255);
        assert_eq!(ring.available(), 255);
        assert_eq!(ring.free_space(), 0);
        assert_eq!(ring.push(&[0x01]), 0);

        ring.release(10);
        assert_eq!(ring.push(&[0x01; 20]), 10);
    }

    #[test]
    fn peek_and_copy_across_wrap() {
        let mut ring = RxRing::new();
        ring.push(&[0u8; 250]);
        ring.release(250);

        let bytes: Vec<u8> = (1..=12).collect();
        assert_eq!(ring.push(&bytes), 12);
        assert_eq!(ring.peek(0), 1);
        assert_eq!(ring.peek(11), 12);

        let mut out = [0u8; 12];
        ring.copy_out(&mut out);
        assert_eq!(out.to_vec(), bytes);
        assert_eq!(ring.available(), 12);
    }

    #[test]
    fn release_never_passes_write_cursor() {
        let mut ring = RxRing::new();
        ring.push(&[1, 2, 3]);
        ring.release(10);
        assert_eq!(ring.available(), 0);
        ring.push(&[4]);
        assert_eq!(ring.peek(0), 4);
    }

    #[test]
    fn clear_discards_unread() {
        let mut ring = RxRing::new();
        ring.push(&[1, 2, 3]);
        ring.clear();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.free_space(), 255);
    }
}
