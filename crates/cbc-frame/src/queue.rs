use tracing::{debug, trace};

/// Bounded FIFO ring of `N` items, `N` a power of two.
///
/// Not synchronised: the owner's lock protects it. Moving an item in or out
/// transfers whatever it owns (for [`FrameBuffer`](crate::FrameBuffer) that
/// is one reference); the queue itself never touches reference counts.
pub struct BufferQueue<T, const N: usize> {
    slots: [Option<T>; N],
    read: u32,
    write: u32,
}

impl<T, const N: usize> BufferQueue<T, N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(
        N.is_power_of_two() && N <= 1 << 31,
        "queue capacity must be a power of two"
    );

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;
        Self {
            slots: std::array::from_fn(|_| None),
            read: 0,
            write: 0,
        }
    }

    /// Append `item`, or hand it back if the queue is full.
    pub fn enqueue(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            debug!(capacity = N, "queue full, rejecting item");
            return Err(item);
        }
        self.slots[Self::slot(self.write)] = Some(item);
        self.write = self.write.wrapping_add(1);
        Ok(())
    }

    /// Remove the oldest item.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.is_empty() {
            trace!("queue empty");
            return None;
        }
        let item = self.slots[Self::slot(self.read)].take();
        self.read = self.read.wrapping_add(1);
        item
    }

    pub fn len(&self) -> usize {
        self.write.wrapping_sub(self.read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    fn slot(index: u32) -> usize {
        index as usize & (N - 1)
    }
}

impl<T, const N: usize> Default for BufferQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> std::fmt::Debug for BufferQueue<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferQueue")
            .field("len", &self.len())
            .field("capacity", &N)
            .finish()
    }
}
