use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cbc_frame::{BufferQueue, FrameBuffer, QUEUE_LENGTH};
use tracing::{trace, warn};

use crate::channel::{channel_info, ChannelKind};
use crate::error::{MuxError, Result};
use crate::receiver::BufferReceiver;

/// Endpoints one channel may have open at the same time.
pub const MAX_OPEN_ENDPOINTS: usize = 6;

/// A bounded receive queue for one channel.
///
/// Frames beyond [`QUEUE_LENGTH`] are dropped with a warning. Reads return
/// the view the channel's kind defines (see [`ChannelKind::payload_view`]).
pub struct ChannelEndpoint {
    channel: usize,
    kind: ChannelKind,
    queue: Mutex<BufferQueue<FrameBuffer, QUEUE_LENGTH>>,
    readable: Condvar,
    dropped: AtomicU64,
}

impl ChannelEndpoint {
    pub fn new(channel: usize) -> Result<Self> {
        let info = channel_info(channel).ok_or(MuxError::InvalidChannel(channel))?;
        Ok(Self {
            channel,
            kind: info.kind,
            queue: Mutex::new(BufferQueue::new()),
            readable: Condvar::new(),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn queue(&self) -> MutexGuard<'_, BufferQueue<FrameBuffer, QUEUE_LENGTH>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the oldest buffer without waiting.
    pub fn try_recv_buffer(&self) -> Option<FrameBuffer> {
        self.queue().dequeue()
    }

    /// Take the oldest frame's view without waiting.
    pub fn try_recv(&self) -> Option<Bytes> {
        self.try_recv_buffer()
            .map(|buffer| self.kind.payload_view(&buffer))
    }

    /// Wait up to `timeout` for a frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue();
        loop {
            if let Some(buffer) = queue.dequeue() {
                drop(queue);
                return Ok(self.kind.payload_view(&buffer));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MuxError::Timeout(timeout));
            }
            queue = self
                .readable
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Whether a frame is waiting.
    pub fn is_readable(&self) -> bool {
        !self.queue().is_empty()
    }

    /// Number of frames waiting.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Release every waiting frame.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue();
        let mut released = 0;
        while queue.dequeue().is_some() {
            released += 1;
        }
        released
    }
}

impl BufferReceiver for ChannelEndpoint {
    fn receive_buffer(&self, buffer: FrameBuffer) {
        let mut queue = self.queue();
        match queue.enqueue(buffer) {
            Ok(()) => {
                trace!(channel = self.channel, pending = queue.len(), "frame queued");
                drop(queue);
                self.readable.notify_one();
            }
            Err(rejected) => {
                drop(queue);
                drop(rejected);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(channel = self.channel, "endpoint queue full, frame dropped");
            }
        }
    }
}

/// The endpoints open on one channel.
///
/// Registered as the channel's buffer receiver; every delivered frame is
/// queued on each endpoint, which holds its own reference.
#[derive(Default)]
pub(crate) struct EndpointSet {
    endpoints: RwLock<Vec<Arc<ChannelEndpoint>>>,
}

impl EndpointSet {
    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<ChannelEndpoint>>> {
        self.endpoints.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<ChannelEndpoint>>> {
        self.endpoints.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `endpoint`, refusing more than [`MAX_OPEN_ENDPOINTS`].
    pub(crate) fn insert(&self, endpoint: Arc<ChannelEndpoint>) -> Result<()> {
        let mut endpoints = self.write();
        if endpoints.len() >= MAX_OPEN_ENDPOINTS {
            return Err(MuxError::Busy {
                channel: endpoint.channel(),
                max: MAX_OPEN_ENDPOINTS,
            });
        }
        endpoints.push(endpoint);
        Ok(())
    }

    /// Remove `endpoint`. Returns whether it was open here.
    pub(crate) fn remove(&self, endpoint: &Arc<ChannelEndpoint>) -> bool {
        let mut endpoints = self.write();
        let before = endpoints.len();
        endpoints.retain(|open| !Arc::ptr_eq(open, endpoint));
        endpoints.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }
}

impl BufferReceiver for EndpointSet {
    fn receive_buffer(&self, buffer: FrameBuffer) {
        let endpoints = self.read();
        if endpoints.is_empty() {
            trace!(index = buffer.index(), "no open endpoint, frame released");
            return;
        }
        for endpoint in endpoints.iter() {
            endpoint.receive_buffer(buffer.clone());
        }
    }
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("channel", &self.channel)
            .field("kind", &self.kind)
            .field("pending", &self.pending())
            .finish()
    }
}
