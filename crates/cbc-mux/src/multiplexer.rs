//! Routing between the link layer and channel receivers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};

use cbc_frame::{
    FrameBuffer, FrameHeader, LinkLayer, CHANNEL_COUNT, CHECKSUM_SIZE, HEADER_SIZE, MAX_PRIORITY,
};
use cbc_transport::ByteSink;
use tracing::{debug, trace};

use crate::channel::{CHANNELS, DEBUG_IN, DEBUG_OUT};
use crate::error::{MuxError, Result};
use crate::receiver::ChannelReceiver;

struct ChannelSlot {
    priority: AtomicU8,
    receiver: RwLock<Option<ChannelReceiver>>,
}

/// Per-channel priorities and receivers.
pub struct Multiplexer {
    channels: Box<[ChannelSlot]>,
}

fn check_priority(priority: u8) -> Result<()> {
    if priority > MAX_PRIORITY {
        return Err(MuxError::InvalidPriority(priority));
    }
    Ok(())
}

impl Multiplexer {
    /// A multiplexer with the default channel priorities and no receivers.
    pub fn new() -> Self {
        let channels = CHANNELS
            .iter()
            .map(|info| ChannelSlot {
                priority: AtomicU8::new(info.default_priority),
                receiver: RwLock::new(None),
            })
            .collect();
        Self { channels }
    }

    fn slot(&self, channel: usize) -> Result<&ChannelSlot> {
        self.channels
            .get(channel)
            .ok_or(MuxError::InvalidChannel(channel))
    }

    /// Set a channel's priority and receiver. `None` unregisters the receiver.
    pub fn configure_channel(
        &self,
        channel: usize,
        priority: u8,
        receiver: Option<ChannelReceiver>,
    ) -> Result<()> {
        let slot = self.slot(channel)?;
        check_priority(priority)?;
        slot.priority.store(priority, Ordering::Relaxed);
        debug!(channel, priority, registered = receiver.is_some(), "channel configured");
        *slot
            .receiver
            .write()
            .unwrap_or_else(PoisonError::into_inner) = receiver;
        Ok(())
    }

    pub fn set_priority(&self, channel: usize, priority: u8) -> Result<()> {
        let slot = self.slot(channel)?;
        check_priority(priority)?;
        slot.priority.store(priority, Ordering::Relaxed);
        Ok(())
    }

    pub fn get_priority(&self, channel: usize) -> Result<u8> {
        Ok(self.slot(channel)?.priority.load(Ordering::Relaxed))
    }

    /// The receiver registered on `channel`, if any.
    pub fn receiver(&self, channel: usize) -> Option<ChannelReceiver> {
        self.channels.get(channel).and_then(|slot| {
            slot.receiver
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// Unregister every receiver, returning them by channel number.
    pub fn take_receivers(&self) -> Vec<Option<ChannelReceiver>> {
        self.channels
            .iter()
            .map(|slot| {
                slot.receiver
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
            })
            .collect()
    }

    /// Put back receivers taken by [`Multiplexer::take_receivers`].
    pub fn restore_receivers(&self, receivers: Vec<Option<ChannelReceiver>>) {
        for (slot, receiver) in self.channels.iter().zip(receivers) {
            *slot
                .receiver
                .write()
                .unwrap_or_else(PoisonError::into_inner) = receiver;
        }
    }

    /// Route a received frame to its channel's receiver.
    ///
    /// A buffer receiver gets its own reference, which is also mirrored to
    /// the debug-in channel. A data receiver sees the payload region while
    /// the buffer is locked. Either way this call's reference is released
    /// before it returns.
    pub fn process_rx_buffer(&self, buffer: FrameBuffer) {
        let header = {
            let contents = buffer.lock();
            FrameHeader::parse(contents.frame())
        };
        let Some(header) = header else {
            debug!(index = buffer.index(), "dropping buffer without a frame header");
            return;
        };

        let channel = usize::from(header.channel);
        if channel >= CHANNEL_COUNT {
            debug!(channel, "frame for unknown channel dropped");
            return;
        }

        match self.receiver(channel) {
            Some(ChannelReceiver::Buffer(receiver)) => {
                trace!(channel, "delivering buffer");
                receiver.receive_buffer(buffer.clone());
                if channel != DEBUG_IN {
                    self.mirror(DEBUG_IN, &buffer);
                }
            }
            Some(ChannelReceiver::Data(receiver)) => {
                trace!(channel, "delivering data");
                let contents = buffer.lock();
                let end = contents
                    .frame_length
                    .saturating_sub(CHECKSUM_SIZE)
                    .max(HEADER_SIZE);
                receiver.receive_data(&contents.data[HEADER_SIZE..end]);
            }
            None => {
                debug!(channel, "frame for unconfigured channel dropped");
            }
        }
    }

    /// Assemble `buffer` as a frame on `channel` and send it through `link`.
    ///
    /// The frame is mirrored to the debug-out channel once it is assembled.
    pub fn transmit_buffer<S: ByteSink>(
        &self,
        link: &LinkLayer<S>,
        channel: usize,
        buffer: &FrameBuffer,
    ) -> Result<()> {
        let priority = self.get_priority(channel)?;
        let held = buffer.clone();
        link.assemble_for_transmission(channel as u8, priority, &held)?;
        if channel != DEBUG_OUT {
            self.mirror(DEBUG_OUT, &held);
        }
        Ok(())
    }

    fn mirror(&self, channel: usize, buffer: &FrameBuffer) {
        match self.receiver(channel) {
            Some(ChannelReceiver::Buffer(receiver)) => receiver.receive_buffer(buffer.clone()),
            Some(ChannelReceiver::Data(receiver)) => {
                let contents = buffer.lock();
                receiver.receive_data(contents.frame());
            }
            None => {}
        }
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<usize> = (0..self.channels.len())
            .filter(|channel| self.receiver(*channel).is_some())
            .collect();
        f.debug_struct("Multiplexer")
            .field("registered", &registered)
            .finish()
    }
}
