//! A complete CBC stack over one byte transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use cbc_frame::{
    BufferPool, FrameBuffer, LinkConfig, LinkError, LinkLayer, LinkStats, CHANNEL_COUNT,
    MAX_PAYLOAD,
};
use cbc_transport::ByteSink;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::{channel_info, write_raw_header, ChannelKind, RAW_HEADER_SIZE};
use crate::endpoint::{ChannelEndpoint, EndpointSet};
use crate::error::{MuxError, Result};
use crate::multiplexer::Multiplexer;
use crate::receiver::ChannelReceiver;

/// Session settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub link: LinkConfig,
    /// Priority overrides, keyed by channel number.
    pub channel_priorities: BTreeMap<usize, u8>,
}

/// Outcome of one [`CbcSession::receive`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Received {
    /// Frames delivered to channels.
    pub frames: usize,
    /// Leading bytes of the input taken into the receive ring. The rest
    /// must be offered again.
    pub accepted: usize,
    /// Delivery stopped because the pool had no free buffer. Frames left
    /// in the ring are delivered by a later call once buffers come back.
    pub pool_exhausted: bool,
}

/// Link layer plus multiplexer for one carrier board connection.
pub struct CbcSession<S> {
    link: LinkLayer<S>,
    mux: Multiplexer,
    endpoints: Box<[Arc<EndpointSet>]>,
}

impl<S: ByteSink> CbcSession<S> {
    /// Build a session sending through `sink`.
    pub fn init(config: SessionConfig, sink: S) -> Result<Self> {
        let mux = Multiplexer::new();
        for (&channel, &priority) in &config.channel_priorities {
            mux.set_priority(channel, priority)?;
        }
        debug!(
            overrides = config.channel_priorities.len(),
            "cbc session initialised"
        );
        Ok(Self {
            link: LinkLayer::new(config.link, sink),
            mux,
            endpoints: (0..CHANNEL_COUNT)
                .map(|_| Arc::new(EndpointSet::default()))
                .collect(),
        })
    }

    pub fn link(&self) -> &LinkLayer<S> {
        &self.link
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn pool(&self) -> &BufferPool {
        self.link.pool()
    }

    /// Offer received bytes to the link. Returns how many were accepted.
    pub fn on_bytes_received(&self, bytes: &[u8]) -> usize {
        self.link.on_bytes_received(bytes)
    }

    /// Deliver every complete frame in the receive ring to its channel.
    pub fn process_rx(&self) -> Result<usize> {
        Ok(self
            .link
            .process_rx(|buffer| self.mux.process_rx_buffer(buffer))?)
    }

    /// Feed `bytes` through the receive path, processing as the ring fills.
    ///
    /// Stops early when the pool runs dry; `accepted` then tells the caller
    /// where to resume once buffers have been released.
    pub fn receive(&self, bytes: &[u8]) -> Result<Received> {
        let mut received = Received::default();
        loop {
            let accepted = self.on_bytes_received(&bytes[received.accepted..]);
            received.accepted += accepted;

            let mut frames = 0;
            let result = self.link.process_rx(|buffer| {
                frames += 1;
                self.mux.process_rx_buffer(buffer);
            });
            received.frames += frames;
            match result {
                Ok(_) => {}
                Err(LinkError::PoolExhausted) => {
                    received.pool_exhausted = true;
                    debug!(
                        accepted = received.accepted,
                        remaining = bytes.len() - received.accepted,
                        "receive paused on empty pool"
                    );
                    break;
                }
                Err(err) => return Err(err.into()),
            }

            if received.accepted == bytes.len() {
                break;
            }
            if accepted == 0 && frames == 0 {
                warn!(
                    remaining = bytes.len() - received.accepted,
                    "receive made no progress"
                );
                break;
            }
        }
        Ok(received)
    }

    /// Set a channel's priority and receiver.
    pub fn configure_channel(
        &self,
        channel: usize,
        priority: u8,
        receiver: Option<ChannelReceiver>,
    ) -> Result<()> {
        self.mux.configure_channel(channel, priority, receiver)
    }

    pub fn set_priority(&self, channel: usize, priority: u8) -> Result<()> {
        self.mux.set_priority(channel, priority)
    }

    pub fn get_priority(&self, channel: usize) -> Result<u8> {
        self.mux.get_priority(channel)
    }

    /// Open a new endpoint on `channel`.
    ///
    /// Every endpoint open on a channel gets its own copy of each frame. A
    /// channel takes at most [`MAX_OPEN_ENDPOINTS`](crate::endpoint::MAX_OPEN_ENDPOINTS);
    /// beyond that this fails with [`MuxError::Busy`].
    pub fn open_endpoint(&self, channel: usize) -> Result<Arc<ChannelEndpoint>> {
        let set = self
            .endpoints
            .get(channel)
            .ok_or(MuxError::InvalidChannel(channel))?;
        let endpoint = Arc::new(ChannelEndpoint::new(channel)?);
        set.insert(Arc::clone(&endpoint))?;

        let priority = self.mux.get_priority(channel)?;
        if let Err(err) =
            self.mux
                .configure_channel(channel, priority, Some(ChannelReceiver::Buffer(set.clone())))
        {
            set.remove(&endpoint);
            return Err(err);
        }
        debug!(channel, open = set.len(), "endpoint opened");
        Ok(endpoint)
    }

    /// Close an endpoint opened by [`CbcSession::open_endpoint`].
    ///
    /// Frames still queued on it are released. Returns how many.
    pub fn close_endpoint(&self, endpoint: &Arc<ChannelEndpoint>) -> Result<usize> {
        let channel = endpoint.channel();
        let set = self
            .endpoints
            .get(channel)
            .ok_or(MuxError::InvalidChannel(channel))?;
        if !set.remove(endpoint) {
            return Err(MuxError::EndpointNotOpen(channel));
        }
        let released = endpoint.clear();
        debug!(channel, released, open = set.len(), "endpoint closed");
        Ok(released)
    }

    /// A free buffer from the session pool.
    pub fn get_buffer(&self) -> Option<FrameBuffer> {
        self.link.pool().get_buffer()
    }

    /// Send a prepared buffer on `channel`.
    ///
    /// For raw channels the first three payload bytes are reserved and get
    /// the raw sub-header here.
    pub fn transmit_buffer(&self, channel: usize, buffer: &FrameBuffer) -> Result<()> {
        let info = channel_info(channel).ok_or(MuxError::InvalidChannel(channel))?;
        if info.kind == ChannelKind::Raw {
            let mut contents = buffer.lock();
            let payload_length = contents.payload_length;
            let Some(real_length) = payload_length.checked_sub(RAW_HEADER_SIZE) else {
                return Err(LinkError::InvalidParameter(
                    "raw payload shorter than its sub-header",
                )
                .into());
            };
            write_raw_header(contents.payload_mut(), real_length as u16);
        }
        self.mux.transmit_buffer(&self.link, channel, buffer)
    }

    /// Copy `data` into a pool buffer and send it on `channel`.
    ///
    /// Data that does not fit one frame is truncated. Returns the number of
    /// bytes sent.
    pub fn transmit_data(&self, channel: usize, data: &[u8]) -> Result<usize> {
        let info = channel_info(channel).ok_or(MuxError::InvalidChannel(channel))?;
        if !info.kind.is_writable() {
            return Err(MuxError::WriteNotSupported(channel));
        }

        let Some(buffer) = self.get_buffer() else {
            warn!(channel, "no buffer available for outbound data");
            return Err(MuxError::ResourceExhausted);
        };

        let offset = info.kind.payload_offset();
        let copied = data.len().min(MAX_PAYLOAD - offset);
        if copied < data.len() {
            warn!(
                channel,
                length = data.len(),
                copied,
                "outbound data truncated to one frame"
            );
        }
        {
            let mut contents = buffer.lock();
            contents.payload_mut()[offset..offset + copied].copy_from_slice(&data[..copied]);
            contents.payload_length = offset + copied;
        }

        self.transmit_buffer(channel, &buffer)?;
        Ok(copied)
    }

    /// Send queued frames, up to the per-call limit.
    pub fn transmit_drain(&self) -> Result<usize> {
        Ok(self.link.transmit_drain()?)
    }

    pub fn stats(&self) -> LinkStats {
        self.link.stats()
    }

    /// Unregister receivers and free the pool.
    ///
    /// Fails while any buffer is still held (for example by an endpoint
    /// that has not been drained). The session handed back has its
    /// receivers registered again; queued transmissions and unread ring
    /// bytes are gone, see [`LinkLayer::close`].
    pub fn close(self) -> std::result::Result<(), Self> {
        let Self {
            link,
            mux,
            endpoints,
        } = self;
        let receivers = mux.take_receivers();
        match link.close() {
            Ok(()) => Ok(()),
            Err(link) => {
                mux.restore_receivers(receivers);
                Err(Self {
                    link,
                    mux,
                    endpoints,
                })
            }
        }
    }
}

impl<S> std::fmt::Debug for CbcSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcSession")
            .field("link", &self.link)
            .field("mux", &self.mux)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use cbc_frame::{Frame, Granularity, HEADER_SIZE};
    use cbc_transport::MemorySink;

    use super::*;
    use crate::channel::{DEBUG_IN, DEBUG_OUT, DLT, LIFECYCLE, PMT, RAW_FIRST};

    fn session(pool_size: usize) -> CbcSession<Arc<MemorySink>> {
        let config = SessionConfig {
            link: LinkConfig {
                pool_size,
                ..LinkConfig::default()
            },
            ..SessionConfig::default()
        };
        CbcSession::init(config, Arc::new(MemorySink::new())).unwrap()
    }

    #[test]
    fn init_applies_priority_overrides() {
        let mut config = SessionConfig::default();
        config.channel_priorities.insert(DLT, 1);
        let session = CbcSession::init(config, MemorySink::new()).unwrap();
        assert_eq!(session.get_priority(DLT).unwrap(), 1);
        assert_eq!(session.get_priority(LIFECYCLE).unwrap(), 6);
    }

    #[test]
    fn init_rejects_bad_overrides() {
        let mut config = SessionConfig::default();
        config.channel_priorities.insert(DLT, 9);
        assert!(matches!(
            CbcSession::init(config, MemorySink::new()),
            Err(MuxError::InvalidPriority(9))
        ));

        let mut config = SessionConfig::default();
        config.channel_priorities.insert(99, 1);
        assert!(matches!(
            CbcSession::init(config, MemorySink::new()),
            Err(MuxError::InvalidChannel(99))
        ));
    }

    #[test]
    fn config_from_json() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"link": {"granularity": 16}, "channel_priorities": {"4": 7}}"#,
        )
        .unwrap();
        assert_eq!(config.link.granularity, Granularity::Sixteen);
        assert_eq!(config.channel_priorities.get(&4), Some(&7));
    }

    #[test]
    fn raw_data_crosses_between_sessions() {
        let tx = session(4);
        let rx = session(4);
        let endpoint = rx.open_endpoint(RAW_FIRST).unwrap();

        assert_eq!(tx.transmit_data(RAW_FIRST, b"raw bytes").unwrap(), 9);
        let wire = tx.link().sink().concatenated();

        let frame = Frame::from_bytes(&wire).unwrap();
        assert_eq!(&frame.payload[..RAW_HEADER_SIZE], &[0x00, 9, 0]);

        assert_eq!(rx.receive(&wire).unwrap().frames, 1);
        assert_eq!(endpoint.try_recv().unwrap().as_ref(), b"raw bytes");
        assert_eq!(rx.pool().available(), 4);
    }

    #[test]
    fn default_channel_view_includes_padding() {
        let tx = session(2);
        let rx = session(2);
        let endpoint = rx.open_endpoint(LIFECYCLE).unwrap();

        tx.transmit_data(LIFECYCLE, b"boot").unwrap();
        rx.receive(&tx.link().sink().concatenated()).unwrap();
        assert_eq!(endpoint.try_recv().unwrap().as_ref(), b"boot");

        tx.transmit_data(LIFECYCLE, b"ok").unwrap();
        rx.receive(&tx.link().sink().take()[1]).unwrap();
        assert_eq!(endpoint.try_recv().unwrap().as_ref(), &[b'o', b'k', 0xFF, 0xFF]);
    }

    #[test]
    fn oversized_data_is_truncated() {
        let tx = session(2);
        let data = [0x42u8; 200];
        assert_eq!(tx.transmit_data(LIFECYCLE, &data).unwrap(), MAX_PAYLOAD);
        assert_eq!(
            tx.transmit_data(RAW_FIRST + 1, &data).unwrap(),
            MAX_PAYLOAD - RAW_HEADER_SIZE
        );
        let sent = tx.link().sink().take();
        assert!(sent.iter().all(|frame| frame.len() == cbc_frame::MAX_FRAME_SIZE));
    }

    #[test]
    fn debug_channels_reject_writes_hidden_accept() {
        let tx = session(2);
        assert!(matches!(
            tx.transmit_data(DEBUG_OUT, b"x"),
            Err(MuxError::WriteNotSupported(DEBUG_OUT))
        ));
        assert!(matches!(
            tx.transmit_data(DEBUG_IN, b"x"),
            Err(MuxError::WriteNotSupported(DEBUG_IN))
        ));
        assert_eq!(tx.transmit_data(PMT, b"pmt").unwrap(), 3);
        assert!(matches!(
            tx.transmit_data(21, b"x"),
            Err(MuxError::InvalidChannel(21))
        ));
    }

    #[test]
    fn empty_pool_reports_resource_exhausted() {
        let tx = session(1);
        let held = tx.get_buffer().unwrap();
        let err = tx.transmit_data(LIFECYCLE, b"x").unwrap_err();
        assert!(matches!(err, MuxError::ResourceExhausted));
        assert!(err.is_retryable());
        drop(held);
        assert!(tx.transmit_data(LIFECYCLE, b"x").is_ok());
    }

    #[test]
    fn raw_transmit_buffer_needs_room_for_sub_header() {
        let tx = session(1);
        let buffer = tx.get_buffer().unwrap();
        buffer.lock().payload_length = 2;
        assert!(matches!(
            tx.transmit_buffer(RAW_FIRST, &buffer),
            Err(MuxError::Link(LinkError::InvalidParameter(_)))
        ));
    }

    #[test]
    fn debug_endpoints_mirror_traffic() {
        let tx = session(4);
        let out = tx.open_endpoint(DEBUG_OUT).unwrap();
        let rx = session(4);
        let input = rx.open_endpoint(DEBUG_IN).unwrap();
        let lifecycle = rx.open_endpoint(LIFECYCLE).unwrap();

        tx.transmit_data(LIFECYCLE, b"mirror").unwrap();
        let wire = tx.link().sink().concatenated();
        assert_eq!(out.try_recv().unwrap().as_ref(), wire.as_slice());

        rx.receive(&wire).unwrap();
        assert_eq!(input.try_recv().unwrap().as_ref(), wire.as_slice());
        assert!(lifecycle.is_readable());
    }

    #[test]
    fn receive_pauses_on_empty_pool() {
        let tx = session(4);
        let rx = session(1);
        let endpoint = rx.open_endpoint(LIFECYCLE).unwrap();
        tx.transmit_data(LIFECYCLE, b"one").unwrap();
        tx.transmit_data(LIFECYCLE, b"two").unwrap();
        let wire = tx.link().sink().concatenated();

        let received = rx.receive(&wire).unwrap();
        assert_eq!(
            received,
            Received {
                frames: 1,
                accepted: wire.len(),
                pool_exhausted: true,
            }
        );
        assert_eq!(endpoint.pending(), 1);

        endpoint.clear();
        let received = rx.receive(&[]).unwrap();
        assert_eq!(received.frames, 1);
        assert!(!received.pool_exhausted);
        assert_eq!(endpoint.pending(), 1);
    }

    #[test]
    fn receive_resumes_from_accepted_offset() {
        let tx = session(4);
        let rx = session(1);
        let endpoint = rx.open_endpoint(LIFECYCLE).unwrap();

        let mut wire = Vec::new();
        for i in 0..30u8 {
            tx.transmit_data(LIFECYCLE, &[i; 8]).unwrap();
            wire.extend_from_slice(&tx.link().sink().take()[0]);
        }
        assert_eq!(wire.len(), 360);

        let mut rest = wire.as_slice();
        let mut recovered = Vec::new();
        loop {
            let received = rx.receive(rest).unwrap();
            rest = &rest[received.accepted..];
            while let Some(view) = endpoint.try_recv() {
                recovered.push(view[0]);
            }
            if rest.is_empty() && !received.pool_exhausted {
                break;
            }
        }

        assert_eq!(recovered, (0..30u8).collect::<Vec<_>>());
        assert_eq!(rx.stats().sequence_errors, 0);
        assert!(rx.stats().pool_exhausted > 0);
        assert_eq!(rx.pool().available(), 1);
    }

    #[test]
    fn every_open_endpoint_sees_each_frame() {
        let tx = session(4);
        let rx = session(4);
        let first = rx.open_endpoint(LIFECYCLE).unwrap();
        let second = rx.open_endpoint(LIFECYCLE).unwrap();

        tx.transmit_data(LIFECYCLE, b"fan").unwrap();
        rx.receive(&tx.link().sink().take()[0]).unwrap();
        assert_eq!(first.pending(), 1);
        assert_eq!(second.pending(), 1);
        assert_eq!(rx.pool().available(), 3);

        assert_eq!(rx.close_endpoint(&first).unwrap(), 1);
        assert!(matches!(
            rx.close_endpoint(&first),
            Err(MuxError::EndpointNotOpen(LIFECYCLE))
        ));

        tx.transmit_data(LIFECYCLE, b"one").unwrap();
        rx.receive(&tx.link().sink().take()[0]).unwrap();
        assert_eq!(first.pending(), 0);
        assert_eq!(second.pending(), 2);

        second.clear();
        assert_eq!(rx.pool().available(), 4);
    }

    #[test]
    fn open_endpoints_are_bounded_per_channel() {
        let rx = session(1);
        let open: Vec<_> = (0..crate::endpoint::MAX_OPEN_ENDPOINTS)
            .map(|_| rx.open_endpoint(DLT).unwrap())
            .collect();
        assert!(matches!(
            rx.open_endpoint(DLT),
            Err(MuxError::Busy { channel: DLT, .. })
        ));
        assert!(rx.open_endpoint(LIFECYCLE).is_ok());

        rx.close_endpoint(&open[0]).unwrap();
        assert!(rx.open_endpoint(DLT).is_ok());
    }

    #[test]
    fn failed_close_keeps_receivers() {
        let tx = session(4);
        let rx = session(4);
        let endpoint = rx.open_endpoint(LIFECYCLE).unwrap();
        tx.transmit_data(LIFECYCLE, b"held").unwrap();
        rx.receive(&tx.link().sink().take()[0]).unwrap();

        let rx = rx.close().unwrap_err();
        tx.transmit_data(LIFECYCLE, b"more").unwrap();
        rx.receive(&tx.link().sink().take()[0]).unwrap();
        assert_eq!(endpoint.pending(), 2);

        endpoint.clear();
        assert!(rx.close().is_ok());
    }

    #[test]
    fn close_requires_drained_endpoints() {
        let tx = session(2);
        let rx = session(2);
        let endpoint = rx.open_endpoint(LIFECYCLE).unwrap();
        tx.transmit_data(LIFECYCLE, b"held").unwrap();
        rx.receive(&tx.link().sink().concatenated()).unwrap();

        let rx = rx.close().unwrap_err();
        endpoint.clear();
        assert!(rx.close().is_ok());
        assert!(tx.close().is_ok());
    }

    #[test]
    fn transmitted_payload_starts_after_header() {
        let tx = session(1);
        tx.transmit_data(LIFECYCLE, b"abc").unwrap();
        let wire = tx.link().sink().concatenated();
        assert_eq!(&wire[HEADER_SIZE..HEADER_SIZE + 3], b"abc");
    }
}
