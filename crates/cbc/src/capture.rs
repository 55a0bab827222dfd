use std::sync::{Arc, Mutex, PoisonError};

use cbc_frame::FrameBuffer;
use cbc_mux::{CbcSession, ChannelKind, ChannelReceiver, MuxError, CHANNELS};
use cbc_transport::ByteSink;

use crate::exit::{mux_error, CliResult};
use crate::output::FrameRecord;

/// Collects delivered frames from several channels in arrival order.
pub struct FrameCapture {
    captured: Arc<Mutex<Vec<FrameBuffer>>>,
}

impl FrameCapture {
    /// Register a shared receiver on each of `channels`.
    pub fn attach<S: ByteSink>(session: &CbcSession<S>, channels: &[usize]) -> CliResult<Self> {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let receiver = ChannelReceiver::buffer(move |buffer: FrameBuffer| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(buffer);
        });

        for &channel in channels {
            let priority = session
                .get_priority(channel)
                .map_err(|err| mux_error("channel setup failed", err))?;
            session
                .configure_channel(channel, priority, Some(receiver.clone()))
                .map_err(|err| mux_error("channel setup failed", err))?;
        }
        Ok(Self { captured })
    }

    /// Feed `bytes` through `session` and return the frames that arrived.
    ///
    /// Captured buffers go back to the pool between receive calls, so a
    /// pause on an empty pool resumes where it stopped.
    pub fn feed<S: ByteSink>(
        &self,
        session: &CbcSession<S>,
        bytes: &[u8],
    ) -> CliResult<Vec<FrameRecord>> {
        let mut records = Vec::new();
        let mut rest = bytes;
        loop {
            let received = session
                .receive(rest)
                .map_err(|err| mux_error("receive failed", err))?;
            rest = &rest[received.accepted..];
            records.extend(self.drain());

            if rest.is_empty() && !received.pool_exhausted {
                break;
            }
            if received.frames == 0 && received.accepted == 0 {
                if received.pool_exhausted {
                    return Err(mux_error("receive stalled", MuxError::ResourceExhausted));
                }
                break;
            }
        }
        Ok(records)
    }

    /// Take everything captured so far, releasing the buffers.
    pub fn drain(&self) -> Vec<FrameRecord> {
        let buffers = std::mem::take(
            &mut *self
                .captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        buffers.iter().filter_map(FrameRecord::from_buffer).collect()
    }
}

/// Every channel a reader can open: all but the mirrors.
pub fn default_channels() -> Vec<usize> {
    CHANNELS
        .iter()
        .filter(|info| info.kind != ChannelKind::Debug)
        .map(|info| info.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use cbc_mux::SessionConfig;
    use cbc_transport::MemorySink;

    use super::*;

    #[test]
    fn captures_in_arrival_order_across_channels() {
        let tx = CbcSession::init(SessionConfig::default(), Arc::new(MemorySink::new())).unwrap();
        let rx = CbcSession::init(SessionConfig::default(), MemorySink::new()).unwrap();
        let capture = FrameCapture::attach(&rx, &default_channels()).unwrap();

        tx.transmit_data(2, b"first").unwrap();
        tx.transmit_data(9, b"second").unwrap();
        tx.transmit_data(1, b"third").unwrap();
        rx.receive(&tx.link().sink().concatenated()).unwrap();

        let records = capture.drain();
        let channels: Vec<usize> = records.iter().map(|r| r.channel).collect();
        assert_eq!(channels, vec![2, 9, 1]);
        assert_eq!(records[1].payload.as_ref(), b"second");
        assert_eq!(rx.pool().available(), rx.pool().capacity());
    }

    #[test]
    fn feed_recovers_every_frame_from_a_tiny_pool() {
        let tx = CbcSession::init(SessionConfig::default(), Arc::new(MemorySink::new())).unwrap();
        let mut config = SessionConfig::default();
        config.link.pool_size = 1;
        let rx = CbcSession::init(config, MemorySink::new()).unwrap();
        let capture = FrameCapture::attach(&rx, &default_channels()).unwrap();

        for i in 0..25u8 {
            tx.transmit_data(1, &[i; 8]).unwrap();
        }
        let wire = tx.link().sink().concatenated();
        assert!(wire.len() > cbc_frame::RING_SIZE);

        let records = capture.feed(&rx, &wire).unwrap();
        let firsts: Vec<u8> = records.iter().map(|r| r.payload[0]).collect();
        assert_eq!(firsts, (0..25u8).collect::<Vec<_>>());
        assert_eq!(rx.pool().available(), 1);
    }

    #[test]
    fn default_channels_skip_mirrors() {
        let channels = default_channels();
        assert_eq!(channels.len(), 19);
        assert!(!channels.contains(&cbc_mux::channel::DEBUG_IN));
    }
}
