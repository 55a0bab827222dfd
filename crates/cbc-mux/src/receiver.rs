use std::sync::Arc;

use cbc_frame::FrameBuffer;

/// Takes ownership of a reference to each frame delivered on a channel.
///
/// The receiver releases the buffer by dropping it.
pub trait BufferReceiver: Send + Sync {
    fn receive_buffer(&self, buffer: FrameBuffer);
}

/// Sees the bytes of each frame delivered on a channel, synchronously.
///
/// The slice is only valid for the duration of the call.
pub trait DataReceiver: Send + Sync {
    fn receive_data(&self, data: &[u8]);
}

impl<F> BufferReceiver for F
where
    F: Fn(FrameBuffer) + Send + Sync,
{
    fn receive_buffer(&self, buffer: FrameBuffer) {
        self(buffer)
    }
}

impl<F> DataReceiver for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn receive_data(&self, data: &[u8]) {
        self(data)
    }
}

/// What a channel does with the frames it receives.
#[derive(Clone)]
pub enum ChannelReceiver {
    Buffer(Arc<dyn BufferReceiver>),
    Data(Arc<dyn DataReceiver>),
}

impl ChannelReceiver {
    pub fn buffer<R: BufferReceiver + 'static>(receiver: R) -> Self {
        ChannelReceiver::Buffer(Arc::new(receiver))
    }

    pub fn data<R: DataReceiver + 'static>(receiver: R) -> Self {
        ChannelReceiver::Data(Arc::new(receiver))
    }
}

impl std::fmt::Debug for ChannelReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelReceiver::Buffer(_) => f.write_str("ChannelReceiver::Buffer"),
            ChannelReceiver::Data(_) => f.write_str("ChannelReceiver::Data"),
        }
    }
}
