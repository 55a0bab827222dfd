use bytes::{BufMut, Bytes, BytesMut};

use crate::buffer::FrameBuffer;
use crate::checksum;
use crate::config::Granularity;
use crate::error::{LinkError, Result};

/// Start-of-frame marker.
pub const SOF: u8 = 0x05;

/// Idle/padding byte.
pub const FILL_BYTE: u8 = 0xFF;

/// SOF + length byte + channel byte.
pub const HEADER_SIZE: usize = 3;

pub const CHECKSUM_SIZE: usize = 1;

/// Largest frame the protocol allows.
pub const MAX_FRAME_SIZE: usize = 96;

/// Smallest frame the length field can express (service length 0).
pub const MIN_FRAME_SIZE: usize = 8;

/// Largest payload that fits in one frame.
pub const MAX_PAYLOAD: usize = MAX_FRAME_SIZE - HEADER_SIZE - CHECKSUM_SIZE;

/// Channel index is a 5-bit field.
pub const MAX_CHANNEL_INDEX: u8 = 0x1F;

/// Priority is a 3-bit field.
pub const MAX_PRIORITY: u8 = 0x07;

pub(crate) const SEQUENCE_MASK: u8 = 0x03;
const SERVICE_LENGTH_MASK: u8 = 0x1F;

/// Total frame length for a payload of `payload_length` bytes.
///
/// The length is rounded up to the next multiple of the granularity and
/// never falls below [`MIN_FRAME_SIZE`].
pub fn frame_length_for(payload_length: usize, granularity: Granularity) -> usize {
    let g = granularity.bytes();
    let needed = payload_length + HEADER_SIZE + CHECKSUM_SIZE;
    (needed.div_ceil(g) * g).max(MIN_FRAME_SIZE)
}

/// Decode the total frame length from the length byte.
pub fn decode_frame_length(length_byte: u8) -> usize {
    (usize::from((length_byte >> 2) & SERVICE_LENGTH_MASK) + 2) * 4
}

fn encode_length_byte(frame_length: usize, sequence: u8) -> u8 {
    let service_length = (frame_length / 4 - 2) as u8 & SERVICE_LENGTH_MASK;
    (service_length << 2) | (sequence & SEQUENCE_MASK)
}

/// The three header bytes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u8,
    pub frame_length: usize,
    pub channel: u8,
    pub priority: u8,
}

impl FrameHeader {
    /// Parse the header at the start of `bytes`.
    ///
    /// Returns `None` if fewer than three bytes are given or the first byte
    /// is not [`SOF`].
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [SOF, length, channel, ..] => Some(Self {
                sequence: length & SEQUENCE_MASK,
                frame_length: decode_frame_length(*length),
                channel: channel >> 3,
                priority: channel & MAX_PRIORITY,
            }),
            _ => None,
        }
    }

    /// Write the header into the first three bytes of `dst`.
    pub fn write_into(&self, dst: &mut [u8]) {
        dst[0] = SOF;
        dst[1] = encode_length_byte(self.frame_length, self.sequence);
        dst[2] = (self.channel << 3) | (self.priority & MAX_PRIORITY);
    }
}

/// Lay out header and padding around a payload already stored at
/// `data[HEADER_SIZE..HEADER_SIZE + payload_length]`.
///
/// The sequence field is left at zero and the checksum unset; both are
/// filled in by [`seal_frame`] when the frame is actually sent.
pub fn prepare_frame(
    data: &mut [u8],
    payload_length: usize,
    channel: u8,
    priority: u8,
    granularity: Granularity,
) -> Result<usize> {
    if payload_length > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge {
            size: payload_length,
            max: MAX_PAYLOAD,
        });
    }
    if channel > MAX_CHANNEL_INDEX {
        return Err(LinkError::InvalidParameter("channel index exceeds 5 bits"));
    }
    if priority > MAX_PRIORITY {
        return Err(LinkError::InvalidParameter("priority exceeds 3 bits"));
    }

    let frame_length = frame_length_for(payload_length, granularity);
    if data.len() < frame_length {
        return Err(LinkError::InvalidParameter("frame storage too small"));
    }

    data[HEADER_SIZE + payload_length..frame_length - CHECKSUM_SIZE].fill(FILL_BYTE);
    FrameHeader {
        sequence: 0,
        frame_length,
        channel,
        priority,
    }
    .write_into(data);

    Ok(frame_length)
}

/// Stamp the sequence counter and checksum onto a prepared frame.
///
/// `frame` must be exactly the frame bytes.
pub fn seal_frame(frame: &mut [u8], sequence: u8) {
    if frame.len() < MIN_FRAME_SIZE {
        return;
    }
    frame[1] = (frame[1] & !SEQUENCE_MASK) | (sequence & SEQUENCE_MASK);
    let last = frame.len() - CHECKSUM_SIZE;
    frame[last] = checksum::sum(&frame[..last]);
}

/// Encode one complete frame into `dst`. Returns the frame length.
pub fn encode_frame(
    channel: u8,
    priority: u8,
    sequence: u8,
    payload: &[u8],
    granularity: Granularity,
    dst: &mut BytesMut,
) -> Result<usize> {
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut data = [0u8; MAX_FRAME_SIZE];
    data[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    let frame_length = prepare_frame(&mut data, payload.len(), channel, priority, granularity)?;
    seal_frame(&mut data[..frame_length], sequence);

    dst.reserve(frame_length);
    dst.put_slice(&data[..frame_length]);
    Ok(frame_length)
}

/// An owned, decoded view of a received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u8,
    pub priority: u8,
    pub sequence: u8,
    pub frame_length: usize,
    /// Payload region: everything between header and checksum, padding included.
    pub payload: Bytes,
}

impl Frame {
    /// Decode the frame held in `bytes`, which must be exactly one frame.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let header = FrameHeader::parse(bytes)?;
        if header.frame_length != bytes.len() || bytes.len() < MIN_FRAME_SIZE {
            return None;
        }
        Some(Self {
            channel: header.channel,
            priority: header.priority,
            sequence: header.sequence,
            frame_length: header.frame_length,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..bytes.len() - CHECKSUM_SIZE]),
        })
    }

    /// Decode the frame held in a pool buffer.
    pub fn from_buffer(buffer: &FrameBuffer) -> Option<Self> {
        let contents = buffer.lock();
        Self::from_bytes(contents.frame())
    }

    /// Payload with trailing fill bytes removed.
    ///
    /// Only a heuristic: a payload that legitimately ends in `0xFF` loses
    /// those bytes too.
    pub fn trimmed_payload(&self) -> Bytes {
        let end = self
            .payload
            .iter()
            .rposition(|b| *b != FILL_BYTE)
            .map_or(0, |i| i + 1);
        self.payload.slice(..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_length_quantization() {
        use Granularity::*;
        assert_eq!(frame_length_for(0, Four), 8);
        assert_eq!(frame_length_for(1, Four), 8);
        assert_eq!(frame_length_for(4, Four), 8);
        assert_eq!(frame_length_for(5, Four), 12);
        assert_eq!(frame_length_for(5, Eight), 16);
        assert_eq!(frame_length_for(5, Sixteen), 16);
        assert_eq!(frame_length_for(5, ThirtyTwo), 32);
        assert_eq!(frame_length_for(29, ThirtyTwo), 64);
        assert_eq!(frame_length_for(MAX_PAYLOAD, Four), MAX_FRAME_SIZE);
        assert_eq!(frame_length_for(MAX_PAYLOAD, ThirtyTwo), MAX_FRAME_SIZE);
    }

    #[test]
    fn frame_length_matches_formula_for_all_payloads() {
        for granularity in Granularity::ALL {
            let g = granularity.bytes();
            for len in 1..=MAX_PAYLOAD {
                let expected = (len + HEADER_SIZE + CHECKSUM_SIZE).div_ceil(g) * g;
                assert_eq!(frame_length_for(len, granularity), expected);
                assert!(expected <= MAX_FRAME_SIZE);
            }
        }
    }

    #[test]
    fn length_byte_roundtrip() {
        for frame_length in (MIN_FRAME_SIZE..=MAX_FRAME_SIZE).step_by(4) {
            for sequence in 0..4 {
                let byte = encode_length_byte(frame_length, sequence);
                assert_eq!(decode_frame_length(byte), frame_length);
                assert_eq!(byte & SEQUENCE_MASK, sequence);
            }
        }
    }

    #[test]
    fn largest_service_length_exceeds_max_frame() {
        assert_eq!(decode_frame_length(0x7C), 132);
        assert!(decode_frame_length(0x7C) > MAX_FRAME_SIZE);
    }

    #[test]
    fn encode_known_frame() {
        let mut wire = BytesMut::new();
        let n = encode_frame(5, 3, 2, b"hi", Granularity::Four, &mut wire).unwrap();

        assert_eq!(n, 8);
        assert_eq!(
            &wire[..7],
            &[SOF, 0x02, (5 << 3) | 3, b'h', b'i', FILL_BYTE, FILL_BYTE]
        );
        let total = wire.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(total, 0);
    }

    #[test]
    fn header_parse_and_write() {
        let header = FrameHeader {
            sequence: 3,
            frame_length: 24,
            channel: 20,
            priority: 6,
        };
        let mut bytes = [0u8; 3];
        header.write_into(&mut bytes);
        assert_eq!(FrameHeader::parse(&bytes), Some(header));
        assert_eq!(FrameHeader::parse(&[0x06, 0, 0]), None);
        assert_eq!(FrameHeader::parse(&[SOF, 0]), None);
    }

    #[test]
    fn prepare_rejects_out_of_range_fields() {
        let mut data = [0u8; MAX_FRAME_SIZE];
        assert!(matches!(
            prepare_frame(&mut data, MAX_PAYLOAD + 1, 0, 0, Granularity::Four),
            Err(LinkError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            prepare_frame(&mut data, 1, 32, 0, Granularity::Four),
            Err(LinkError::InvalidParameter(_))
        ));
        assert!(matches!(
            prepare_frame(&mut data, 1, 0, 8, Granularity::Four),
            Err(LinkError::InvalidParameter(_))
        ));
    }

    #[test]
    fn frame_from_bytes_decodes_fields() {
        let mut wire = BytesMut::new();
        encode_frame(12, 1, 1, b"payload", Granularity::Eight, &mut wire).unwrap();

        let frame = Frame::from_bytes(&wire).unwrap();
        assert_eq!(frame.channel, 12);
        assert_eq!(frame.priority, 1);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.frame_length, 16);
        assert_eq!(frame.trimmed_payload().as_ref(), b"payload");
        assert_eq!(frame.payload.len(), 16 - HEADER_SIZE - CHECKSUM_SIZE);

        assert!(Frame::from_bytes(&wire[..8]).is_none());
    }

    #[test]
    fn seal_overwrites_sequence_only() {
        let mut wire = BytesMut::new();
        encode_frame(7, 2, 3, b"abc", Granularity::Four, &mut wire).unwrap();
        let mut frame = wire.to_vec();
        seal_frame(&mut frame, 1);

        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.sequence, 1);
        assert_eq!(header.channel, 7);
        assert!(checksum::check(&frame[..frame.len() - 1], frame[frame.len() - 1]).is_ok());
    }
}
