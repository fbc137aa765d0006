use bytes::{Bytes, BytesMut};

use crate::codec::{get_u32, put_u32};
use crate::error::Result;

/// Frame header: channel id (4 bytes).
pub const FRAME_HEADER_SIZE: usize = 4;

/// The reserved control channel id. Always present, always flows.
pub const CONTROL_CHANNEL: u32 = 0;

/// One multiplexed unit exchanged over the transport link:
/// `[4B channel id][payload]`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The channel this payload belongs to.
    pub channel: u32,
    /// The channel payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into one transport payload.
pub fn encode_frame(channel: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    put_u32(&mut buf, channel);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Decode one whole transport payload into a frame.
///
/// The link layer delivers payloads already delimited, so everything
/// after the channel id belongs to that channel.
pub fn decode_frame(mut raw: Bytes) -> Result<Frame> {
    let channel = get_u32(&mut raw)?;
    Ok(Frame {
        channel,
        payload: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;

    #[test]
    fn encode_decode_roundtrip() {
        let wire = encode_frame(7, b"hello, linkmux!");
        let frame = decode_frame(wire).unwrap();
        assert_eq!(frame.channel, 7);
        assert_eq!(frame.payload.as_ref(), b"hello, linkmux!");
    }

    #[test]
    fn empty_payload() {
        let wire = encode_frame(CONTROL_CHANNEL, b"");
        let frame = decode_frame(wire).unwrap();
        assert_eq!(frame.channel, CONTROL_CHANNEL);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn truncated_header_is_fatal() {
        let err = decode_frame(Bytes::from_static(&[0, 0, 1])).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn wire_size_counts_header() {
        let frame = Frame::new(1, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), FRAME_HEADER_SIZE + 4);
    }
}
