//! Stream framing for connection-oriented links.
//!
//! A relay that keeps a persistent session to the controller forwards the
//! same 64-byte frames back to back over a byte stream. [`FrameCodec`] cuts
//! that stream into [`Frame`]s for use with `tokio_util::codec::FramedRead`
//! and `FramedWrite`.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, FRAME_SIZE};

/// Fixed-size frame codec
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_SIZE {
            src.reserve(FRAME_SIZE - src.len());
            return Ok(None);
        }

        let frame = Frame::from_slice(&src[..FRAME_SIZE])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        src.advance(FRAME_SIZE);
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Payload;

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new();
        let frame = Frame::encode(0x20, Some(7), &Payload::Byte(1)).unwrap();

        let mut buf = BytesMut::from(&frame.as_bytes()[..40]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame.as_bytes()[40..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        let first = Frame::encode(0x40, Some(1), &Payload::Byte(1)).unwrap();
        let second = Frame::encode(0x40, Some(1), &Payload::Byte(2)).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(first, &mut buf).unwrap();
        codec.encode(second, &mut buf).unwrap();
        assert_eq!(buf.len(), 2 * FRAME_SIZE);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }
}
