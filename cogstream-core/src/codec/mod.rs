//! Length-prefixed framing for `tokio_util::codec::Framed`.
//!
//! The codec only delimits and checks message bodies; what a body means is
//! decided by [`crate::message`].

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CogError;
use crate::header::{FrameHeader, FrameHeaderBytes, HEADER_SIZE};

/// Largest body accepted in either direction.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CogError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header_bytes: FrameHeaderBytes = [0; HEADER_SIZE];
        header_bytes.copy_from_slice(&src[..HEADER_SIZE]);
        let header = FrameHeader::from_bytes(&header_bytes)?;

        let body_length = header.body_length() as usize;
        if body_length > MAX_BODY_SIZE {
            return Err(CogError::FrameTooLarge {
                size: body_length,
                max: MAX_BODY_SIZE,
            });
        }

        if src.len() < HEADER_SIZE + body_length {
            src.reserve(HEADER_SIZE + body_length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_length).freeze();
        header.validate(&body)?;
        Ok(Some(body))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CogError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_BODY_SIZE {
            return Err(CogError::FrameTooLarge {
                size: item.len(),
                max: MAX_BODY_SIZE,
            });
        }
        let header = FrameHeader::for_body(&item);
        dst.reserve(HEADER_SIZE + item.len());
        dst.extend_from_slice(&header.to_bytes());
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn encoded(body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FrameCodec
            .encode(Bytes::copy_from_slice(body), &mut buf)
            .unwrap();
        buf.to_vec()
    }

    #[test]
    fn partial_header_waits_for_more() {
        let mut buf = BytesMut::from(&encoded(b"abc")[..10]);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_body_waits_for_more() {
        let full = encoded(b"abcdef");
        let mut buf = BytesMut::from(&full[..full.len() - 2]);
        assert!(FrameCodec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[full.len() - 2..]);
        assert_eq!(FrameCodec.decode(&mut buf).unwrap().unwrap(), &b"abcdef"[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn oversize_length_is_rejected_before_buffering() {
        let mut header = encoded(b"")[..HEADER_SIZE].to_vec();
        header[8..16].copy_from_slice(&((MAX_BODY_SIZE as u64) + 1).to_le_bytes());
        let mut buf = BytesMut::from(&header[..]);
        assert!(matches!(
            FrameCodec.decode(&mut buf),
            Err(CogError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let mut bytes = encoded(b"important");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            FrameCodec.decode(&mut buf),
            Err(CogError::ChecksumMismatch)
        ));
    }

    #[tokio::test]
    async fn reads_back_to_back_frames_from_stream() {
        let mut wire = encoded(b"first");
        wire.extend_from_slice(&encoded(b""));
        wire.extend_from_slice(&encoded(b"third"));

        let mock = tokio_test::io::Builder::new()
            .read(&wire[..7])
            .read(&wire[7..])
            .build();
        let mut reader = FramedRead::new(mock, FrameCodec);

        assert_eq!(reader.next().await.unwrap().unwrap(), &b"first"[..]);
        assert!(reader.next().await.unwrap().unwrap().is_empty());
        assert_eq!(reader.next().await.unwrap().unwrap(), &b"third"[..]);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn writes_header_then_body() {
        let expected = encoded(b"frame");
        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let mut writer = FramedWrite::new(mock, FrameCodec);
        writer.send(Bytes::from_static(b"frame")).await.unwrap();
    }
}
