//! Framed decoder for the one-byte tag protocol.

use async_trait::async_trait;
use bytes::Bytes;
use silo_proto::{MAX_MESSAGE_SIZE, MESSAGE_TAG, STREAM_TAG};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::transport::TransportError;

/// A decoded unit, before the sender address is attached.
#[derive(Debug)]
pub struct RawFrame {
    /// Encoded control message; empty for stream markers.
    pub payload: Bytes,
    /// True when raw stream bytes follow on the connection.
    pub stream: bool,
}

/// Parses a byte stream into frames.
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Reads one frame from the connection.
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<RawFrame, TransportError>;
}

/// Default decoder.
///
/// Reads one tag byte. [`STREAM_TAG`] yields a stream marker without
/// consuming anything further: the stream length is only known to the
/// consumer, which reads the raw bytes directly from the connection.
/// [`MESSAGE_TAG`] is followed by a single read of up to
/// [`MAX_MESSAGE_SIZE`] bytes; that cap is the hard limit on encoded
/// control message length, and longer messages truncate and fail to
/// decode downstream.
pub struct TagDecoder;

#[async_trait]
impl Decoder for TagDecoder {
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<RawFrame, TransportError> {
        let tag = reader.read_u8().await?;

        match tag {
            STREAM_TAG => Ok(RawFrame {
                payload: Bytes::new(),
                stream: true,
            }),
            MESSAGE_TAG => {
                let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed mid-message",
                    )));
                }
                buf.truncate(n);
                Ok(RawFrame {
                    payload: Bytes::from(buf),
                    stream: false,
                })
            }
            tag => Err(TransportError::Protocol { tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decode_message() {
        let mut wire: &[u8] = &[MESSAGE_TAG, 0xAA, 0xBB, 0xCC];
        let frame = TagDecoder.decode(&mut wire).await.unwrap();
        assert!(!frame.stream);
        assert_eq!(frame.payload.as_ref(), &[0xAA, 0xBB, 0xCC]);
    }

    #[tokio::test]
    async fn test_decode_stream_marker_consumes_nothing_further() {
        let mut wire: &[u8] = &[STREAM_TAG, 0x01, 0x02, 0x03];
        let frame = TagDecoder.decode(&mut wire).await.unwrap();
        assert!(frame.stream);
        assert!(frame.payload.is_empty());
        // The stream bytes are still unread.
        assert_eq!(wire, &[0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn test_decode_unknown_tag() {
        let mut wire: &[u8] = &[0x07];
        let err = TagDecoder.decode(&mut wire).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol { tag: 0x07 }));
    }

    #[tokio::test]
    async fn test_decode_caps_message_read() {
        let mut wire = vec![MESSAGE_TAG];
        wire.extend(vec![0x55u8; MAX_MESSAGE_SIZE + 100]);
        let mut reader: &[u8] = &wire;
        let frame = TagDecoder.decode(&mut reader).await.unwrap();
        assert_eq!(frame.payload.len(), MAX_MESSAGE_SIZE);
    }
}
