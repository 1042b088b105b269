//! Frames delivered by the transport to the server.

use std::net::SocketAddr;

use bytes::Bytes;

/// One parsed unit from a peer connection: either an encoded control
/// message payload, or a marker that raw stream bytes follow on the same
/// connection.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Remote address of the originating connection.
    pub from: SocketAddr,
    /// Encoded control message; empty for stream markers.
    pub payload: Bytes,
    /// True when this frame marks the start of a raw byte stream. The
    /// stream bytes themselves are consumed directly from the connection
    /// by whoever holds the stream gate.
    pub stream: bool,
}

impl Frame {
    /// Creates a control message frame.
    pub fn message(from: SocketAddr, payload: Bytes) -> Self {
        Self {
            from,
            payload,
            stream: false,
        }
    }

    /// Creates a stream marker frame.
    pub fn stream(from: SocketAddr) -> Self {
        Self {
            from,
            payload: Bytes::new(),
            stream: true,
        }
    }
}
