//! Transport trait, peer hooks, and errors.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use silo_proto::Frame;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::peer::TcpPeer;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind the listen address
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Failed to connect to a peer
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that could not be reached
        addr: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Handshake with a peer failed
    #[error("handshake with {peer} failed: {reason}")]
    Handshake {
        /// Remote address of the rejected connection
        peer: SocketAddr,
        /// Why the handshake failed
        reason: String,
    },

    /// Unexpected leading tag byte on the wire
    #[error("unexpected frame tag {tag:#04x}")]
    Protocol {
        /// The offending tag byte
        tag: u8,
    },

    /// The frame channel is closed
    #[error("frame channel closed")]
    ChannelClosed,

    /// IO error on a connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handshake hook run on every new connection before it is admitted.
/// The default is a no-op; an error drops the connection.
pub type HandshakeFn = Arc<dyn Fn(&TcpPeer) -> Result<(), TransportError> + Send + Sync>;

/// Returns the no-op handshake.
pub fn nop_handshake() -> HandshakeFn {
    Arc::new(|_| Ok(()))
}

/// Peer lifecycle callbacks supplied at transport construction.
pub trait PeerHooks: Send + Sync {
    /// Called once per admitted connection, after the handshake. An error
    /// drops the connection.
    fn on_peer(&self, peer: Arc<TcpPeer>) -> Result<(), TransportError>;

    /// Called when a connection's read loop exits, before the connection
    /// is discarded. Embedders drop their peer record here.
    fn on_peer_closed(&self, _addr: SocketAddr) {}
}

/// Hooks that admit every peer and track nothing.
pub struct NopHooks;

impl PeerHooks for NopHooks {
    fn on_peer(&self, _peer: Arc<TcpPeer>) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Abstract peer transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the bound listen address, once listening.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Binds the listen address and starts the accept loop. Returns the
    /// actual bound address.
    async fn listen_and_accept(&self) -> Result<SocketAddr, TransportError>;

    /// Opens an outbound connection to `addr` and runs the same
    /// per-connection setup as an accepted one.
    async fn dial(&self, addr: SocketAddr) -> Result<(), TransportError>;

    /// Takes the receiving end of the frame channel. Yields `None` after
    /// the first call.
    fn take_frames(&self) -> Option<mpsc::Receiver<Frame>>;

    /// Stops the accept loop.
    fn close(&self);
}
