//! Live peer registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use silo_net::TcpPeer;

/// Mapping from remote address to live peer connection.
///
/// Records are inserted when a connection is admitted and removed when its
/// read loop exits; while present, the underlying connection is open. The
/// lock is held only for the duration of a map operation.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<SocketAddr, Arc<TcpPeer>>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a peer, keyed by its remote address.
    pub fn insert(&self, peer: Arc<TcpPeer>) {
        self.peers.lock().insert(peer.remote_addr(), peer);
    }

    /// Removes and returns the peer for `addr`, if present.
    pub fn remove(&self, addr: &SocketAddr) -> Option<Arc<TcpPeer>> {
        self.peers.lock().remove(addr)
    }

    /// Looks up the peer for `addr`.
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<TcpPeer>> {
        self.peers.lock().get(addr).cloned()
    }

    /// Returns a snapshot of all live peers.
    pub fn peers(&self) -> Vec<Arc<TcpPeer>> {
        self.peers.lock().values().cloned().collect()
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// True when no peers are connected.
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}
