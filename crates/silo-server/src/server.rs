//! The file server.

use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use silo_core::encoding::{CanonicalDecode, CanonicalEncode, DecodeError};
use silo_core::{AesCtr, Cipher, CryptoError, HashedPathBuilder, PathBuilder, IV_SIZE};
use silo_net::{nop_handshake, PeerHooks, TcpPeer, TcpTransport, Transport, TransportError};
use silo_proto::{ControlMessage, Frame, MESSAGE_TAG, STREAM_TAG};
use silo_store::{BlobStore, StoreConfig, StoreError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Pause between a broadcast and the follow-up stream, giving receivers
/// time to process the control message and arm the stream gate.
const SETTLE_DELAY: Duration = Duration::from_millis(5);

/// How long `get` waits for any single peer to start streaming a blob
/// back before skipping it.
const PEER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// File server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Key absent locally and no peer served it
    #[error("key not found: {0}")]
    NotFound(String),

    /// A control message arrived from an address with no registry record
    #[error("peer {0} not found in registry")]
    UnknownPeer(SocketAddr),

    /// `start` was called twice
    #[error("server already started")]
    AlreadyStarted,

    /// Every peer failed during a broadcast
    #[error("broadcast reached no peers")]
    BroadcastFailed,

    /// Malformed control message
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cipher failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// TCP listen address. Port 0 binds an ephemeral port; the bound
    /// address is what gets advertised to peers.
    pub listen_addr: SocketAddr,
    /// Storage root directory (sanitized by the store).
    pub storage_root: String,
    /// Key-to-path mapping for the local store.
    pub path_builder: Arc<dyn PathBuilder>,
    /// Cipher sealing blobs at rest and in flight.
    pub cipher: Arc<dyn Cipher>,
    /// Symmetric key; 16, 24, or 32 bytes.
    pub encryption_key: Vec<u8>,
    /// Addresses dialed on startup to join the network.
    pub bootstrap_nodes: Vec<SocketAddr>,
    /// True on the node that holds the membership directory and hands the
    /// known-peer list to new joiners.
    pub is_bootstrap: bool,
}

impl ServerConfig {
    /// Creates a configuration with the default cipher and hashed layout.
    pub fn new(listen_addr: SocketAddr, storage_root: impl Into<String>, encryption_key: Vec<u8>) -> Self {
        Self {
            listen_addr,
            storage_root: storage_root.into(),
            path_builder: Arc::new(HashedPathBuilder),
            cipher: Arc::new(AesCtr),
            encryption_key,
            bootstrap_nodes: Vec::new(),
            is_bootstrap: false,
        }
    }
}

/// Transport hooks wiring connections into the registry and serving the
/// bootstrap's peer list to new joiners.
struct ServerHooks {
    registry: Arc<crate::PeerRegistry>,
    known_addrs: Arc<RwLock<Vec<String>>>,
    is_bootstrap: bool,
}

impl PeerHooks for ServerHooks {
    fn on_peer(&self, peer: Arc<TcpPeer>) -> Result<(), TransportError> {
        self.registry.insert(Arc::clone(&peer));
        info!(
            peer = %peer.remote_addr(),
            outbound = peer.is_outbound(),
            "peer connected"
        );

        if self.is_bootstrap {
            let addresses = self.known_addrs.read().clone();
            tokio::spawn(async move {
                let msg = ControlMessage::PeersInfo { addresses };
                if let Err(e) = send_message(&peer, &msg).await {
                    warn!(peer = %peer.remote_addr(), error = %e, "failed to send peer list");
                }
            });
        }

        Ok(())
    }

    fn on_peer_closed(&self, addr: SocketAddr) {
        if self.registry.remove(&addr).is_some() {
            info!(peer = %addr, "peer disconnected");
        }
    }
}

/// Sends one control message: the message tag byte, then the encoded
/// body, under a single writer lock so concurrent senders cannot
/// interleave.
async fn send_message(peer: &TcpPeer, msg: &ControlMessage) -> Result<(), TransportError> {
    let encoded = msg.to_vec();
    peer.send_framed(&[&[MESSAGE_TAG], &encoded]).await
}

/// A node in the distributed file store.
pub struct FileServer {
    config: ServerConfig,
    store: BlobStore,
    transport: Arc<TcpTransport>,
    registry: Arc<crate::PeerRegistry>,
    known_addrs: Arc<RwLock<Vec<String>>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileServer {
    /// Creates a server from `config`. Nothing is bound until
    /// [`FileServer::start`].
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(crate::PeerRegistry::new());
        let known_addrs = Arc::new(RwLock::new(Vec::new()));

        let hooks = Arc::new(ServerHooks {
            registry: Arc::clone(&registry),
            known_addrs: Arc::clone(&known_addrs),
            is_bootstrap: config.is_bootstrap,
        });

        let transport = Arc::new(TcpTransport::new(
            config.listen_addr,
            nop_handshake(),
            hooks,
        ));

        let store = BlobStore::new(
            StoreConfig::new(&config.storage_root)
                .with_path_builder(Arc::clone(&config.path_builder)),
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Arc::new(Self {
            config,
            store,
            transport,
            registry,
            known_addrs,
            shutdown_tx,
            shutdown_rx: parking_lot::Mutex::new(Some(shutdown_rx)),
        })
    }

    /// The bound listen address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Number of live peer connections.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Listen addresses learned through node introductions. Only
    /// meaningful on the bootstrap node.
    pub fn known_peers(&self) -> Vec<String> {
        self.known_addrs.read().clone()
    }

    /// True iff a blob for `key` exists locally.
    pub fn has(&self, key: &str) -> bool {
        self.store.has(key)
    }

    /// Deletes the local blob for `key`. Remote replicas are untouched.
    pub fn delete(&self, key: &str) -> Result<(), ServerError> {
        self.store.delete(key)?;
        Ok(())
    }

    /// Signals the main loop to shut down.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// Binds the listener, joins the network through the configured
    /// bootstrap nodes, announces this node's address, and runs the
    /// dispatch loop until [`FileServer::stop`] is called.
    pub async fn start(self: Arc<Self>) -> Result<(), ServerError> {
        let addr = self.transport.listen_and_accept().await?;

        let mut frames = self
            .transport
            .take_frames()
            .ok_or(ServerError::AlreadyStarted)?;
        let mut shutdown_rx = self
            .shutdown_rx
            .lock()
            .take()
            .ok_or(ServerError::AlreadyStarted)?;

        // Join through every configured bootstrap in parallel. Failures
        // are logged; later gossip traffic is the only retry.
        let mut dials = Vec::new();
        for peer_addr in self.config.bootstrap_nodes.clone() {
            let transport = Arc::clone(&self.transport);
            dials.push(tokio::spawn(async move {
                info!(peer = %peer_addr, "connecting to bootstrap node");
                if let Err(e) = transport.dial(peer_addr).await {
                    warn!(peer = %peer_addr, error = %e, "failed to connect to bootstrap node");
                }
            }));
        }
        for dial in dials {
            let _ = dial.await;
        }

        sleep(SETTLE_DELAY).await;

        // Tell every current peer how to reach us.
        self.broadcast(&ControlMessage::NodeIntroduction {
            address: addr.to_string(),
        })
        .await?;

        info!(%addr, "file server started");

        loop {
            tokio::select! {
                maybe_frame = frames.recv() => match maybe_frame {
                    Some(frame) => {
                        if let Err(e) = self.dispatch(frame).await {
                            warn!(error = %e, "message handling error");
                        }
                    }
                    None => break,
                },
                _ = shutdown_rx.recv() => {
                    info!("file server stopping");
                    break;
                }
            }
        }

        self.transport.close();
        Ok(())
    }

    /// Stores `data` under `key`: encrypted to the local disk, then fanned
    /// out to every peer as a `StoreFile` broadcast followed by a stream.
    ///
    /// Returns once the local write and the fan-out complete; remote
    /// persistence is not confirmed.
    pub async fn store(&self, key: &str, data: &mut dyn Read) -> Result<(), ServerError> {
        let mut plaintext = Vec::new();
        data.read_to_end(&mut plaintext)?;

        let n = self.store.write_encrypted(
            key,
            &mut Cursor::new(&plaintext),
            self.config.cipher.as_ref(),
            &self.config.encryption_key,
        )?;
        let size = IV_SIZE as u64 + n;

        self.broadcast(&ControlMessage::StoreFile {
            key: key.to_string(),
            size,
        })
        .await?;

        sleep(SETTLE_DELAY).await;

        // Fan-out runs a fresh encryption pass over the buffered
        // plaintext, so the stream is exactly `size` bytes: a new IV plus
        // the same plaintext length. Replicas end up with a differently
        // sealed copy than the local disk.
        let mut sealed = Vec::with_capacity(size as usize);
        self.config.cipher.encrypt(
            &self.config.encryption_key,
            &mut sealed,
            &mut Cursor::new(&plaintext),
        )?;

        for peer in self.registry.peers() {
            peer.send_framed(&[&[STREAM_TAG], &sealed]).await?;
        }

        info!(key, bytes = n, peers = self.registry.len(), "stored blob");
        Ok(())
    }

    /// Returns a reader over the plaintext for `key`.
    ///
    /// Served from the local store when present. Otherwise a `GetFile`
    /// lookup is broadcast and each peer is given [`PEER_READ_TIMEOUT`] to
    /// start streaming the blob back; the first transfer satisfies the
    /// call, and the loop keeps draining any remaining responders.
    pub async fn get(&self, key: &str) -> Result<Cursor<Vec<u8>>, ServerError> {
        if self.store.has(key) {
            debug!(key, "blob found locally");
            let (reader, _) = self.store.read_decrypted(
                key,
                self.config.cipher.as_ref(),
                &self.config.encryption_key,
            )?;
            return Ok(reader);
        }

        info!(key, "blob not found locally, broadcasting lookup");
        self.broadcast(&ControlMessage::GetFile {
            key: key.to_string(),
        })
        .await?;

        sleep(SETTLE_DELAY).await;

        for peer in self.registry.peers() {
            let remote = peer.remote_addr();

            // The timeout only guards waiting for the stream to begin;
            // nothing is held while parked, so cancellation is safe. Once
            // the gate is acquired the reads run to completion and the
            // guard releases the gate on every path.
            let _gate = match timeout(PEER_READ_TIMEOUT, peer.await_stream()).await {
                Err(_) => {
                    warn!(peer = %remote, key, "timed out waiting for blob stream");
                    continue;
                }
                Ok(gate) => gate,
            };

            let size = match peer.read_u64_le().await {
                Ok(size) => size,
                Err(e) => {
                    warn!(peer = %remote, key, error = %e, "failed to read blob size");
                    continue;
                }
            };

            let mut sealed = vec![0u8; size as usize];
            peer.read_exact(&mut sealed).await?;

            // The bytes are already ciphertext including the IV.
            self.store.write_plain(key, &mut Cursor::new(&sealed))?;
            info!(key, size, peer = %remote, "received blob from peer");
        }

        if !self.store.has(key) {
            return Err(ServerError::NotFound(key.to_string()));
        }

        let (reader, _) = self.store.read_decrypted(
            key,
            self.config.cipher.as_ref(),
            &self.config.encryption_key,
        )?;
        Ok(reader)
    }

    /// Sends `msg` to every live peer. Per-peer failures are logged; the
    /// broadcast only fails when no peer could be reached at all.
    async fn broadcast(&self, msg: &ControlMessage) -> Result<(), ServerError> {
        let peers = self.registry.peers();
        if peers.is_empty() {
            return Ok(());
        }

        let mut delivered = 0;
        for peer in &peers {
            match send_message(peer, msg).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(peer = %peer.remote_addr(), error = %e, "broadcast send failed")
                }
            }
        }

        if delivered == 0 {
            return Err(ServerError::BroadcastFailed);
        }
        Ok(())
    }

    /// Routes one frame from the transport.
    async fn dispatch(&self, frame: Frame) -> Result<(), ServerError> {
        if frame.stream {
            // Stream bytes are consumed by whichever handler armed the
            // gate; the marker itself carries no work.
            debug!(peer = %frame.from, "stream frame");
            return Ok(());
        }

        match ControlMessage::from_bytes(&frame.payload)? {
            ControlMessage::StoreFile { key, size } => {
                self.handle_store_file(frame.from, key, size).await
            }
            ControlMessage::GetFile { key } => self.handle_get_file(frame.from, key).await,
            ControlMessage::PeersInfo { addresses } => self.handle_peers_info(addresses),
            ControlMessage::NodeIntroduction { address } => {
                self.handle_node_introduction(frame.from, address)
            }
        }
    }

    /// A peer is pushing a blob: read exactly `size` raw bytes from its
    /// connection into local storage.
    ///
    /// There is deliberately no timeout here; a peer that announces a
    /// store and never streams stalls the loop, accepted under the trust
    /// model.
    async fn handle_store_file(
        &self,
        from: SocketAddr,
        key: String,
        size: u64,
    ) -> Result<(), ServerError> {
        let peer = self.registry.get(&from).ok_or(ServerError::UnknownPeer(from))?;

        // The guard releases the stream gate even when a read or the
        // local write fails partway through.
        let _gate = peer.await_stream().await;

        let mut sealed = vec![0u8; size as usize];
        peer.read_exact(&mut sealed).await?;
        self.store.write_plain(&key, &mut Cursor::new(&sealed))?;

        info!(key = %key, size, peer = %from, "stored replicated blob");
        Ok(())
    }

    /// A peer is looking up a key: if we hold it, stream it back as a
    /// length-prefixed blob. The requester owns its own stream gate, so no
    /// `close_stream` happens here.
    async fn handle_get_file(&self, from: SocketAddr, key: String) -> Result<(), ServerError> {
        if !self.store.has(&key) {
            return Err(ServerError::NotFound(key));
        }

        info!(key = %key, peer = %from, "serving blob over the network");

        let (mut file, size) = self.store.read_plain(&key)?;
        let mut sealed = Vec::with_capacity(size as usize);
        file.read_to_end(&mut sealed)?;

        let peer = self.registry.get(&from).ok_or(ServerError::UnknownPeer(from))?;
        let size_bytes = size.to_le_bytes();
        peer.send_framed(&[&[STREAM_TAG], &size_bytes, &sealed]).await?;

        debug!(key = %key, size, peer = %from, "blob sent");
        Ok(())
    }

    /// The bootstrap told us about other peers: dial each one.
    fn handle_peers_info(&self, addresses: Vec<String>) -> Result<(), ServerError> {
        for address in addresses {
            if address.is_empty() {
                continue;
            }
            let addr: SocketAddr = match address.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(address = %address, error = %e, "bad gossiped address");
                    continue;
                }
            };

            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                debug!(peer = %addr, "dialing gossiped peer");
                if let Err(e) = transport.dial(addr).await {
                    warn!(peer = %addr, error = %e, "failed to dial gossiped peer");
                }
            });
        }
        Ok(())
    }

    /// A joiner announced its reachable address: remember it for future
    /// joiners.
    fn handle_node_introduction(
        &self,
        from: SocketAddr,
        address: String,
    ) -> Result<(), ServerError> {
        info!(peer = %from, address = %address, "node introduced itself");
        self.known_addrs.write().push(address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_key() -> Vec<u8> {
        vec![0x42u8; 32]
    }

    fn test_server(dir: &TempDir) -> Arc<FileServer> {
        let root = dir.path().join("data").to_string_lossy().into_owned();
        FileServer::new(ServerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            root,
            test_key(),
        ))
    }

    #[tokio::test]
    async fn test_store_get_without_peers() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);
        tokio::spawn(Arc::clone(&server).start());

        // Wait for the listener to come up.
        for _ in 0..100 {
            if server.local_addr().is_some() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        server
            .store("alpha", &mut Cursor::new(b"hello".to_vec()))
            .await
            .unwrap();
        assert!(server.has("alpha"));

        let mut reader = server.get("alpha").await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"hello");

        server.delete("alpha").unwrap();
        assert!(!server.has("alpha"));

        server.stop();
    }

    #[tokio::test]
    async fn test_get_missing_key_without_peers() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);
        tokio::spawn(Arc::clone(&server).start());

        let err = server.get("absent").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(k) if k == "absent"));

        server.stop();
    }
}
