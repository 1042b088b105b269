//! Single test node.

use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use silo_server::{FileServer, ServerConfig, ServerError};
use tempfile::TempDir;
use tokio::time::sleep;
use tracing::info;

/// Encryption key shared by every node in a test network.
pub const TEST_KEY: [u8; 32] = [
    0x0e, 0x02, 0x5d, 0x3d, 0xb7, 0xb1, 0xf1, 0xfa, 0xdb, 0xcd, 0x1b, 0x8e, 0xc9, 0xa4, 0x5f,
    0x99, 0xa1, 0x0a, 0x3f, 0x1f, 0x27, 0x31, 0xab, 0xfa, 0x68, 0x9f, 0x91, 0x42, 0x75, 0x46,
    0x28, 0xec,
];

/// A running file server with temp-dir storage and an ephemeral port.
pub struct TestNode {
    /// The server under test.
    pub server: Arc<FileServer>,
    /// Actual bound listen address.
    pub addr: SocketAddr,
    root: TempDir,
}

impl TestNode {
    /// Starts a node. `bootstrap` lists the addresses to join through;
    /// `is_bootstrap` marks the node that hands out the peer directory.
    pub async fn start(bootstrap: &[SocketAddr], is_bootstrap: bool) -> Self {
        let root = TempDir::new().expect("create temp storage root");
        let storage_root = root.path().join("data").to_string_lossy().into_owned();

        let mut config = ServerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            storage_root,
            TEST_KEY.to_vec(),
        );
        config.bootstrap_nodes = bootstrap.to_vec();
        config.is_bootstrap = is_bootstrap;

        let server = FileServer::new(config);
        tokio::spawn(Arc::clone(&server).start());

        let addr = Self::wait_for_addr(&server).await;
        info!(%addr, is_bootstrap, "test node started");

        Self { server, addr, root }
    }

    async fn wait_for_addr(server: &FileServer) -> SocketAddr {
        for _ in 0..200 {
            if let Some(addr) = server.local_addr() {
                return addr;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("test node did not bind in time");
    }

    /// Stores `data` under `key`.
    pub async fn store(&self, key: &str, data: &[u8]) -> Result<(), ServerError> {
        self.server.store(key, &mut Cursor::new(data.to_vec())).await
    }

    /// Fetches `key` and returns the plaintext.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ServerError> {
        let mut reader = self.server.get(key).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    /// True iff the node holds `key` locally.
    pub fn has(&self, key: &str) -> bool {
        self.server.has(key)
    }

    /// Deletes the node's local copy of `key`.
    pub fn delete(&self, key: &str) -> Result<(), ServerError> {
        self.server.delete(key)
    }

    /// Number of live peer connections.
    pub fn peer_count(&self) -> usize {
        self.server.peer_count()
    }

    /// Peer addresses learned through introductions.
    pub fn known_peers(&self) -> Vec<String> {
        self.server.known_peers()
    }

    /// Absolute path of the blob file for `key` in this node's storage.
    pub fn blob_path(&self, key: &str) -> PathBuf {
        use silo_core::PathBuilder;
        let id = silo_core::HashedPathBuilder.build(key);
        self.root.path().join("data").join(id.full_path())
    }

    /// Stops the node's server loop.
    pub fn stop(&self) {
        self.server.stop();
    }
}
