//! Integration and end-to-end tests for Silo.
//!
//! This crate provides:
//! - A single-node wrapper with temp-dir storage and ephemeral ports
//! - A multi-node harness for spinning up bootstrap-joined networks
//! - End-to-end tests for store/get, replication, and gossip

pub mod harness;
pub mod node;

pub use harness::TestNetwork;
pub use node::TestNode;

/// Initializes tracing for tests; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("silo_server=debug,silo_net=debug,silo_store=debug")
        .with_test_writer()
        .try_init();
}
