//! Silo Server - The file server tying transport, storage, and gossip
//! together.
//!
//! A [`FileServer`] owns a local [`silo_store::BlobStore`], consumes
//! frames from the transport, and implements the `store`/`get` protocol:
//! stores are encrypted locally and fanned out to every peer; gets are
//! answered locally when possible and otherwise broadcast as a lookup,
//! with the blob streamed back from whichever peer holds it.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod registry;
pub mod server;

pub use registry::PeerRegistry;
pub use server::{FileServer, ServerConfig, ServerError};
