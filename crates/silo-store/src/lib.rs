//! Silo Store - Local storage engine.
//!
//! Persists opaque blobs under user keys on the local filesystem. Keys map
//! to disk locations through a pluggable path builder; blobs are
//! optionally encrypted on write and decrypted on read.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod store;

pub use config::StoreConfig;
pub use store::BlobStore;

use thiserror::Error;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key absent from local storage
    #[error("key not found: {0}")]
    NotFound(String),

    /// Cipher failure during an encrypted read or write
    #[error("crypto error: {0}")]
    Crypto(#[from] silo_core::CryptoError),
}
