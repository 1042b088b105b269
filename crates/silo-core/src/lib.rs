//! Silo Core - Core primitives for the Silo distributed file store.
//!
//! This crate provides:
//! - Symmetric stream encryption (AES-CTR with a random per-blob IV)
//! - Key-to-path resolution for the content-addressed disk layout
//! - Canonical encoding for deterministic wire serialization

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod crypto;
pub mod encoding;
pub mod keypath;

pub use crypto::{AesCtr, Cipher, CryptoError, IV_SIZE};
pub use encoding::{CanonicalDecode, CanonicalEncode, DecodeError};
pub use keypath::{FileId, HashedPathBuilder, IdentityPathBuilder, PathBuilder};
