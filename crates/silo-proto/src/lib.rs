//! Silo Protocol - Wire protocol and message definitions.
//!
//! This crate defines:
//! - The control message set exchanged between peers
//! - The one-byte wire envelope tags for messages and streams
//! - The frame type delivered by the transport to the server

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod frame;
pub mod messages;

pub use frame::Frame;
pub use messages::{ControlMessage, MessageKind, MAX_MESSAGE_SIZE, MESSAGE_TAG, STREAM_TAG};
