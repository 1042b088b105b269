//! Silo Network - TCP peer transport.
//!
//! One long-lived TCP connection per peer pair carries two kinds of
//! traffic: short control messages and arbitrarily long raw byte streams,
//! distinguished by a one-byte tag. Parsed frames are delivered on a
//! single bounded channel; stream bytes are consumed directly from the
//! connection under a per-peer stream gate.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod decoder;
pub mod peer;
pub mod tcp;
pub mod transport;

pub use decoder::{Decoder, RawFrame, TagDecoder};
pub use peer::{StreamGuard, TcpPeer};
pub use tcp::TcpTransport;
pub use transport::{nop_handshake, HandshakeFn, PeerHooks, Transport, TransportError};
