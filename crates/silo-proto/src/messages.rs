//! Control messages and their wire encoding.
//!
//! Two kinds of traffic share each peer connection, distinguished by a
//! single leading tag byte: [`MESSAGE_TAG`] frames one encoded
//! [`ControlMessage`]; [`STREAM_TAG`] introduces raw stream bytes whose
//! length is agreed out-of-band.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use silo_core::encoding::{CanonicalDecode, CanonicalEncode, DecodeError};

/// Wire tag introducing one encoded control message.
pub const MESSAGE_TAG: u8 = 0x01;

/// Wire tag introducing raw stream bytes.
pub const STREAM_TAG: u8 = 0x02;

/// Hard cap on the encoded length of a control message. The decoder reads
/// at most this many bytes per message; longer messages truncate and fail
/// to decode.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Control message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// A key is being stored; a stream of `size` bytes follows.
    StoreFile = 1,
    /// A key is being looked up.
    GetFile = 2,
    /// The bootstrap's accumulated peer address list.
    PeersInfo = 3,
    /// A joining node's reachable listen address.
    NodeIntroduction = 4,
}

impl MessageKind {
    /// Returns the tag value.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Creates from a tag value.
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(MessageKind::StoreFile),
            2 => Ok(MessageKind::GetFile),
            3 => Ok(MessageKind::PeersInfo),
            4 => Ok(MessageKind::NodeIntroduction),
            _ => Err(DecodeError::InvalidEnumTag(tag as u32)),
        }
    }
}

/// Control messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Announces an incoming blob for `key`; the sender follows up with a
    /// stream of exactly `size` bytes (IV plus ciphertext).
    StoreFile {
        /// User key the blob is stored under
        key: String,
        /// Length of the stream that follows
        size: u64,
    },
    /// Asks every peer holding `key` to stream it back.
    GetFile {
        /// User key being looked up
        key: String,
    },
    /// Peer address list sent by a bootstrap node to a new joiner.
    PeersInfo {
        /// Reachable listen addresses of other known peers
        addresses: Vec<String>,
    },
    /// Sent by a joining node so existing peers learn its listen address.
    NodeIntroduction {
        /// The joiner's reachable listen address
        address: String,
    },
}

impl ControlMessage {
    /// Returns the message kind for this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            ControlMessage::StoreFile { .. } => MessageKind::StoreFile,
            ControlMessage::GetFile { .. } => MessageKind::GetFile,
            ControlMessage::PeersInfo { .. } => MessageKind::PeersInfo,
            ControlMessage::NodeIntroduction { .. } => MessageKind::NodeIntroduction,
        }
    }
}

impl CanonicalEncode for ControlMessage {
    fn encode(&self, buf: &mut BytesMut) {
        self.kind().tag().encode(buf);
        match self {
            ControlMessage::StoreFile { key, size } => {
                key.encode(buf);
                size.encode(buf);
            }
            ControlMessage::GetFile { key } => key.encode(buf),
            ControlMessage::PeersInfo { addresses } => addresses.encode(buf),
            ControlMessage::NodeIntroduction { address } => address.encode(buf),
        }
    }
}

impl CanonicalDecode for ControlMessage {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let kind = MessageKind::from_tag(u8::decode(buf)?)?;

        Ok(match kind {
            MessageKind::StoreFile => ControlMessage::StoreFile {
                key: String::decode(buf)?,
                size: u64::decode(buf)?,
            },
            MessageKind::GetFile => ControlMessage::GetFile {
                key: String::decode(buf)?,
            },
            MessageKind::PeersInfo => ControlMessage::PeersInfo {
                addresses: Vec::<String>::decode(buf)?,
            },
            MessageKind::NodeIntroduction => ControlMessage::NodeIntroduction {
                address: String::decode(buf)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_file_roundtrip() {
        let msg = ControlMessage::StoreFile {
            key: "alpha".to_string(),
            size: 16 + 1024,
        };
        let decoded = ControlMessage::from_bytes(&msg.to_vec()).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.kind(), MessageKind::StoreFile);
    }

    #[test]
    fn test_get_file_roundtrip() {
        let msg = ControlMessage::GetFile {
            key: "beta".to_string(),
        };
        assert_eq!(ControlMessage::from_bytes(&msg.to_vec()).unwrap(), msg);
    }

    #[test]
    fn test_peers_info_roundtrip() {
        let msg = ControlMessage::PeersInfo {
            addresses: vec![
                "127.0.0.1:3000".to_string(),
                "127.0.0.1:5000".to_string(),
            ],
        };
        assert_eq!(ControlMessage::from_bytes(&msg.to_vec()).unwrap(), msg);
    }

    #[test]
    fn test_node_introduction_roundtrip() {
        let msg = ControlMessage::NodeIntroduction {
            address: "127.0.0.1:7000".to_string(),
        };
        assert_eq!(ControlMessage::from_bytes(&msg.to_vec()).unwrap(), msg);
    }

    #[test]
    fn test_unknown_tag_fails() {
        let err = ControlMessage::from_bytes(&[0x09]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEnumTag(9)));
    }

    #[test]
    fn test_message_at_size_cap_decodes() {
        // GetFile encodes to 1 (tag) + 4 (length) + key bytes.
        let key = "k".repeat(MAX_MESSAGE_SIZE - 5);
        let msg = ControlMessage::GetFile { key };
        let encoded = msg.to_vec();
        assert_eq!(encoded.len(), MAX_MESSAGE_SIZE);
        assert_eq!(ControlMessage::from_bytes(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_message_over_size_cap_truncates_and_fails() {
        let key = "k".repeat(MAX_MESSAGE_SIZE - 4);
        let msg = ControlMessage::GetFile { key };
        let encoded = msg.to_vec();
        assert_eq!(encoded.len(), MAX_MESSAGE_SIZE + 1);

        // The decoder hands the server at most MAX_MESSAGE_SIZE bytes.
        let err = ControlMessage::from_bytes(&encoded[..MAX_MESSAGE_SIZE]).unwrap_err();
        assert!(matches!(err, DecodeError::InsufficientBytes { .. }));
    }
}
