//! Canonical encoding for wire messages.
//!
//! Every control message that crosses the network is serialized with the
//! rules below so that all nodes produce and accept identical bytes.
//!
//! # Encoding Rules
//!
//! - **Integers**: little-endian
//! - **Strings**: u32 byte length followed by UTF-8 bytes
//! - **Sequences**: u32 element count followed by the elements
//! - **Options**: 0x00 for None, 0x01 + value for Some
//! - **Enums with payloads**: u8 tag followed by the variant fields

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors during canonical decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes to decode
    #[error("insufficient bytes: expected {expected}, got {available}")]
    InsufficientBytes {
        /// Expected number of bytes
        expected: usize,
        /// Actually available bytes
        available: usize,
    },

    /// Invalid UTF-8 string
    #[error("invalid UTF-8 string: {0}")]
    InvalidUtf8(String),

    /// Invalid enum tag
    #[error("invalid enum tag: {0}")]
    InvalidEnumTag(u32),
}

/// Trait for types that can be canonically encoded.
pub trait CanonicalEncode {
    /// Encodes the value into the buffer.
    fn encode(&self, buf: &mut BytesMut);

    /// Returns the encoded byte representation.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Returns the encoded byte representation as a Vec.
    fn to_vec(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

/// Trait for types that can be decoded from canonical encoding.
pub trait CanonicalDecode: Sized {
    /// Decodes a value, advancing the buffer past the consumed bytes.
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError>;

    /// Decodes from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(bytes);
        Self::decode(&mut buf)
    }
}

impl CanonicalEncode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl CanonicalDecode for u8 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < 1 {
            return Err(DecodeError::InsufficientBytes {
                expected: 1,
                available: buf.remaining(),
            });
        }
        Ok(buf.get_u8())
    }
}

impl CanonicalEncode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }
}

impl CanonicalDecode for u32 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < 4 {
            return Err(DecodeError::InsufficientBytes {
                expected: 4,
                available: buf.remaining(),
            });
        }
        Ok(buf.get_u32_le())
    }
}

impl CanonicalEncode for u64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(*self);
    }
}

impl CanonicalDecode for u64 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < 8 {
            return Err(DecodeError::InsufficientBytes {
                expected: 8,
                available: buf.remaining(),
            });
        }
        Ok(buf.get_u64_le())
    }
}

impl CanonicalEncode for String {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_str().encode(buf);
    }
}

impl CanonicalDecode for String {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if buf.remaining() < len {
            return Err(DecodeError::InsufficientBytes {
                expected: len,
                available: buf.remaining(),
            });
        }
        let bytes = buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))
    }
}

impl CanonicalEncode for &str {
    fn encode(&self, buf: &mut BytesMut) {
        let bytes = self.as_bytes();
        assert!(bytes.len() <= u32::MAX as usize, "string length exceeds u32::MAX");
        (bytes.len() as u32).encode(buf);
        buf.put_slice(bytes);
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        assert!(self.len() <= u32::MAX as usize, "sequence length exceeds u32::MAX");
        (self.len() as u32).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: CanonicalDecode> CanonicalDecode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        let mut vec = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            vec.push(T::decode(buf)?);
        }
        Ok(vec)
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Option<T> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            None => buf.put_u8(0x00),
            Some(value) => {
                buf.put_u8(0x01);
                value.encode(buf);
            }
        }
    }
}

impl<T: CanonicalDecode> CanonicalDecode for Option<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        match u8::decode(buf)? {
            0x00 => Ok(None),
            0x01 => Ok(Some(T::decode(buf)?)),
            tag => Err(DecodeError::InvalidEnumTag(tag as u32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_little_endian() {
        let value: u64 = 0x0102030405060708;
        assert_eq!(
            value.to_vec(),
            vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_string_encoding() {
        let s = String::from("silo");
        assert_eq!(
            s.to_vec(),
            vec![0x04, 0x00, 0x00, 0x00, b's', b'i', b'l', b'o']
        );
    }

    #[test]
    fn test_string_roundtrip() {
        let s = String::from("127.0.0.1:3000");
        let decoded = String::from_bytes(&s.to_vec()).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn test_vec_of_strings_roundtrip() {
        let addrs = vec![
            String::from("127.0.0.1:3000"),
            String::from("127.0.0.1:5000"),
        ];
        let decoded = Vec::<String>::from_bytes(&addrs.to_vec()).unwrap();
        assert_eq!(addrs, decoded);
    }

    #[test]
    fn test_truncated_input_fails() {
        let s = String::from("hello");
        let encoded = s.to_vec();
        let err = String::from_bytes(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::InsufficientBytes { .. }));
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let mut encoded = vec![0x02, 0x00, 0x00, 0x00];
        encoded.extend([0xFF, 0xFE]);
        let err = String::from_bytes(&encoded).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }

    #[test]
    fn test_option_roundtrip() {
        let some: Option<u64> = Some(42);
        assert_eq!(Option::<u64>::from_bytes(&some.to_vec()).unwrap(), some);

        let none: Option<u64> = None;
        assert_eq!(Option::<u64>::from_bytes(&none.to_vec()).unwrap(), none);
    }
}
