//! Symmetric stream encryption.
//!
//! Blobs are sealed with AES in CTR mode. Every encrypted blob starts with a
//! random 16-byte IV followed by the ciphertext, so the on-disk and on-wire
//! size is always plaintext size + 16. Encryption and decryption run in
//! fixed-size chunks, keeping memory use constant regardless of blob size.

use std::io::{Read, Write};

use aes::cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Size of the IV prefix on every encrypted blob.
pub const IV_SIZE: usize = 16;

/// Chunk size for the streaming XOR copy.
const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Errors from cipher operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key length is not 16, 24, or 32 bytes
    #[error("bad key length: {0} (must be 16, 24, or 32 bytes)")]
    BadKey(usize),

    /// IO error while reading or writing the stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Symmetric stream cipher over byte streams.
///
/// Implementations read `src` to EOF and write the transformed bytes to
/// `dst`, returning the number of payload bytes written (the IV prefix is
/// not counted).
pub trait Cipher: Send + Sync {
    /// Encrypts `src` into `dst`, prefixing a fresh random IV.
    fn encrypt(
        &self,
        key: &[u8],
        dst: &mut dyn Write,
        src: &mut dyn Read,
    ) -> Result<usize, CryptoError>;

    /// Decrypts `src` into `dst`, consuming the IV prefix from `src`.
    fn decrypt(
        &self,
        key: &[u8],
        dst: &mut dyn Write,
        src: &mut dyn Read,
    ) -> Result<usize, CryptoError>;
}

/// AES-CTR cipher. The key length selects AES-128, AES-192, or AES-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesCtr;

/// Keystream over the three supported key sizes.
enum Keystream {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

impl Keystream {
    fn new(key: &[u8], iv: &[u8; IV_SIZE]) -> Result<Self, CryptoError> {
        match key.len() {
            16 => {
                let mut k = [0u8; 16];
                k.copy_from_slice(key);
                Ok(Keystream::Aes128(Aes128Ctr::new(&k.into(), &(*iv).into())))
            }
            24 => {
                let mut k = [0u8; 24];
                k.copy_from_slice(key);
                Ok(Keystream::Aes192(Aes192Ctr::new(&k.into(), &(*iv).into())))
            }
            32 => {
                let mut k = [0u8; 32];
                k.copy_from_slice(key);
                Ok(Keystream::Aes256(Aes256Ctr::new(&k.into(), &(*iv).into())))
            }
            n => Err(CryptoError::BadKey(n)),
        }
    }

    fn apply(&mut self, data: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(data),
            Keystream::Aes192(c) => c.apply_keystream(data),
            Keystream::Aes256(c) => c.apply_keystream(data),
        }
    }
}

/// XORs the keystream over `src` in chunks and writes the result to `dst`.
fn copy_stream(
    stream: &mut Keystream,
    dst: &mut dyn Write,
    src: &mut dyn Read,
) -> Result<usize, CryptoError> {
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0;

    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        stream.apply(&mut buf[..n]);
        dst.write_all(&buf[..n])?;
        total += n;
    }

    Ok(total)
}

impl Cipher for AesCtr {
    fn encrypt(
        &self,
        key: &[u8],
        dst: &mut dyn Write,
        src: &mut dyn Read,
    ) -> Result<usize, CryptoError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut stream = Keystream::new(key, &iv)?;
        dst.write_all(&iv)?;
        copy_stream(&mut stream, dst, src)
    }

    fn decrypt(
        &self,
        key: &[u8],
        dst: &mut dyn Write,
        src: &mut dyn Read,
    ) -> Result<usize, CryptoError> {
        let mut iv = [0u8; IV_SIZE];
        src.read_exact(&mut iv)?;

        let mut stream = Keystream::new(key, &iv)?;
        copy_stream(&mut stream, dst, src)
    }
}
