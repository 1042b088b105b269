//! Blob persistence.

use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::PathBuf;

use silo_core::{Cipher, FileId};
use tracing::debug;

use crate::{StoreConfig, StoreError};

/// Local blob store rooted at a configured directory.
///
/// All writes are create-truncate; a failed write leaves a truncated file
/// behind. Parent directories are created on demand.
pub struct BlobStore {
    config: StoreConfig,
}

impl BlobStore {
    /// Creates a store over the configured root. The root directory itself
    /// is created lazily on first write.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    fn file_id(&self, key: &str) -> FileId {
        self.config.path_builder.build(key)
    }

    fn full_path(&self, id: &FileId) -> PathBuf {
        self.config.root.join(id.full_path())
    }

    /// Returns true iff a blob exists for `key`.
    pub fn has(&self, key: &str) -> bool {
        fs::metadata(self.full_path(&self.file_id(key))).is_ok()
    }

    /// Writes `src` to the key's location verbatim. Returns the number of
    /// bytes written.
    pub fn write_plain(&self, key: &str, src: &mut dyn Read) -> Result<u64, StoreError> {
        let mut dst = self.create(key)?;
        let n = std::io::copy(src, &mut dst)?;
        debug!(key, bytes = n, "wrote blob");
        Ok(n)
    }

    /// Encrypts `src` into the key's location. Returns the ciphertext
    /// length, not counting the 16-byte IV prefix; the on-disk size is the
    /// returned value plus 16.
    pub fn write_encrypted(
        &self,
        key: &str,
        src: &mut dyn Read,
        cipher: &dyn Cipher,
        cipher_key: &[u8],
    ) -> Result<u64, StoreError> {
        let mut dst = self.create(key)?;
        let n = cipher.encrypt(cipher_key, &mut dst, src)?;
        debug!(key, bytes = n, "wrote encrypted blob");
        Ok(n as u64)
    }

    /// Opens the blob for `key` and returns a reader over the raw file
    /// bytes along with the file size.
    pub fn read_plain(&self, key: &str) -> Result<(File, u64), StoreError> {
        let file = self.open(key)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    /// Reads and decrypts the blob for `key` into memory, returning a
    /// reader over the plaintext and the encrypted file size. The file
    /// handle is closed before returning.
    pub fn read_decrypted(
        &self,
        key: &str,
        cipher: &dyn Cipher,
        cipher_key: &[u8],
    ) -> Result<(Cursor<Vec<u8>>, u64), StoreError> {
        let (mut file, size) = self.read_plain(key)?;

        let mut plaintext = Vec::with_capacity(size as usize);
        cipher.decrypt(cipher_key, &mut plaintext, &mut file)?;
        drop(file);

        Ok((Cursor::new(plaintext), size))
    }

    /// Deletes the blob for `key` by removing the whole subtree under the
    /// key's first path segment.
    ///
    /// Under the hashed layout a top-level bucket holds a single file in
    /// practice, so this removes exactly the key's fan-out tree. Under the
    /// identity layout it removes the key's directory, and keys must not
    /// share prefixes through path separators.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let id = self.file_id(key);
        let bucket = self.config.root.join(id.first_segment());

        match fs::remove_dir_all(&bucket) {
            Ok(()) => {
                debug!(key, bucket = %bucket.display(), "deleted blob subtree");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the entire root directory.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.config.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, key: &str) -> Result<File, StoreError> {
        let id = self.file_id(key);
        fs::create_dir_all(self.config.root.join(&id.dir_path))?;
        Ok(File::create(self.full_path(&id))?)
    }

    fn open(&self, key: &str) -> Result<File, StoreError> {
        let path = self.full_path(&self.file_id(key));
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                e.into()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::{AesCtr, IV_SIZE};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn test_store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data").to_string_lossy().into_owned();
        (BlobStore::new(StoreConfig::new(root)), dir)
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (store, _dir) = test_store();

        let data = b"plain bytes";
        let n = store
            .write_plain("alpha", &mut Cursor::new(data))
            .unwrap();
        assert_eq!(n, data.len() as u64);
        assert!(store.has("alpha"));

        let (mut reader, size) = store.read_plain("alpha").unwrap();
        assert_eq!(size, data.len() as u64);

        let mut back = Vec::new();
        reader.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_encrypted_roundtrip() {
        let (store, _dir) = test_store();
        let cipher = AesCtr;
        let key = [0x42u8; 32];

        let data = b"secret payload";
        let n = store
            .write_encrypted("alpha", &mut Cursor::new(data), &cipher, &key)
            .unwrap();
        assert_eq!(n, data.len() as u64);

        // On disk: IV prefix plus ciphertext.
        let (_, size) = store.read_plain("alpha").unwrap();
        assert_eq!(size, (data.len() + IV_SIZE) as u64);

        let (mut reader, size) = store.read_decrypted("alpha", &cipher, &key).unwrap();
        assert_eq!(size, (data.len() + IV_SIZE) as u64);

        let mut back = Vec::new();
        reader.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_has_and_delete() {
        let (store, _dir) = test_store();

        assert!(!store.has("missing"));

        for i in 0..20 {
            let key = format!("foo_{i}");
            store
                .write_plain(&key, &mut Cursor::new(b"some data"))
                .unwrap();
            assert!(store.has(&key));

            store.delete(&key).unwrap();
            assert!(!store.has(&key));
        }
    }

    #[test]
    fn test_read_missing_key() {
        let (store, _dir) = test_store();
        let err = store.read_plain("nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(k) if k == "nope"));
    }

    #[test]
    fn test_overwrite_truncates() {
        let (store, _dir) = test_store();

        store
            .write_plain("alpha", &mut Cursor::new(b"a much longer first value"))
            .unwrap();
        store
            .write_plain("alpha", &mut Cursor::new(b"short"))
            .unwrap();

        let (_, size) = store.read_plain("alpha").unwrap();
        assert_eq!(size, 5);
    }

    #[test]
    fn test_hashed_layout_on_disk() {
        let (store, dir) = test_store();
        store
            .write_plain("abc", &mut Cursor::new(b"x"))
            .unwrap();

        // SHA-1("abc") fans out into six segments plus the digest file.
        let expected = dir
            .path()
            .join("data/a9993e/364706/816aba/3e2571/7850c2/6c9cd0")
            .join("a9993e364706816aba3e25717850c26c9cd0d89d");
        assert!(expected.is_file());
    }

    #[test]
    fn test_clear() {
        let (store, _dir) = test_store();
        store
            .write_plain("alpha", &mut Cursor::new(b"x"))
            .unwrap();
        store.clear().unwrap();
        assert!(!store.has("alpha"));
        // Clearing an absent root is fine.
        store.clear().unwrap();
    }
}
