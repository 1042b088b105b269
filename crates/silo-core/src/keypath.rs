//! Key-to-path resolution.
//!
//! A [`PathBuilder`] maps a user-supplied key to a relative location on
//! disk. The content-addressed builder hashes the key with SHA-1 and fans
//! the digest out over a fixed-depth directory tree so buckets stay small
//! and uniform.

use sha1::{Digest, Sha1};

/// Length of one directory segment in the hashed layout.
const SEGMENT_LEN: usize = 6;

/// Number of directory segments in the hashed layout. The last four hex
/// characters of the digest appear only in the file name.
const DIR_SEGMENTS: usize = 6;

/// Relative disk location for a key: a directory path plus a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId {
    /// Relative directory path with `/` separators.
    pub dir_path: String,
    /// File name within `dir_path`.
    pub file_name: String,
}

impl FileId {
    /// Returns `dir_path/file_name`.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.dir_path, self.file_name)
    }

    /// Returns the first directory segment.
    ///
    /// Delete removes the whole subtree under this segment, which is safe
    /// for the hashed layout where a bucket holds a single file in
    /// practice.
    pub fn first_segment(&self) -> &str {
        self.dir_path.split('/').next().unwrap_or("")
    }
}

/// Maps a key to its location on disk.
pub trait PathBuilder: Send + Sync {
    /// Builds the [`FileId`] for `key`. Identical keys must produce
    /// identical results across processes.
    fn build(&self, key: &str) -> FileId;
}

/// Content-addressed layout: SHA-1 of the key, hex-encoded, split into
/// six 6-character directory segments; the file name is the full 40-hex
/// digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedPathBuilder;

impl PathBuilder for HashedPathBuilder {
    fn build(&self, key: &str) -> FileId {
        let digest = hex::encode(Sha1::digest(key.as_bytes()));

        let segments: Vec<&str> = (0..DIR_SEGMENTS)
            .map(|i| &digest[i * SEGMENT_LEN..(i + 1) * SEGMENT_LEN])
            .collect();

        FileId {
            dir_path: segments.join("/"),
            file_name: digest,
        }
    }
}

/// Identity layout: directory and file name both equal the key.
///
/// Test and debug use only; not safe when the key contains path
/// separators.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPathBuilder;

impl PathBuilder for IdentityPathBuilder {
    fn build(&self, key: &str) -> FileId {
        FileId {
            dir_path: key.to_string(),
            file_name: key.to_string(),
        }
    }
}
