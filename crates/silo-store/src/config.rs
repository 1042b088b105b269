//! Storage configuration.

use std::path::PathBuf;
use std::sync::Arc;

use silo_core::{HashedPathBuilder, PathBuilder};

/// Default root directory name.
pub const DEFAULT_ROOT: &str = "data";

/// Storage configuration.
#[derive(Clone)]
pub struct StoreConfig {
    /// Root directory for all blobs. Any `:` in the configured name is
    /// replaced with `_`, so listen addresses like `127.0.0.1:3000` can be
    /// used directly as root names on all filesystems.
    pub root: PathBuf,
    /// Maps keys to disk locations.
    pub path_builder: Arc<dyn PathBuilder>,
}

impl StoreConfig {
    /// Creates a configuration with the given root, sanitized.
    pub fn new(root: impl AsRef<str>) -> Self {
        Self {
            root: PathBuf::from(root.as_ref().replace(':', "_")),
            ..Default::default()
        }
    }

    /// Replaces the path builder.
    pub fn with_path_builder(mut self, path_builder: Arc<dyn PathBuilder>) -> Self {
        self.path_builder = path_builder;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            path_builder: Arc::new(HashedPathBuilder),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_sanitization() {
        let config = StoreConfig::new("127.0.0.1:3000_network");
        assert_eq!(config.root, PathBuf::from("127.0.0.1_3000_network"));
    }

    #[test]
    fn test_default_root() {
        let config = StoreConfig::default();
        assert_eq!(config.root, PathBuf::from(DEFAULT_ROOT));
    }
}
