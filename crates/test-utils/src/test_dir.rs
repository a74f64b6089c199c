//! Temporary directory management for tests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A managed temporary directory, removed on drop.
///
/// # Example
///
/// ```
/// use cairn_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let db_path = dir.join("db");
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Create a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Path to the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Join a relative path onto the directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_cleans_up() {
        let path = {
            let dir = TestDir::new();
            assert!(dir.path().is_dir());
            std::fs::write(dir.join("probe"), "x").expect("write");
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
