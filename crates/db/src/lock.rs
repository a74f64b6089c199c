//! Database directory locking.
//!
//! A `.lock` sentinel file in the database directory, held with an
//! OS-level exclusive lock, prevents two processes from opening the same
//! database. The OS releases the lock even if the process crashes.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use snafu::ResultExt;
use tracing::{debug, info, warn};

use cairn_types::error::{DbError, IoSnafu, Result};

/// An exclusive lock on a database directory.
///
/// Released when dropped.
pub struct DirLock {
    /// Kept open to hold the OS lock.
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock, creating the directory if needed.
    ///
    /// Non-blocking: if another process holds the lock this fails with
    /// [`DbError::Locked`] immediately.
    pub fn acquire(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).context(IoSnafu)?;
            debug!(path = %dir.display(), "created database directory");
        }

        let lock_path = dir.join(".lock");
        let file = File::create(&lock_path).context(IoSnafu)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!(path = %lock_path.display(), "acquired database lock");
                Ok(Self { file, path: lock_path })
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    // EAGAIN on Linux, EWOULDBLOCK/EAGAIN on macOS.
                    || e.raw_os_error() == Some(11)
                    || e.raw_os_error() == Some(35) =>
            {
                Err(DbError::Locked { path: dir.to_path_buf() })
            }
            Err(e) => Err(e).context(IoSnafu),
        }
    }

    /// Path of the sentinel file.
    pub fn lock_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release database lock");
        } else {
            debug!(path = %self.path.display(), "released database lock");
        }
    }
}
