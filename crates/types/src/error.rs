//! Error taxonomy for cairn using snafu.
//!
//! The surface taxonomy is small by design: invalid inputs are rejected
//! synchronously, optimistic conflicts are a `false` commit (not an
//! error), and everything the backend can do wrong is folded into
//! [`DbError::Backend`] with a source location.

use std::path::PathBuf;

use snafu::{Location, Snafu};

use crate::codec::CodecError;
use crate::hash::Hash;

/// Unified result type for cairn operations.
pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Top-level error type for the stowage database.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DbError {
    /// Key length outside `[1, 255]`.
    #[snafu(display("Invalid key length {len} (keys are 1..=255 bytes)"))]
    InvalidKey {
        /// The offending length.
        len: usize,
    },

    /// Value length above 1 GiB.
    #[snafu(display("Invalid value length {len} (values are at most 1 GiB)"))]
    InvalidValue {
        /// The offending length.
        len: usize,
    },

    /// A `load` found neither a fresh nor a persisted resource.
    ///
    /// Never implies corruption: the resource may simply have been
    /// reclaimed after its last root disappeared.
    #[snafu(display("Missing resource {hash}"))]
    MissingResource {
        /// The absent content address.
        hash: Hash,
    },

    /// Storage backend failure (I/O, file size, filesystem).
    #[snafu(display("Backend failure at {location}: {message}"))]
    Backend {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The committer aborted; this handle rejects all further work.
    #[snafu(display("Database handle is poisoned"))]
    Poisoned,

    /// I/O error outside the backend proper (directory setup, lock file).
    #[snafu(display("I/O error at {location}: {source}"))]
    Io {
        /// Underlying I/O error.
        source: std::io::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// The database directory is locked by another process.
    #[snafu(display("Database directory already locked: {}", path.display()))]
    Locked {
        /// The contested directory.
        path: PathBuf,
    },

    /// A string failed to parse as a hash.
    #[snafu(display("Malformed hash"))]
    MalformedHash,

    /// An ordered-map lookup that must succeed found nothing.
    #[snafu(display("Key not found"))]
    KeyNotFound,

    /// Decoding a stowed structure failed.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// Underlying codec error.
        source: CodecError,
    },
}

impl DbError {
    /// Wrap any backend error into the taxonomy.
    #[track_caller]
    pub fn backend(err: impl std::fmt::Display) -> Self {
        let caller = std::panic::Location::caller();
        DbError::Backend {
            message: err.to_string(),
            location: Location::new(caller.file(), caller.line(), caller.column()),
        }
    }
}

impl From<CodecError> for DbError {
    fn from(source: CodecError) -> Self {
        DbError::Codec { source }
    }
}
