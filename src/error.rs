//! Error types for the cross-reference database
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Status codes returned by the key-value store layer.
///
/// These mirror the conditions a store operation can hit. `NotFound` is
/// folded into `Option::None` at the read-API boundary and `KeyExist` is
/// absorbed on idempotent inserts; the rest surface to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The requested key (or duplicate value) does not exist.
    NotFound,
    /// The key (or duplicate value) already exists.
    KeyExist,
    /// The on-disk image failed validation and cannot be trusted.
    Corrupted,
    /// The data file was produced by a different format version.
    VersionMismatch,
    /// The write ran past the mapped capacity; the map must grow.
    MapFull,
    /// The configured reader limit is exhausted.
    ReadersFull,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::KeyExist => "key exists",
            Self::Corrupted => "corrupted",
            Self::VersionMismatch => "version mismatch",
            Self::MapFull => "map full",
            Self::ReadersFull => "readers full",
        };
        f.write_str(s)
    }
}

/// Main error type for database operations
#[derive(Error, Debug)]
pub enum DbError {
    /// Underlying filesystem failure
    #[error("I/O failure at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key-value store returned an error
    #[error("store operation '{op}' failed: {kind}")]
    Store {
        op: &'static str,
        kind: StoreErrorKind,
    },

    /// Schema mismatch detected at open
    #[error("incompatible database version: found {found}, expected {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },

    /// A raw index record failed to decode
    #[error("invalid index record: {reason}")]
    InvalidRecord { reason: String },

    /// Transaction discarded by the caller before commit
    #[error("transaction discarded before commit")]
    Cancelled,

    /// Write attempted against a read-only database handle
    #[error("database is opened read-only")]
    ReadOnly,
}

impl DbError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn store(op: &'static str, kind: StoreErrorKind) -> Self {
        Self::Store { op, kind }
    }

    pub(crate) fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// True when the error is the map-capacity signal the growth protocol
    /// handles by enlarging the mapped region and retrying.
    pub fn is_map_full(&self) -> bool {
        matches!(
            self,
            Self::Store {
                kind: StoreErrorKind::MapFull,
                ..
            }
        )
    }

    /// True when the environment detected on-disk corruption. The handle is
    /// poisoned afterwards and subsequent operations fail fast.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Store {
                kind: StoreErrorKind::Corrupted,
                ..
            }
        )
    }
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_full_detection() {
        let err = DbError::store("put", StoreErrorKind::MapFull);
        assert!(err.is_map_full());
        assert!(!err.is_corruption());

        let err = DbError::store("get", StoreErrorKind::NotFound);
        assert!(!err.is_map_full());
    }

    #[test]
    fn test_display_includes_operation() {
        let err = DbError::store("insert_dup", StoreErrorKind::KeyExist);
        let msg = err.to_string();
        assert!(msg.contains("insert_dup"));
        assert!(msg.contains("key exists"));
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = DbError::io(
            "/tmp/db/data.xdb",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/db/data.xdb"));
    }
}
