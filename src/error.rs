//! Error types for locker operations

use crate::cache::Unit;
use crate::format::{ FormatError, ReadError };
use crate::hash::ContentHash;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for locker operations
pub type Result<T> = std::result::Result<T, LockerError>;

/// Errors that can occur while creating, mutating or reading a locker
#[derive(Error, Debug)]
pub enum LockerError {
    /// A locker is already present at the requested root
    #[error("locker already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    /// No locker layout at the given root
    #[error("no locker found at {}", .0.display())]
    LockerNotFound(PathBuf),

    /// No record for this local path, persisted or resident
    #[error("file {0} not found in locker")]
    FileNotFound(String),

    /// Chunk store lookup miss
    #[error("chunk {0} not found")]
    ChunkNotFound(ContentHash),

    /// Directory add was pointed at something else
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// A persisted unit could not be decoded
    #[error("corrupt locker unit {}: {source}", .unit.display())]
    Corrupt {
        /// File holding the unit
        unit: PathBuf,
        /// What was wrong with it
        #[source]
        source: FormatError,
    },

    /// A record references a chunk that the store does not hold
    #[error("corrupt locker: file {path} references missing chunk {hash}")]
    MissingChunk {
        /// Local path of the record
        path: String,
        /// The hash that could not be resolved
        hash: ContentHash,
    },

    /// A record's stored size disagrees with the chunks it lists
    #[error("corrupt locker: file {path} should be {expected} bytes, its chunks hold {actual}")]
    SizeMismatch {
        /// Local path of the record
        path: String,
        /// Size stored in the record
        expected: u64,
        /// Sum of the chunk lengths
        actual: u64,
    },

    /// Record unit held back because the checkpoint it depends on failed
    #[error("not written: the checkpoint could not be saved")]
    CheckpointNotSaved,

    /// Target chunk size outside the supported range
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(usize),

    /// Local path cannot be used as a record key
    #[error("invalid local path {path:?}: {reason}")]
    InvalidPath {
        /// Path as given by the caller
        path: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Underlying read or write failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// One or more units could not be saved; the others were written
    #[error("failed to save {} unit(s)", .0.len())]
    Save(Vec<UnitFailure>),
}

impl LockerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LockerError::Io { path: path.into(), source }
    }

    pub(crate) fn corrupt(unit: impl Into<PathBuf>, source: FormatError) -> Self {
        LockerError::Corrupt { unit: unit.into(), source }
    }

    pub(crate) fn from_read(unit: impl Into<PathBuf>, err: ReadError) -> Self {
        match err {
            ReadError::Io(source) => LockerError::io(unit, source),
            ReadError::Format(source) => LockerError::corrupt(unit, source),
        }
    }

    /// True for every "does not exist" condition: locker, file record or chunk.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LockerError::LockerNotFound(_) | LockerError::FileNotFound(_) | LockerError::ChunkNotFound(_)
        )
    }

    /// True when persisted state is unreadable or internally inconsistent.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            LockerError::Corrupt { .. } | LockerError::MissingChunk { .. } | LockerError::SizeMismatch { .. }
        )
    }
}

/// A unit that `save` could not persist
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: Unit,
    pub error: LockerError,
}

