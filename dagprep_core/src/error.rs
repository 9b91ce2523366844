//! Error types for dagprep_core.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using dagprep_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing, streaming or packaging a DAG.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file or channel operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// YAML encoding failed.
    #[error("YAML error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    /// No input paths were supplied, or they contained no files.
    #[error("Expected some data to be processed, found none")]
    NoInput,

    /// An input path cannot be represented in the tree.
    #[error("Unsupported input {path}: {reason}")]
    UnsupportedPath { path: PathBuf, reason: String },

    /// Content identifier could not be parsed.
    #[error("Invalid content identifier: {reason}")]
    InvalidCid { reason: String },

    /// Variable-length integer is truncated or overflows.
    #[error("Invalid varint: {reason}")]
    InvalidVarint { reason: String },

    /// A frame in the stream is malformed.
    #[error("Invalid frame: {reason}")]
    InvalidFrame { reason: String },

    /// Two units claim the same name in one directory.
    #[error("Duplicate entry in tree: {path}")]
    DuplicateEntry { path: String },

    /// Descriptor records cannot be matched to the input files.
    #[error("Descriptor records do not match input files: {reason}")]
    RecordMismatch { reason: String },

    /// Root resolution failed.
    #[error("Cannot resolve root: {reason}")]
    Resolution { reason: String },

    /// A frame could not be written downstream.
    #[error("Failed to write frame for {cid}: {source}")]
    FrameWrite {
        cid: String,
        #[source]
        source: std::io::Error,
    },

    /// Chunking failed inside the chunking engine.
    #[error("Chunking failed: {reason}")]
    Chunking { reason: String },

    /// A pipeline stage waited past its deadline.
    #[error("Stage '{stage}' stalled for more than {timeout:?}")]
    StageStalled {
        stage: &'static str,
        timeout: Duration,
    },

    /// A pipeline stage ended abnormally.
    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },
}

impl Error {
    /// Create an UnsupportedPath error.
    pub fn unsupported_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::UnsupportedPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidCid error.
    pub fn invalid_cid(reason: impl Into<String>) -> Self {
        Error::InvalidCid {
            reason: reason.into(),
        }
    }

    /// Create an InvalidVarint error.
    pub fn invalid_varint(reason: impl Into<String>) -> Self {
        Error::InvalidVarint {
            reason: reason.into(),
        }
    }

    /// Create an InvalidFrame error.
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Error::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Create a DuplicateEntry error.
    pub fn duplicate_entry(path: impl Into<String>) -> Self {
        Error::DuplicateEntry { path: path.into() }
    }

    /// Create a RecordMismatch error.
    pub fn record_mismatch(reason: impl Into<String>) -> Self {
        Error::RecordMismatch {
            reason: reason.into(),
        }
    }

    /// Create a Resolution error.
    pub fn resolution(reason: impl Into<String>) -> Self {
        Error::Resolution {
            reason: reason.into(),
        }
    }

    /// Create a Chunking error.
    pub fn chunking(reason: impl Into<String>) -> Self {
        Error::Chunking {
            reason: reason.into(),
        }
    }

    /// Create a StageFailed error.
    pub fn stage_failed(stage: &'static str, reason: impl Into<String>) -> Self {
        Error::StageFailed {
            stage,
            reason: reason.into(),
        }
    }

    /// Whether this error came from an expired stage deadline.
    pub fn is_stall(&self) -> bool {
        matches!(self, Error::StageStalled { .. })
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
