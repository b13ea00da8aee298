//! Error types for stowage.

use std::path::{Path, PathBuf};

use crate::eviction::EvictionFailure;

/// Stowage errors.
#[derive(Debug, thiserror::Error)]
pub enum StowageError {
    /// Key absent in every consulted tier.
    #[error("not found: {key} in {boundary}")]
    NotFound { boundary: String, key: String },

    /// Stored bytes or record could not be decoded into the requested type.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// A single item can never fit under the ceiling.
    #[error("item size ({requested} bytes) is larger than the maximum limit ({ceiling} bytes)")]
    ItemTooLarge { ceiling: u64, requested: u64 },

    /// Eviction ran out of candidates before enough space was free.
    #[error("{0}")]
    QuotaExhausted(Box<EvictionFailure>),

    /// Storage root could not be resolved.
    #[error("could not resolve storage root: {message}")]
    Resolution { message: String },

    /// The durable tier returned data that does not map back to the value type.
    #[error("conversion error: {message}")]
    Conversion { message: String },

    /// Key or name sanitizes to nothing usable.
    #[error("invalid key: {key:?}")]
    InvalidKey { key: String },

    /// Filesystem error.
    #[error("io error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// Structured-record store error.
    #[error("record store error: {message}")]
    Record { message: String },

    /// Key-value suite error.
    #[error("key-value suite error: {message}")]
    KeyValue { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl StowageError {
    /// Wrap an IO error with the path it happened at.
    pub fn io(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Lookup / capacity
            Self::NotFound { .. } => 1,
            Self::ItemTooLarge { .. } => 1,
            Self::QuotaExhausted(_) => 1,
            Self::InvalidData { .. } => 1,
            Self::Conversion { .. } => 1,

            // Setup
            Self::Resolution { .. } => 2,
            Self::InvalidKey { .. } => 2,
            Self::Config { .. } => 2,

            // Storage backends
            Self::Io { .. } => 3,
            Self::Record { .. } => 3,
            Self::KeyValue { .. } => 3,
        }
    }

    /// Whether callers can treat the error as "no usable saved value".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidData { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rusqlite::Error> for StowageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Record {
            message: err.to_string(),
        }
    }
}

impl From<EvictionFailure> for StowageError {
    fn from(failure: EvictionFailure) -> Self {
        Self::QuotaExhausted(Box::new(failure))
    }
}

/// Result type for stowage operations.
pub type StowageResult<T> = Result<T, StowageError>;
