//! Error types for MedTrack device trust

use thiserror::Error;

/// Document store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("version conflict on {id} (expected {expected}, found {actual})")]
    Conflict { id: String, expected: u64, actual: u64 },

    #[error("corrupt document {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// Mutex lock was poisoned (a thread panicked while holding it)
    #[error("lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether a re-read and retry may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::AlreadyExists(_))
    }
}

/// Device-local key-value store errors
#[derive(Error, Debug)]
pub enum KvError {
    #[error("key-value I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("key-value file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("key-value store unavailable")]
    Unavailable,
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
