//! Error types for the path/bucket substrate, tree engine, table/schema
//! layer, index engine, and transaction buffer.

use thiserror::Error;

/// Result alias used throughout `blueconfig-core`.
pub type BlueConfigResult<T> = Result<T, BlueConfigError>;

/// Every error kind the core surfaces, per the error handling design.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlueConfigError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("path already exists: {path}")]
    PathExists { path: String },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("type mismatch on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("schema error: {message}")]
    SchemaError { message: String },

    #[error("unique constraint violated on index '{index}' for key '{key}'")]
    UniqueViolation { index: String, key: String },

    #[error("'{path}' is not a {expected}")]
    NotAContainer { path: String, expected: String },

    #[error("'{path}' is not empty")]
    NonEmpty { path: String },

    #[error("index '{name}' does not exist")]
    IndexMissing { name: String },

    #[error("transaction error: {message}")]
    TxnState { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("reserved name used where user-supplied name was expected: '{name}'")]
    ReservedName { name: String },
}

impl BlueConfigError {
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn txn_state<S: Into<String>>(message: S) -> Self {
        Self::TxnState {
            message: message.into(),
        }
    }

    pub fn schema<S: Into<String>>(message: S) -> Self {
        Self::SchemaError {
            message: message.into(),
        }
    }

    /// Whether this kind indicates the caller's request was internally
    /// consistent but racing/retriable (vs. a hard logical rejection).
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl From<serde_json::Error> for BlueConfigError {
    fn from(e: serde_json::Error) -> Self {
        BlueConfigError::SchemaError {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for BlueConfigError {
    fn from(e: std::io::Error) -> Self {
        BlueConfigError::Storage {
            message: e.to_string(),
        }
    }
}
