//! Error types for websettings

use crate::types::{DurableOp, LoadState, Status};
use thiserror::Error;

/// Main error type for websettings
#[derive(Error, Debug)]
pub enum SettingsError {
    // ============ Construction Errors ============
    #[error("Organization name must not be empty")]
    EmptyOrganization,

    #[error("Unsupported settings format: {0}")]
    UnsupportedFormat(String),

    #[error("Name {0:?} cannot be used as a settings path component")]
    InvalidName(String),

    // ============ Access Errors ============
    #[error("Settings store is not ready (state: {0})")]
    NotReady(LoadState),

    #[error("Host storage quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: usize, available: usize },

    #[error("Host storage error: {0}")]
    Host(String),

    #[error("Durable database {op} failed: {reason}")]
    Database { op: DurableOp, reason: String },

    #[error("Key {0:?} falls inside a fallback tier")]
    ReservedKey(String),

    #[error("Staging buffer error: {0}")]
    Staging(String),

    // ============ Format Errors ============
    #[error("Malformed settings data: {0}")]
    Format(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SettingsError {
    pub fn database(op: DurableOp, reason: impl ToString) -> Self {
        SettingsError::Database {
            op,
            reason: reason.to_string(),
        }
    }

    /// Status a backend reports after failing with this error
    pub fn status(&self) -> Status {
        match self {
            SettingsError::Format(_) => Status::FormatError,
            _ => Status::AccessError,
        }
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(err: std::io::Error) -> Self {
        SettingsError::Staging(err.to_string())
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Format(err.to_string())
    }
}
