//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures that stop processing of one object (or one record)
///
/// None of these abort a run; the driver logs them, counts the object as
/// failed, and moves on.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Malformed object key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("Record in {key:?} names no phone number in its markup or key")]
    MissingIdentifier { key: String },

    #[error("Timestamp {value:?} is not in a recognised format")]
    TimestampFormat { value: String },

    #[error("Document parse error: {0}")]
    DocumentParse(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Stable label used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MalformedKey { .. } => "malformed_key",
            IngestError::MissingIdentifier { .. } => "missing_identifier",
            IngestError::TimestampFormat { .. } => "timestamp_format",
            IngestError::DocumentParse(_) => "document_parse",
            IngestError::Fetch(_) => "fetch",
            IngestError::Store(StoreError::Transient(_)) => "store_transient",
            IngestError::Store(StoreError::Request(_)) => "store_request",
            IngestError::Config(_) => "config",
        }
    }
}

/// Object source failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => FetchError::AccessDenied(err.to_string()),
            _ => FetchError::Transport(err.to_string()),
        }
    }
}

/// Aggregate store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Throttling, dropped connections, serialization conflicts; worth retrying
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Malformed request or schema mismatch; retrying will not help
    #[error("Store request error: {0}")]
    Request(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Request(format!("Invalid aggregate payload: {}", err))
    }
}
