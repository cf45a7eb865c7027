//! Error types for folio.

use thiserror::Error;

/// Result type alias using folio's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for folio operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input (absent document id, oversized entry, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A remote payload could not be turned into a canonical record
    #[error("Parse error: {0}")]
    Parse(#[from] AnnotationParseError),

    /// Archive structure violated or unreadable
    #[error("Archive error: {0}")]
    Archive(String),

    /// Initial annotation fetch failed
    #[error("Remote fetch error: {0}")]
    RemoteFetch(String),

    /// Outbound annotation push failed or was rejected
    #[error("Remote sync error: {0}")]
    RemoteSync(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration or environment error (missing variable, no runtime)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Typed failure of the remote payload parse step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationParseError {
    /// The payload entry is not a JSON object.
    #[error("annotation payload is not an object")]
    NotAnObject,

    /// A required field is absent under every accepted name.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
