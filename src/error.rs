//! Error types for biosearch.

use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for biosearch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed caller input. Never retried.
    ///
    /// Displays the bare message, which is what clients see.
    #[error("{0}")]
    InvalidInput(String),

    /// The embedding generator failed or produced a malformed vector.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The embedding generator's output broke the normalization contract.
    #[error("Upstream contract violation: {0}")]
    UpstreamContractViolation(String),

    /// Candidate store error.
    #[error("Candidate store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// API error.
    #[error("API error: {0}")]
    Api(String),

    /// Request exceeded the configured deadline.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else, carrying the original message.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller is at fault (HTTP 4xx) rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Store(err.to_string())
    }
}
