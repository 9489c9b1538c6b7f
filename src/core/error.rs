use thiserror::Error;

/// Errors raised by the resource cache.
///
/// Save blockers are not represented here: they are data that flows through
/// events, never an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Relationship mismatch: {0}")]
    RelationshipMismatch(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Resource '{0}' not found")]
    NotFound(String),

    #[error("Fetch cancelled for '{0}'")]
    FetchCancelled(String),

    #[error("'{0}' was dropped while a request was in flight")]
    Discarded(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
