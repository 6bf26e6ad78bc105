//! Error types for the chat protocol boundary.

use thiserror::Error;

/// Errors surfaced by storage and engine ports.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Not-found conditions map to 404 at the HTTP layer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::FileNotFound(_))
    }
}

/// Convenience result type for port operations.
pub type ChatResult<T> = Result<T, ChatError>;
