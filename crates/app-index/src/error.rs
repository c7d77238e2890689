use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AppIndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error for {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("Metadata query error: {0}")]
    Metadata(String),

    #[error("Icon conversion error: {0}")]
    IconConversion(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("App index has been shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppIndexError>;

impl From<serde_json::Error> for AppIndexError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
