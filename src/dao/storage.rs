use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by question sources regardless of where the content lives.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("malformed content in {location}: {reason}")]
    Malformed { location: String, reason: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct an error for content that was reachable but could not be used.
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
