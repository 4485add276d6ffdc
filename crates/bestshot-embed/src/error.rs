//! Embedding error types.

use thiserror::Error;

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read image {path}: {message}")]
    Image { path: String, message: String },
}

impl EmbeddingError {
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::RequestFailed(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::ServiceUnavailable(_)
                | EmbeddingError::Timeout(_)
                | EmbeddingError::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EmbeddingError::ServiceUnavailable("down".into()).is_retryable());
        assert!(EmbeddingError::Timeout(30).is_retryable());
        assert!(!EmbeddingError::invalid_response("bad").is_retryable());
        assert!(!EmbeddingError::DimensionMismatch {
            expected: 512,
            actual: 768
        }
        .is_retryable());
    }
}
