//! Analysis error types.

use std::path::PathBuf;
use thiserror::Error;

use bestshot_embed::EmbeddingError;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Vision operation failed: {0}")]
    Vision(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl AnalysisError {
    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn vision(message: impl Into<String>) -> Self {
        Self::Vision(message.into())
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task(message.into())
    }
}

impl From<tokio::task::JoinError> for AnalysisError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Failure to score one frame. The composite scorer records it and uses 0.0.
#[derive(Debug, Error)]
#[error("{scorer} failed on frame {frame}: {message}")]
pub struct ScoringError {
    pub scorer: String,
    pub frame: u32,
    pub message: String,
}

impl ScoringError {
    pub fn new(scorer: impl Into<String>, frame: u32, message: impl Into<String>) -> Self {
        Self {
            scorer: scorer.into(),
            frame,
            message: message.into(),
        }
    }
}
