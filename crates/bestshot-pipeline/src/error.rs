//! Pipeline error types.

use std::path::PathBuf;
use thiserror::Error;

use bestshot_analysis::AnalysisError;
use bestshot_embed::EmbeddingError;
use bestshot_media::MediaError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Video not found: {0}")]
    VideoNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("No frames sampled from {0}")]
    NoFrames(PathBuf),

    #[error("Input directory not found: {0}")]
    DirectoryNotFound(PathBuf),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure is confined to the video being processed.
    ///
    /// Batch runs record these and move on; anything else stops the batch.
    pub fn is_fatal_for_video(&self) -> bool {
        !matches!(
            self,
            PipelineError::Config(_) | PipelineError::Media(MediaError::FfmpegNotFound | MediaError::FfprobeNotFound)
        )
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<glob::PatternError> for PipelineError {
    fn from(e: glob::PatternError) -> Self {
        Self::Config(format!("invalid file pattern: {}", e))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Analysis(AnalysisError::task(e.to_string()))
    }
}
