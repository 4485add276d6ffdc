//! Sharpness from the variance of the Laplacian.

use async_trait::async_trait;
use std::path::Path;

use bestshot_models::Frame;

use super::{normalize_scores, score_each, Scorer};
use crate::error::AnalysisResult;
use crate::imaging::{gray_to_array, laplacian_variance, load_gray};

/// Raw Laplacian variance under which a frame counts as blurry.
pub const BLUR_THRESHOLD: f64 = 100.0;

/// Scores sharpness relative to the other frames of the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharpnessScorer;

impl SharpnessScorer {
    pub fn new() -> Self {
        Self
    }

    /// Raw Laplacian variance of the frame at `path`.
    pub fn variance(path: &Path) -> AnalysisResult<f64> {
        let img = load_gray(path)?;
        laplacian_variance(&gray_to_array(&img))
    }

    pub fn is_blurry(&self, frame: &Frame, threshold: f64) -> AnalysisResult<bool> {
        Ok(Self::variance(&frame.path)? < threshold)
    }
}

#[async_trait]
impl Scorer for SharpnessScorer {
    fn name(&self) -> &'static str {
        "sharpness"
    }

    async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
        let raw = score_each(self.name(), frames, |f| Self::variance(&f.path)).await?;
        Ok(normalize_scores(&raw))
    }
}
