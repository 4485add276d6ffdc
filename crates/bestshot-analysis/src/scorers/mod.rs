//! Per-frame quality scorers.
//!
//! Every scorer maps a batch of frames to one value in `[0, 1]` per frame,
//! in frame order. [`CompositeScorer`] combines them with signed weights.

mod aesthetics;
mod composite;
mod exposure;
mod motion;
mod saliency;
mod sharpness;

pub use aesthetics::AestheticsScorer;
pub use composite::{CompositeScorer, ScoringWeights, COMPOSITE_KEY};
pub use exposure::{ExposureReport, ExposureScorer};
pub use motion::{ClipMotionSummary, MotionScorer, MotionScorerConfig};
pub use saliency::{SaliencyScorer, VideoType, DEFAULT_SALIENCY_PROMPTS};
pub use sharpness::{SharpnessScorer, BLUR_THRESHOLD};

use async_trait::async_trait;
use rayon::prelude::*;
use tracing::warn;

use bestshot_models::Frame;

use crate::error::{AnalysisError, AnalysisResult, ScoringError};

/// A frame quality signal.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Key of this scorer in weight maps and reports.
    fn name(&self) -> &'static str;

    /// Scores of `frames`, in order.
    async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>>;

    /// Score of a frame on its own.
    async fn score_frame(&self, frame: &Frame) -> AnalysisResult<f64> {
        self.score_frames(std::slice::from_ref(frame))
            .await?
            .first()
            .copied()
            .ok_or_else(|| AnalysisError::invalid_input(format!("{} returned no score", self.name())))
    }
}

/// Min-max normalize to `[0, 1]`. A flat series maps to 0.5.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range < 1e-6 {
        return vec![0.5; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Run a CPU-bound per-frame measure over `frames` on the blocking pool.
///
/// A frame whose measure fails is logged and scores 0.0.
pub(crate) async fn score_each<F>(
    scorer: &'static str,
    frames: &[Frame],
    measure: F,
) -> AnalysisResult<Vec<f64>>
where
    F: Fn(&Frame) -> AnalysisResult<f64> + Send + Sync + 'static,
{
    let frames = frames.to_vec();
    let scores = tokio::task::spawn_blocking(move || {
        frames
            .par_iter()
            .map(|frame| match measure(frame) {
                Ok(score) => score,
                Err(e) => {
                    let err = ScoringError::new(scorer, frame.index, e.to_string());
                    warn!("{}", err);
                    metrics::counter!("bestshot_frame_scoring_failures_total", "scorer" => scorer)
                        .increment(1);
                    0.0
                }
            })
            .collect::<Vec<f64>>()
    })
    .await?;
    Ok(scores)
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use image::{GrayImage, Luma};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bestshot_embed::{Embedding, EmbeddingProvider, EmbeddingResult};
    use bestshot_models::Frame;

    /// Deterministic in-memory provider. Images listed in `images` get the
    /// given vector, anything else a vector derived from its name.
    #[derive(Default)]
    pub struct StubProvider {
        pub images: HashMap<PathBuf, Vec<f32>>,
        pub texts: HashMap<String, Vec<f32>>,
        image_calls: AtomicUsize,
    }

    impl StubProvider {
        pub fn image_calls(&self) -> usize {
            self.image_calls.load(Ordering::SeqCst)
        }

        fn derived(key: &str) -> Embedding {
            let seed = key.bytes().fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
            Embedding::new(vec![
                1.0 + (seed % 7) as f32,
                (seed % 5) as f32,
                (seed % 3) as f32,
                1.0,
            ])
        }
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn encode_images(&self, images: &[PathBuf]) -> EmbeddingResult<Vec<Embedding>> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            Ok(images
                .iter()
                .map(|p| match self.images.get(p) {
                    Some(v) => Embedding::new(v.clone()),
                    None => Self::derived(&p.to_string_lossy()),
                })
                .collect())
        }

        async fn encode_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
            Ok(texts
                .iter()
                .map(|t| match self.texts.get(t) {
                    Some(v) => Embedding::new(v.clone()),
                    None => Self::derived(t),
                })
                .collect())
        }
    }

    /// Write grayscale frames produced by `pixel(frame, x, y)` into `dir`.
    pub fn write_frames(
        dir: &Path,
        count: u32,
        size: (u32, u32),
        pixel: impl Fn(u32, u32, u32) -> u8,
    ) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("frame_{:06}.png", i + 1));
                GrayImage::from_fn(size.0, size.1, |x, y| Luma([pixel(i, x, y)]))
                    .save(&path)
                    .unwrap();
                Frame::new(i, 3.0, path)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_scores() {
        assert_eq!(normalize_scores(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize_scores(&[7.0, 7.0]), vec![0.5, 0.5]);
        assert!(normalize_scores(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_score_each_recovers_failed_frames() {
        let frames = vec![
            Frame::new(0, 3.0, "a.jpg"),
            Frame::new(1, 3.0, "b.jpg"),
        ];
        let scores = score_each("stub", &frames, |f| {
            if f.index == 1 {
                Err(AnalysisError::invalid_input("unreadable"))
            } else {
                Ok(0.8)
            }
        })
        .await
        .unwrap();
        assert_eq!(scores, vec![0.8, 0.0]);
    }
}
