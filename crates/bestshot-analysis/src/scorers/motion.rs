//! Camera motion quality.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use bestshot_embed::{CacheKind, DiskCache};
use bestshot_models::{Frame, MotionMetrics};

use super::Scorer;
use crate::error::AnalysisResult;
use crate::flow::FlowMethod;
use crate::motion::{calculate_motion_smoothness, detect_motion_reversals, MotionAnalyzer};
use crate::signal::{mean, uniform_filter1d, BorderMode};

/// Size of the moving average applied to the per-frame scores.
const SCORE_SMOOTHING: usize = 5;

/// Velocity flip that counts as a reversal inside a scoring window.
const WINDOW_REVERSAL_THRESHOLD: f64 = 0.5;

/// Velocity flip that counts as a reversal over a whole clip.
const CLIP_REVERSAL_THRESHOLD: f64 = 0.1;

/// Tuning of [`MotionScorer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionScorerConfig {
    pub smoothness_weight: f64,
    pub stability_weight: f64,
    pub consistency_weight: f64,
    pub penalize_reversals: bool,
    /// Fraction removed from a frame's score near a reversal
    pub reversal_penalty: f64,
    /// Shake at which stability halves
    pub max_shake: f64,
    /// Magnitudes inside `[optimal_min, optimal_max]` are not penalized
    pub optimal_min: f64,
    pub optimal_max: f64,
    /// Frame pairs analyzed per batch
    pub batch_size: usize,
    /// Frames wider than this are downscaled before flow
    pub max_width: u32,
    pub method: FlowMethod,
}

impl Default for MotionScorerConfig {
    fn default() -> Self {
        Self {
            smoothness_weight: 0.4,
            stability_weight: 0.3,
            consistency_weight: 0.3,
            penalize_reversals: true,
            reversal_penalty: 0.5,
            max_shake: 2.0,
            optimal_min: 0.5,
            optimal_max: 5.0,
            batch_size: 30,
            max_width: 640,
            method: FlowMethod::Dense,
        }
    }
}

impl MotionScorerConfig {
    /// Component weights normalized to sum to one.
    fn weights(&self) -> (f64, f64, f64) {
        let total = self.smoothness_weight + self.stability_weight + self.consistency_weight;
        if total <= 0.0 {
            return (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        (
            self.smoothness_weight / total,
            self.stability_weight / total,
            self.consistency_weight / total,
        )
    }
}

/// Motion quality of one clip's frame range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMotionSummary {
    pub motion_quality: f64,
    pub has_reversal: bool,
    pub reversal_count: usize,
    pub smoothness: f64,
    pub stability: f64,
    pub consistency: f64,
    pub mean_magnitude: f64,
    pub shake_level: f64,
    pub dominant_motion: String,
}

impl ClipMotionSummary {
    fn still() -> Self {
        Self {
            motion_quality: 0.0,
            has_reversal: false,
            reversal_count: 0,
            smoothness: 1.0,
            stability: 1.0,
            consistency: 1.0,
            mean_magnitude: 0.0,
            shake_level: 0.0,
            dominant_motion: "static".to_string(),
        }
    }
}

/// Rewards smooth, steady, purposeful camera moves.
pub struct MotionScorer {
    config: MotionScorerConfig,
    analyzer: Arc<MotionAnalyzer>,
    cache: DiskCache,
}

impl MotionScorer {
    pub fn new(config: MotionScorerConfig, cache: DiskCache) -> Self {
        let analyzer = Arc::new(MotionAnalyzer::new(config.method, config.max_width));
        let (smoothness, stability, consistency) = config.weights();
        info!(
            smoothness,
            stability,
            consistency,
            method = analyzer.method_name(),
            "Motion scorer initialized"
        );
        Self {
            config,
            analyzer,
            cache,
        }
    }

    pub fn config(&self) -> &MotionScorerConfig {
        &self.config
    }

    /// First, middle and last frame identities; every identity for short runs.
    fn cache_key(frames: &[Frame]) -> String {
        if frames.len() >= 3 {
            [&frames[0], &frames[frames.len() / 2], &frames[frames.len() - 1]]
                .iter()
                .map(|f| f.identity())
                .collect::<Vec<_>>()
                .join("_")
        } else {
            frames.iter().map(Frame::identity).collect::<Vec<_>>().join("_")
        }
    }

    /// Pair metrics over `frames`, computed in overlapping batches.
    async fn pair_metrics(&self, frames: &[Frame]) -> AnalysisResult<Vec<MotionMetrics>> {
        let batch = self.config.batch_size.max(1);
        let mut metrics = Vec::with_capacity(frames.len().saturating_sub(1));

        let mut start = 0;
        while start + 1 < frames.len() {
            let end = (start + batch + 1).min(frames.len());
            let chunk = frames[start..end].to_vec();
            let analyzer = self.analyzer.clone();
            let pairs = tokio::task::spawn_blocking(move || analyzer.analyze_pairs(&chunk)).await??;
            metrics.extend(pairs);
            start += batch;
        }
        Ok(metrics)
    }

    /// Per-frame scores from per-frame (padded) metrics.
    fn frame_scores(&self, padded: &[MotionMetrics]) -> Vec<f64> {
        let (ws, wst, wc) = self.config.weights();
        let magnitudes: Vec<f64> = padded.iter().map(|m| m.magnitude).collect();
        let n = padded.len();

        let scores: Vec<f64> = (0..n)
            .map(|i| {
                let m = &padded[i];

                let smoothness = if i >= 2 && i + 2 < n {
                    calculate_motion_smoothness(&magnitudes[i - 2..i + 3])
                } else {
                    1.0
                };
                let stability = 1.0 / (1.0 + m.shake / self.config.max_shake);
                let consistency = m.direction_consistency;

                let magnitude_fit = if m.magnitude < self.config.optimal_min {
                    m.magnitude / self.config.optimal_min
                } else if m.magnitude > self.config.optimal_max {
                    self.config.optimal_max / m.magnitude
                } else {
                    1.0
                };

                let mut score = (ws * smoothness + wst * stability + wc * consistency) * magnitude_fit;

                if self.config.penalize_reversals && i >= 3 && i + 1 < n {
                    let window = &magnitudes[i - 3..i + 2];
                    if !detect_motion_reversals(window, WINDOW_REVERSAL_THRESHOLD).is_empty() {
                        score *= 1.0 - self.config.reversal_penalty;
                        debug!(frame = i, "Motion reversal detected");
                    }
                }

                score.clamp(0.0, 1.0)
            })
            .collect();

        uniform_filter1d(&scores, SCORE_SMOOTHING, BorderMode::Nearest)
    }

    /// Motion quality over frames `start..=end` of `frames`.
    pub async fn analyze_clip_motion(
        &self,
        frames: &[Frame],
        start: usize,
        end: usize,
    ) -> AnalysisResult<ClipMotionSummary> {
        let end = end.min(frames.len().saturating_sub(1));
        if start >= end {
            return Ok(ClipMotionSummary::still());
        }

        let clip = frames[start..=end].to_vec();
        let analyzer = self.analyzer.clone();
        let metrics = tokio::task::spawn_blocking(move || analyzer.analyze_pairs(&clip)).await??;
        if metrics.is_empty() {
            return Ok(ClipMotionSummary::still());
        }

        let magnitudes: Vec<f64> = metrics.iter().map(|m| m.magnitude).collect();
        let shakes: Vec<f64> = metrics.iter().map(|m| m.shake).collect();
        let consistencies: Vec<f64> = metrics.iter().map(|m| m.direction_consistency).collect();

        let smoothness = calculate_motion_smoothness(&magnitudes);
        let shake_level = mean(&shakes);
        let stability = 1.0 / (1.0 + shake_level / self.config.max_shake);
        let consistency = mean(&consistencies);
        let reversals = detect_motion_reversals(&magnitudes, CLIP_REVERSAL_THRESHOLD);
        let has_reversal = !reversals.is_empty();

        let (ws, wst, wc) = self.config.weights();
        let mut quality = ws * smoothness + wst * stability + wc * consistency;
        if has_reversal && self.config.penalize_reversals {
            quality *= 1.0 - self.config.reversal_penalty;
        }

        let average = |f: fn(&MotionMetrics) -> f64| mean(&metrics.iter().map(f).collect::<Vec<_>>());
        let overall = MotionMetrics {
            magnitude: mean(&magnitudes),
            direction_consistency: consistency,
            shake: shake_level,
            zoom: average(|m| m.zoom),
            pan: average(|m| m.pan),
            tilt: average(|m| m.tilt),
            rotation: average(|m| m.rotation),
        };

        Ok(ClipMotionSummary {
            motion_quality: quality,
            has_reversal,
            reversal_count: reversals.len(),
            smoothness,
            stability,
            consistency,
            mean_magnitude: overall.magnitude,
            shake_level,
            dominant_motion: overall.dominant_motion().to_string(),
        })
    }
}

#[async_trait]
impl Scorer for MotionScorer {
    fn name(&self) -> &'static str {
        "motion"
    }

    async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
        if frames.len() < 2 {
            warn!("Not enough frames for motion analysis");
            return Ok(vec![1.0; frames.len()]);
        }

        let key = Self::cache_key(frames);
        if let Some(scores) = self.cache.get::<Vec<f64>>(CacheKind::Motion, &key) {
            if scores.len() == frames.len() {
                info!(frames = frames.len(), "Loaded cached motion scores");
                return Ok(scores);
            }
        }

        info!(frames = frames.len(), "Analyzing motion");
        let pairs = self.pair_metrics(frames).await?;
        let padded = MotionMetrics::pad_to_frames(&pairs, frames.len());
        let scores = if pairs.is_empty() {
            vec![1.0; frames.len()]
        } else {
            self.frame_scores(&padded)
        };

        let stats = bestshot_models::ScoreStats::from_scores(&scores);
        info!(
            mean = stats.mean,
            std = stats.std,
            "Motion scores"
        );

        if let Err(e) = self.cache.put(CacheKind::Motion, &key, &scores) {
            warn!("Failed to cache motion scores: {}", e);
        }
        Ok(scores)
    }

    /// A lone frame carries no motion; neutral.
    async fn score_frame(&self, _frame: &Frame) -> AnalysisResult<f64> {
        Ok(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_support::write_frames;

    fn metrics(magnitude: f64, shake: f64, consistency: f64) -> MotionMetrics {
        MotionMetrics {
            magnitude,
            shake,
            direction_consistency: consistency,
            ..Default::default()
        }
    }

    #[test]
    fn test_steady_pan_scores_high() {
        let scorer = MotionScorer::new(MotionScorerConfig::default(), DiskCache::disabled());
        let padded = vec![metrics(2.0, 0.0, 1.0); 10];
        let scores = scorer.frame_scores(&padded);
        assert_eq!(scores.len(), 10);
        assert!(scores.iter().all(|s| (s - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_still_camera_is_penalized_by_magnitude_fit() {
        let scorer = MotionScorer::new(MotionScorerConfig::default(), DiskCache::disabled());
        // magnitude 0.25 is half the optimal minimum
        let padded = vec![metrics(0.25, 0.0, 1.0); 6];
        let scores = scorer.frame_scores(&padded);
        assert!(scores.iter().all(|s| (s - 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_reversal_lowers_score() {
        let scorer = MotionScorer::new(MotionScorerConfig::default(), DiskCache::disabled());
        let mut padded = vec![metrics(2.0, 0.0, 1.0); 12];
        padded[6].magnitude = 4.5;
        let with_reversal = scorer.frame_scores(&padded);

        let smooth = scorer.frame_scores(&vec![metrics(2.0, 0.0, 1.0); 12]);
        assert!(with_reversal[6] < smooth[6]);
    }

    #[test]
    fn test_cache_key_uses_first_middle_last() {
        let frames: Vec<Frame> = (0..5)
            .map(|i| Frame::new(i, 3.0, format!("tour/frame_{:06}.jpg", i + 1)))
            .collect();
        let ids: Vec<String> = frames.iter().map(Frame::identity).collect();
        assert_eq!(
            MotionScorer::cache_key(&frames),
            format!("{}_{}_{}", ids[0], ids[2], ids[4])
        );
        assert_eq!(MotionScorer::cache_key(&frames[..2]), format!("{}_{}", ids[0], ids[1]));
    }

    #[tokio::test]
    async fn test_short_sequences() {
        let scorer = MotionScorer::new(MotionScorerConfig::default(), DiskCache::disabled());
        let frame = Frame::new(0, 3.0, "missing.jpg");
        assert_eq!(scorer.score_frame(&frame).await.unwrap(), 0.5);
        assert_eq!(scorer.score_frames(std::slice::from_ref(&frame)).await.unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_static_frames_score_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let frames = write_frames(dir.path(), 4, (48, 32), |_, x, y| ((x * 5 + y * 3) % 200) as u8);
        let cache_dir = dir.path().join("cache");
        let config = MotionScorerConfig {
            batch_size: 2,
            ..Default::default()
        };
        let scorer = MotionScorer::new(config, DiskCache::new(&cache_dir));

        let scores = scorer.score_frames(&frames).await.unwrap();
        assert_eq!(scores.len(), 4);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        // no motion at all sits far below the optimal range
        assert!(scores.iter().all(|s| *s < 0.1));

        let key = MotionScorer::cache_key(&frames);
        let cached: Option<Vec<f64>> = DiskCache::new(&cache_dir).get(CacheKind::Motion, &key);
        assert_eq!(cached, Some(scores));

        let summary = scorer.analyze_clip_motion(&frames, 0, 3).await.unwrap();
        assert!(!summary.has_reversal);
        assert_eq!(summary.dominant_motion, "static");
        assert!(summary.mean_magnitude < 0.05);
    }
}
