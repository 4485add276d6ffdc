//! Per-run report artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clip::ClipSpec;
use crate::run::RunId;
use crate::video::VideoInfo;

/// Summary statistics of a score series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ScoreStats {
    /// Statistics over `scores` (population standard deviation). Empty input yields zeros.
    pub fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }

        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            mean,
            std: var.sqrt(),
            min,
            max,
        }
    }
}

/// Pairwise embedding distance statistics of a peak set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiversityStats {
    pub num_clips: usize,
    pub min_distance: f64,
    pub max_distance: f64,
    pub mean_distance: f64,
    pub std_distance: f64,
    pub num_similar_pairs: usize,
    pub similarity_threshold: f64,
}

/// Contents of `pipeline_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub video_info: VideoInfo,
    /// Effective configuration the run used
    pub config: serde_json::Value,
    pub scores_statistics: ScoreStats,
    pub frames_sampled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shots_detected: Option<usize>,
    pub peaks_detected: usize,
    pub peaks_after_filtering: usize,
    pub clips: Vec<ClipSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity_analysis: Option<DiversityStats>,
    /// Wall time in seconds
    pub processing_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_stats() {
        let stats = ScoreStats::from_scores(&[0.0, 0.5, 1.0]);
        assert!((stats.mean - 0.5).abs() < 1e-12);
        assert!((stats.std - (1.0f64 / 6.0).sqrt()).abs() < 1e-12);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 1.0);
    }

    #[test]
    fn test_score_stats_empty() {
        assert_eq!(ScoreStats::from_scores(&[]), ScoreStats::default());
    }
}
