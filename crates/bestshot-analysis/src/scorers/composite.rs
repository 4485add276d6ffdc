//! Weighted combination of scorers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use bestshot_models::{Frame, ScoreStats};

use super::Scorer;
use crate::error::{AnalysisError, AnalysisResult};

/// Key of the combined series in [`CompositeScorer::score_components`].
pub const COMPOSITE_KEY: &str = "composite";

/// Signed scorer weights. Negative weights subtract (exposure is a penalty).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub sharpness: f64,
    pub exposure: f64,
    pub aesthetics: f64,
    pub saliency: f64,
    pub motion: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            sharpness: 0.3,
            exposure: -0.2,
            aesthetics: 0.4,
            saliency: 0.1,
            motion: 0.0,
        }
    }
}

impl ScoringWeights {
    /// `(scorer name, weight)` pairs in evaluation order.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("sharpness", self.sharpness),
            ("exposure", self.exposure),
            ("aesthetics", self.aesthetics),
            ("saliency", self.saliency),
            ("motion", self.motion),
        ]
    }

    pub fn get(&self, name: &str) -> f64 {
        self.entries()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }
}

/// Scorers with their normalized weights.
pub struct CompositeScorer {
    scorers: Vec<(Box<dyn Scorer>, f64)>,
}

impl CompositeScorer {
    /// Combine `scorers` with raw signed weights.
    ///
    /// Zero-weight scorers are dropped; the rest are scaled so their absolute
    /// weights sum to one.
    pub fn new(scorers: Vec<(Box<dyn Scorer>, f64)>) -> Self {
        let scorers: Vec<_> = scorers.into_iter().filter(|(_, w)| *w != 0.0).collect();
        let total: f64 = scorers.iter().map(|(_, w)| w.abs()).sum();
        let scorers: Vec<_> = scorers
            .into_iter()
            .map(|(s, w)| (s, if total > 0.0 { w / total } else { w }))
            .collect();

        let weights: Vec<String> = scorers
            .iter()
            .map(|(s, w)| format!("{}={:.3}", s.name(), w))
            .collect();
        info!(weights = %weights.join(", "), "Initialized composite scorer");

        Self { scorers }
    }

    /// Normalized weights, in evaluation order.
    pub fn weights(&self) -> Vec<(&'static str, f64)> {
        self.scorers.iter().map(|(s, w)| (s.name(), *w)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    /// Composite score per frame: `clip(Σ wᵢ·sᵢ, 0, 1)`.
    pub async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
        let components = self.score_components(frames).await?;
        Ok(components.get(COMPOSITE_KEY).cloned().unwrap_or_default())
    }

    /// Every scorer's series plus the composite under [`COMPOSITE_KEY`].
    pub async fn score_components(
        &self,
        frames: &[Frame],
    ) -> AnalysisResult<BTreeMap<String, Vec<f64>>> {
        info!(
            frames = frames.len(),
            scorers = self.scorers.len(),
            "Scoring frames"
        );
        if self.scorers.is_empty() {
            warn!("No scorers enabled; composite scores are all zero");
        }

        let mut components = BTreeMap::new();
        let mut composite = vec![0.0f64; frames.len()];

        for (scorer, weight) in &self.scorers {
            info!(scorer = scorer.name(), "Running scorer");
            let scores = scorer.score_frames(frames).await?;
            if scores.len() != frames.len() {
                return Err(AnalysisError::invalid_input(format!(
                    "{} returned {} scores for {} frames",
                    scorer.name(),
                    scores.len(),
                    frames.len()
                )));
            }

            let stats = ScoreStats::from_scores(&scores);
            info!(
                scorer = scorer.name(),
                mean = stats.mean,
                std = stats.std,
                min = stats.min,
                max = stats.max,
                "Scorer statistics"
            );
            metrics::counter!("bestshot_frames_scored_total", "scorer" => scorer.name())
                .increment(frames.len() as u64);

            for (c, s) in composite.iter_mut().zip(&scores) {
                *c += weight * s;
            }
            components.insert(scorer.name().to_string(), scores);
        }

        composite.iter_mut().for_each(|c| *c = c.clamp(0.0, 1.0));
        let stats = ScoreStats::from_scores(&composite);
        info!(
            mean = stats.mean,
            std = stats.std,
            min = stats.min,
            max = stats.max,
            "Composite scores"
        );

        components.insert(COMPOSITE_KEY.to_string(), composite);
        Ok(components)
    }

    /// Single-frame counterpart of [`score_components`](Self::score_components).
    ///
    /// Each scorer goes through its own `score_frame`; a scorer that fails on
    /// this frame contributes 0.
    pub async fn score_frame_components(&self, frame: &Frame) -> AnalysisResult<BTreeMap<String, f64>> {
        let mut components = BTreeMap::new();
        let mut composite = 0.0;

        for (scorer, weight) in &self.scorers {
            let score = match scorer.score_frame(frame).await {
                Ok(score) => score,
                Err(e) => {
                    warn!(scorer = scorer.name(), frame = %frame.path.display(), "Scoring failed: {}", e);
                    0.0
                }
            };
            composite += weight * score;
            components.insert(scorer.name().to_string(), score);
        }

        components.insert(COMPOSITE_KEY.to_string(), composite.clamp(0.0, 1.0));
        Ok(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Returns fixed scores per frame index.
    struct Fixed {
        name: &'static str,
        scores: Vec<f64>,
    }

    #[async_trait]
    impl Scorer for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
            Ok(frames.iter().map(|f| self.scores[f.index as usize]).collect())
        }
    }

    fn fixed(name: &'static str, scores: &[f64]) -> Box<dyn Scorer> {
        Box::new(Fixed {
            name,
            scores: scores.to_vec(),
        })
    }

    fn frames(n: u32) -> Vec<Frame> {
        (0..n).map(|i| Frame::new(i, 3.0, format!("f{i}.jpg"))).collect()
    }

    #[test]
    fn test_weights_normalized_by_absolute_sum() {
        let composite = CompositeScorer::new(vec![
            (fixed("sharpness", &[]), 0.3),
            (fixed("exposure", &[]), -0.2),
            (fixed("aesthetics", &[]), 0.4),
            (fixed("saliency", &[]), 0.1),
            (fixed("motion", &[]), 0.0),
        ]);
        let weights = composite.weights();
        assert_eq!(weights.len(), 4);
        let abs_sum: f64 = weights.iter().map(|(_, w)| w.abs()).sum();
        assert!((abs_sum - 1.0).abs() < 1e-12);
        assert!((weights[1].1 + 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_composite_is_clipped() {
        let composite = CompositeScorer::new(vec![
            (fixed("sharpness", &[1.0, 0.0, 0.5]), 0.5),
            (fixed("exposure", &[0.0, 1.0, 0.0]), -0.5),
        ]);
        let scores = composite.score_frames(&frames(3)).await.unwrap();
        // 0.5, max(−0.5, 0), 0.25
        assert_eq!(scores, vec![0.5, 0.0, 0.25]);
    }

    #[tokio::test]
    async fn test_components_include_composite() {
        let composite = CompositeScorer::new(vec![(fixed("sharpness", &[0.2, 0.8]), 1.0)]);
        let components = composite.score_components(&frames(2)).await.unwrap();
        assert_eq!(components["sharpness"], vec![0.2, 0.8]);
        assert_eq!(components[COMPOSITE_KEY], vec![0.2, 0.8]);
    }

    /// Fails on every frame.
    struct Failing;

    #[async_trait]
    impl Scorer for Failing {
        fn name(&self) -> &'static str {
            "saliency"
        }

        async fn score_frames(&self, _frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
            Err(AnalysisError::invalid_input("unreadable frame"))
        }
    }

    #[tokio::test]
    async fn test_single_frame_components() {
        let composite = CompositeScorer::new(vec![
            (fixed("sharpness", &[0.2, 0.9]), 0.6),
            (fixed("exposure", &[0.0, 0.5]), -0.2),
            (Box::new(Failing), 0.2),
        ]);
        let frame = Frame::new(1, 3.0, "f1.jpg");
        let components = composite.score_frame_components(&frame).await.unwrap();

        assert_eq!(components["sharpness"], 0.9);
        assert_eq!(components["exposure"], 0.5);
        assert_eq!(components["saliency"], 0.0);
        // 0.6 * 0.9 - 0.2 * 0.5
        assert!((components[COMPOSITE_KEY] - 0.44).abs() < 1e-12);
    }

    #[test]
    fn test_default_weights() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.get("exposure"), -0.2);
        assert_eq!(weights.get("unknown"), 0.0);
    }
}
