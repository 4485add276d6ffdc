//! Near-duplicate removal among peaks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use bestshot_embed::{Embedding, FrameEmbedder};
use bestshot_models::{DiversityStats, Frame, Peak};

use crate::error::{AnalysisError, AnalysisResult};
use crate::signal::{mean, std_dev};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    pub enabled: bool,
    /// Minimum cosine distance between two kept peaks
    pub similarity_threshold: f64,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.12,
        }
    }
}

/// Symmetric `1 - cos` distance matrix.
fn distance_matrix(embeddings: &[Embedding]) -> AnalysisResult<Vec<Vec<f64>>> {
    let n = embeddings.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i + 1..n {
            let d = embeddings[i].distance(&embeddings[j])?;
            matrix[i][j] = d;
            matrix[j][i] = d;
        }
    }
    Ok(matrix)
}

/// Distances between every pair of `indices`.
fn upper_triangle(matrix: &[Vec<f64>], indices: &[usize]) -> Vec<f64> {
    let mut out = Vec::new();
    for (k, &i) in indices.iter().enumerate() {
        for &j in &indices[k + 1..] {
            out.push(matrix[i][j]);
        }
    }
    out
}

pub struct DiversityFilter {
    embedder: Arc<FrameEmbedder>,
    similarity_threshold: f64,
}

impl DiversityFilter {
    pub fn new(embedder: Arc<FrameEmbedder>, similarity_threshold: f64) -> Self {
        info!(threshold = similarity_threshold, "Diversity filter initialized");
        Self {
            embedder,
            similarity_threshold,
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    async fn peak_embeddings(&self, peaks: &[Peak], frames: &[Frame]) -> AnalysisResult<Vec<Embedding>> {
        let peak_frames = peaks
            .iter()
            .map(|p| {
                frames.get(p.frame_index).cloned().ok_or_else(|| {
                    AnalysisError::invalid_input(format!(
                        "peak at frame {} outside {} frames",
                        p.frame_index,
                        frames.len()
                    ))
                })
            })
            .collect::<AnalysisResult<Vec<Frame>>>()?;

        info!(frames = peak_frames.len(), "Computing embeddings for peak frames");
        Ok(self.embedder.embed_frames(&peak_frames).await?)
    }

    /// Greedy selection by descending score, keeping a peak only if it is at
    /// least `similarity_threshold` away from every kept one.
    ///
    /// Returns at most `max_clips` peaks ordered by frame index.
    pub async fn filter_diverse(
        &self,
        peaks: &[Peak],
        frames: &[Frame],
        max_clips: Option<usize>,
    ) -> AnalysisResult<Vec<Peak>> {
        if peaks.len() <= 1 {
            return Ok(peaks.to_vec());
        }

        let embeddings = self.peak_embeddings(peaks, frames).await?;
        let distances = distance_matrix(&embeddings)?;

        let mut order: Vec<usize> = (0..peaks.len()).collect();
        order.sort_by(|&a, &b| Peak::rank_cmp(&peaks[a], &peaks[b]));

        let mut selected: Vec<usize> = Vec::new();
        for i in order {
            let too_close = selected
                .iter()
                .find(|&&j| distances[i][j] < self.similarity_threshold);

            match too_close {
                Some(&j) => debug!(
                    frame = peaks[i].frame_index,
                    similar_to = peaks[j].frame_index,
                    distance = distances[i][j],
                    "Peak too similar to a selected one"
                ),
                None => {
                    debug!(frame = peaks[i].frame_index, score = peaks[i].score, "Selected peak");
                    selected.push(i);
                    if max_clips.is_some_and(|max| selected.len() >= max) {
                        break;
                    }
                }
            }
        }

        if selected.len() > 1 {
            let pairwise = upper_triangle(&distances, &selected);
            info!(mean_distance = mean(&pairwise), "Average distance between selected clips");
        }

        let mut kept: Vec<Peak> = selected.into_iter().map(|i| peaks[i]).collect();
        kept.sort_by_key(|p| p.frame_index);
        info!(before = peaks.len(), after = kept.len(), "Filtered peaks for diversity");
        Ok(kept)
    }

    /// Pairwise distance statistics of `peaks`, without filtering.
    pub async fn analyze_diversity(&self, peaks: &[Peak], frames: &[Frame]) -> AnalysisResult<DiversityStats> {
        if peaks.len() <= 1 {
            return Ok(DiversityStats {
                num_clips: peaks.len(),
                similarity_threshold: self.similarity_threshold,
                ..Default::default()
            });
        }

        let embeddings = self.peak_embeddings(peaks, frames).await?;
        let distances = distance_matrix(&embeddings)?;

        let n = peaks.len();
        let all: Vec<usize> = (0..n).collect();
        let pairwise = upper_triangle(&distances, &all);

        Ok(DiversityStats {
            num_clips: n,
            min_distance: pairwise.iter().copied().fold(f64::INFINITY, f64::min),
            max_distance: pairwise.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_distance: mean(&pairwise),
            std_distance: std_dev(&pairwise),
            num_similar_pairs: pairwise.iter().filter(|&&d| d < self.similarity_threshold).count(),
            similarity_threshold: self.similarity_threshold,
        })
    }
}
