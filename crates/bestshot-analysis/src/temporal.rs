//! Temporal smoothing and peak selection over per-frame scores.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bestshot_models::{Peak, ShotSegment};

use crate::signal::{argmax, find_peaks, percentile, std_dev, uniform_filter1d, BorderMode, PeakConstraints};

/// Fraction of the series std used as the default minimum prominence.
const PROMINENCE_FACTOR: f64 = 0.5;

/// Fraction of a shot's std used as its minimum prominence.
const SHOT_PROMINENCE_FACTOR: f64 = 0.3;

/// Peaks must reach this percentile of the series.
const HEIGHT_PERCENTILE: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub smooth_window_seconds: f64,
    pub min_peak_distance_seconds: f64,
    /// Pick the smoothing window per frame from the local motion magnitude
    pub motion_aware: bool,
    /// Window used where the camera is still
    pub static_window_seconds: f64,
    /// Window used while the camera moves
    pub dynamic_window_seconds: f64,
    pub motion_threshold: f64,
    /// Search peaks inside each shot instead of over the whole series
    pub shot_aware: bool,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            smooth_window_seconds: 2.0,
            min_peak_distance_seconds: 4.0,
            motion_aware: false,
            static_window_seconds: 3.0,
            dynamic_window_seconds: 1.0,
            motion_threshold: 2.0,
            shot_aware: false,
        }
    }
}

/// Outcome of a peak search.
#[derive(Debug, Clone, PartialEq)]
pub enum PeakSearch {
    /// Peaks satisfying height, distance and prominence.
    Found(Vec<Peak>),
    /// No peak satisfied the constraints; greedy maxima with suppression.
    Fallback(Vec<Peak>),
}

impl PeakSearch {
    pub fn peaks(&self) -> &[Peak] {
        match self {
            PeakSearch::Found(p) | PeakSearch::Fallback(p) => p,
        }
    }

    pub fn into_peaks(self) -> Vec<Peak> {
        match self {
            PeakSearch::Found(p) | PeakSearch::Fallback(p) => p,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PeakSearch::Fallback(_))
    }
}

/// Smoothed series and the peaks selected on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalOutput {
    pub smoothed: Vec<f64>,
    /// At most `top_k`, ordered by frame index
    pub peaks: Vec<Peak>,
    pub fallback: bool,
}

pub struct TemporalProcessor {
    config: TemporalConfig,
    fps: f64,
    smooth_window_frames: usize,
    min_peak_distance_frames: usize,
}

fn seconds_to_frames(seconds: f64, fps: f64) -> usize {
    (seconds * fps).max(0.0) as usize
}

/// Keep the `top_k` best candidates, then order them by frame.
fn select_top(mut candidates: Vec<Peak>, top_k: usize) -> Vec<Peak> {
    candidates.sort_by(Peak::rank_cmp);
    candidates.truncate(top_k);
    candidates.sort_by_key(|p| p.frame_index);
    candidates
}

impl TemporalProcessor {
    pub fn new(config: TemporalConfig, fps: f64) -> Self {
        let smooth_window_frames = seconds_to_frames(config.smooth_window_seconds, fps);
        let min_peak_distance_frames = seconds_to_frames(config.min_peak_distance_seconds, fps);
        info!(
            smooth_window = smooth_window_frames,
            min_peak_distance = min_peak_distance_frames,
            motion_aware = config.motion_aware,
            shot_aware = config.shot_aware,
            "Temporal processor initialized"
        );
        Self {
            config,
            fps,
            smooth_window_frames,
            min_peak_distance_frames,
        }
    }

    pub fn config(&self) -> &TemporalConfig {
        &self.config
    }

    pub fn smooth_window_frames(&self) -> usize {
        self.smooth_window_frames
    }

    pub fn min_peak_distance_frames(&self) -> usize {
        self.min_peak_distance_frames
    }

    fn smooth_with(&self, scores: &[f64], window: usize) -> Vec<f64> {
        if scores.len() < window {
            warn!(
                frames = scores.len(),
                window, "Video too short for smoothing window"
            );
            return scores.to_vec();
        }
        uniform_filter1d(scores, window, BorderMode::Reflect)
    }

    /// Moving average of `smooth_window_frames`, reflected at the edges.
    pub fn smooth_scores(&self, scores: &[f64]) -> Vec<f64> {
        let smoothed = self.smooth_with(scores, self.smooth_window_frames);
        debug!(
            std_before = std_dev(scores),
            std_after = std_dev(&smoothed),
            window = self.smooth_window_frames,
            "Applied smoothing"
        );
        smoothed
    }

    /// Smoothing whose window follows the camera: the static window where
    /// `motion[i]` is below the threshold, the dynamic one elsewhere.
    ///
    /// `motion` holds one magnitude per frame; a series of another length
    /// falls back to uniform smoothing.
    pub fn smooth_scores_motion_aware(&self, scores: &[f64], motion: &[f64]) -> Vec<f64> {
        if motion.len() != scores.len() {
            warn!(
                scores = scores.len(),
                motion = motion.len(),
                "Motion series does not match scores; using uniform smoothing"
            );
            return self.smooth_scores(scores);
        }

        let still = self.smooth_with(scores, seconds_to_frames(self.config.static_window_seconds, self.fps));
        let moving = self.smooth_with(scores, seconds_to_frames(self.config.dynamic_window_seconds, self.fps));

        let mut moving_frames = 0usize;
        let smoothed = motion
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                if m < self.config.motion_threshold {
                    still[i]
                } else {
                    moving_frames += 1;
                    moving[i]
                }
            })
            .collect();
        debug!(
            moving_frames,
            frames = scores.len(),
            "Applied motion-aware smoothing"
        );
        smoothed
    }

    /// Best `top_k` peaks of `scores`, ordered by frame index.
    ///
    /// `min_prominence` defaults to half the series' standard deviation.
    pub fn find_peaks(&self, scores: &[f64], top_k: usize, min_prominence: Option<f64>) -> PeakSearch {
        if scores.is_empty() || top_k == 0 {
            return PeakSearch::Found(Vec::new());
        }

        let prominence = min_prominence.unwrap_or_else(|| std_dev(scores) * PROMINENCE_FACTOR);
        let indices = find_peaks(
            scores,
            PeakConstraints {
                height: Some(percentile(scores, HEIGHT_PERCENTILE)),
                distance: Some(self.min_peak_distance_frames),
                prominence: Some(prominence),
            },
        );

        let search = if indices.is_empty() {
            warn!("No peaks found, using maximum values instead");
            let candidates = self.fallback_peaks(scores, top_k);
            PeakSearch::Fallback(select_top(candidates, top_k))
        } else {
            let candidates = indices.len();
            let peaks = indices.into_iter().map(|i| Peak::new(i, scores[i])).collect();
            let peaks = select_top(peaks, top_k);
            info!(peaks = peaks.len(), candidates, "Found peaks");
            PeakSearch::Found(peaks)
        };

        for (i, peak) in search.peaks().iter().enumerate() {
            debug!(
                rank = i + 1,
                frame = peak.frame_index,
                time = peak.time(self.fps),
                score = peak.score,
                "Peak"
            );
        }
        search
    }

    /// Greedy maxima: take the global max, suppress `±min_peak_distance_frames`
    /// around it, repeat.
    fn fallback_peaks(&self, scores: &[f64], top_k: usize) -> Vec<Peak> {
        let mut remaining = scores.to_vec();
        let mut peaks = Vec::new();
        let distance = self.min_peak_distance_frames;

        for _ in 0..top_k.min(scores.len()) {
            let Some(idx) = argmax(&remaining) else { break };
            if !remaining[idx].is_finite() {
                break;
            }
            peaks.push(Peak::new(idx, scores[idx]));

            let start = idx.saturating_sub(distance);
            let end = (idx + distance + 1).min(remaining.len());
            remaining[start..end].fill(f64::NEG_INFINITY);
        }
        peaks
    }

    /// Peak search inside each shot, pooled and ranked across the video.
    ///
    /// A shot shorter than the minimum peak distance, or one without a
    /// qualifying peak, contributes its maximum.
    pub fn find_peaks_in_shots(&self, scores: &[f64], shots: &[ShotSegment], top_k: usize) -> Vec<Peak> {
        let mut candidates = Vec::new();

        for shot in shots {
            let start = shot.start_frame.min(scores.len());
            let end = (shot.end_frame + 1).min(scores.len());
            let segment = &scores[start..end];
            if segment.is_empty() {
                continue;
            }

            let local = if segment.len() < self.min_peak_distance_frames {
                Vec::new()
            } else {
                find_peaks(
                    segment,
                    PeakConstraints {
                        height: None,
                        distance: Some(self.min_peak_distance_frames),
                        prominence: Some(std_dev(segment) * SHOT_PROMINENCE_FACTOR),
                    },
                )
            };

            if local.is_empty() {
                if let Some(i) = argmax(segment) {
                    candidates.push(Peak::new(start + i, segment[i]));
                }
            } else {
                candidates.extend(local.into_iter().map(|i| Peak::new(start + i, segment[i])));
            }
        }

        let total = candidates.len();
        let peaks = select_top(candidates, top_k);
        info!(
            peaks = peaks.len(),
            candidates = total,
            shots = shots.len(),
            "Found shot-aware peaks"
        );
        peaks
    }

    /// Smooth `scores` and select up to `top_k` peaks.
    ///
    /// `motion` is used when motion-aware smoothing is enabled, `shots` when
    /// shot-aware search is enabled and at least one shot is given.
    pub fn process(
        &self,
        scores: &[f64],
        motion: Option<&[f64]>,
        shots: Option<&[ShotSegment]>,
        top_k: usize,
    ) -> TemporalOutput {
        let smoothed = match motion {
            Some(motion) if self.config.motion_aware => self.smooth_scores_motion_aware(scores, motion),
            _ => self.smooth_scores(scores),
        };

        match shots {
            Some(shots) if self.config.shot_aware && !shots.is_empty() => {
                let peaks = self.find_peaks_in_shots(&smoothed, shots, top_k);
                TemporalOutput {
                    smoothed,
                    peaks,
                    fallback: false,
                }
            }
            _ => {
                let search = self.find_peaks(&smoothed, top_k, None);
                let fallback = search.is_fallback();
                TemporalOutput {
                    smoothed,
                    peaks: search.into_peaks(),
                    fallback,
                }
            }
        }
    }

    pub fn peak_timestamps(&self, peaks: &[Peak]) -> Vec<f64> {
        peaks.iter().map(|p| p.time(self.fps)).collect()
    }
}
