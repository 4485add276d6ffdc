//! Shot boundary detection.
//!
//! Each consecutive frame pair yields three signals: the chi-square
//! distance of 64-bin histograms, the relative change of Canny edge density
//! and, optionally, the change of dense flow against the previous pair.
//! Histogram and edge thresholds adapt to the whole video as
//! `max(default, mean + 2·std)`.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use bestshot_models::{Frame, ShotBoundary, ShotSegment, TransitionType};

use crate::error::{AnalysisError, AnalysisResult};
use crate::flow::{FarnebackFlow, FarnebackParams, FlowEstimator, FlowField};
use crate::imaging::{chi_square_distance, edge_density, load_gray_array, normalized_histogram};
use crate::signal::{mean, std_dev};

/// Frames are downscaled to this width before analysis.
const ANALYSIS_WIDTH: u32 = 320;

const HISTOGRAM_BINS: usize = 64;

/// Frames loaded and analyzed together.
const CHUNK_FRAMES: usize = 32;

/// Accumulated confidence needed to report a boundary.
const MIN_CONFIDENCE: f64 = 0.4;

const HISTOGRAM_CONFIDENCE: f64 = 0.5;
const EDGE_CONFIDENCE: f64 = 0.3;
const MOTION_CONFIDENCE: f64 = 0.2;
const DISSOLVE_BONUS: f64 = 0.1;

/// Fraction of the histogram threshold a 5-frame mean must exceed to count
/// as a dissolve.
const DISSOLVE_RATIO: f64 = 0.7;

/// Detector thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotDetectorConfig {
    pub histogram_threshold: f64,
    pub edge_threshold: f64,
    pub motion_threshold: f64,
    pub min_shot_length_seconds: f64,
    pub use_motion: bool,
}

impl Default for ShotDetectorConfig {
    fn default() -> Self {
        Self {
            histogram_threshold: 0.4,
            edge_threshold: 0.3,
            motion_threshold: 10.0,
            min_shot_length_seconds: 1.0,
            use_motion: true,
        }
    }
}

/// Per-pair change signals of one video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairSignals {
    pub histogram_diffs: Vec<f64>,
    pub edge_ratios: Vec<f64>,
    /// One shorter than the other series; `None` when motion is disabled
    pub motion_changes: Option<Vec<f64>>,
}

#[derive(Clone)]
struct FrameFeatures {
    gray: Array2<f32>,
    histogram: Vec<f64>,
    edge_density: f64,
}

impl FrameFeatures {
    fn load(path: &Path) -> AnalysisResult<Self> {
        let gray = load_gray_array(path, ANALYSIS_WIDTH)?;
        Ok(Self {
            histogram: normalized_histogram(&gray, HISTOGRAM_BINS)?,
            edge_density: edge_density(&gray)?,
            gray,
        })
    }
}

/// Splits a frame sequence into shots.
#[derive(Debug, Clone)]
pub struct ShotBoundaryDetector {
    config: ShotDetectorConfig,
    fps: f64,
    flow: FarnebackFlow,
}

impl ShotBoundaryDetector {
    pub fn new(config: ShotDetectorConfig, fps: f64) -> Self {
        info!(
            histogram = config.histogram_threshold,
            edge = config.edge_threshold,
            motion = config.motion_threshold,
            "Shot boundary detector initialized"
        );
        Self {
            config,
            fps,
            flow: FarnebackFlow::new(FarnebackParams::coarse()),
        }
    }

    /// Minimum frames between two boundaries.
    pub fn min_shot_frames(&self) -> usize {
        (self.config.min_shot_length_seconds * self.fps).max(0.0) as usize
    }

    /// Boundaries of `frames`, filtered by the minimum shot length.
    pub async fn detect_boundaries(&self, frames: &[Frame]) -> AnalysisResult<Vec<ShotBoundary>> {
        if frames.len() < 2 {
            return Ok(Vec::new());
        }
        info!(frames = frames.len(), "Analyzing frames for shot boundaries");

        let this = self.clone();
        let frames = frames.to_vec();
        let signals = tokio::task::spawn_blocking(move || this.pair_signals(&frames)).await??;

        let boundaries = self.filter_boundaries(self.find_boundaries(&signals));
        info!(boundaries = boundaries.len(), "Detected shot boundaries");
        Ok(boundaries)
    }

    /// Change signals for every consecutive pair, loaded chunk by chunk.
    pub fn pair_signals(&self, frames: &[Frame]) -> AnalysisResult<PairSignals> {
        let mut signals = PairSignals {
            motion_changes: self.config.use_motion.then(Vec::new),
            ..Default::default()
        };
        let mut prev: Option<FrameFeatures> = None;
        let mut prev_flow: Option<FlowField> = None;

        for chunk in frames.chunks(CHUNK_FRAMES) {
            let loaded: Vec<_> = chunk
                .par_iter()
                .map(|f| FrameFeatures::load(&f.path))
                .collect();

            let mut features: Vec<FrameFeatures> = Vec::with_capacity(chunk.len());
            for (frame, result) in chunk.iter().zip(loaded) {
                match result {
                    Ok(f) => features.push(f),
                    Err(e) => {
                        // Repeat the previous frame so indices stay aligned.
                        let fallback = features.last().or(prev.as_ref()).cloned();
                        match fallback {
                            Some(f) => {
                                warn!(frame = frame.index, "Unreadable frame in shot detection: {}", e);
                                features.push(f);
                            }
                            None => return Err(e),
                        }
                    }
                }
            }

            let sequence: Vec<&FrameFeatures> = prev.iter().chain(features.iter()).collect();
            for pair in sequence.windows(2) {
                signals
                    .histogram_diffs
                    .push(chi_square_distance(&pair[0].histogram, &pair[1].histogram));
                signals
                    .edge_ratios
                    .push((pair[1].edge_density - pair[0].edge_density).abs() / (pair[0].edge_density + 1e-6));
            }

            if let Some(changes) = signals.motion_changes.as_mut() {
                let flows = sequence
                    .par_windows(2)
                    .map(|pair| self.flow.compute(&pair[0].gray, &pair[1].gray))
                    .collect::<AnalysisResult<Vec<FlowField>>>()?;
                for flow in flows {
                    if let Some(previous) = &prev_flow {
                        changes.push(flow.mean_abs_difference(previous));
                    }
                    prev_flow = Some(flow);
                }
            }

            prev = features.pop();
        }

        if signals.histogram_diffs.is_empty() {
            return Err(AnalysisError::invalid_input("no frame pairs to analyze"));
        }
        Ok(signals)
    }

    /// Candidate boundaries from pair signals, before the length filter.
    pub fn find_boundaries(&self, signals: &PairSignals) -> Vec<ShotBoundary> {
        let hist = &signals.histogram_diffs;
        let edge = &signals.edge_ratios;

        let hist_threshold = self
            .config
            .histogram_threshold
            .max(mean(hist) + 2.0 * std_dev(hist));
        let edge_threshold = self
            .config
            .edge_threshold
            .max(mean(edge) + 2.0 * std_dev(edge));
        debug!(hist_threshold, edge_threshold, "Adaptive shot thresholds");

        let mut boundaries = Vec::new();
        for i in 0..hist.len() {
            let mut confidence = 0.0;
            let mut transition: Option<TransitionType> = None;

            if hist[i] > hist_threshold {
                confidence += HISTOGRAM_CONFIDENCE;
                transition = Some(TransitionType::Cut);
            }

            if edge.get(i).is_some_and(|&e| e > edge_threshold) {
                confidence += EDGE_CONFIDENCE;
                transition.get_or_insert(TransitionType::Cut);
            }

            let motion = signals.motion_changes.as_deref().and_then(|m| m.get(i));
            if motion.is_some_and(|&m| m > self.config.motion_threshold) {
                confidence += MOTION_CONFIDENCE;
                transition.get_or_insert(TransitionType::MotionBreak);
            }

            if i >= 2 && i + 2 < hist.len() && mean(&hist[i - 2..i + 3]) > hist_threshold * DISSOLVE_RATIO {
                transition = Some(TransitionType::Dissolve);
                confidence = (confidence + DISSOLVE_BONUS).min(1.0);
            }

            if confidence >= MIN_CONFIDENCE {
                boundaries.push(ShotBoundary {
                    frame_index: i + 1,
                    confidence,
                    transition: transition.unwrap_or(TransitionType::Unknown),
                });
            }
        }
        boundaries
    }

    /// Drop boundaries closer than the minimum shot length to the last kept one.
    pub fn filter_boundaries(&self, boundaries: Vec<ShotBoundary>) -> Vec<ShotBoundary> {
        let min_frames = self.min_shot_frames();
        let mut last = 0usize;
        let mut kept = Vec::with_capacity(boundaries.len());

        for boundary in boundaries {
            let gap = boundary.frame_index.saturating_sub(last);
            if gap >= min_frames {
                last = boundary.frame_index;
                kept.push(boundary);
            } else {
                debug!(
                    frame = boundary.frame_index,
                    gap, "Dropped boundary too close to the previous one"
                );
            }
        }
        kept
    }

    /// Partition `0..frame_count` into shots at `boundaries`.
    ///
    /// Each segment carries the transition that opened it; the first has none.
    pub fn segment_into_shots(&self, boundaries: &[ShotBoundary], frame_count: usize) -> Vec<ShotSegment> {
        let mut shots = Vec::new();
        let mut start = 0usize;
        let mut opening: Option<&ShotBoundary> = None;

        let segment = |start: usize, end_exclusive: usize, opening: Option<&ShotBoundary>| ShotSegment {
            start_frame: start,
            end_frame: end_exclusive - 1,
            start_time: start as f64 / self.fps,
            end_time: (end_exclusive - 1) as f64 / self.fps,
            duration: (end_exclusive - start) as f64 / self.fps,
            num_frames: end_exclusive - start,
            transition_before: opening.map(|b| b.transition),
            confidence: opening.map(|b| b.confidence).unwrap_or(1.0),
        };

        for boundary in boundaries {
            let end = boundary.frame_index.min(frame_count);
            if end > start {
                shots.push(segment(start, end, opening));
                start = end;
                opening = Some(boundary);
            }
        }
        if start < frame_count {
            shots.push(segment(start, frame_count, opening));
        }

        info!(shots = shots.len(), "Segmented into shots");
        for (i, shot) in shots.iter().enumerate() {
            debug!(
                shot = i + 1,
                start = shot.start_frame,
                end = shot.end_frame,
                duration = shot.duration,
                "Shot"
            );
        }
        shots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_support::write_frames;

    fn detector() -> ShotBoundaryDetector {
        ShotBoundaryDetector::new(ShotDetectorConfig::default(), 3.0)
    }

    fn flat_signals(n: usize) -> PairSignals {
        PairSignals {
            histogram_diffs: vec![0.01; n],
            edge_ratios: vec![0.01; n],
            motion_changes: None,
        }
    }

    #[test]
    fn test_hard_cut_detected() {
        let mut signals = flat_signals(20);
        signals.histogram_diffs[9] = 0.9;
        signals.edge_ratios[9] = 2.0;

        let boundaries = detector().find_boundaries(&signals);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].frame_index, 10);
        assert_eq!(boundaries[0].transition, TransitionType::Cut);
        assert!((boundaries[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_edge_alone_is_not_enough() {
        let mut signals = flat_signals(20);
        signals.edge_ratios[5] = 5.0;
        assert!(detector().find_boundaries(&signals).is_empty());
    }

    #[test]
    fn test_sustained_change_is_dissolve() {
        let mut signals = flat_signals(20);
        signals.histogram_diffs[8..13].copy_from_slice(&[0.3, 0.5, 0.9, 0.5, 0.3]);
        let boundaries = detector().find_boundaries(&signals);
        let dissolves: Vec<_> = boundaries
            .iter()
            .filter(|b| b.transition == TransitionType::Dissolve)
            .collect();
        assert!(!dissolves.is_empty());
        assert!(dissolves.iter().all(|b| b.confidence >= MIN_CONFIDENCE));
    }

    #[test]
    fn test_filter_drops_close_boundaries() {
        let boundary = |frame_index| ShotBoundary {
            frame_index,
            confidence: 0.8,
            transition: TransitionType::Cut,
        };
        // 1 s at 3 fps = 3 frames
        let kept = detector().filter_boundaries(vec![boundary(2), boundary(5), boundary(6), boundary(10)]);
        let frames: Vec<usize> = kept.iter().map(|b| b.frame_index).collect();
        assert_eq!(frames, vec![5, 10]);
    }

    #[test]
    fn test_segments_partition_frames() {
        let boundaries = vec![
            ShotBoundary {
                frame_index: 4,
                confidence: 0.8,
                transition: TransitionType::Cut,
            },
            ShotBoundary {
                frame_index: 9,
                confidence: 0.6,
                transition: TransitionType::Dissolve,
            },
        ];
        let shots = detector().segment_into_shots(&boundaries, 12);
        assert_eq!(shots.len(), 3);
        assert_eq!((shots[0].start_frame, shots[0].end_frame), (0, 3));
        assert_eq!(shots[0].transition_before, None);
        assert_eq!(shots[0].confidence, 1.0);
        assert_eq!((shots[1].start_frame, shots[1].end_frame), (4, 8));
        assert_eq!(shots[1].transition_before, Some(TransitionType::Cut));
        assert_eq!((shots[2].start_frame, shots[2].end_frame), (9, 11));
        assert_eq!(shots[2].transition_before, Some(TransitionType::Dissolve));
        assert_eq!(shots[2].num_frames, 3);
        assert!((shots[2].duration - 1.0).abs() < 1e-12);

        for pair in shots.windows(2) {
            assert_eq!(pair[0].end_frame + 1, pair[1].start_frame);
        }
    }

    #[test]
    fn test_no_boundaries_is_one_shot() {
        let shots = detector().segment_into_shots(&[], 5);
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].end_frame, 4);
        assert_eq!(shots[0].transition_before, None);
    }

    #[tokio::test]
    async fn test_detects_cut_between_scenes() {
        let dir = tempfile::tempdir().unwrap();
        // 6 dark textured frames, then 6 bright ones
        let frames = write_frames(dir.path(), 12, (64, 48), |i, x, y| {
            let base = if i < 6 { 30 } else { 220 };
            (base + ((x / 8 + y / 8) % 2) as u8 * 20) as u8
        });

        let config = ShotDetectorConfig {
            use_motion: false,
            ..Default::default()
        };
        let detector = ShotBoundaryDetector::new(config, 3.0);
        let boundaries = detector.detect_boundaries(&frames).await.unwrap();
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].frame_index, 6);

        let shots = detector.segment_into_shots(&boundaries, frames.len());
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[1].start_frame, 6);
    }
}
