//! Camera motion between consecutive frames.

use ndarray::Array2;
use rayon::prelude::*;
use std::path::Path;
use tracing::debug;

use bestshot_models::{Frame, MotionMetrics};

use crate::error::AnalysisResult;
use crate::flow::{FlowEstimator, FlowMethod};
use crate::imaging::load_gray_array;

/// Frames wider than this are downscaled before flow.
pub const DEFAULT_MOTION_MAX_WIDTH: u32 = 640;

/// Optical-flow motion analysis over frame pairs.
pub struct MotionAnalyzer {
    estimator: Box<dyn FlowEstimator>,
    max_width: u32,
}

impl Default for MotionAnalyzer {
    fn default() -> Self {
        Self::new(FlowMethod::default(), DEFAULT_MOTION_MAX_WIDTH)
    }
}

impl MotionAnalyzer {
    pub fn new(method: FlowMethod, max_width: u32) -> Self {
        Self::with_estimator(method.estimator(), max_width)
    }

    pub fn with_estimator(estimator: Box<dyn FlowEstimator>, max_width: u32) -> Self {
        Self {
            estimator,
            max_width,
        }
    }

    pub fn method_name(&self) -> &'static str {
        self.estimator.name()
    }

    /// Load a frame in the working resolution.
    pub fn load(&self, path: &Path) -> AnalysisResult<Array2<f32>> {
        load_gray_array(path, self.max_width)
    }

    /// Motion between two loaded frames.
    pub fn compute(&self, prev: &Array2<f32>, next: &Array2<f32>) -> AnalysisResult<MotionMetrics> {
        let flow = self.estimator.compute(prev, next)?;
        Ok(MotionMetrics::from_parts(&flow.statistics(), &flow.motion_pattern()))
    }

    /// Metrics for every consecutive pair of `frames`, in order.
    ///
    /// Yields `frames.len() - 1` entries; pairs are computed in parallel.
    pub fn analyze_pairs(&self, frames: &[Frame]) -> AnalysisResult<Vec<MotionMetrics>> {
        if frames.len() < 2 {
            return Ok(Vec::new());
        }

        let images = frames
            .par_iter()
            .map(|f| self.load(&f.path))
            .collect::<AnalysisResult<Vec<_>>>()?;

        let metrics = images
            .par_windows(2)
            .map(|pair| self.compute(&pair[0], &pair[1]))
            .collect::<AnalysisResult<Vec<_>>>()?;

        debug!(
            method = self.method_name(),
            pairs = metrics.len(),
            first = frames[0].index,
            "Computed frame-pair motion"
        );
        Ok(metrics)
    }
}

/// Smoothness of a magnitude series from its jerk (third difference)
/// relative to its peak-to-peak range. `1.0` is perfectly smooth.
pub fn calculate_motion_smoothness(values: &[f64]) -> f64 {
    // Three differences need four samples.
    if values.len() < 4 {
        return 1.0;
    }

    let diff = |v: &[f64]| -> Vec<f64> { v.windows(2).map(|w| w[1] - w[0]).collect() };
    let jerk = diff(&diff(&diff(values)));

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= 0.0 {
        return 1.0;
    }

    let mean_jerk = jerk.iter().map(|j| j.abs()).sum::<f64>() / jerk.len() as f64;
    (1.0 / (1.0 + (mean_jerk / range) * 10.0)).clamp(0.0, 1.0)
}

/// Indices where the velocity of `values` flips sign by more than
/// `threshold`. Each index points at the sample after the flip.
pub fn detect_motion_reversals(values: &[f64], threshold: f64) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }

    let velocity: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let sign = |v: f64| {
        if v > 0.0 {
            1
        } else if v < 0.0 {
            -1
        } else {
            0
        }
    };

    (0..velocity.len() - 1)
        .filter(|&i| sign(velocity[i + 1]) != sign(velocity[i]))
        .filter(|&i| i > 0 && i < velocity.len() - 1)
        .filter(|&i| (velocity[i] - velocity[i + 1]).abs() > threshold)
        .map(|i| i + 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_constant_acceleration_is_smooth() {
        // quadratic -> third difference is zero
        let values: Vec<f64> = (0..6).map(|i| (i * i) as f64).collect();
        assert_eq!(calculate_motion_smoothness(&values), 1.0);
    }

    #[test]
    fn test_short_or_flat_series_is_smooth() {
        assert_eq!(calculate_motion_smoothness(&[1.0, 5.0]), 1.0);
        // no third difference exists yet
        assert_eq!(calculate_motion_smoothness(&[0.0, 9.0, 1.0]), 1.0);
        assert_eq!(calculate_motion_smoothness(&[2.0; 5]), 1.0);
    }

    #[test]
    fn test_jitter_reduces_smoothness() {
        let jitter = [0.0, 4.0, 0.0, 4.0, 0.0];
        let s = calculate_motion_smoothness(&jitter);
        assert!(s < 0.1, "smoothness = {s}");
    }

    #[test]
    fn test_detect_reversal() {
        // velocity: +1 +1 -2 -1 ; flip between index 1 and 2
        let values = [0.0, 1.0, 2.0, 0.0, -1.0];
        assert_eq!(detect_motion_reversals(&values, 0.5), vec![2]);
        // below threshold
        assert!(detect_motion_reversals(&values, 5.0).is_empty());
    }

    #[test]
    fn test_monotonic_has_no_reversal() {
        let values = [0.0, 1.0, 3.0, 6.0, 10.0];
        assert!(detect_motion_reversals(&values, 0.1).is_empty());
    }

    #[test]
    fn test_analyze_pairs_on_static_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<Frame> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("frame_{:06}.jpg", i + 1));
                let img = GrayImage::from_fn(48, 32, |x, y| Luma([((x * 5 + y * 3) % 255) as u8]));
                img.save(&path).unwrap();
                Frame::new(i, 3.0, path)
            })
            .collect();

        let analyzer = MotionAnalyzer::default();
        let metrics = analyzer.analyze_pairs(&frames).unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| m.magnitude < 0.05));
        assert!(analyzer.analyze_pairs(&frames[..1]).unwrap().is_empty());
    }
}
