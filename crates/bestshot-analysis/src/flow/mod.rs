//! Optical flow between consecutive grayscale frames.
//!
//! Two estimators are provided: dense polynomial-expansion flow
//! ([`FarnebackFlow`]) and sparse corner tracking fitted to a homography
//! ([`SparseFlow`]). Both produce a dense [`FlowField`] so the motion
//! decomposition downstream does not care which one ran.
//!
//! With the `opencv` feature (default) the estimators run through OpenCV's
//! `video` and `calib3d` modules; without it they use the in-process
//! ndarray implementations (`compute_portable`).

mod farneback;
mod sparse;

pub use farneback::{FarnebackFlow, FarnebackParams};
pub use sparse::{Homography, SparseFlow};

#[cfg(feature = "opencv")]
pub(crate) use sparse::{MIN_CORNERS, MIN_MATCHES};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use bestshot_models::{FlowStatistics, MotionPattern};

use crate::error::AnalysisResult;

/// Vectors shorter than this do not count as moving.
const MOVING_MAGNITUDE: f32 = 1.0;

/// Below this mean magnitude the direction histogram is not computed.
const SIGNIFICANT_MEAN_MAGNITUDE: f64 = 0.5;

const DIRECTION_BINS: usize = 8;

/// Which estimator computes flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMethod {
    #[default]
    Dense,
    Sparse,
}

impl FlowMethod {
    pub fn estimator(self) -> Box<dyn FlowEstimator> {
        match self {
            FlowMethod::Dense => Box::new(FarnebackFlow::default()),
            FlowMethod::Sparse => Box::new(SparseFlow::default()),
        }
    }
}

/// Computes the displacement of every pixel of `prev` into `next`.
pub trait FlowEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Frames of different shapes yield an all-zero field.
    fn compute(&self, prev: &Array2<f32>, next: &Array2<f32>) -> AnalysisResult<FlowField>;
}

/// Dense per-pixel displacement.
#[derive(Debug, Clone)]
pub struct FlowField {
    pub dx: Array2<f32>,
    pub dy: Array2<f32>,
}

impl FlowField {
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            dx: Array2::zeros((height, width)),
            dy: Array2::zeros((height, width)),
        }
    }

    /// `(height, width)`
    pub fn dim(&self) -> (usize, usize) {
        self.dx.dim()
    }

    pub fn magnitude(&self) -> Array2<f32> {
        let mut mag = self.dx.clone();
        mag.zip_mut_with(&self.dy, |x, &y| *x = (*x * *x + y * y).sqrt());
        mag
    }

    /// Mean absolute difference to another field of the same shape.
    pub fn mean_abs_difference(&self, other: &FlowField) -> f64 {
        if self.dim() != other.dim() || self.dx.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .dx
            .iter()
            .zip(other.dx.iter())
            .chain(self.dy.iter().zip(other.dy.iter()))
            .map(|(a, b)| (a - b).abs() as f64)
            .sum();
        sum / (2 * self.dx.len()) as f64
    }

    /// Magnitude statistics and dominant direction.
    pub fn statistics(&self) -> FlowStatistics {
        let mag = self.magnitude();
        if mag.is_empty() {
            return FlowStatistics::default();
        }

        let n = mag.len() as f64;
        let mean = mag.iter().map(|&m| m as f64).sum::<f64>() / n;
        let std = (mag.iter().map(|&m| (m as f64 - mean).powi(2)).sum::<f64>() / n).sqrt();
        let max = mag.iter().fold(0.0f32, |a, &b| a.max(b)) as f64;

        let mut sorted: Vec<f32> = mag.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
        } else {
            sorted[mid] as f64
        };

        let mut stats = FlowStatistics {
            mean_magnitude: mean,
            std_magnitude: std,
            max_magnitude: max,
            median_magnitude: median,
            ..Default::default()
        };

        if mean > SIGNIFICANT_MEAN_MAGNITUDE {
            let mut hist = [0usize; DIRECTION_BINS];
            for ((&m, &x), &y) in mag.iter().zip(self.dx.iter()).zip(self.dy.iter()) {
                if m > MOVING_MAGNITUDE {
                    let angle = (y as f64).atan2(x as f64);
                    let bin = (((angle + PI) / (2.0 * PI)) * DIRECTION_BINS as f64) as usize;
                    hist[bin.min(DIRECTION_BINS - 1)] += 1;
                }
            }
            let total: usize = hist.iter().sum();
            if total > 0 {
                let (idx, &count) = hist
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
                    .unwrap_or((0, &0));
                stats.dominant_direction = idx as f64 * PI / 4.0 - PI;
                stats.direction_consistency = count as f64 / total as f64;
            }
        }

        stats
    }

    /// Zoom, rotation, pan, tilt and shake of this field.
    pub fn motion_pattern(&self) -> MotionPattern {
        let (h, w) = self.dim();
        if h == 0 || w == 0 {
            return MotionPattern::default();
        }
        let cx = (w / 2) as f64;
        let cy = (h / 2) as f64;

        let mut radial_sum = 0.0;
        let mut tangential_sum = 0.0;
        let mut moving = 0usize;
        let mut pan_sum = 0.0;
        let mut tilt_sum = 0.0;
        let mut mag_sum = 0.0;
        let mut mag_sq_sum = 0.0;

        for ((y, x), &fx) in self.dx.indexed_iter() {
            let fx = fx as f64;
            let fy = self.dy[[y, x]] as f64;
            let m = (fx * fx + fy * fy).sqrt();

            pan_sum += fx;
            tilt_sum += fy;
            mag_sum += m;
            mag_sq_sum += m * m;

            if m > MOVING_MAGNITUDE as f64 {
                let xx = x as f64 - cx;
                let yy = y as f64 - cy;
                let r = (xx * xx + yy * yy).sqrt() + 1e-6;
                radial_sum += (fx * xx + fy * yy) / r;
                tangential_sum += (-fx * yy + fy * xx) / r;
                moving += 1;
            }
        }

        let n = (h * w) as f64;
        let mean_mag = mag_sum / n;
        let std_mag = (mag_sq_sum / n - mean_mag * mean_mag).max(0.0).sqrt();
        let (zoom, rotation) = if moving > 0 {
            (
                (radial_sum / moving as f64).abs(),
                (tangential_sum / moving as f64).abs(),
            )
        } else {
            (0.0, 0.0)
        };

        MotionPattern {
            zoom,
            rotation,
            pan: (pan_sum / n).abs(),
            tilt: (tilt_sum / n).abs(),
            shake: std_mag / (mean_mag + 1e-6),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(h: usize, w: usize, dx: f32, dy: f32) -> FlowField {
        FlowField {
            dx: Array2::from_elem((h, w), dx),
            dy: Array2::from_elem((h, w), dy),
        }
    }

    #[test]
    fn test_still_field_defaults() {
        let stats = FlowField::zeros(10, 10).statistics();
        assert_eq!(stats.mean_magnitude, 0.0);
        assert_eq!(stats.direction_consistency, 1.0);
        assert_eq!(stats.dominant_direction, 0.0);
    }

    #[test]
    fn test_uniform_pan() {
        let field = uniform(20, 20, 3.0, 0.0);
        let stats = field.statistics();
        assert!((stats.mean_magnitude - 3.0).abs() < 1e-6);
        assert_eq!(stats.direction_consistency, 1.0);
        // angle 0 falls in bin 4 -> 4 * pi/4 - pi = 0
        assert!(stats.dominant_direction.abs() < 1e-9);

        let pattern = field.motion_pattern();
        assert!((pattern.pan - 3.0).abs() < 1e-6);
        assert!(pattern.tilt.abs() < 1e-9);
        assert!(pattern.shake < 1e-3);
    }

    #[test]
    fn test_radial_field_is_zoom() {
        let (h, w) = (21, 21);
        let dx = Array2::from_shape_fn((h, w), |(_, x)| (x as f32 - 10.0) * 0.3);
        let dy = Array2::from_shape_fn((h, w), |(y, _)| (y as f32 - 10.0) * 0.3);
        let pattern = FlowField { dx, dy }.motion_pattern();
        assert!(pattern.zoom > 1.0);
        assert!(pattern.rotation < 1e-3);
        assert!(pattern.pan < 1e-6);
    }

    #[test]
    fn test_mean_abs_difference() {
        let a = uniform(4, 4, 1.0, 0.0);
        let b = uniform(4, 4, 0.0, 1.0);
        assert!((a.mean_abs_difference(&b) - 1.0).abs() < 1e-9);
        assert_eq!(a.mean_abs_difference(&a), 0.0);
    }
}
