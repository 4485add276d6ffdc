//! Motion metrics derived from optical flow.

use serde::{Deserialize, Serialize};

/// Summary statistics of one dense flow field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowStatistics {
    pub mean_magnitude: f64,
    pub std_magnitude: f64,
    pub max_magnitude: f64,
    pub median_magnitude: f64,
    /// Center angle of the dominant 1-of-8 direction bin, radians
    pub dominant_direction: f64,
    /// Fraction of moving vectors inside the dominant bin
    pub direction_consistency: f64,
}

impl Default for FlowStatistics {
    fn default() -> Self {
        Self {
            mean_magnitude: 0.0,
            std_magnitude: 0.0,
            max_magnitude: 0.0,
            median_magnitude: 0.0,
            dominant_direction: 0.0,
            direction_consistency: 1.0,
        }
    }
}

/// Camera motion decomposition of one flow field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionPattern {
    /// Mean radial component relative to the frame center
    pub zoom: f64,
    /// Mean tangential component relative to the frame center
    pub rotation: f64,
    /// Mean horizontal flow
    pub pan: f64,
    /// Mean vertical flow
    pub tilt: f64,
    /// Coefficient of variation of the flow magnitude
    pub shake: f64,
}

/// Motion between one pair of consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionMetrics {
    pub magnitude: f64,
    pub direction_consistency: f64,
    pub shake: f64,
    pub zoom: f64,
    pub pan: f64,
    pub tilt: f64,
    pub rotation: f64,
}

impl Default for MotionMetrics {
    fn default() -> Self {
        Self::from_parts(&FlowStatistics::default(), &MotionPattern::default())
    }
}

impl MotionMetrics {
    /// Combine flow statistics and the motion decomposition of the same pair.
    pub fn from_parts(stats: &FlowStatistics, pattern: &MotionPattern) -> Self {
        Self {
            magnitude: stats.mean_magnitude,
            direction_consistency: stats.direction_consistency,
            shake: pattern.shake,
            zoom: pattern.zoom,
            pan: pattern.pan,
            tilt: pattern.tilt,
            rotation: pattern.rotation,
        }
    }

    /// Align per-pair metrics to a per-frame series of length `frame_count`.
    ///
    /// The last pair is duplicated until the lengths match. An empty input
    /// yields still-camera defaults.
    pub fn pad_to_frames(pairs: &[MotionMetrics], frame_count: usize) -> Vec<MotionMetrics> {
        let mut out: Vec<MotionMetrics> = pairs.iter().take(frame_count).copied().collect();
        let filler = pairs.last().copied().unwrap_or_default();
        out.resize(frame_count, filler);
        out
    }

    /// Name of the strongest motion component.
    pub fn dominant_motion(&self) -> &'static str {
        let components = [
            ("zoom", self.zoom),
            ("rotation", self.rotation),
            ("pan", self.pan),
            ("tilt", self.tilt),
        ];

        if self.magnitude < 0.5 {
            return "static";
        }

        components
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| *name)
            .unwrap_or("static")
    }
}
