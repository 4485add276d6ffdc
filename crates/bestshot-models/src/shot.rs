//! Shot boundary and segment models.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How one shot turns into the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Hard cut between two frames
    Cut,
    /// Gradual change sustained over several frames
    Dissolve,
    /// Discontinuity in camera motion only
    MotionBreak,
    /// Detected, but no rule classified it
    Unknown,
}

impl TransitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::Cut => "cut",
            TransitionType::Dissolve => "dissolve",
            TransitionType::MotionBreak => "motion_break",
            TransitionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected boundary: the first frame of a new shot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotBoundary {
    pub frame_index: usize,
    pub confidence: f64,
    pub transition: TransitionType,
}

/// A contiguous run of frames belonging to one camera take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotSegment {
    pub start_frame: usize,
    /// Inclusive
    pub end_frame: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub num_frames: usize,
    /// `None` for the opening shot
    pub transition_before: Option<TransitionType>,
    pub confidence: f64,
}

impl ShotSegment {
    /// Whether `frame_index` falls inside this segment.
    pub fn contains(&self, frame_index: usize) -> bool {
        frame_index >= self.start_frame && frame_index <= self.end_frame
    }
}
