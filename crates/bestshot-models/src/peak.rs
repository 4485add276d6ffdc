//! Temporal peak model.

use serde::{Deserialize, Serialize};

/// A frame chosen as the temporal center of a candidate clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub frame_index: usize,
    pub score: f64,
}

impl Peak {
    pub fn new(frame_index: usize, score: f64) -> Self {
        Self { frame_index, score }
    }

    /// Peak position in seconds for a sequence sampled at `fps`.
    pub fn time(&self, fps: f64) -> f64 {
        if fps > 0.0 {
            self.frame_index as f64 / fps
        } else {
            0.0
        }
    }

    /// Ordering used for greedy selection: higher score first, then earlier frame.
    pub fn rank_cmp(a: &Peak, b: &Peak) -> std::cmp::Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.frame_index.cmp(&b.frame_index))
    }
}
