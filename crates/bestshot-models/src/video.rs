//! Source video metadata.

use serde::{Deserialize, Serialize};

/// Video file information reported by the media prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
}

impl VideoInfo {
    /// Number of native frames in the source.
    pub fn total_frames(&self) -> u64 {
        (self.duration * self.fps).max(0.0) as u64
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
