//! Clip window and clip metadata models.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::encoding::ClipEncoding;

/// Time range cut around a peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub start_time: f64,
    pub end_time: f64,
    pub peak_time: f64,
}

impl ClipWindow {
    /// Window of `pre_roll` seconds before and `post_roll` seconds after
    /// `peak_time`, clamped to `[0, video_duration]`.
    pub fn around(peak_time: f64, pre_roll: f64, post_roll: f64, video_duration: f64) -> Self {
        let end_time = (peak_time + post_roll).min(video_duration).max(0.0);
        let start_time = (peak_time - pre_roll).max(0.0).min(end_time);
        Self {
            start_time,
            end_time,
            peak_time,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Offset of the peak from the start of the clip.
    pub fn peak_in_clip(&self) -> f64 {
        self.peak_time - self.start_time
    }
}

/// Description of one extracted clip, as written to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSpec {
    /// Output file name (e.g., `tour_001.mp4`)
    pub filename: String,
    pub source_video: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub peak_time: f64,
    pub peak_time_in_clip: f64,
    pub score: f64,
    pub peak_frame: usize,
    /// Whether the stabilized pass produced this file
    #[serde(default)]
    pub stabilized: bool,
}

impl ClipSpec {
    pub fn from_window(
        filename: impl Into<String>,
        source_video: impl Into<PathBuf>,
        window: &ClipWindow,
        score: f64,
        peak_frame: usize,
    ) -> Self {
        Self {
            filename: filename.into(),
            source_video: source_video.into(),
            start_time: window.start_time,
            end_time: window.end_time,
            duration: window.duration(),
            peak_time: window.peak_time,
            peak_time_in_clip: window.peak_in_clip(),
            score,
            peak_frame,
            stabilized: false,
        }
    }
}

/// Parameters a batch of clips was cut with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionParams {
    pub pre_roll: f64,
    pub post_roll: f64,
    pub codec: String,
    pub crf: u8,
    pub preset: String,
    #[serde(default)]
    pub stabilize: bool,
}

impl ExtractionParams {
    pub fn new(pre_roll: f64, post_roll: f64, encoding: &ClipEncoding, stabilize: bool) -> Self {
        Self {
            pre_roll,
            post_roll,
            codec: encoding.codec.clone(),
            crf: encoding.crf,
            preset: encoding.preset.clone(),
            stabilize,
        }
    }
}

/// Contents of `clips_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipsMetadata {
    pub source_video: PathBuf,
    pub clips: Vec<ClipSpec>,
    pub extraction_params: ExtractionParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_fits_inside_video() {
        let w = ClipWindow::around(2.0, 1.0, 2.0, 5.0);
        assert_eq!(w.start_time, 1.0);
        assert_eq!(w.end_time, 4.0);
        assert_eq!(w.peak_in_clip(), 1.0);
    }

    #[test]
    fn test_window_clamped_at_end() {
        let w = ClipWindow::around(4.5, 1.0, 2.0, 5.0);
        assert_eq!(w.start_time, 3.5);
        assert_eq!(w.end_time, 5.0);
        assert!((w.duration() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_window_clamped_at_start() {
        let w = ClipWindow::around(0.3, 1.0, 2.0, 60.0);
        assert_eq!(w.start_time, 0.0);
        assert!((w.end_time - 2.3).abs() < 1e-9);
    }

    #[test]
    fn test_window_never_inverted() {
        let w = ClipWindow::around(10.0, 1.0, 2.0, 5.0);
        assert!(w.start_time <= w.end_time);
        assert!(w.end_time <= 5.0);
    }

    #[test]
    fn test_clips_metadata_json_preserves_fields() {
        let window = ClipWindow::around(30.0, 1.0, 2.0, 60.0);
        let metadata = ClipsMetadata {
            source_video: PathBuf::from("/videos/tour.mp4"),
            clips: vec![ClipSpec::from_window("tour_001.mp4", "/videos/tour.mp4", &window, 0.83, 90)],
            extraction_params: ExtractionParams::new(1.0, 2.0, &ClipEncoding::default(), false),
        };

        let json = serde_json::to_string_pretty(&metadata).unwrap();
        let parsed: ClipsMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(parsed.clips[0].peak_time_in_clip, 1.0);
    }
}
