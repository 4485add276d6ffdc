//! Clip encoding configuration.

use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Audio is passed through untouched
pub const DEFAULT_AUDIO_CODEC: &str = "copy";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 18;

/// JPEG quality for sampled frames (ffmpeg `-q:v`, 2 = near lossless)
pub const FRAME_JPEG_QUALITY: u8 = 2;

/// vidstabdetect options for the first stabilization pass
pub const VIDSTAB_DETECT_OPTIONS: &str = "stepsize=6:shakiness=8";
/// vidstabtransform options for the second stabilization pass
pub const VIDSTAB_TRANSFORM_OPTIONS: &str = "zoom=1:smoothing=30";

/// Contact sheet defaults
pub const CONTACT_SHEET_COLUMNS: u32 = 4;
pub const CONTACT_SHEET_THUMB_SIZE: (u32, u32) = (320, 180);

/// Encoding settings used when cutting clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipEncoding {
    /// Video codec (e.g., "libx264", "libx265")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Encoding preset (e.g., "ultrafast", "veryfast", "medium")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}

impl Default for ClipEncoding {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            crf: DEFAULT_CRF,
            preset: default_preset(),
            audio_codec: default_audio_codec(),
        }
    }
}

impl ClipEncoding {
    pub fn new(codec: impl Into<String>, crf: u8, preset: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            crf,
            preset: preset.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let enc = ClipEncoding::default();
        assert_eq!(enc.codec, "libx264");
        assert_eq!(enc.crf, 18);
        assert_eq!(enc.preset, "veryfast");
        assert_eq!(enc.audio_codec, "copy");
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let enc: ClipEncoding = serde_json::from_str(r#"{"crf": 23}"#).unwrap();
        assert_eq!(enc.crf, 23);
        assert_eq!(enc.codec, DEFAULT_VIDEO_CODEC);
    }
}
