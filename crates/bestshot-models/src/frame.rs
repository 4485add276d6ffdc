//! Sampled frame models.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// File name of the sidecar written next to sampled frames.
pub const FRAME_METADATA_FILE: &str = "metadata.json";

/// Prefix shared by every sampled frame image.
pub const FRAME_FILE_PREFIX: &str = "frame_";

/// A single frame sampled from a source video.
///
/// Frames are immutable once sampled. `timestamp_s` is always
/// `index / sampling_fps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Zero-based position in the sampled sequence
    pub index: u32,
    /// Position in the source video, in seconds
    pub timestamp_s: f64,
    /// Image file on disk
    pub path: PathBuf,
}

impl Frame {
    /// Create a frame at `index` for a sequence sampled at `fps`.
    pub fn new(index: u32, fps: f64, path: impl Into<PathBuf>) -> Self {
        let timestamp_s = if fps > 0.0 { index as f64 / fps } else { 0.0 };
        Self {
            index,
            timestamp_s,
            path: path.into(),
        }
    }

    /// File stem of the frame image (e.g. `frame_000001`).
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}{:06}", FRAME_FILE_PREFIX, self.index + 1))
    }

    /// Cache identity of the frame image.
    ///
    /// `<video dir>_<stem>_<digest>`, where the digest covers the canonical
    /// path and the file's size and mtime. Frames re-sampled into a
    /// different directory, or rewritten in place, get a new identity.
    pub fn identity(&self) -> String {
        let parent = self
            .path
            .parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().into_owned());
        let base = match parent {
            Some(dir) if !dir.is_empty() => format!("{}_{}", dir, self.stem()),
            _ => self.stem(),
        };
        format!("{}_{}", base, self.content_digest())
    }

    fn content_digest(&self) -> String {
        let path = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let (size, mtime_ns) = std::fs::metadata(&path)
            .map(|m| {
                let mtime = m
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                (m.len(), mtime)
            })
            .unwrap_or((0, 0));

        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(size.to_le_bytes());
        hasher.update(mtime_ns.to_le_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// Sidecar record describing one sampled frame directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSetMetadata {
    /// Source video the frames were sampled from
    #[serde(alias = "video_path")]
    pub source_path: PathBuf,
    /// Sampling rate
    pub fps: f64,
    /// Target frame height in pixels
    pub height: u32,
    /// Number of frames written
    pub frame_count: usize,
}

impl FrameSetMetadata {
    /// Expected frame count for a source of `duration` seconds sampled at `fps`.
    pub fn expected_frame_count(duration: f64, fps: f64) -> usize {
        (duration * fps).round().max(0.0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timestamp() {
        let frame = Frame::new(9, 3.0, "frames/tour/frame_000010.jpg");
        assert!((frame.timestamp_s - 3.0).abs() < 1e-9);
        assert_eq!(frame.stem(), "frame_000010");
    }

    #[test]
    fn test_frame_identity_includes_video_dir() {
        let frame = Frame::new(0, 3.0, "frames/kitchen_tour/frame_000001.jpg");
        assert!(frame.identity().starts_with("kitchen_tour_frame_000001_"));
        assert_eq!(frame.identity(), frame.identity());

        let bare = Frame::new(0, 3.0, "frame_000001.jpg");
        assert!(bare.identity().starts_with("frame_000001_"));
    }

    #[test]
    fn test_frame_identity_differs_for_same_leaf_dir() {
        let dir = tempfile::tempdir().unwrap();
        let analyze = dir.path().join("analyze/tour");
        let process = dir.path().join("tour");
        std::fs::create_dir_all(&analyze).unwrap();
        std::fs::create_dir_all(&process).unwrap();
        std::fs::write(analyze.join("frame_000001.jpg"), b"first").unwrap();
        std::fs::write(process.join("frame_000001.jpg"), b"first").unwrap();

        let a = Frame::new(0, 3.0, analyze.join("frame_000001.jpg"));
        let b = Frame::new(0, 3.0, process.join("frame_000001.jpg"));
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_frame_identity_changes_when_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_000001.jpg");
        std::fs::write(&path, b"low").unwrap();
        let frame = Frame::new(0, 3.0, &path);
        let before = frame.identity();

        std::fs::write(&path, b"re-encoded at a larger height").unwrap();
        assert_ne!(frame.identity(), before);
    }

    #[test]
    fn test_expected_frame_count() {
        assert_eq!(FrameSetMetadata::expected_frame_count(60.0, 3.0), 180);
        assert_eq!(FrameSetMetadata::expected_frame_count(10.2, 3.0), 31);
    }

    #[test]
    fn test_metadata_accepts_video_path_alias() {
        let json = r#"{"video_path": "a.mp4", "fps": 3.0, "height": 720, "frame_count": 12}"#;
        let meta: FrameSetMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.source_path, PathBuf::from("a.mp4"));
        assert_eq!(meta.frame_count, 12);
    }
}
