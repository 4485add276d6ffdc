//! Frame sampling.
//!
//! Frames are written as `<frames_root>/<video_stem>/frame_%06d.jpg` together
//! with a `metadata.json` sidecar. Timestamps are derived from the frame
//! position and the sampling rate, never from the decoder.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use bestshot_models::encoding::FRAME_JPEG_QUALITY;
use bestshot_models::frame::{FRAME_FILE_PREFIX, FRAME_METADATA_FILE};
use bestshot_models::{Frame, FrameSetMetadata};

use crate::command::{FfmpegCommand, FfmpegRunner, DEFAULT_SUBPROCESS_TIMEOUT_SECS};
use crate::error::{MediaError, MediaResult};

/// Extension of sampled frame images.
const FRAME_EXTENSION: &str = "jpg";

/// Frames sampled from one video.
#[derive(Debug, Clone)]
pub struct FrameSet {
    /// Directory holding the frame images
    pub dir: PathBuf,
    /// Frames in temporal order
    pub frames: Vec<Frame>,
    pub metadata: FrameSetMetadata,
}

impl FrameSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Samples frames from videos at a fixed rate through ffmpeg.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    frames_root: PathBuf,
    clean_existing: bool,
    timeout_secs: u64,
}

impl FrameSampler {
    /// Create a sampler writing under `frames_root`.
    pub fn new(frames_root: impl Into<PathBuf>) -> Self {
        Self {
            frames_root: frames_root.into(),
            clean_existing: true,
            timeout_secs: DEFAULT_SUBPROCESS_TIMEOUT_SECS,
        }
    }

    /// Whether an existing frame directory is wiped before sampling.
    pub fn with_clean_existing(mut self, clean: bool) -> Self {
        self.clean_existing = clean;
        self
    }

    /// Bound on the ffmpeg invocation.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Directory frames of `video` are written to.
    pub fn frames_dir_for(&self, video: &Path) -> PathBuf {
        self.frames_root.join(frames_key(video))
    }

    /// Sample `video` at `fps`, scaled to `height` pixels preserving aspect ratio.
    pub async fn extract(&self, video: &Path, fps: f64, height: u32) -> MediaResult<FrameSet> {
        if !video.exists() {
            return Err(MediaError::extraction_failed(video, "source video does not exist"));
        }
        if fps <= 0.0 {
            return Err(MediaError::extraction_failed(
                video,
                format!("invalid sampling rate {fps}"),
            ));
        }

        let dir = self.frames_dir_for(video);
        if self.clean_existing && dir.exists() {
            debug!("Removing existing frames in {}", dir.display());
            fs::remove_dir_all(&dir).await?;
        }
        fs::create_dir_all(&dir).await?;

        info!(
            video = %video.display(),
            fps,
            height,
            "Sampling frames to {}",
            dir.display()
        );

        let pattern = dir.join(format!("{}%06d.{}", FRAME_FILE_PREFIX, FRAME_EXTENSION));
        let cmd = FfmpegCommand::new(video, &pattern)
            .video_filter(format!("fps={},scale=-2:{}", fps, height))
            .quality_scale(FRAME_JPEG_QUALITY);

        FfmpegRunner::new()
            .with_timeout(self.timeout_secs)
            .run_with_progress(&cmd, |p| {
                if p.is_complete {
                    debug!(frames = p.frame, "Frame sampling finished");
                }
            })
            .await
            .map_err(|e| {
                let detail = e.stderr().map(str::to_string).unwrap_or_else(|| e.to_string());
                MediaError::extraction_failed(video, detail)
            })?;

        let frames = list_frames(&dir, fps).await?;
        if frames.is_empty() {
            return Err(MediaError::extraction_failed(video, "ffmpeg produced no frames"));
        }

        let metadata = FrameSetMetadata {
            source_path: video.to_path_buf(),
            fps,
            height,
            frame_count: frames.len(),
        };
        fs::write(
            dir.join(FRAME_METADATA_FILE),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        metrics::counter!("bestshot_frames_sampled_total").increment(frames.len() as u64);
        info!(frames = frames.len(), "Sampled frames");

        Ok(FrameSet {
            dir,
            frames,
            metadata,
        })
    }

    /// Remove sampled frames for one video (by [`frames_key`]), or every
    /// video when `key` is `None`.
    pub async fn cleanup(&self, key: Option<&str>) -> MediaResult<()> {
        let target = match key {
            Some(key) => self.frames_root.join(key),
            None => self.frames_root.clone(),
        };

        if target.exists() {
            fs::remove_dir_all(&target).await?;
            info!("Removed frames at {}", target.display());
        } else {
            warn!("No frames to clean up at {}", target.display());
        }
        Ok(())
    }
}

/// Frame directory name of `video`: `<stem>_<extension>`.
///
/// `tour.mp4` and `tour.MOV` sample into `tour_mp4` and `tour_MOV`.
pub fn frames_key(video: &Path) -> String {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    match video.extension() {
        Some(ext) => format!("{}_{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}

/// List sampled frames in `dir`, sorted by file name, with timestamps at `fps`.
pub async fn list_frames(dir: &Path, fps: f64) -> MediaResult<Vec<Frame>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_frame_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| Frame::new(i as u32, fps, path))
        .collect())
}

/// Read the sidecar written next to sampled frames.
pub async fn load_metadata(dir: &Path) -> MediaResult<FrameSetMetadata> {
    let bytes = fs::read(dir.join(FRAME_METADATA_FILE)).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn is_frame_file(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with(FRAME_FILE_PREFIX))
        .unwrap_or(false);
    let ext_ok = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case(FRAME_EXTENSION))
        .unwrap_or(false);
    name_ok && ext_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_frames_sorted_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_000003.jpg", "frame_000001.jpg", "frame_000002.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let frames = list_frames(dir.path(), 3.0).await.unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].stem(), "frame_000001");
        assert_eq!(frames[2].index, 2);
        assert!((frames[2].timestamp_s - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_extract_rejects_missing_video() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = FrameSampler::new(dir.path());
        let result = sampler.extract(Path::new("/no/such/video.mp4"), 3.0, 720).await;
        assert!(matches!(result, Err(MediaError::ExtractionFailed { .. })));
    }

    #[test]
    fn test_frames_dir_uses_video_stem_and_extension() {
        let sampler = FrameSampler::new("frames");
        assert_eq!(
            sampler.frames_dir_for(Path::new("/videos/living_room.MP4")),
            PathBuf::from("frames/living_room_MP4")
        );
        assert_ne!(
            sampler.frames_dir_for(Path::new("tour.mp4")),
            sampler.frames_dir_for(Path::new("tour.MOV"))
        );
        assert_eq!(frames_key(Path::new("clips/tour")), "tour");
    }

    #[tokio::test]
    async fn test_cleanup_removes_video_frames() {
        let root = tempfile::tempdir().unwrap();
        let video_dir = root.path().join("tour");
        std::fs::create_dir_all(&video_dir).unwrap();
        std::fs::write(video_dir.join("frame_000001.jpg"), b"x").unwrap();

        let sampler = FrameSampler::new(root.path());
        sampler.cleanup(Some("tour")).await.unwrap();
        assert!(!video_dir.exists());
        assert!(root.path().exists());
    }
}
