//! Media backend seam.
//!
//! The pipeline only talks to video files through [`MediaBackend`], so runs
//! can be exercised without ffmpeg installed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use bestshot_models::{ClipsMetadata, Peak, VideoInfo};

use crate::clip::{concat_clips, ClipExtractor};
use crate::command::{check_ffmpeg, check_ffprobe, DEFAULT_SUBPROCESS_TIMEOUT_SECS};
use crate::error::MediaResult;
use crate::frames::{FrameSampler, FrameSet};
use crate::probe::probe_video;

/// Operations the pipeline needs from a video toolchain.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Fail early when the toolchain is unusable.
    fn check_available(&self) -> MediaResult<()>;

    async fn probe(&self, video: &Path) -> MediaResult<VideoInfo>;

    async fn sample_frames(
        &self,
        sampler: &FrameSampler,
        video: &Path,
        fps: f64,
        height: u32,
    ) -> MediaResult<FrameSet>;

    #[allow(clippy::too_many_arguments)]
    async fn extract_clips(
        &self,
        extractor: &ClipExtractor,
        video: &Path,
        peaks: &[Peak],
        output_dir: &Path,
        fps: f64,
        name_prefix: &str,
        video_duration: f64,
    ) -> MediaResult<ClipsMetadata>;

    async fn concat(&self, clips: &[PathBuf], output: &Path) -> MediaResult<()>;
}

/// [`MediaBackend`] driving the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    timeout_secs: u64,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SUBPROCESS_TIMEOUT_SECS)
    }
}

impl FfmpegBackend {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    fn check_available(&self) -> MediaResult<()> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(())
    }

    async fn probe(&self, video: &Path) -> MediaResult<VideoInfo> {
        probe_video(video).await
    }

    async fn sample_frames(
        &self,
        sampler: &FrameSampler,
        video: &Path,
        fps: f64,
        height: u32,
    ) -> MediaResult<FrameSet> {
        sampler
            .clone()
            .with_timeout(self.timeout_secs)
            .extract(video, fps, height)
            .await
    }

    async fn extract_clips(
        &self,
        extractor: &ClipExtractor,
        video: &Path,
        peaks: &[Peak],
        output_dir: &Path,
        fps: f64,
        name_prefix: &str,
        video_duration: f64,
    ) -> MediaResult<ClipsMetadata> {
        extractor
            .clone()
            .with_timeout(self.timeout_secs)
            .extract_clips(video, peaks, output_dir, fps, name_prefix, Some(video_duration))
            .await
    }

    async fn concat(&self, clips: &[PathBuf], output: &Path) -> MediaResult<()> {
        concat_clips(clips, output, self.timeout_secs).await
    }
}
