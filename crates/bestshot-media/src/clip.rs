//! Clip extraction around peak moments.
//!
//! Clips re-encode the video stream with the configured codec/CRF/preset and
//! pass audio through. Stabilization is a two-pass vidstab run; if either
//! pass fails the clip is cut again without it.

use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use bestshot_models::encoding::{VIDSTAB_DETECT_OPTIONS, VIDSTAB_TRANSFORM_OPTIONS};
use bestshot_models::{ClipEncoding, ClipSpec, ClipWindow, ClipsMetadata, ExtractionParams, Peak};

use crate::command::{FfmpegCommand, FfmpegRunner, DEFAULT_SUBPROCESS_TIMEOUT_SECS};
use crate::error::{MediaError, MediaResult};
use crate::probe::get_duration;

/// File name of the clip sidecar.
pub const CLIPS_METADATA_FILE: &str = "clips_metadata.json";

/// How a stabilized cut ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StabilizeOutcome {
    Stabilized,
    /// A vidstab pass failed and the plain cut was used instead
    FellBack { reason: String },
}

/// Cuts clips out of a source video.
#[derive(Debug, Clone)]
pub struct ClipExtractor {
    pre_roll: f64,
    post_roll: f64,
    encoding: ClipEncoding,
    stabilize: bool,
    timeout_secs: u64,
}

impl Default for ClipExtractor {
    fn default() -> Self {
        Self::new(1.0, 2.0, ClipEncoding::default())
    }
}

impl ClipExtractor {
    pub fn new(pre_roll: f64, post_roll: f64, encoding: ClipEncoding) -> Self {
        info!(
            "Clip extractor: {:.1}s clips ({:.1}s before + {:.1}s after peak)",
            pre_roll + post_roll,
            pre_roll,
            post_roll
        );
        Self {
            pre_roll,
            post_roll,
            encoding,
            stabilize: false,
            timeout_secs: DEFAULT_SUBPROCESS_TIMEOUT_SECS,
        }
    }

    pub fn with_stabilization(mut self, stabilize: bool) -> Self {
        self.stabilize = stabilize;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Parameters recorded in the clip sidecar.
    pub fn params(&self) -> ExtractionParams {
        ExtractionParams::new(self.pre_roll, self.post_roll, &self.encoding, self.stabilize)
    }

    /// Clip bounds around `peak_time` inside a video of `video_duration` seconds.
    pub fn window(&self, peak_time: f64, video_duration: f64) -> ClipWindow {
        ClipWindow::around(peak_time, self.pre_roll, self.post_roll, video_duration)
    }

    fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new().with_timeout(self.timeout_secs)
    }

    /// Cut one clip around `peak_time` into `output`.
    ///
    /// The video duration is probed when not supplied.
    pub async fn extract_clip(
        &self,
        video: &Path,
        peak_time: f64,
        output: &Path,
        video_duration: Option<f64>,
    ) -> MediaResult<ClipSpec> {
        let video_duration = match video_duration {
            Some(d) => d,
            None => get_duration(video).await?,
        };

        let window = self.window(peak_time, video_duration);
        info!(
            "Extracting clip: {:.1}s - {:.1}s (peak at {:.1}s)",
            window.start_time, window.end_time, peak_time
        );

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }

        let stabilized = if self.stabilize {
            match self.cut_stabilized(video, &window, output).await? {
                StabilizeOutcome::Stabilized => true,
                StabilizeOutcome::FellBack { reason } => {
                    warn!("Stabilization failed, falling back to plain cut: {}", reason);
                    self.cut_plain(video, &window, output).await?;
                    false
                }
            }
        } else {
            self.cut_plain(video, &window, output).await?;
            false
        };

        let filename = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut spec = ClipSpec::from_window(filename, video, &window, 0.0, 0);
        spec.stabilized = stabilized;
        Ok(spec)
    }

    /// Cut every peak into `<output_dir>/<name_prefix>_NNN.mp4`, numbered in
    /// temporal order, and write the clip sidecar.
    ///
    /// A failed cut drops that clip; the call fails only when no clip survives.
    pub async fn extract_clips(
        &self,
        video: &Path,
        peaks: &[Peak],
        output_dir: &Path,
        fps: f64,
        name_prefix: &str,
        video_duration: Option<f64>,
    ) -> MediaResult<ClipsMetadata> {
        fs::create_dir_all(output_dir).await?;
        let video_duration = match video_duration {
            Some(d) => d,
            None => get_duration(video).await?,
        };

        let mut ordered = peaks.to_vec();
        ordered.sort_by_key(|p| p.frame_index);

        let mut clips = Vec::with_capacity(ordered.len());
        let mut last_error = None;

        for (i, peak) in ordered.iter().enumerate() {
            let output = output_dir.join(format!("{}_{:03}.mp4", name_prefix, i + 1));
            match self
                .extract_clip(video, peak.time(fps), &output, Some(video_duration))
                .await
            {
                Ok(mut spec) => {
                    spec.score = peak.score;
                    spec.peak_frame = peak.frame_index;
                    info!("Extracted clip {}/{}: {}", i + 1, ordered.len(), spec.filename);
                    metrics::counter!("bestshot_clips_extracted_total").increment(1);
                    clips.push(spec);
                }
                Err(e) => {
                    error!("Clip {} failed: {}", output.display(), e);
                    last_error = Some(e);
                }
            }
        }

        if clips.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let metadata = ClipsMetadata {
            source_video: video.to_path_buf(),
            clips,
            extraction_params: self.params(),
        };
        let path = output_dir.join(CLIPS_METADATA_FILE);
        write_clips_metadata(&path, &metadata).await?;
        info!("Saved clip metadata to {}", path.display());

        Ok(metadata)
    }

    async fn cut_plain(&self, video: &Path, window: &ClipWindow, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(video, output)
            .seek(window.start_time)
            .duration(window.duration())
            .video_codec(&self.encoding.codec)
            .crf(self.encoding.crf)
            .preset(&self.encoding.preset)
            .audio_codec(&self.encoding.audio_codec);

        self.runner().run(&cmd).await.map_err(|e| {
            let detail = e.stderr().map(str::to_string).unwrap_or_else(|| e.to_string());
            MediaError::clip_failed(output, detail)
        })?;
        debug!("Extracted clip to {}", output.display());
        Ok(())
    }

    /// Two-pass vidstab cut. Pass failures are reported as a fallback, not an error.
    async fn cut_stabilized(
        &self,
        video: &Path,
        window: &ClipWindow,
        output: &Path,
    ) -> MediaResult<StabilizeOutcome> {
        let transforms = output.with_extension("trf");

        let detect = FfmpegCommand::null_output(video)
            .seek(window.start_time)
            .duration(window.duration())
            .video_filter(format!(
                "vidstabdetect={}:result={}",
                VIDSTAB_DETECT_OPTIONS,
                transforms.display()
            ));

        let outcome = match self.runner().run(&detect).await {
            Err(e) => StabilizeOutcome::FellBack {
                reason: format!("detect pass: {e}"),
            },
            Ok(()) => {
                let apply = FfmpegCommand::new(video, output)
                    .seek(window.start_time)
                    .duration(window.duration())
                    .video_filter(format!(
                        "vidstabtransform=input={}:{}",
                        transforms.display(),
                        VIDSTAB_TRANSFORM_OPTIONS
                    ))
                    .video_codec(&self.encoding.codec)
                    .crf(self.encoding.crf)
                    .preset(&self.encoding.preset)
                    .audio_codec(&self.encoding.audio_codec);

                match self.runner().run(&apply).await {
                    Ok(()) => StabilizeOutcome::Stabilized,
                    Err(e) => StabilizeOutcome::FellBack {
                        reason: format!("transform pass: {e}"),
                    },
                }
            }
        };

        if transforms.exists() {
            fs::remove_file(&transforms).await?;
        }
        if outcome == StabilizeOutcome::Stabilized {
            debug!("Extracted stabilized clip to {}", output.display());
        }
        Ok(outcome)
    }
}

/// Join `clips` into `output` without re-encoding (concat demuxer).
pub async fn concat_clips(clips: &[PathBuf], output: &Path, timeout_secs: u64) -> MediaResult<()> {
    if clips.is_empty() {
        return Err(MediaError::internal("nothing to concatenate"));
    }

    let list_dir = output.parent().unwrap_or_else(|| Path::new("."));
    let mut list = tempfile::Builder::new()
        .prefix("concat_")
        .suffix(".txt")
        .tempfile_in(list_dir)?;
    for clip in clips {
        let absolute = std::path::absolute(clip)?;
        writeln!(list, "file '{}'", absolute.display().to_string().replace('\'', "'\\''"))?;
    }
    list.flush()?;

    let cmd = FfmpegCommand::new(list.path(), output)
        .input_args(["-f", "concat", "-safe", "0"])
        .stream_copy();

    FfmpegRunner::new()
        .with_timeout(timeout_secs)
        .run(&cmd)
        .await
        .map_err(|e| MediaError::clip_failed(output, e.to_string()))?;

    info!(clips = clips.len(), "Concatenated clips into {}", output.display());
    Ok(())
}

/// Write the clip sidecar.
pub async fn write_clips_metadata(path: &Path, metadata: &ClipsMetadata) -> MediaResult<()> {
    fs::write(path, serde_json::to_vec_pretty(metadata)?).await?;
    Ok(())
}

/// Read a clip sidecar back.
pub async fn read_clips_metadata(path: &Path) -> MediaResult<ClipsMetadata> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_scenarios() {
        let extractor = ClipExtractor::new(1.0, 2.0, ClipEncoding::default());

        let w = extractor.window(2.0, 5.0);
        assert_eq!((w.start_time, w.end_time), (1.0, 4.0));

        let w = extractor.window(4.5, 5.0);
        assert_eq!((w.start_time, w.end_time), (3.5, 5.0));
    }

    #[test]
    fn test_params_reflect_encoding() {
        let extractor = ClipExtractor::new(0.5, 1.5, ClipEncoding::new("libx265", 22, "fast"))
            .with_stabilization(true);
        let params = extractor.params();
        assert_eq!(params.codec, "libx265");
        assert_eq!(params.crf, 22);
        assert!(params.stabilize);
    }

    #[tokio::test]
    async fn test_clips_metadata_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = ClipExtractor::default();
        let window = extractor.window(10.0, 60.0);
        let metadata = ClipsMetadata {
            source_video: PathBuf::from("tour.mp4"),
            clips: vec![ClipSpec::from_window("tour_001.mp4", "tour.mp4", &window, 0.7, 30)],
            extraction_params: extractor.params(),
        };

        let path = dir.path().join(CLIPS_METADATA_FILE);
        write_clips_metadata(&path, &metadata).await.unwrap();
        let read = read_clips_metadata(&path).await.unwrap();
        assert_eq!(read, metadata);
    }

    #[tokio::test]
    async fn test_concat_requires_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = concat_clips(&[], &dir.path().join("out.mp4"), 10).await;
        assert!(result.is_err());
    }
}
