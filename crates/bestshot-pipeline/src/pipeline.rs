//! Single-video orchestration.
//!
//! A run probes the video, samples frames, scores them, optionally detects
//! shots, smooths the composite series, picks peaks, filters them for
//! diversity, cuts clips and writes the per-video artifacts.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};

use bestshot_analysis::{
    AestheticsScorer, CompositeScorer, DiversityFilter, ExposureScorer, MotionAnalyzer,
    MotionScorer, SaliencyScorer, Scorer, SharpnessScorer, ShotBoundaryDetector,
    TemporalProcessor, COMPOSITE_KEY,
};
use bestshot_embed::{DiskCache, EmbeddingClient, EmbeddingError, EmbeddingProvider, FrameEmbedder};
use bestshot_media::{frames_key, ClipExtractor, FfmpegBackend, FrameSampler, MediaBackend};
use bestshot_models::{
    ClipSpec, DiversityStats, Frame, MotionMetrics, Peak, PipelineReport, ScoreStats, VideoInfo,
};

use crate::artifacts::{
    save_contact_sheet, save_report, save_score_plot, CONTACT_SHEET_FILE, REPORT_FILE,
    SCORE_PLOT_FILE,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;

/// Root of per-video output directories when none is given.
pub const DEFAULT_OUTPUT_ROOT: &str = "output";

/// Subdirectory of the frames root used by `analyze`.
const ANALYZE_FRAMES_SUBDIR: &str = "analyze";

/// What a processed video produced.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub video: PathBuf,
    pub output_dir: PathBuf,
    pub clip_paths: Vec<PathBuf>,
    /// Concatenated highlights reel, when enabled and produced
    pub highlights: Option<PathBuf>,
    pub report: PipelineReport,
}

/// Score statistics of a quick analysis pass.
#[derive(Debug, Clone, Serialize)]
pub struct VideoAnalysis {
    pub video_info: VideoInfo,
    pub sample_fps: f64,
    pub frames_sampled: usize,
    pub composite: ScoreStats,
    pub components: BTreeMap<String, ScoreStats>,
}

/// `<stem>` of a video path, `video` when it has none.
pub fn video_stem(video: &Path) -> String {
    video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

/// `output/<stem>`.
pub fn default_output_dir(video: &Path) -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_ROOT).join(video_stem(video))
}

/// The best-shot extraction pipeline.
///
/// Built once and shared by every video of a batch.
pub struct Pipeline {
    config: PipelineConfig,
    media: Arc<dyn MediaBackend>,
    scorer: CompositeScorer,
    temporal: TemporalProcessor,
    shot_detector: Option<ShotBoundaryDetector>,
    diversity: Option<DiversityFilter>,
    sampler: FrameSampler,
    extractor: ClipExtractor,
    clip_motion: Option<MotionScorer>,
    motion: Arc<MotionAnalyzer>,
}

impl Pipeline {
    /// ffmpeg backend plus the HTTP embedding service from `config`.
    pub async fn from_config(config: PipelineConfig) -> PipelineResult<Self> {
        let media = Arc::new(FfmpegBackend::new(config.pipeline.subprocess_timeout_secs));
        let client = EmbeddingClient::new(config.embedding.client_config())?;
        Self::new(config, media, Some(Arc::new(client))).await
    }

    /// Assemble a pipeline over `media` and an optional embedding `provider`.
    ///
    /// An unhealthy provider disables semantic scoring and diversity
    /// filtering, or fails when `embedding.require_service` is set.
    pub async fn new(
        config: PipelineConfig,
        media: Arc<dyn MediaBackend>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        media.check_available()?;

        let cache = if config.pipeline.use_cache {
            DiskCache::new(&config.pipeline.cache_dir)
        } else {
            DiskCache::disabled()
        };

        let embedder = match provider {
            Some(provider) => {
                let healthy = match provider.health_check().await {
                    Ok(healthy) => healthy,
                    Err(e) => {
                        warn!(provider = provider.name(), "Embedding health check failed: {}", e);
                        false
                    }
                };
                if healthy {
                    info!(provider = provider.name(), "Embedding provider ready");
                    Some(Arc::new(FrameEmbedder::new(provider, cache.clone())))
                } else if config.embedding.require_service {
                    return Err(EmbeddingError::ServiceUnavailable(format!(
                        "{} did not pass its health check",
                        provider.name()
                    ))
                    .into());
                } else {
                    warn!("Embedding provider unavailable; semantic scoring and diversity filtering disabled");
                    None
                }
            }
            None => None,
        };

        let scorer = CompositeScorer::new(Self::build_scorers(&config, embedder.as_ref(), &cache));
        let fps = config.frame_extraction.fps;
        let motion_config = &config.scoring.motion;

        let shot_detector = config
            .shots
            .enabled
            .then(|| ShotBoundaryDetector::new(config.shots.detector.clone(), fps));

        let diversity = match &embedder {
            Some(embedder) if config.diversity.enabled => Some(DiversityFilter::new(
                embedder.clone(),
                config.diversity.similarity_threshold,
            )),
            _ => None,
        };

        let clip_motion = (config.scoring.weights.motion != 0.0)
            .then(|| MotionScorer::new(motion_config.clone(), cache.clone()));

        let sampler = FrameSampler::new(&config.frame_extraction.frames_dir)
            .with_clean_existing(config.frame_extraction.clean_existing)
            .with_timeout(config.pipeline.subprocess_timeout_secs);

        let extractor = ClipExtractor::new(
            config.clips.pre_roll_seconds,
            config.clips.post_roll_seconds,
            config.clips.encoding(),
        )
        .with_stabilization(config.clips.stabilize)
        .with_timeout(config.pipeline.subprocess_timeout_secs);

        Ok(Self {
            temporal: TemporalProcessor::new(config.temporal.clone(), fps),
            motion: Arc::new(MotionAnalyzer::new(motion_config.method, motion_config.max_width)),
            config,
            media,
            scorer,
            shot_detector,
            diversity,
            sampler,
            extractor,
            clip_motion,
        })
    }

    fn build_scorers(
        config: &PipelineConfig,
        embedder: Option<&Arc<FrameEmbedder>>,
        cache: &DiskCache,
    ) -> Vec<(Box<dyn Scorer>, f64)> {
        let weights = &config.scoring.weights;
        let mut scorers: Vec<(Box<dyn Scorer>, f64)> = vec![
            (Box::new(SharpnessScorer::new()), weights.sharpness),
            (Box::new(ExposureScorer::new()), weights.exposure),
        ];

        match embedder {
            Some(embedder) => {
                scorers.push((Box::new(AestheticsScorer::new(embedder.clone())), weights.aesthetics));

                let saliency = match &config.scoring.video_type {
                    Some(label) => SaliencyScorer::for_video_type(embedder.clone(), label),
                    None => SaliencyScorer::new(
                        embedder.clone(),
                        Some(config.scoring.saliency_prompts.clone()),
                    ),
                };
                scorers.push((Box::new(saliency), weights.saliency));
            }
            None if weights.aesthetics != 0.0 || weights.saliency != 0.0 => {
                warn!("Skipping aesthetics and saliency scorers without an embedding provider");
            }
            None => {}
        }

        if weights.motion != 0.0 {
            scorers.push((
                Box::new(MotionScorer::new(config.scoring.motion.clone(), cache.clone())),
                weights.motion,
            ));
        }
        scorers
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Normalized weights of the active scorers.
    pub fn scorer_weights(&self) -> Vec<(&'static str, f64)> {
        self.scorer.weights()
    }

    pub fn diversity_enabled(&self) -> bool {
        self.diversity.is_some()
    }

    /// Run the full pipeline on one video.
    ///
    /// Outputs land in `output_dir` (`output/<stem>` when `None`); `top_k`
    /// overrides `pipeline.top_k`.
    pub async fn process(
        &self,
        video: &Path,
        output_dir: Option<&Path>,
        top_k: Option<usize>,
    ) -> PipelineResult<ProcessOutcome> {
        if !video.exists() {
            return Err(PipelineError::VideoNotFound(video.to_path_buf()));
        }

        let stem = video_stem(video);
        let output_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output_dir(video));
        let top_k = top_k.unwrap_or(self.config.pipeline.top_k).max(1);

        let logger = RunLogger::new("process", &stem);
        let span = logger.create_span();
        let started = Instant::now();

        let result = self
            .run(video, &stem, &output_dir, top_k, &logger, started)
            .instrument(span)
            .await;

        match &result {
            Ok(outcome) => {
                metrics::counter!("bestshot_videos_processed_total").increment(1);
                metrics::histogram!("bestshot_video_processing_seconds")
                    .record(outcome.report.processing_time);
            }
            Err(e) => {
                metrics::counter!("bestshot_videos_failed_total").increment(1);
                logger.log_error(&e.to_string());
            }
        }
        result
    }

    async fn run(
        &self,
        video: &Path,
        stem: &str,
        output_dir: &Path,
        top_k: usize,
        logger: &RunLogger,
        started: Instant,
    ) -> PipelineResult<ProcessOutcome> {
        logger.log_start(&format!("{} -> {}", video.display(), output_dir.display()));
        tokio::fs::create_dir_all(output_dir).await?;

        let fps = self.config.frame_extraction.fps;

        logger.log_progress("Probing video");
        let info = self.media.probe(video).await?;
        info!(
            duration = info.duration,
            resolution = %info.resolution(),
            fps = info.fps,
            "Video info"
        );

        logger.log_progress("Sampling frames");
        let frame_set = self
            .media
            .sample_frames(&self.sampler, video, fps, self.config.frame_extraction.height)
            .await?;
        if frame_set.is_empty() {
            return Err(PipelineError::NoFrames(video.to_path_buf()));
        }
        let frames = frame_set.frames;
        info!(frames = frames.len(), "Sampled frames");

        logger.log_progress("Scoring frames");
        let components = self.scorer.score_components(&frames).await?;
        let raw = components.get(COMPOSITE_KEY).cloned().unwrap_or_default();

        let shots = match &self.shot_detector {
            Some(detector) => {
                logger.log_progress("Detecting shots");
                let boundaries = detector.detect_boundaries(&frames).await?;
                let shots = detector.segment_into_shots(&boundaries, frames.len());
                info!(boundaries = boundaries.len(), shots = shots.len(), "Detected shots");
                Some(shots)
            }
            None => None,
        };

        let motion = if self.config.temporal.motion_aware {
            Some(self.motion_magnitudes(&frames).await?)
        } else {
            None
        };

        logger.log_progress("Selecting peaks");
        let temporal = self
            .temporal
            .process(&raw, motion.as_deref(), shots.as_deref(), top_k);
        if temporal.fallback {
            warn!("No local maxima found; using score-ranked fallback peaks");
        }
        let peaks_detected = temporal.peaks.len();

        let (peaks, diversity_analysis) = self.apply_diversity(temporal.peaks, &frames, top_k).await?;

        logger.log_progress(&format!("Extracting {} clips", peaks.len()));
        let clips = self
            .media
            .extract_clips(&self.extractor, video, &peaks, output_dir, fps, stem, info.duration)
            .await?;
        let clip_paths: Vec<PathBuf> = clips
            .clips
            .iter()
            .map(|c| output_dir.join(&c.filename))
            .collect();

        let highlights = self.concat_highlights(&clip_paths, output_dir, stem).await;
        self.log_clip_motion(&frames, &clips.clips, fps).await;

        logger.log_progress("Writing artifacts");
        if self.config.output.save_score_plot {
            save_score_plot(
                raw.clone(),
                temporal.smoothed.clone(),
                peaks.clone(),
                fps,
                output_dir.join(SCORE_PLOT_FILE),
            )
            .await?;
        }

        if self.config.output.save_contact_sheet && !peaks.is_empty() {
            let peak_frames = peak_frame_paths(&peaks, &frames);
            save_contact_sheet(
                peak_frames,
                output_dir.join(CONTACT_SHEET_FILE),
                self.config.output.contact_sheet_layout(),
            )
            .await?;
        }

        let report = PipelineReport {
            run_id: logger.run_id().clone(),
            generated_at: chrono::Utc::now(),
            video_info: info,
            config: self.config.to_value(),
            scores_statistics: ScoreStats::from_scores(&raw),
            frames_sampled: frames.len(),
            shots_detected: shots.as_ref().map(Vec::len),
            peaks_detected,
            peaks_after_filtering: peaks.len(),
            clips: clips.clips,
            diversity_analysis,
            processing_time: started.elapsed().as_secs_f64(),
        };

        if self.config.output.save_metadata {
            save_report(&output_dir.join(REPORT_FILE), &report).await?;
        }

        if self.config.pipeline.cleanup_frames {
            if let Err(e) = self.sampler.cleanup(Some(&frames_key(video))).await {
                logger.log_warning(&format!("Frame cleanup failed: {}", e));
            }
        }

        logger.log_completion(&format!(
            "{} clips in {:.1}s",
            clip_paths.len(),
            report.processing_time
        ));

        Ok(ProcessOutcome {
            video: video.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            clip_paths,
            highlights,
            report,
        })
    }

    /// Per-frame flow magnitudes for motion-aware smoothing.
    async fn motion_magnitudes(&self, frames: &[Frame]) -> PipelineResult<Vec<f64>> {
        info!("Computing motion magnitudes for motion-aware smoothing");
        let analyzer = self.motion.clone();
        let owned = frames.to_vec();
        let pairs = tokio::task::spawn_blocking(move || analyzer.analyze_pairs(&owned)).await??;
        Ok(MotionMetrics::pad_to_frames(&pairs, frames.len())
            .iter()
            .map(|m| m.magnitude)
            .collect())
    }

    /// Diversity statistics of the candidates, then the filtered peaks.
    async fn apply_diversity(
        &self,
        peaks: Vec<Peak>,
        frames: &[Frame],
        top_k: usize,
    ) -> PipelineResult<(Vec<Peak>, Option<DiversityStats>)> {
        match &self.diversity {
            Some(filter) if peaks.len() > 1 => {
                let stats = filter.analyze_diversity(&peaks, frames).await?;
                info!(
                    mean_distance = stats.mean_distance,
                    similar_pairs = stats.num_similar_pairs,
                    "Peak diversity before filtering"
                );
                let filtered = filter.filter_diverse(&peaks, frames, Some(top_k)).await?;
                Ok((filtered, Some(stats)))
            }
            _ => Ok((peaks, None)),
        }
    }

    async fn concat_highlights(&self, clips: &[PathBuf], output_dir: &Path, stem: &str) -> Option<PathBuf> {
        if !self.config.clips.concat_highlights || clips.is_empty() {
            return None;
        }
        let output = output_dir.join(format!("{}_highlights.mp4", stem));
        match self.media.concat(clips, &output).await {
            Ok(()) => {
                info!("Saved highlights reel to {}", output.display());
                Some(output)
            }
            Err(e) => {
                warn!("Highlights concatenation failed: {}", e);
                None
            }
        }
    }

    /// Log the camera-motion quality of each clip's frame span.
    async fn log_clip_motion(&self, frames: &[Frame], clips: &[ClipSpec], fps: f64) {
        let Some(scorer) = &self.clip_motion else {
            return;
        };
        for clip in clips {
            let start = (clip.start_time * fps).floor().max(0.0) as usize;
            let end = (clip.end_time * fps).ceil().max(0.0) as usize;
            match scorer.analyze_clip_motion(frames, start, end).await {
                Ok(summary) => info!(
                    clip = %clip.filename,
                    quality = summary.motion_quality,
                    smoothness = summary.smoothness,
                    stability = summary.stability,
                    reversals = summary.reversal_count,
                    dominant = %summary.dominant_motion,
                    "Clip motion"
                ),
                Err(e) => warn!(clip = %clip.filename, "Clip motion analysis failed: {}", e),
            }
        }
    }

    /// Sample at `frame_extraction.analyze_fps` and report score statistics
    /// without selecting peaks or cutting clips.
    pub async fn analyze(&self, video: &Path) -> PipelineResult<VideoAnalysis> {
        if !video.exists() {
            return Err(PipelineError::VideoNotFound(video.to_path_buf()));
        }

        let stem = video_stem(video);
        let logger = RunLogger::new("analyze", &stem);
        let span = logger.create_span();

        async {
            logger.log_start(&video.display().to_string());
            let info = self.media.probe(video).await?;

            let sample_fps = self.config.frame_extraction.analyze_fps;
            let sampler = FrameSampler::new(self.config.frame_extraction.frames_dir.join(ANALYZE_FRAMES_SUBDIR))
                .with_clean_existing(true)
                .with_timeout(self.config.pipeline.subprocess_timeout_secs);
            let frame_set = self
                .media
                .sample_frames(&sampler, video, sample_fps, self.config.frame_extraction.height)
                .await?;
            if frame_set.is_empty() {
                return Err(PipelineError::NoFrames(video.to_path_buf()));
            }

            let mut components = self.scorer.score_components(&frame_set.frames).await?;
            let composite = components
                .remove(COMPOSITE_KEY)
                .map(|s| ScoreStats::from_scores(&s))
                .unwrap_or_default();
            let components = components
                .into_iter()
                .map(|(name, scores)| (name, ScoreStats::from_scores(&scores)))
                .collect();

            if self.config.pipeline.cleanup_frames {
                if let Err(e) = sampler.cleanup(Some(&frames_key(video))).await {
                    logger.log_warning(&format!("Frame cleanup failed: {}", e));
                }
            }

            logger.log_completion(&format!("{} frames analyzed", frame_set.frames.len()));
            Ok(VideoAnalysis {
                video_info: info,
                sample_fps,
                frames_sampled: frame_set.frames.len(),
                composite,
                components,
            })
        }
        .instrument(span)
        .await
    }
}

fn peak_frame_paths(peaks: &[Peak], frames: &[Frame]) -> Vec<PathBuf> {
    peaks
        .iter()
        .filter_map(|p| frames.get(p.frame_index).map(|f| f.path.clone()))
        .collect()
}
