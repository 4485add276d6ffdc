//! Pipeline configuration.
//!
//! Loaded from an optional YAML/TOML/JSON file, then overridden by
//! `BESTSHOT__SECTION__FIELD` environment variables
//! (e.g. `BESTSHOT__PIPELINE__TOP_K=3`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use bestshot_analysis::{
    DiversityConfig, MotionScorerConfig, ScoringWeights, ShotDetectorConfig, TemporalConfig,
    DEFAULT_SALIENCY_PROMPTS,
};
use bestshot_embed::EmbeddingClientConfig;
use bestshot_media::ContactSheetLayout;
use bestshot_models::encoding::{CONTACT_SHEET_COLUMNS, CONTACT_SHEET_THUMB_SIZE};
use bestshot_models::ClipEncoding;

use crate::error::{PipelineError, PipelineResult};

/// Environment prefix of configuration overrides.
pub const ENV_PREFIX: &str = "BESTSHOT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_extraction: FrameExtractionConfig,
    pub scoring: ScoringConfig,
    pub temporal: TemporalConfig,
    pub shots: ShotsConfig,
    pub clips: ClipsConfig,
    pub diversity: DiversityConfig,
    pub pipeline: RunConfig,
    pub output: OutputConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameExtractionConfig {
    pub fps: f64,
    pub height: u32,
    pub frames_dir: PathBuf,
    /// Wipe a video's frame directory before sampling
    pub clean_existing: bool,
    /// Sampling rate of the `analyze` command
    pub analyze_fps: f64,
}

impl Default for FrameExtractionConfig {
    fn default() -> Self {
        Self {
            fps: 3.0,
            height: 720,
            frames_dir: PathBuf::from("frames"),
            clean_existing: true,
            analyze_fps: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub saliency_prompts: Vec<String>,
    /// Footage label selecting a domain prompt set; overrides `saliency_prompts`
    pub video_type: Option<String>,
    pub motion: MotionScorerConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            saliency_prompts: DEFAULT_SALIENCY_PROMPTS.iter().map(|p| p.to_string()).collect(),
            video_type: None,
            motion: MotionScorerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotsConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub detector: ShotDetectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipsConfig {
    pub pre_roll_seconds: f64,
    pub post_roll_seconds: f64,
    pub video_codec: String,
    pub crf: u8,
    pub preset: String,
    pub stabilize: bool,
    /// Also join every clip into `<video>_highlights.mp4`
    pub concat_highlights: bool,
}

impl Default for ClipsConfig {
    fn default() -> Self {
        let encoding = ClipEncoding::default();
        Self {
            pre_roll_seconds: 1.0,
            post_roll_seconds: 2.0,
            video_codec: encoding.codec,
            crf: encoding.crf,
            preset: encoding.preset,
            stabilize: false,
            concat_highlights: false,
        }
    }
}

impl ClipsConfig {
    pub fn encoding(&self) -> ClipEncoding {
        ClipEncoding::new(&self.video_codec, self.crf, &self.preset)
    }
}

/// The `pipeline` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub top_k: usize,
    pub use_cache: bool,
    pub cleanup_frames: bool,
    pub cache_dir: PathBuf,
    /// Videos processed concurrently in batch mode
    pub max_parallel_videos: usize,
    pub subprocess_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            use_cache: true,
            cleanup_frames: false,
            cache_dir: PathBuf::from("cache"),
            max_parallel_videos: 1,
            subprocess_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub save_score_plot: bool,
    pub save_contact_sheet: bool,
    pub save_metadata: bool,
    pub contact_sheet_columns: u32,
    pub contact_sheet_thumb_size: (u32, u32),
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_score_plot: true,
            save_contact_sheet: true,
            save_metadata: true,
            contact_sheet_columns: CONTACT_SHEET_COLUMNS,
            contact_sheet_thumb_size: CONTACT_SHEET_THUMB_SIZE,
        }
    }
}

impl OutputConfig {
    pub fn contact_sheet_layout(&self) -> ContactSheetLayout {
        ContactSheetLayout {
            columns: self.contact_sheet_columns,
            thumb_size: self.contact_sheet_thumb_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub service_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Fail the run when the service is unhealthy instead of disabling
    /// semantic scoring
    pub require_service: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let client = EmbeddingClientConfig::default();
        Self {
            service_url: client.base_url,
            timeout_secs: client.timeout.as_secs(),
            max_retries: client.max_retries,
            require_service: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn client_config(&self) -> EmbeddingClientConfig {
        EmbeddingClientConfig {
            base_url: self.service_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
        }
    }
}

impl PipelineConfig {
    /// Load `path` (when given and present) under environment overrides.
    ///
    /// A missing file is not an error: defaults are used with a warning.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(p) if p.exists() => {
                info!("Loading configuration from {}", p.display());
                builder = builder.add_source(config::File::from(p));
            }
            Some(p) => warn!("Config file not found: {}, using defaults", p.display()),
            None => info!("No config file given, using defaults"),
        }

        let config: PipelineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.frame_extraction.fps > 0.0) {
            return Err(PipelineError::config("frame_extraction.fps must be positive"));
        }
        if !(self.frame_extraction.analyze_fps > 0.0) {
            return Err(PipelineError::config("frame_extraction.analyze_fps must be positive"));
        }
        if self.frame_extraction.height == 0 {
            return Err(PipelineError::config("frame_extraction.height must be positive"));
        }
        if self.pipeline.top_k == 0 {
            return Err(PipelineError::config("pipeline.top_k must be at least 1"));
        }
        if self.clips.pre_roll_seconds < 0.0 || self.clips.post_roll_seconds < 0.0 {
            return Err(PipelineError::config("clip pre/post roll must not be negative"));
        }
        if self.clips.crf > 51 {
            return Err(PipelineError::config("clips.crf must be within 0-51"));
        }
        if self.output.contact_sheet_columns == 0 {
            return Err(PipelineError::config("output.contact_sheet_columns must be at least 1"));
        }
        Ok(())
    }

    /// Configuration as recorded in the run report.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_extraction.fps, 3.0);
        assert_eq!(config.pipeline.top_k, 5);
        assert_eq!(config.scoring.weights.exposure, -0.2);
        assert_eq!(config.scoring.saliency_prompts.len(), 3);
        assert_eq!(config.temporal.min_peak_distance_seconds, 4.0);
        assert!(!config.shots.enabled);
        assert_eq!(config.shots.detector.histogram_threshold, 0.4);
        assert_eq!(config.output.contact_sheet_thumb_size, (320, 180));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "frame_extraction:\n  fps: 2.0\nscoring:\n  weights:\n    aesthetics: 0.0\n  video_type: interior\nshots:\n  enabled: true\n  min_shot_length_seconds: 2.0\nclips:\n  crf: 23\n"
        )
        .unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.frame_extraction.fps, 2.0);
        assert_eq!(config.frame_extraction.height, 720);
        assert_eq!(config.scoring.weights.aesthetics, 0.0);
        assert_eq!(config.scoring.weights.sharpness, 0.3);
        assert_eq!(config.scoring.video_type.as_deref(), Some("interior"));
        assert!(config.shots.enabled);
        assert_eq!(config.shots.detector.min_shot_length_seconds, 2.0);
        assert_eq!(config.clips.crf, 23);
        assert_eq!(config.clips.preset, "veryfast");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = PipelineConfig::load(Some(Path::new("does/not/exist.yaml"))).unwrap();
        assert_eq!(config.pipeline.top_k, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.pipeline.top_k = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.frame_extraction.fps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_value_has_sections() {
        let value = PipelineConfig::default().to_value();
        assert_eq!(value["pipeline"]["top_k"], 5);
        assert_eq!(value["clips"]["video_codec"], "libx264");
    }
}
