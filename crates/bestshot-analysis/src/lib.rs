//! Frame analysis for best-shot selection.
//!
//! This crate provides:
//! - Classical image measures (Laplacian, histograms, Canny) over grayscale frames,
//!   through OpenCV with the default `opencv` feature
//! - Dense and sparse optical flow with camera motion decomposition
//! - Per-frame scorers and their weighted composite
//! - Shot boundary detection and segmentation
//! - Temporal smoothing and peak selection
//! - Embedding-based diversity filtering of peaks

#[cfg(feature = "opencv")]
pub mod cv;
pub mod diversity;
pub mod error;
pub mod flow;
pub mod imaging;
pub mod motion;
pub mod scorers;
pub mod shots;
pub mod signal;
pub mod temporal;

pub use diversity::{DiversityConfig, DiversityFilter};
pub use error::{AnalysisError, AnalysisResult, ScoringError};
pub use flow::{
    FarnebackFlow, FarnebackParams, FlowEstimator, FlowField, FlowMethod, Homography, SparseFlow,
};
pub use motion::{calculate_motion_smoothness, detect_motion_reversals, MotionAnalyzer};
pub use scorers::{
    normalize_scores, AestheticsScorer, ClipMotionSummary, CompositeScorer, ExposureReport,
    ExposureScorer, MotionScorer, MotionScorerConfig, SaliencyScorer, Scorer, ScoringWeights,
    SharpnessScorer, VideoType, COMPOSITE_KEY, DEFAULT_SALIENCY_PROMPTS,
};
pub use shots::{PairSignals, ShotBoundaryDetector, ShotDetectorConfig};
pub use temporal::{PeakSearch, TemporalConfig, TemporalOutput, TemporalProcessor};
