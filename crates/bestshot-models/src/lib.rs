//! Shared data models for the best-shot extraction pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Sampled frames and their sidecar metadata
//! - Motion metrics derived from optical flow
//! - Shot boundaries and segments
//! - Temporal peaks and clip specifications
//! - Encoding settings and the per-run report

pub mod clip;
pub mod encoding;
pub mod frame;
pub mod motion;
pub mod peak;
pub mod report;
pub mod run;
pub mod shot;
pub mod utils;
pub mod video;

// Re-export common types
pub use clip::{ClipSpec, ClipWindow, ClipsMetadata, ExtractionParams};
pub use encoding::ClipEncoding;
pub use frame::{Frame, FrameSetMetadata};
pub use motion::{FlowStatistics, MotionMetrics, MotionPattern};
pub use peak::Peak;
pub use report::{DiversityStats, PipelineReport, ScoreStats};
pub use run::RunId;
pub use shot::{ShotBoundary, ShotSegment, TransitionType};
pub use utils::format_timestamp;
pub use video::VideoInfo;
