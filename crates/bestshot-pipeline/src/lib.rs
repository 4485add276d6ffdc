//! Best-shot extraction pipeline.
//!
//! This crate provides:
//! - Layered configuration (file + `BESTSHOT__*` environment overrides)
//! - Single-video orchestration from probing to clip extraction
//! - Score plot, contact sheet and JSON report artifacts
//! - Batch processing with a per-video failure policy
//! - The `bestshot` command-line interface

pub mod artifacts;
pub mod batch;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use batch::{collect_videos, output_dir_names, run_batch, BatchOptions, BatchSummary, DEFAULT_PATTERN};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::{init_tracing, RunLogger};
pub use pipeline::{ProcessOutcome, Pipeline, VideoAnalysis};
