//! FFmpeg CLI wrapper for frame sampling and clip extraction.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with progress parsing
//! - Video probing through ffprobe
//! - Fixed-rate frame sampling with a metadata sidecar
//! - Clip cutting with optional two-pass stabilization
//! - Contact sheet rendering

pub mod backend;
pub mod clip;
pub mod command;
pub mod error;
pub mod frames;
pub mod probe;
pub mod thumbnail;

pub use backend::{FfmpegBackend, MediaBackend};
pub use clip::{
    concat_clips, read_clips_metadata, write_clips_metadata, ClipExtractor, StabilizeOutcome,
    CLIPS_METADATA_FILE,
};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::{frames_key, list_frames, load_metadata, FrameSampler, FrameSet};
pub use probe::{get_duration, probe_video};
pub use thumbnail::{create_contact_sheet, ContactSheetLayout};
