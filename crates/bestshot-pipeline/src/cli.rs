//! Command-line argument structures.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::batch::DEFAULT_PATTERN;

#[derive(Parser, Debug)]
#[command(
    name = "bestshot",
    version,
    about = "Extract the best shots from walkthrough videos",
    long_about = "Samples frames, scores them for sharpness, exposure, aesthetics, saliency and camera motion, \
                  picks well-spaced diverse peaks and cuts a short clip around each one."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true, value_name = "PATH", env = "BESTSHOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract best-shot clips from one video
    Process(ProcessArgs),
    /// Process every matching video in a directory
    Batch(BatchArgs),
    /// Print scoring statistics for a video without cutting clips
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Input video file
    #[arg(value_name = "VIDEO")]
    pub video: PathBuf,

    /// Output directory (defaults to output/<video name>)
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of clips to extract (overrides pipeline.top_k)
    #[arg(short = 'k', long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub top_k: Option<u32>,

    /// Reuse cached scores and embeddings
    #[arg(long, overrides_with = "no_cache")]
    pub cache: bool,

    /// Recompute everything, ignoring the cache
    #[arg(long = "no-cache", overrides_with = "cache")]
    pub no_cache: bool,
}

impl ProcessArgs {
    /// Explicit cache choice, if either flag was given.
    pub fn use_cache(&self) -> Option<bool> {
        match (self.cache, self.no_cache) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Directory containing videos
    #[arg(value_name = "DIRECTORY")]
    pub directory: PathBuf,

    /// Root of the per-video output directories
    #[arg(short, long, value_name = "DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// File pattern to match (the default also matches .mov and .avi)
    #[arg(short, long, value_name = "GLOB", default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Keep going after a video fails (default)
    #[arg(long, overrides_with = "fail_fast")]
    pub continue_on_error: bool,

    /// Stop at the first failed video
    #[arg(long, overrides_with = "continue_on_error")]
    pub fail_fast: bool,

    /// Videos processed concurrently (overrides pipeline.max_parallel_videos)
    #[arg(short = 'j', long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub jobs: Option<u32>,
}

impl BatchArgs {
    pub fn continue_on_error(&self) -> bool {
        !self.fail_fast || self.continue_on_error
    }
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Input video file
    #[arg(value_name = "VIDEO")]
    pub video: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_process_flags() {
        let cli = Cli::parse_from(["bestshot", "process", "tour.mp4", "-k", "3", "--no-cache", "-o", "out"]);
        match cli.command {
            Commands::Process(args) => {
                assert_eq!(args.video, PathBuf::from("tour.mp4"));
                assert_eq!(args.top_k, Some(3));
                assert_eq!(args.use_cache(), Some(false));
                assert_eq!(args.output_dir, Some(PathBuf::from("out")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_process_cache_unset() {
        let cli = Cli::parse_from(["bestshot", "process", "tour.mp4"]);
        match cli.command {
            Commands::Process(args) => assert_eq!(args.use_cache(), None),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_batch_defaults() {
        let cli = Cli::parse_from(["bestshot", "batch", "videos"]);
        match cli.command {
            Commands::Batch(args) => {
                assert_eq!(args.pattern, DEFAULT_PATTERN);
                assert_eq!(args.output_dir, PathBuf::from("output"));
                assert!(args.continue_on_error());
                assert_eq!(args.jobs, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_batch_fail_fast() {
        let cli = Cli::parse_from(["bestshot", "batch", "videos", "--fail-fast", "-j", "2"]);
        match cli.command {
            Commands::Batch(args) => {
                assert!(!args.continue_on_error());
                assert_eq!(args.jobs, Some(2));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_zero_top_k_rejected() {
        assert!(Cli::try_parse_from(["bestshot", "process", "tour.mp4", "-k", "0"]).is_err());
    }
}
