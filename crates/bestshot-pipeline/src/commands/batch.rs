use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::batch::{collect_videos, run_batch, BatchOptions};
use crate::cli::BatchArgs;
use crate::pipeline::Pipeline;

/// Execute the `batch` command.
///
/// An empty directory is not an error. With `--fail-fast` a failed video
/// makes the command fail after the summary is logged.
pub async fn execute(args: BatchArgs, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;

    let videos = collect_videos(&args.directory, &args.pattern)
        .with_context(|| format!("Failed to list videos in {}", args.directory.display()))?;
    if videos.is_empty() {
        warn!(
            "No video files found in {} matching {}",
            args.directory.display(),
            args.pattern
        );
        return Ok(());
    }
    info!("Found {} videos to process", videos.len());

    let options = BatchOptions {
        output_root: args.output_dir.clone(),
        top_k: None,
        continue_on_error: args.continue_on_error(),
        max_parallel: args
            .jobs
            .map(|j| j as usize)
            .unwrap_or(config.pipeline.max_parallel_videos),
    };

    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to initialize pipeline")?;

    let summary = run_batch(&pipeline, &videos, &options)
        .await
        .context("Batch aborted")?;
    summary.log();

    println!(
        "Processed {}/{} videos, {} clips in {:.1}s",
        summary.successful.len(),
        summary.total_videos,
        summary.total_clips(),
        summary.total_time
    );
    for failure in &summary.failed {
        println!("  failed: {} ({})", failure.video.display(), failure.error);
    }

    if !options.continue_on_error && !summary.is_success() {
        bail!("Batch stopped after {} failed video(s)", summary.failed.len());
    }
    Ok(())
}
