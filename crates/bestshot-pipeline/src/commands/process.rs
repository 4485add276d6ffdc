use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::cli::ProcessArgs;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;

/// Execute the `process` command.
pub async fn execute(args: ProcessArgs, config_path: Option<&Path>) -> Result<()> {
    if !args.video.exists() {
        bail!(PipelineError::VideoNotFound(args.video));
    }

    let mut config = super::load_config(config_path)?;
    if let Some(use_cache) = args.use_cache() {
        config.pipeline.use_cache = use_cache;
    }

    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to initialize pipeline")?;

    let outcome = pipeline
        .process(
            &args.video,
            args.output_dir.as_deref(),
            args.top_k.map(|k| k as usize),
        )
        .await
        .with_context(|| format!("Failed to process {}", args.video.display()))?;

    println!(
        "Extracted {} clips from {} in {:.1}s",
        outcome.clip_paths.len(),
        outcome.video.display(),
        outcome.report.processing_time
    );
    for clip in &outcome.clip_paths {
        println!("  {}", clip.display());
    }
    if let Some(highlights) = &outcome.highlights {
        println!("Highlights: {}", highlights.display());
    }
    println!("Output: {}", outcome.output_dir.display());
    Ok(())
}
