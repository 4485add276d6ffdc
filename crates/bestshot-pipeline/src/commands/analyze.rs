use anyhow::{bail, Context, Result};
use std::path::Path;

use bestshot_analysis::COMPOSITE_KEY;
use bestshot_models::ScoreStats;

use crate::cli::AnalyzeArgs;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;

/// Execute the `analyze` command.
pub async fn execute(args: AnalyzeArgs, config_path: Option<&Path>) -> Result<()> {
    if !args.video.exists() {
        bail!(PipelineError::VideoNotFound(args.video));
    }

    let config = super::load_config(config_path)?;
    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to initialize pipeline")?;

    let analysis = pipeline
        .analyze(&args.video)
        .await
        .with_context(|| format!("Failed to analyze {}", args.video.display()))?;

    let info = &analysis.video_info;
    println!("Video: {}", args.video.display());
    println!(
        "  duration {:.1}s, {} @ {:.2} fps, codec {}",
        info.duration,
        info.resolution(),
        info.fps,
        info.codec
    );
    println!(
        "Sampled {} frames at {} fps",
        analysis.frames_sampled, analysis.sample_fps
    );

    println!("{:<12} {:>8} {:>8} {:>8} {:>8}", "scorer", "mean", "std", "min", "max");
    for (name, stats) in &analysis.components {
        print_stats(name, stats);
    }
    print_stats(COMPOSITE_KEY, &analysis.composite);
    Ok(())
}

fn print_stats(name: &str, stats: &ScoreStats) {
    println!(
        "{:<12} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
        name, stats.mean, stats.std, stats.min, stats.max
    );
}
