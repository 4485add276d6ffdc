//! Batch processing of a directory of videos.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{video_stem, Pipeline};

/// Pattern that expands to the common container extensions.
pub const DEFAULT_PATTERN: &str = "*.[mM][pP]4";

const DEFAULT_PATTERNS: [&str; 6] = ["*.mp4", "*.MP4", "*.mov", "*.MOV", "*.avi", "*.AVI"];

/// Videos in `dir` matching `pattern`, de-duplicated and sorted.
///
/// [`DEFAULT_PATTERN`] also picks up `.mov` and `.avi` files.
pub fn collect_videos(dir: &Path, pattern: &str) -> PipelineResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::DirectoryNotFound(dir.to_path_buf()));
    }

    let patterns: Vec<&str> = if pattern == DEFAULT_PATTERN {
        DEFAULT_PATTERNS.to_vec()
    } else {
        vec![pattern]
    };

    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let mut videos = BTreeSet::new();
    for pattern in patterns {
        for entry in glob::glob(&format!("{}/{}", root, pattern))? {
            match entry {
                Ok(path) if path.is_file() => {
                    videos.insert(path);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry: {}", e),
            }
        }
    }
    Ok(videos.into_iter().collect())
}

/// Output directory name per video: the stem, or `<stem>_<extension>`
/// (lowercased) when another video of the batch shares the stem.
pub fn output_dir_names(videos: &[PathBuf]) -> Vec<String> {
    let mut stem_counts: HashMap<String, usize> = HashMap::new();
    for video in videos {
        *stem_counts.entry(video_stem(video)).or_default() += 1;
    }

    let mut used = HashSet::new();
    videos
        .iter()
        .map(|video| {
            let stem = video_stem(video);
            let shared = stem_counts.get(&stem).copied().unwrap_or(0) > 1;
            let base = match video.extension() {
                Some(ext) if shared => format!("{}_{}", stem, ext.to_string_lossy().to_lowercase()),
                _ => stem,
            };
            // tour.mov next to tour.MOV
            let mut name = base.clone();
            let mut n = 2;
            while !used.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Each video writes to `<output_root>/<name>`, see [`output_dir_names`]
    pub output_root: PathBuf,
    pub top_k: Option<usize>,
    pub continue_on_error: bool,
    pub max_parallel: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            top_k: None,
            continue_on_error: true,
            max_parallel: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoSuccess {
    pub video: PathBuf,
    pub clips: usize,
    pub processing_time: f64,
}

#[derive(Debug, Clone)]
pub struct VideoFailure {
    pub video: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total_videos: usize,
    pub successful: Vec<VideoSuccess>,
    pub failed: Vec<VideoFailure>,
    /// Wall time of the whole batch, in seconds
    pub total_time: f64,
}

impl BatchSummary {
    pub fn total_clips(&self) -> usize {
        self.successful.iter().map(|s| s.clips).sum()
    }

    /// Mean clips per successful video.
    pub fn average_clips(&self) -> f64 {
        if self.successful.is_empty() {
            0.0
        } else {
            self.total_clips() as f64 / self.successful.len() as f64
        }
    }

    /// Mean wall time per attempted video.
    pub fn average_time(&self) -> f64 {
        let attempted = self.successful.len() + self.failed.len();
        if attempted == 0 {
            0.0
        } else {
            self.total_time / attempted as f64
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn log(&self) {
        info!("Batch processing summary");
        info!(
            total = self.total_videos,
            successful = self.successful.len(),
            failed = self.failed.len(),
            "Videos"
        );
        info!(
            "Total time: {:.1}s, average per video: {:.1}s",
            self.total_time,
            self.average_time()
        );
        info!(
            "Total clips: {}, average per video: {:.1}",
            self.total_clips(),
            self.average_clips()
        );
        for failure in &self.failed {
            error!(video = %failure.video.display(), "Failed: {}", failure.error);
        }
    }
}

/// Process `videos` through `pipeline`.
///
/// Per-video failures are recorded; without `continue_on_error` the first
/// one stops the batch. Failures that no other video could survive (bad
/// configuration, missing ffmpeg) abort immediately with an error.
pub async fn run_batch(
    pipeline: &Pipeline,
    videos: &[PathBuf],
    options: &BatchOptions,
) -> PipelineResult<BatchSummary> {
    let started = Instant::now();
    let total = videos.len();
    let top_k = options.top_k;
    let mut summary = BatchSummary {
        total_videos: total,
        ..Default::default()
    };

    info!(videos = total, parallel = options.max_parallel.max(1), "Starting batch");

    let dir_names = output_dir_names(videos);
    let mut results = stream::iter(videos.iter().cloned().zip(dir_names).enumerate())
        .map(|(i, (video, dir_name))| {
            let output_dir = options.output_root.join(dir_name);
            async move {
                info!("[{}/{}] Processing {}", i + 1, total, video.display());
                let result = pipeline.process(&video, Some(&output_dir), top_k).await;
                (video, result)
            }
        })
        .buffer_unordered(options.max_parallel.max(1));

    while let Some((video, result)) = results.next().await {
        match result {
            Ok(outcome) => summary.successful.push(VideoSuccess {
                video,
                clips: outcome.clip_paths.len(),
                processing_time: outcome.report.processing_time,
            }),
            Err(e) if !e.is_fatal_for_video() => return Err(e),
            Err(e) => {
                error!(video = %video.display(), "Processing failed: {}", e);
                summary.failed.push(VideoFailure {
                    video,
                    error: e.to_string(),
                });
                if !options.continue_on_error {
                    warn!("Stopping batch after first failure");
                    break;
                }
            }
        }
    }

    summary.successful.sort_by(|a, b| a.video.cmp(&b.video));
    summary.failed.sort_by(|a, b| a.video.cmp(&b.video));
    summary.total_time = started.elapsed().as_secs_f64();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_default_pattern_covers_common_containers() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.MOV", "c.avi", "notes.txt", "d.mkv"] {
            touch(dir.path(), name);
        }
        std::fs::create_dir(dir.path().join("nested.mp4")).unwrap();

        let videos = collect_videos(dir.path(), DEFAULT_PATTERN).unwrap();
        let names: Vec<String> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MOV", "b.mp4", "c.avi"]);
    }

    #[test]
    fn test_custom_pattern() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "tour.mkv");
        touch(dir.path(), "tour.mp4");

        let videos = collect_videos(dir.path(), "*.mkv").unwrap();
        assert_eq!(videos, vec![dir.path().join("tour.mkv")]);
    }

    #[test]
    fn test_output_dir_names_disambiguate_shared_stems() {
        let videos: Vec<PathBuf> = ["a.mp4", "a.MOV", "b.mp4", "c.mov", "c.MOV"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(
            output_dir_names(&videos),
            vec!["a_mp4", "a_mov", "b", "c_mov", "c_mov_2"]
        );
    }

    #[test]
    fn test_missing_directory() {
        let err = collect_videos(Path::new("no/such/dir"), DEFAULT_PATTERN).unwrap_err();
        assert!(matches!(err, PipelineError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_summary_averages() {
        let summary = BatchSummary {
            total_videos: 3,
            successful: vec![
                VideoSuccess {
                    video: "a.mp4".into(),
                    clips: 5,
                    processing_time: 10.0,
                },
                VideoSuccess {
                    video: "b.mp4".into(),
                    clips: 2,
                    processing_time: 8.0,
                },
            ],
            failed: vec![VideoFailure {
                video: "c.mp4".into(),
                error: "boom".to_string(),
            }],
            total_time: 21.0,
        };

        assert_eq!(summary.total_clips(), 7);
        assert_eq!(summary.average_clips(), 3.5);
        assert_eq!(summary.average_time(), 7.0);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_empty_summary() {
        let summary = BatchSummary::default();
        assert_eq!(summary.average_clips(), 0.0);
        assert_eq!(summary.average_time(), 0.0);
        assert!(summary.is_success());
    }
}
