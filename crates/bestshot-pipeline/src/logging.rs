//! Structured run logging utilities.
//!
//! Provides consistent, structured logging for video runs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bestshot_models::RunId;

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; otherwise human-readable output.
/// `RUST_LOG` refines the default `bestshot=info` (`debug` with `verbose`).
pub fn init_tracing(verbose: bool) {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_directive = if verbose { "bestshot=debug" } else { "bestshot=info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive))
        .add_directive(
            default_directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        );

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if use_json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    // A subscriber may already be installed (tests)
    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Run logger for structured logging with consistent formatting.
///
/// Every line carries the run ID, the operation and the video name so
/// concurrent batch runs stay attributable.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: RunId,
    operation: String,
    video: String,
}

impl RunLogger {
    /// Create a logger for a fresh run.
    ///
    /// # Arguments
    /// * `operation` - The type of operation (e.g., "process", "analyze")
    /// * `video` - Name of the video being processed
    pub fn new(operation: &str, video: &str) -> Self {
        Self::with_run_id(RunId::new(), operation, video)
    }

    pub fn with_run_id(run_id: RunId, operation: &str, video: &str) -> Self {
        Self {
            run_id,
            operation: operation.to_string(),
            video: video.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            operation = %self.operation,
            video = %self.video,
            "Run started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            operation = %self.operation,
            video = %self.video,
            "Run progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            run_id = %self.run_id,
            operation = %self.operation,
            video = %self.video,
            "Run warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            run_id = %self.run_id,
            operation = %self.operation,
            video = %self.video,
            "Run error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            operation = %self.operation,
            video = %self.video,
            "Run completed: {}", message
        );
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn video(&self) -> &str {
        &self.video
    }

    /// Span to instrument one run's work with.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "run",
            run_id = %self.run_id,
            operation = %self.operation,
            video = %self.video
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_logger_creation() {
        let run_id = RunId::from_string("run-123");
        let logger = RunLogger::with_run_id(run_id.clone(), "process", "tour.mp4");

        assert_eq!(logger.run_id(), &run_id);
        assert_eq!(logger.operation(), "process");
        assert_eq!(logger.video(), "tour.mp4");
    }

    #[test]
    fn test_fresh_runs_get_distinct_ids() {
        let a = RunLogger::new("process", "a.mp4");
        let b = RunLogger::new("process", "a.mp4");
        assert_ne!(a.run_id(), b.run_id());
    }
}
