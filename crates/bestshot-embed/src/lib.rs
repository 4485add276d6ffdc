//! Embedding provider interface for semantic frame scoring.
//!
//! The pipeline depends on [`EmbeddingProvider`] only. [`EmbeddingClient`]
//! implements it against the embedding HTTP service; [`FrameEmbedder`] adds
//! the per-frame disk cache and prompt memoization on top of any provider.

pub mod cache;
pub mod client;
pub mod embedder;
pub mod error;
pub mod provider;
pub mod types;

pub use cache::{CacheKind, DiskCache, CACHE_FORMAT_VERSION};
pub use client::{EmbeddingClient, EmbeddingClientConfig};
pub use embedder::FrameEmbedder;
pub use error::{EmbeddingError, EmbeddingResult};
pub use provider::{
    aesthetic_score, batch_size_for_device, mean_similarity, EmbeddingProvider,
    AESTHETIC_NEGATIVE_PROMPTS, AESTHETIC_POSITIVE_PROMPTS,
};
pub use types::{cosine_similarity, Embedding};
