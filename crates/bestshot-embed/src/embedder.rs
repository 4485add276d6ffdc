//! Cache-aware frame embedding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use bestshot_models::Frame;

use crate::cache::{CacheKind, DiskCache};
use crate::error::{EmbeddingError, EmbeddingResult};
use crate::provider::EmbeddingProvider;
use crate::types::Embedding;

/// Embeds frames through a shared provider, consulting the disk cache first.
///
/// Text embeddings are memoized for the lifetime of the embedder.
pub struct FrameEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: DiskCache,
    texts: Mutex<HashMap<String, Embedding>>,
}

impl FrameEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: DiskCache) -> Self {
        Self {
            provider,
            cache,
            texts: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Embeddings of `frames`, in frame order.
    ///
    /// Cache misses are encoded in provider-sized batches and written back.
    pub async fn embed_frames(&self, frames: &[Frame]) -> EmbeddingResult<Vec<Embedding>> {
        let mut out: Vec<Option<Embedding>> = frames
            .iter()
            .map(|f| self.cache.get(CacheKind::ImageEmbedding, &f.identity()))
            .collect();

        let missing: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| i)
            .collect();

        if !missing.is_empty() {
            let batch_size = self.provider.batch_size().max(1);
            info!(
                provider = self.provider.name(),
                cached = frames.len() - missing.len(),
                to_encode = missing.len(),
                batch_size,
                "Computing frame embeddings"
            );

            for chunk in missing.chunks(batch_size) {
                let paths: Vec<_> = chunk.iter().map(|&i| frames[i].path.clone()).collect();
                let embeddings = self.provider.encode_images(&paths).await?;
                if embeddings.len() != chunk.len() {
                    return Err(EmbeddingError::invalid_response(format!(
                        "provider returned {} embeddings for {} images",
                        embeddings.len(),
                        chunk.len()
                    )));
                }

                for (&i, embedding) in chunk.iter().zip(embeddings) {
                    let key = frames[i].identity();
                    if let Err(e) = self.cache.put(CacheKind::ImageEmbedding, &key, &embedding) {
                        warn!("Failed to cache embedding for {}: {}", key, e);
                    }
                    out[i] = Some(embedding);
                }
                debug!(encoded = chunk.len(), "Encoded embedding batch");
            }
        }

        out.into_iter()
            .map(|e| e.ok_or_else(|| EmbeddingError::invalid_response("missing frame embedding")))
            .collect()
    }

    /// Embedding of one frame.
    pub async fn embed_frame(&self, frame: &Frame) -> EmbeddingResult<Embedding> {
        let mut embeddings = self.embed_frames(std::slice::from_ref(frame)).await?;
        embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::invalid_response("missing frame embedding"))
    }

    /// Embeddings of `texts`, in input order.
    pub async fn embed_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        let missing: Vec<String> = {
            let memo = self.lock_texts();
            let mut missing: Vec<String> = Vec::new();
            for text in texts {
                if !memo.contains_key(text) && !missing.contains(text) {
                    missing.push(text.clone());
                }
            }
            missing
        };

        if !missing.is_empty() {
            let encoded = self.provider.encode_texts(&missing).await?;
            let mut memo = self.lock_texts();
            for (text, embedding) in missing.into_iter().zip(encoded) {
                memo.insert(text, embedding);
            }
        }

        let memo = self.lock_texts();
        texts
            .iter()
            .map(|t| {
                memo.get(t).cloned().ok_or_else(|| {
                    EmbeddingError::invalid_response(format!("no embedding for prompt '{t}'"))
                })
            })
            .collect()
    }

    fn lock_texts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Embedding>> {
        // A poisoned memo only holds complete entries.
        self.texts.lock().unwrap_or_else(|e| e.into_inner())
    }
}
