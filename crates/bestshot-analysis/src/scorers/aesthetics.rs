//! Aesthetic quality from prompt similarity of frame embeddings.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use bestshot_embed::{
    aesthetic_score, CacheKind, FrameEmbedder, AESTHETIC_NEGATIVE_PROMPTS,
    AESTHETIC_POSITIVE_PROMPTS,
};
use bestshot_models::Frame;

use super::Scorer;
use crate::error::AnalysisResult;

/// Scores how close a frame sits to "beautiful photograph" rather than
/// "blurry photo" in embedding space. Scores are cached per frame.
pub struct AestheticsScorer {
    embedder: Arc<FrameEmbedder>,
}

impl AestheticsScorer {
    pub fn new(embedder: Arc<FrameEmbedder>) -> Self {
        Self { embedder }
    }

    fn prompts(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }
}

#[async_trait]
impl Scorer for AestheticsScorer {
    fn name(&self) -> &'static str {
        "aesthetics"
    }

    async fn score_frames(&self, frames: &[Frame]) -> AnalysisResult<Vec<f64>> {
        let cache = self.embedder.cache();
        let mut scores: Vec<Option<f64>> = frames
            .iter()
            .map(|f| cache.get::<f64>(CacheKind::Aesthetic, &f.identity()))
            .collect();

        let uncached: Vec<Frame> = frames
            .iter()
            .zip(&scores)
            .filter(|(_, s)| s.is_none())
            .map(|(f, _)| f.clone())
            .collect();

        if !uncached.is_empty() {
            info!(uncached = uncached.len(), "Processing uncached aesthetic frames");

            let positive = self
                .embedder
                .embed_texts(&Self::prompts(&AESTHETIC_POSITIVE_PROMPTS))
                .await?;
            let negative = self
                .embedder
                .embed_texts(&Self::prompts(&AESTHETIC_NEGATIVE_PROMPTS))
                .await?;
            let embeddings = self.embedder.embed_frames(&uncached).await?;

            let mut computed = Vec::with_capacity(uncached.len());
            for (frame, embedding) in uncached.iter().zip(&embeddings) {
                let score = aesthetic_score(embedding, &positive, &negative)?;
                if let Err(e) = cache.put(CacheKind::Aesthetic, &frame.identity(), &score) {
                    warn!("Failed to cache aesthetic score for {}: {}", frame.identity(), e);
                }
                computed.push(score);
            }

            let mut computed = computed.into_iter();
            for slot in scores.iter_mut().filter(|s| s.is_none()) {
                *slot = computed.next();
            }
            debug!(scored = uncached.len(), "Scored aesthetic frames");
        }

        Ok(scores.into_iter().map(|s| s.unwrap_or(0.0)).collect())
    }
}
