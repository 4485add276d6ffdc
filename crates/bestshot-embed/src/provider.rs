//! Embedding provider interface.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::types::Embedding;

/// Batch size for providers running on CPU.
pub const CPU_BATCH_SIZE: usize = 4;

/// Batch size for accelerated providers.
pub const ACCELERATED_BATCH_SIZE: usize = 16;

/// Prompts describing a pleasing photograph.
pub const AESTHETIC_POSITIVE_PROMPTS: [&str; 5] = [
    "a beautiful photograph",
    "professional photography",
    "high quality image",
    "aesthetically pleasing composition",
    "award winning photograph",
];

/// Prompts describing a poor photograph.
pub const AESTHETIC_NEGATIVE_PROMPTS: [&str; 5] = [
    "blurry photo",
    "low quality image",
    "bad photograph",
    "amateur snapshot",
    "poorly composed image",
];

/// Maps images and text into a shared embedding space.
///
/// Implementations are shared read-only across scorers and concurrent runs.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Preferred number of images per `encode_images` call.
    fn batch_size(&self) -> usize {
        ACCELERATED_BATCH_SIZE
    }

    /// Whether the provider is reachable and ready.
    async fn health_check(&self) -> EmbeddingResult<bool> {
        Ok(true)
    }

    /// Encode images, one embedding per input, in input order.
    async fn encode_images(&self, images: &[PathBuf]) -> EmbeddingResult<Vec<Embedding>>;

    /// Encode text prompts, one embedding per input, in input order.
    async fn encode_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>>;

    async fn encode_image(&self, image: &Path) -> EmbeddingResult<Embedding> {
        single(self.encode_images(&[image.to_path_buf()]).await?)
    }

    async fn encode_text(&self, text: &str) -> EmbeddingResult<Embedding> {
        single(self.encode_texts(&[text.to_string()]).await?)
    }
}

fn single(mut embeddings: Vec<Embedding>) -> EmbeddingResult<Embedding> {
    match embeddings.len() {
        1 => Ok(embeddings.remove(0)),
        n => Err(EmbeddingError::invalid_response(format!(
            "expected 1 embedding, got {n}"
        ))),
    }
}

/// Batch size a provider should use on the given compute device.
pub fn batch_size_for_device(device: &str) -> usize {
    if device.eq_ignore_ascii_case("cpu") {
        CPU_BATCH_SIZE
    } else {
        ACCELERATED_BATCH_SIZE
    }
}

/// Mean similarity of `image` to each of `prompts`.
pub fn mean_similarity(image: &Embedding, prompts: &[Embedding]) -> EmbeddingResult<f64> {
    if prompts.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for prompt in prompts {
        total += image.similarity(prompt)?;
    }
    Ok(total / prompts.len() as f64)
}

/// `(mean positive similarity - mean negative similarity + 1) / 2`, clamped to [0, 1].
pub fn aesthetic_score(
    image: &Embedding,
    positive: &[Embedding],
    negative: &[Embedding],
) -> EmbeddingResult<f64> {
    let pos = mean_similarity(image, positive)?;
    let neg = mean_similarity(image, negative)?;
    Ok(((pos - neg + 1.0) / 2.0).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_for_device() {
        assert_eq!(batch_size_for_device("cpu"), 4);
        assert_eq!(batch_size_for_device("CPU"), 4);
        assert_eq!(batch_size_for_device("cuda"), 16);
        assert_eq!(batch_size_for_device("mps"), 16);
    }

    #[test]
    fn test_aesthetic_score_balanced() {
        let image = Embedding::new(vec![1.0, 0.0]);
        let positive = vec![Embedding::new(vec![1.0, 0.0])];
        let negative = vec![Embedding::new(vec![-1.0, 0.0])];
        // (1 - (-1) + 1) / 2 = 1.5 -> clamped
        assert_eq!(aesthetic_score(&image, &positive, &negative).unwrap(), 1.0);

        let neutral = Embedding::new(vec![0.0, 1.0]);
        assert!((aesthetic_score(&neutral, &positive, &negative).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_mean_similarity_without_prompts() {
        let image = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(mean_similarity(&image, &[]).unwrap(), 0.0);
    }
}
