//! Embedding vectors and wire types of the embedding service.

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, EmbeddingResult};

/// Unit-length embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// L2-normalize `values`. A zero vector is kept as is.
    pub fn new(mut values: Vec<f32>) -> Self {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Cosine similarity with another embedding of the same dimension.
    pub fn similarity(&self, other: &Embedding) -> EmbeddingResult<f64> {
        if self.dim() != other.dim() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim(),
                actual: other.dim(),
            });
        }
        Ok(dot(&self.0, &other.0))
    }

    /// `1 - similarity`.
    pub fn distance(&self, other: &Embedding) -> EmbeddingResult<f64> {
        Ok(1.0 - self.similarity(other)?)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

/// Cosine similarity of two raw vectors. Zero vectors have similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Request body for text encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeTextRequest {
    pub texts: Vec<String>,
}

/// Response body of both encode endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeResponse {
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Compute device the model runs on (`cpu`, `cuda`, ...)
    #[serde(default)]
    pub device: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_unit_length() {
        let e = Embedding::new(vec![3.0, 4.0]);
        assert!((e.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((e.as_slice()[1] - 0.8).abs() < 1e-6);
        assert!((e.similarity(&e).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_is_kept() {
        let e = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(e.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_distance_of_orthogonal_vectors() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 2.0]);
        assert!((a.distance(&b).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(matches!(
            a.similarity(&b),
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_raw_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
