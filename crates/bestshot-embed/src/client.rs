//! HTTP client for the embedding service.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::provider::{batch_size_for_device, EmbeddingProvider, ACCELERATED_BATCH_SIZE};
use crate::types::{Embedding, EncodeResponse, EncodeTextRequest, HealthResponse};

/// Configuration for the embedding client.
#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    /// Base URL of the embedding service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for EmbeddingClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

impl EmbeddingClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("EMBEDDING_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("EMBEDDING_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_retries: std::env::var("EMBEDDING_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// [`EmbeddingProvider`] backed by the embedding HTTP service.
///
/// Endpoints:
/// - `GET /health` -> `{status, device, model}`
/// - `POST /encode/images` (multipart, one `images` part per file) -> `{embeddings}`
/// - `POST /encode/text` (`{texts}`) -> `{embeddings}`
pub struct EmbeddingClient {
    http: Client,
    config: EmbeddingClientConfig,
    batch_size: AtomicUsize,
}

impl EmbeddingClient {
    /// Create a new embedding client.
    pub fn new(config: EmbeddingClientConfig) -> EmbeddingResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(EmbeddingError::Network)?;

        Ok(Self {
            http,
            config,
            batch_size: AtomicUsize::new(ACCELERATED_BATCH_SIZE),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> EmbeddingResult<Self> {
        Self::new(EmbeddingClientConfig::from_env())
    }

    pub fn config(&self) -> &EmbeddingClientConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    async fn parse_embeddings(response: Response, expected: usize) -> EmbeddingResult<Vec<Embedding>> {
        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServiceUnavailable(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::request_failed(format!(
                "embedding service returned {}: {}",
                status, body
            )));
        }

        let body: EncodeResponse = response.json().await?;
        if body.embeddings.len() != expected {
            return Err(EmbeddingError::invalid_response(format!(
                "expected {} embeddings, got {}",
                expected,
                body.embeddings.len()
            )));
        }

        let dim = body.embeddings.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = body.embeddings.iter().find(|e| e.len() != dim) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        Ok(body.embeddings.into_iter().map(Embedding::new).collect())
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> EmbeddingResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EmbeddingResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Embedding request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(EmbeddingError::request_failed("Unknown error")))
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    fn name(&self) -> &str {
        "http"
    }

    fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    /// Check service health and adopt the batch size for its device.
    async fn health_check(&self) -> EmbeddingResult<bool> {
        let url = self.url("/health");

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                if let Some(device) = &health.device {
                    let batch = batch_size_for_device(device);
                    self.batch_size.store(batch, Ordering::Relaxed);
                    info!(
                        device = %device,
                        model = health.model.as_deref().unwrap_or("unknown"),
                        batch_size = batch,
                        "Embedding service ready"
                    );
                }
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Embedding service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Embedding service health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn encode_images(&self, images: &[PathBuf]) -> EmbeddingResult<Vec<Embedding>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let mut files = Vec::with_capacity(images.len());
        for path in images {
            let bytes = tokio::fs::read(path).await.map_err(|e| EmbeddingError::Image {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "frame.jpg".to_string());
            files.push((name, bytes));
        }

        let url = self.url("/encode/images");
        debug!(images = images.len(), "Encoding images via {}", url);

        let response = self
            .with_retry(|| async {
                let mut form = Form::new();
                for (name, bytes) in &files {
                    let part = Part::bytes(bytes.clone())
                        .file_name(name.clone())
                        .mime_str("image/jpeg")?;
                    form = form.part("images", part);
                }
                let response = self
                    .http
                    .post(&url)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(EmbeddingError::Network)?;
                Self::parse_embeddings(response, files.len()).await
            })
            .await?;

        Ok(response)
    }

    async fn encode_texts(&self, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url("/encode/text");
        let request = EncodeTextRequest {
            texts: texts.to_vec(),
        };
        debug!(texts = texts.len(), "Encoding text via {}", url);

        self.with_retry(|| async {
            let response = self
                .http
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(EmbeddingError::Network)?;
            Self::parse_embeddings(response, texts.len()).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> EmbeddingClient {
        EmbeddingClient::new(EmbeddingClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = EmbeddingClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8001");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.max_retries, 2);
    }

    #[tokio::test]
    async fn test_health_check_adopts_cpu_batch_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ok", "device": "cpu", "model": "clip"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.batch_size(), 16);
        assert!(client.health_check().await.unwrap());
        assert_eq!(client.batch_size(), 4);
    }

    #[tokio::test]
    async fn test_health_check_unreachable_is_false() {
        let client = EmbeddingClient::new(EmbeddingClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(200),
            max_retries: 0,
        })
        .unwrap();
        assert!(!client.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_encode_texts_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/encode/text"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"embeddings": [[3.0, 4.0], [0.0, 2.0]]})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let out = client
            .encode_texts(&["kitchen".to_string(), "pool".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[0].as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((out[1].as_slice()[1] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_encode_images_uploads_files() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/encode/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0]]})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("frame_000001.jpg");
        std::fs::write(&frame, b"jpeg").unwrap();

        let client = client_for(&server);
        let out = client.encode_image(&frame).await.unwrap();
        assert_eq!(out.dim(), 2);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/encode/text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": []})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.encode_text("hallway").await;
        assert!(matches!(result, Err(EmbeddingError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_unavailable_service_is_retryable_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/encode/text"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.encode_text("bedroom").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_image_file() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let result = client
            .encode_images(&[PathBuf::from("/no/such/frame.jpg")])
            .await;
        assert!(matches!(result, Err(EmbeddingError::Image { .. })));
    }
}
