//! HTTP client for the local embedding sidecar, plus vector utilities.
//!
//! The sidecar exposes two endpoints:
//! - `POST /embeddings` with `{"texts": [...]}` returning
//!   `{"embeddings": [[f32, ...]], "model": "...", "dimensions": n}`
//! - `GET /health` returning `{"model_loaded": bool}`
//!
//! Query text never leaves the host through this client; the sidecar runs
//! the model locally.
//!
//! # Retry Strategy
//!
//! Transient failures are retried with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - HTTP 4xx (not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! A 503 that survives all retries is reported as the model still
//! loading rather than a generic failure, so callers can surface a
//! "warming up" status.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Seam over embedding generation. Services depend on this rather than
/// the HTTP client so tests can script vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Model identifier recorded alongside generated vectors.
    fn model_name(&self) -> &str;

    async fn available(&self) -> bool;
}

/// Client for the embedding sidecar.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl EmbeddingClient {
    /// Builds a client from configuration. Fails only if the underlying
    /// HTTP client cannot be constructed.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Connection {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            client,
        })
    }

    /// Model identifier reported to callers and recorded on indexed rows.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Expected vector dimensionality.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed a batch of texts, preserving input order.
    ///
    /// # Errors
    ///
    /// - [`EmbeddingError::Connection`] when the sidecar is unreachable
    ///   after all retries.
    /// - [`EmbeddingError::ModelUnavailable`] when the sidecar keeps
    ///   answering 503 (model still loading).
    /// - [`EmbeddingError::GenerationFailed`] for malformed responses,
    ///   dimension mismatches, or non-retryable HTTP errors.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "texts": texts });

        let mut last_err: Option<EmbeddingError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value =
                            response.json().await.map_err(|e| {
                                EmbeddingError::GenerationFailed(format!(
                                    "invalid response body: {e}"
                                ))
                            })?;
                        return parse_embeddings(&json, texts.len(), self.dims);
                    }

                    if status.as_u16() == 503 {
                        // Model not loaded yet; worth retrying.
                        last_err = Some(EmbeddingError::ModelUnavailable {
                            model: self.model.clone(),
                        });
                        continue;
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(EmbeddingError::GenerationFailed(format!(
                            "embedding service error {status}: {body_text}"
                        )));
                        continue;
                    }

                    // Client error (not 429): retrying cannot help.
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(EmbeddingError::GenerationFailed(format!(
                        "embedding service error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(EmbeddingError::Connection {
                        url: self.base_url.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingError::GenerationFailed("embedding failed after retries".to_string())
        }))
    }

    /// Embed a single text. Convenience wrapper around [`embed_batch`]
    /// for query embedding.
    ///
    /// [`embed_batch`]: EmbeddingClient::embed_batch
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results.into_iter().next().ok_or_else(|| {
            EmbeddingError::GenerationFailed("empty embedding response".to_string())
        })
    }

    /// Reports whether the sidecar is up with its model loaded.
    /// Any transport or decode failure counts as not healthy.
    pub async fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<serde_json::Value>().await {
                    Ok(json) => json
                        .get("model_loaded")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    Err(e) => {
                        warn!(error = %e, "embedding health response was not JSON");
                        false
                    }
                }
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_one(text).await
    }

    fn model_name(&self) -> &str {
        self.model()
    }

    async fn available(&self) -> bool {
        self.is_healthy().await
    }
}

/// Parse the sidecar's embeddings response, verifying count and dims.
fn parse_embeddings(
    json: &serde_json::Value,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("embeddings")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            EmbeddingError::GenerationFailed("response missing embeddings array".to_string())
        })?;

    if data.len() != expected_count {
        return Err(EmbeddingError::GenerationFailed(format!(
            "expected {expected_count} embeddings, got {}",
            data.len()
        )));
    }

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let values = item.as_array().ok_or_else(|| {
            EmbeddingError::GenerationFailed("embedding entry is not an array".to_string())
        })?;

        let vec: Vec<f32> = values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vec.len() != expected_dims {
            return Err(EmbeddingError::GenerationFailed(format!(
                "embedding has {} dimensions, expected {expected_dims}",
                vec.len()
            )));
        }

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes for BYTEA column storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_parse_embeddings_happy_path() {
        let json = serde_json::json!({
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]],
            "model": "all-MiniLM-L6-v2",
            "dimensions": 3,
        });
        let parsed = parse_embeddings(&json, 2, 3).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].len(), 3);
        assert!((parsed[1][2] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_parse_embeddings_count_mismatch() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2]] });
        let err = parse_embeddings(&json, 2, 2).unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_parse_embeddings_dims_mismatch() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2]] });
        let err = parse_embeddings(&json, 1, 384).unwrap_err();
        assert!(err.to_string().contains("expected 384"));
    }

    #[test]
    fn test_parse_embeddings_missing_array() {
        let json = serde_json::json!({ "model": "all-MiniLM-L6-v2" });
        assert!(parse_embeddings(&json, 1, 3).is_err());
    }
}
