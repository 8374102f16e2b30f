//! Query embedding collaborator
//!
//! The vector index adapter turns the user's query into an embedding
//! through this trait. How documents were embedded is not our concern;
//! the query only has to land in the same space.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::resilience::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Trait for query embedding
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Client for any OpenAI-compatible `/embeddings` endpoint
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout,
            retry: RetryPolicy::Exponential {
                initial: Duration::from_millis(100),
                max_attempts: config.max_retries,
            },
        })
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: [text],
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::EmbeddingTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::EmbeddingError {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.retry
            .run("embedding", || self.make_request(text))
            .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder for local runs and tests.
/// Equal texts map to equal unit vectors.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut block = 0u32;
        while values.len() < self.dimension {
            let digest = Sha256::new()
                .chain_update(block.to_le_bytes())
                .chain_update(text.as_bytes())
                .finalize();
            values.extend(
                digest
                    .iter()
                    .take(self.dimension - values.len())
                    .map(|b| *b as f32 / 255.0 - 0.5),
            );
            block += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(values)
    }

    fn model_name(&self) -> &str {
        "hash-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(HttpEmbedder::new(config, key)?))
        }
        "hash" | "mock" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}
