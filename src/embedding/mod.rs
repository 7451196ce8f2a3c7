//! Embedding providers for semantic search.
//!
//! Text is vectorized through an OpenAI-compatible `/v1/embeddings` endpoint
//! so any hosted or local server speaking that dialect works. The provider is
//! optional: when none is configured the searcher stays purely lexical.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Default implementation calls `embed` sequentially.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible HTTP provider
// ============================================================================

pub const DEFAULT_DIMENSION: usize = 1024;
pub const DEFAULT_MODEL: &str = "text-embedding-v3";

/// Max texts per batch request.
const MAX_BATCH_SIZE: usize = 16;
/// Minimum delay between requests (burst protection).
const MIN_DELAY_MS: u64 = 200;
/// Max retries on 429 responses.
const MAX_RETRIES: u32 = 3;
/// Initial backoff on retry (ms), doubled per attempt.
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Embedding provider over an OpenAI-compatible HTTP API.
#[derive(Debug)]
pub struct HttpEmbedding {
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    pacer: Arc<Mutex<Pacer>>,
}

/// Enforces a minimum delay between outgoing requests.
#[derive(Debug)]
struct Pacer {
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl Pacer {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: None,
        }
    }

    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

impl HttpEmbedding {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        Self::with_model(base_url, api_key, DEFAULT_MODEL.to_string(), DEFAULT_DIMENSION)
    }

    pub fn with_model(
        base_url: String,
        api_key: String,
        model: String,
        dimension: usize,
    ) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Embedding dimension must be positive");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimension,
            client,
            pacer: Arc::new(Mutex::new(Pacer::new(Duration::from_millis(MIN_DELAY_MS)))),
        })
    }

    /// Build from environment variables.
    ///
    /// `EMBEDDING_BASE_URL` and `EMBEDDING_API_KEY` are required;
    /// `EMBEDDING_MODEL` and `EMBEDDING_DIMENSION` are optional.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("EMBEDDING_BASE_URL")
            .context("EMBEDDING_BASE_URL is not set")?;
        let api_key = std::env::var("EMBEDDING_API_KEY")
            .context("EMBEDDING_API_KEY is not set")?;
        let model =
            std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let dimension = match std::env::var("EMBEDDING_DIMENSION") {
            Ok(v) => v
                .parse::<usize>()
                .context("EMBEDDING_DIMENSION must be a positive integer")?,
            Err(_) => DEFAULT_DIMENSION,
        };
        Self::with_model(base_url, api_key, model, dimension)
    }

    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            {
                let mut pacer = self.pacer.lock().await;
                pacer.acquire().await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                // Responses may arrive out of order; restore by index.
                let mut data = parsed.data;
                data.sort_by_key(|d| d.index);
                if data.len() != inputs.len() {
                    anyhow::bail!(
                        "Embedding count mismatch: requested {}, got {}",
                        inputs.len(),
                        data.len()
                    );
                }
                return Ok(data.into_iter().map(|d| d.embedding).collect());
            }

            if status.as_u16() == 429 {
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                if attempt < MAX_RETRIES {
                    let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                break;
            }

            // Non-retryable error: surface the API message if parseable.
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            anyhow::bail!("Embedding API error ({}): {}", status, message);
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Embedding request failed")))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }
        let mut vectors = self.request_embeddings(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding API returned no vector"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_SIZE) {
            results.extend(self.request_embeddings(batch).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "http-embedding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_dimension() {
        let result = HttpEmbedding::with_model(
            "http://localhost:8080".to_string(),
            "key".to_string(),
            "model".to_string(),
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_trims_trailing_slash() {
        let provider = HttpEmbedding::new(
            "http://localhost:8080/".to_string(),
            "key".to_string(),
        )
        .unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080");
        assert_eq!(provider.dimension(), DEFAULT_DIMENSION);
    }

    #[tokio::test]
    async fn test_empty_text_short_circuits() {
        let provider = HttpEmbedding::new(
            "http://localhost:8080".to_string(),
            "key".to_string(),
        )
        .unwrap();
        let v = provider.embed("   ").await.unwrap();
        assert_eq!(v.len(), DEFAULT_DIMENSION);
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
