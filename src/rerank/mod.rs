//! Reranking providers.
//!
//! A reranker re-scores a candidate document list against the query and
//! returns relevance-ordered indexes into that list. Like embedding, this is
//! an optional stage: search degrades gracefully when no provider is set or
//! a call fails.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// RerankProvider Trait
// ============================================================================

/// One reranked candidate: position in the input list plus its new score.
#[derive(Debug, Clone, Deserialize)]
pub struct RerankResult {
    pub index: usize,
    pub relevance_score: f64,
}

#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Rerank `documents` against `query`, returning up to `top_n` results
    /// in descending relevance order.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>>;

    fn name(&self) -> &str;
}

// ============================================================================
// HTTP provider
// ============================================================================

pub const DEFAULT_MODEL: &str = "rerank-v2";

/// Rerank provider over a Cohere-compatible `/v1/rerank` HTTP API.
#[derive(Debug)]
pub struct HttpRerank {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpRerank {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        Self::with_model(base_url, api_key, DEFAULT_MODEL.to_string())
    }

    pub fn with_model(base_url: String, api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            client,
        })
    }

    /// Build from `RERANK_BASE_URL` / `RERANK_API_KEY` / optional `RERANK_MODEL`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("RERANK_BASE_URL").context("RERANK_BASE_URL is not set")?;
        let api_key = std::env::var("RERANK_API_KEY").context("RERANK_API_KEY is not set")?;
        let model = std::env::var("RERANK_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::with_model(base_url, api_key, model)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[async_trait]
impl RerankProvider for HttpRerank {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        };
        let url = format!("{}/v1/rerank", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send rerank request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read rerank response body")?;

        if !status.is_success() {
            anyhow::bail!("Rerank API error ({}): {}", status, body);
        }

        let parsed: RerankResponse =
            serde_json::from_str(&body).context("Failed to parse rerank response")?;

        // Out-of-range indexes would panic downstream; reject them here.
        for result in &parsed.results {
            if result.index >= documents.len() {
                anyhow::bail!(
                    "Rerank API returned out-of-range index {} for {} documents",
                    result.index,
                    documents.len()
                );
            }
        }

        Ok(parsed.results)
    }

    fn name(&self) -> &str {
        "http-rerank"
    }
}
