//! Hybrid search: lexical core plus optional embedding and rerank stages.
//!
//! Pipeline per call: over-fetch candidates (semantic if an embedding
//! provider is set, lexical otherwise), then optionally rerank down to
//! `top_k`. Both external stages degrade silently: an embedding failure
//! falls back to the lexical path, a rerank failure returns the pre-rerank
//! order. A search call never errors because a provider did.
//!
//! Chunk embeddings are computed lazily on first semantic search and cached
//! all-or-nothing; `update_chunks` drops the cache along with the index.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::embedding::EmbeddingProvider;
use crate::rerank::RerankProvider;

use super::searcher::{
    extract_query_tags, group_matches, DebugSearch, ScoreBreakdown, SearchHit, Searcher,
};
use super::store::Chunk;

/// Tag boost per matching tag on the semantic path.
const SEMANTIC_TAG_BOOST: f64 = 0.1;
/// Scope boost on the semantic path.
const SEMANTIC_GROUP_BOOST: f64 = 0.1;

// ============================================================================
// Cosine similarity
// ============================================================================

/// Cosine similarity of two vectors. Zero when dimensions differ or either
/// vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ============================================================================
// HybridSearcher
// ============================================================================

pub struct HybridSearcher {
    lexical: Searcher,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn RerankProvider>>,
    /// Lazily computed chunk embeddings, aligned with the chunk list.
    /// All-or-nothing: either every chunk has a vector or the cache is empty.
    embedding_cache: Mutex<Option<Arc<Vec<Vec<f32>>>>>,
}

impl HybridSearcher {
    pub fn new(
        chunks: Vec<Chunk>,
        alias_map: &[(String, String)],
        embedding: Option<Arc<dyn EmbeddingProvider>>,
        reranker: Option<Arc<dyn RerankProvider>>,
    ) -> Self {
        Self {
            lexical: Searcher::new(chunks, alias_map),
            embedding,
            reranker,
            embedding_cache: Mutex::new(None),
        }
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    pub fn chunk_count(&self) -> usize {
        self.lexical.chunk_count()
    }

    /// Replace the chunk set: rebuilds the lexical index and drops the
    /// embedding cache.
    pub async fn update_chunks(&mut self, chunks: Vec<Chunk>) {
        self.lexical.update_chunks(chunks);
        *self.embedding_cache.lock().await = None;
    }

    pub fn update_aliases(&mut self, alias_map: &[(String, String)]) {
        self.lexical.update_aliases(alias_map);
    }

    /// Purely lexical search, no external calls.
    pub fn search_lexical(&self, query: &str, top_k: usize, group_id: Option<&str>) -> Vec<SearchHit> {
        self.lexical.search(query, top_k, group_id)
    }

    pub fn search_with_debug(
        &self,
        query: &str,
        top_k: usize,
        group_id: Option<&str>,
    ) -> DebugSearch {
        self.lexical.search_with_debug(query, top_k, group_id)
    }

    /// Full pipeline search.
    pub async fn search(&self, query: &str, top_k: usize, group_id: Option<&str>) -> Vec<SearchHit> {
        let mut candidates = if self.embedding.is_some() {
            match self.semantic_search(query, top_k * 3, group_id).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!("Semantic search failed, falling back to lexical: {:#}", e);
                    self.lexical_candidates(query, top_k, group_id)
                }
            }
        } else {
            self.lexical_candidates(query, top_k, group_id)
        };

        if candidates.len() > 1 {
            if let Some(reranker) = &self.reranker {
                let processed_query = self.lexical.apply_aliases(query);
                let documents: Vec<String> =
                    candidates.iter().map(|h| h.chunk.content.clone()).collect();
                match reranker.rerank(&processed_query, &documents, top_k).await {
                    Ok(results) => {
                        let mut reranked: Vec<SearchHit> = results
                            .into_iter()
                            .map(|r| {
                                let mut hit = candidates[r.index].clone();
                                hit.prior_score = Some(hit.score);
                                hit.score = r.relevance_score;
                                hit
                            })
                            .collect();
                        reranked.sort_by(|a, b| {
                            b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
                        });
                        reranked.truncate(top_k);
                        return reranked;
                    }
                    Err(e) => {
                        tracing::warn!("Rerank failed, keeping pre-rerank order: {:#}", e);
                    }
                }
            }
        }

        candidates.truncate(top_k);
        candidates
    }

    fn lexical_candidates(
        &self,
        query: &str,
        top_k: usize,
        group_id: Option<&str>,
    ) -> Vec<SearchHit> {
        // Over-fetch when a reranker will narrow the set afterwards.
        let fetch = if self.reranker.is_some() {
            top_k * 2
        } else {
            top_k
        };
        self.lexical.search(query, fetch, group_id)
    }

    async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        group_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let provider = self
            .embedding
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No embedding provider configured"))?;

        let chunks = self.lexical.chunks();
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.ensure_embeddings(provider.as_ref()).await?;

        let processed_query = self.lexical.apply_aliases(query);
        let query_vector = provider.embed(&processed_query).await?;
        let query_tags = extract_query_tags(&processed_query);

        let mut hits: Vec<SearchHit> = Vec::new();
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let cosine = cosine_similarity(&query_vector, vector);
            let matching = chunk
                .tags
                .iter()
                .filter(|t| query_tags.contains(*t))
                .count();
            let tag_boost = matching as f64 * SEMANTIC_TAG_BOOST;
            let group_boost = if group_matches(chunk, group_id) {
                SEMANTIC_GROUP_BOOST
            } else {
                0.0
            };

            let score = cosine + tag_boost + group_boost;
            if score > 0.0 {
                hits.push(SearchHit {
                    chunk: chunk.clone(),
                    score,
                    breakdown: ScoreBreakdown::Semantic {
                        cosine,
                        tag_boost,
                        group_boost,
                    },
                    prior_score: None,
                });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Return the cached chunk embeddings, computing them on first use.
    /// The cache is only written after every vector arrived, so a failed
    /// batch leaves it untouched.
    async fn ensure_embeddings(
        &self,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Arc<Vec<Vec<f32>>>> {
        {
            let cache = self.embedding_cache.lock().await;
            if let Some(vectors) = cache.as_ref() {
                return Ok(vectors.clone());
            }
        }

        let texts: Vec<String> = self
            .lexical
            .chunks()
            .iter()
            .map(|c| c.content.clone())
            .collect();
        tracing::debug!("Embedding {} chunks for semantic search", texts.len());
        let vectors = provider.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "Embedding batch mismatch: {} chunks, {} vectors",
                texts.len(),
                vectors.len()
            );
        }

        let vectors = Arc::new(vectors);
        *self.embedding_cache.lock().await = Some(vectors.clone());
        Ok(vectors)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::{Entities, Scope};
    use crate::rerank::RerankResult;
    use async_trait::async_trait;

    fn chunk(content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            index: 0,
            doc_name: "test".to_string(),
            char_count: 0,
            tags: Vec::new(),
            entities: Entities::default(),
            scope: Scope::Global,
            group_id: None,
        }
    }

    /// Embeds along two fixed axes: texts containing "燃烧" point one way,
    /// everything else the other.
    struct AxisEmbedding;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if text.contains("燃烧") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "axis"
        }
    }

    struct FailingEmbedding;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedding {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("provider down")
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Reverses candidate order with descending synthetic scores.
    struct ReversingRerank;

    #[async_trait]
    impl RerankProvider for ReversingRerank {
        async fn rerank(
            &self,
            _query: &str,
            documents: &[String],
            top_n: usize,
        ) -> anyhow::Result<Vec<RerankResult>> {
            Ok(documents
                .iter()
                .enumerate()
                .rev()
                .take(top_n)
                .enumerate()
                .map(|(rank, (index, _))| RerankResult {
                    index,
                    relevance_score: 1.0 - rank as f64 * 0.1,
                })
                .collect())
        }

        fn name(&self) -> &str {
            "reversing"
        }
    }

    struct FailingRerank;

    #[async_trait]
    impl RerankProvider for FailingRerank {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
            _top_n: usize,
        ) -> anyhow::Result<Vec<RerankResult>> {
            anyhow::bail!("rerank down")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_semantic_path_orders_by_similarity() {
        let chunks = vec![chunk("流血机制概述"), chunk("燃烧队配队指南")];
        let searcher = HybridSearcher::new(chunks, &[], Some(Arc::new(AxisEmbedding)), None);

        let hits = searcher.search("燃烧", 6, None).await;
        assert!(!hits.is_empty());
        assert!(hits[0].chunk.content.contains("燃烧"));
        match hits[0].breakdown {
            ScoreBreakdown::Semantic { cosine, .. } => {
                assert!((cosine - 1.0).abs() < 1e-6);
            }
            _ => panic!("expected semantic breakdown"),
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_lexical() {
        let chunks = vec![chunk("燃烧队配队指南"), chunk("流血机制概述")];

        let plain = HybridSearcher::new(chunks.clone(), &[], None, None);
        let failing =
            HybridSearcher::new(chunks, &[], Some(Arc::new(FailingEmbedding)), None);

        let expected = plain.search("燃烧", 6, None).await;
        let actual = failing.search("燃烧", 6, None).await;

        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_eq!(a.chunk.content, e.chunk.content);
            assert!((a.score - e.score).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_rerank_replaces_scores_and_keeps_prior() {
        let chunks = vec![
            chunk("燃烧入门第一篇 燃烧 燃烧"),
            chunk("燃烧进阶第二篇"),
        ];
        let searcher = HybridSearcher::new(chunks, &[], None, Some(Arc::new(ReversingRerank)));

        let hits = searcher.search("燃烧", 2, None).await;
        assert_eq!(hits.len(), 2);
        for hit in &hits {
            assert!(hit.prior_score.is_some());
        }
        // Rerank scores are synthetic, descending.
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_prerank_order() {
        let chunks = vec![
            chunk("燃烧入门第一篇 燃烧 燃烧"),
            chunk("燃烧进阶第二篇"),
            chunk("燃烧高级第三篇"),
        ];

        let plain = HybridSearcher::new(chunks.clone(), &[], None, None);
        let failing = HybridSearcher::new(chunks, &[], None, Some(Arc::new(FailingRerank)));

        let expected = plain.search("燃烧", 2, None).await;
        let actual = failing.search("燃烧", 2, None).await;

        assert_eq!(actual.len(), 2);
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_eq!(a.chunk.content, e.chunk.content);
            assert!(a.prior_score.is_none());
        }
    }

    #[tokio::test]
    async fn test_single_candidate_skips_rerank() {
        let chunks = vec![chunk("燃烧队配队指南")];
        let searcher = HybridSearcher::new(chunks, &[], None, Some(Arc::new(FailingRerank)));

        // Rerank would fail, but with one candidate it is never invoked.
        let hits = searcher.search("燃烧", 6, None).await;
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_update_chunks_invalidates_cache() {
        let mut searcher = HybridSearcher::new(
            vec![chunk("燃烧队配队指南")],
            &[],
            Some(Arc::new(AxisEmbedding)),
            None,
        );

        let hits = searcher.search("燃烧", 6, None).await;
        assert_eq!(hits.len(), 1);

        searcher
            .update_chunks(vec![chunk("流血机制概述"), chunk("燃烧高级攻略")])
            .await;

        let hits = searcher.search("燃烧", 6, None).await;
        assert!(hits.iter().any(|h| h.chunk.content.contains("高级")));
    }

    #[tokio::test]
    async fn test_empty_corpus_semantic() {
        let searcher = HybridSearcher::new(Vec::new(), &[], Some(Arc::new(AxisEmbedding)), None);
        assert!(searcher.search("燃烧", 6, None).await.is_empty());
    }
}
