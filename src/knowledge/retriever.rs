//! Retrieval orchestrator.
//!
//! Thin wiring layer: imports run chunker → tagger → store, searches load
//! the chunks visible to the caller plus the alias map, build a fresh
//! searcher, and delegate. The searcher is rebuilt per search rather than
//! patched, so a search always sees a consistent snapshot of the store.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::EmbeddingProvider;
use crate::rerank::RerankProvider;

use super::chunker::Chunker;
use super::hybrid::HybridSearcher;
use super::searcher::{DebugSearch, SearchHit};
use super::store::{GuideStore, Scope};
use super::tagger::Tagger;

/// Outcome of a search, separating "nothing imported yet" from "nothing
/// matched the query".
#[derive(Debug)]
pub enum SearchOutcome {
    /// No chunks are visible to this caller at all.
    EmptyCorpus,
    /// Chunks exist but none scored above zero.
    NoMatch,
    Hits(Vec<SearchHit>),
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub doc_id: i64,
    pub doc_name: String,
    pub chunk_count: usize,
}

pub struct GuideRetriever {
    store: GuideStore,
    chunker: Chunker,
    tagger: Tagger,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn RerankProvider>>,
}

impl GuideRetriever {
    pub fn new(store: GuideStore) -> Self {
        Self {
            store,
            chunker: Chunker::with_defaults(),
            tagger: Tagger::new(),
            embedding: None,
            reranker: None,
        }
    }

    pub fn with_providers(
        store: GuideStore,
        embedding: Option<Arc<dyn EmbeddingProvider>>,
        reranker: Option<Arc<dyn RerankProvider>>,
    ) -> Self {
        Self {
            store,
            chunker: Chunker::with_defaults(),
            tagger: Tagger::new(),
            embedding,
            reranker,
        }
    }

    pub fn store(&self) -> &GuideStore {
        &self.store
    }

    pub fn tagger(&self) -> &Tagger {
        &self.tagger
    }

    /// Import a document: chunk, tag, persist.
    pub fn import_document(
        &self,
        name: &str,
        text: &str,
        scope: Scope,
        group_id: Option<&str>,
    ) -> Result<ImportReport> {
        if text.trim().is_empty() {
            anyhow::bail!("Document text is empty");
        }
        if scope == Scope::Group && group_id.is_none() {
            anyhow::bail!("Group-scoped import requires a group id");
        }

        let mut chunks = self.chunker.process_document(text, name);
        for chunk in &mut chunks {
            chunk.scope = scope;
            chunk.group_id = group_id.map(|g| g.to_string());
        }
        self.tagger.tag_chunks(&mut chunks);

        let doc_id = self
            .store
            .add_document(name, text, scope, group_id)
            .with_context(|| format!("Failed to store document '{}'", name))?;
        let chunk_count = self.store.add_chunks(doc_id, &chunks)?;

        if let Some(gid) = group_id {
            self.store.touch_last_import(gid)?;
        }

        tracing::info!(
            "Imported '{}': {} chunks (scope={})",
            name,
            chunk_count,
            scope.as_str()
        );
        Ok(ImportReport {
            doc_id,
            doc_name: name.to_string(),
            chunk_count,
        })
    }

    /// Build a searcher over the chunks visible to `group_id`.
    fn build_searcher(&self, group_id: Option<&str>) -> Result<HybridSearcher> {
        let chunks = self.store.chunks_for_search(group_id)?;
        let alias_map = self.store.alias_map()?;
        Ok(HybridSearcher::new(
            chunks,
            &alias_map,
            self.embedding.clone(),
            self.reranker.clone(),
        ))
    }

    /// Full-pipeline search (semantic + rerank when providers are set).
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        group_id: Option<&str>,
    ) -> Result<SearchOutcome> {
        let searcher = self.build_searcher(group_id)?;
        if searcher.chunk_count() == 0 {
            return Ok(SearchOutcome::EmptyCorpus);
        }
        let hits = searcher.search(query, top_k, group_id).await;
        if hits.is_empty() {
            return Ok(SearchOutcome::NoMatch);
        }
        Ok(SearchOutcome::Hits(hits))
    }

    /// Lexical-only search, no external calls.
    pub fn search_lexical(
        &self,
        query: &str,
        top_k: usize,
        group_id: Option<&str>,
    ) -> Result<SearchOutcome> {
        let searcher = self.build_searcher(group_id)?;
        if searcher.chunk_count() == 0 {
            return Ok(SearchOutcome::EmptyCorpus);
        }
        let hits = searcher.search_lexical(query, top_k, group_id);
        if hits.is_empty() {
            return Ok(SearchOutcome::NoMatch);
        }
        Ok(SearchOutcome::Hits(hits))
    }

    /// Lexical search with full diagnostics.
    pub fn search_with_debug(
        &self,
        query: &str,
        top_k: usize,
        group_id: Option<&str>,
    ) -> Result<DebugSearch> {
        let searcher = self.build_searcher(group_id)?;
        Ok(searcher.search_with_debug(query, top_k, group_id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn retriever() -> (TempDir, GuideRetriever) {
        let dir = TempDir::new().unwrap();
        let store = GuideStore::open(&dir.path().join("test.db")).unwrap();
        (dir, GuideRetriever::new(store))
    }

    #[test]
    fn test_import_chunks_and_tags() {
        let (_dir, retriever) = retriever();
        let report = retriever
            .import_document(
                "燃烧指南",
                "燃烧队的核心是叠加燃烧层数。配队推荐以输出为主。",
                Scope::Global,
                None,
            )
            .unwrap();

        assert!(report.chunk_count > 0);
        let chunks = retriever
            .store()
            .get_chunks(None, None, Some(report.doc_id))
            .unwrap();
        assert_eq!(chunks.len(), report.chunk_count);
        assert!(chunks[0].tags.contains(&"状态:Burn".to_string()));
    }

    #[test]
    fn test_import_rejects_empty_text() {
        let (_dir, retriever) = retriever();
        assert!(retriever
            .import_document("empty", "   ", Scope::Global, None)
            .is_err());
    }

    #[test]
    fn test_group_import_requires_group_id() {
        let (_dir, retriever) = retriever();
        assert!(retriever
            .import_document("g", "内容", Scope::Group, None)
            .is_err());
    }

    #[test]
    fn test_group_import_touches_settings() {
        let (_dir, retriever) = retriever();
        retriever
            .import_document("g", "群专属攻略内容", Scope::Group, Some("42"))
            .unwrap();
        let settings = retriever.store().group_settings("42").unwrap();
        assert!(settings.last_import_at.is_some());
    }

    #[tokio::test]
    async fn test_search_outcomes() {
        let (_dir, retriever) = retriever();

        // Nothing imported yet.
        assert!(matches!(
            retriever.search("燃烧", 6, None).await.unwrap(),
            SearchOutcome::EmptyCorpus
        ));

        retriever
            .import_document("指南", "燃烧队的核心是叠加燃烧层数。", Scope::Global, None)
            .unwrap();

        assert!(matches!(
            retriever.search("燃烧", 6, None).await.unwrap(),
            SearchOutcome::Hits(_)
        ));
        assert!(matches!(
            retriever.search("咖喱饭", 6, None).await.unwrap(),
            SearchOutcome::NoMatch
        ));
    }

    #[tokio::test]
    async fn test_group_search_sees_global_and_own_chunks() {
        let (_dir, retriever) = retriever();
        retriever
            .import_document("global", "燃烧通用机制说明。", Scope::Global, None)
            .unwrap();
        retriever
            .import_document("g1", "燃烧群内补充说明。", Scope::Group, Some("g1"))
            .unwrap();
        retriever
            .import_document("g2", "燃烧其他群的内容。", Scope::Group, Some("g2"))
            .unwrap();

        let outcome = retriever.search("燃烧", 10, Some("g1")).await.unwrap();
        let SearchOutcome::Hits(hits) = outcome else {
            panic!("expected hits");
        };
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.group_id.as_deref() != Some("g2")));
        // The group's own chunk carries the scope boost and sorts first.
        assert_eq!(hits[0].chunk.group_id.as_deref(), Some("g1"));
    }

    #[test]
    fn test_search_uses_aliases_from_store() {
        let (_dir, retriever) = retriever();
        retriever
            .import_document("人格", "洪鹿的人格推荐与配队。", Scope::Global, None)
            .unwrap();
        retriever
            .store()
            .add_alias("红叔", "洪鹿", "sinner")
            .unwrap();

        let debug = retriever.search_with_debug("红叔怎么玩", 6, None).unwrap();
        assert!(debug.query_info.processed_query.contains("洪鹿"));
        assert!(!debug.results.is_empty());
    }
}
