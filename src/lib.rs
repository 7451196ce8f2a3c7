//! limbus-rag - retrieval core for a Limbus Company guide bot.
//!
//! BM25 lexical search with tag and scope boosting over chunked, auto-tagged
//! guide documents, plus optional embedding-similarity and rerank stages
//! that degrade silently to the lexical path.

pub mod cli;
pub mod embedding;
pub mod knowledge;
pub mod rerank;

// Re-exports
pub use embedding::{EmbeddingProvider, HttpEmbedding};
pub use knowledge::{
    cosine_similarity, get_data_dir, tokenize, visual_len, Alias, Bm25Index, Chunk, Chunker,
    ChunkerConfig, DebugSearch, Document, Entities, GroupSettings, GuideRetriever, GuideStore,
    HybridSearcher, ImportReport, QueryInfo, ScoreBreakdown, Scope, SearchHit, SearchOutcome,
    SearchStats, Searcher, SimpleHit, SimpleSearcher, StoreStats, Tagger, DEFAULT_TOP_K,
};
pub use rerank::{HttpRerank, RerankProvider, RerankResult};
