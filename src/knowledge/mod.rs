//! Knowledge module - chunking, tagging, storage, and retrieval.
//!
//! - Chunker: size-bounded, boundary-aware document splitting
//! - Tagger: keyword/regex tag and entity extraction
//! - Searcher: BM25 with alias rewriting and tag/scope boosts
//! - Hybrid: optional embedding + rerank stages with silent fallback
//! - Store: SQLite persistence for documents/chunks/aliases/settings

mod chunker;
mod hybrid;
mod retriever;
mod searcher;
mod store;
mod tagger;

// Re-exports
pub use chunker::{visual_len, Chunker, ChunkerConfig};
pub use hybrid::{cosine_similarity, HybridSearcher};
pub use retriever::{GuideRetriever, ImportReport, SearchOutcome};
pub use searcher::{
    tokenize, Bm25Index, DebugSearch, QueryInfo, ScoreBreakdown, SearchHit, SearchStats,
    Searcher, SimpleHit, SimpleSearcher, DEFAULT_TOP_K,
};
pub use store::{
    get_data_dir, Alias, Chunk, Document, Entities, GroupSettings, GuideStore, Scope,
    StoreStats,
};
pub use tagger::Tagger;
