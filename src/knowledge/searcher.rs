//! Lexical search over guide chunks.
//!
//! BM25 scoring with two additive boosts on top: tag overlap between the
//! query and a chunk (1.5 per matching tag) and a flat group-scope bonus
//! (1.2) when searching on behalf of a group. Queries are rewritten through
//! the alias map before tokenization, so "红叔怎么玩" hits chunks about 洪鹿.
//!
//! The index is immutable once built. Any chunk-set change goes through
//! `update_chunks`, which rebuilds the whole index; there is no incremental
//! patching and therefore no stale-index state to reason about.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::Serialize;

use super::store::Chunk;

const K1: f64 = 1.5;
const B: f64 = 0.75;
const TAG_BOOST: f64 = 1.5;
const GROUP_BOOST: f64 = 1.2;

pub const DEFAULT_TOP_K: usize = 6;

// ============================================================================
// Tokenization
// ============================================================================

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF          // CJK Unified Ideographs
        | 0x3400..=0x4DBF        // Extension A
        | 0xF900..=0xFAFF        // Compatibility Ideographs
        | 0x3040..=0x30FF)       // Hiragana / Katakana
}

/// Tokenize text for indexing and searching.
///
/// Lowercases, then emits ASCII alphanumeric runs as word tokens, every CJK
/// character as a unigram, and bigrams over the CJK character sequence.
/// Other characters (punctuation, whitespace) are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.to_lowercase();
    let mut tokens = Vec::new();

    let mut word = String::new();
    let mut cjk_chars: Vec<char> = Vec::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
        if is_cjk(c) {
            cjk_chars.push(c);
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    for &c in &cjk_chars {
        tokens.push(c.to_string());
    }
    for pair in cjk_chars.windows(2) {
        tokens.push(format!("{}{}", pair[0], pair[1]));
    }

    tokens
}

// ============================================================================
// BM25 Index
// ============================================================================

/// Immutable BM25 index over one chunk set.
///
/// `build` is a pure function of the chunks: same input, same index. Callers
/// swap in a fresh index on every chunk-set change.
pub struct Bm25Index {
    doc_freq: HashMap<String, usize>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    num_docs: usize,
}

impl Bm25Index {
    pub fn build(chunks: &[Chunk]) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let tokens = tokenize(&chunk.content);
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            term_freqs.push(tf);
        }

        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            doc_freq,
            term_freqs,
            doc_lens,
            avg_doc_len,
            num_docs: chunks.len(),
        }
    }

    pub fn unique_terms(&self) -> usize {
        self.doc_freq.len()
    }

    pub fn avg_doc_len(&self) -> f64 {
        self.avg_doc_len
    }

    /// BM25 score of one document against the query tokens. Tokens absent
    /// from the index contribute zero.
    fn score(&self, query_tokens: &[String], doc_idx: usize) -> f64 {
        let doc_len = self.doc_lens[doc_idx] as f64;
        let tf_dict = &self.term_freqs[doc_idx];
        let n = self.num_docs as f64;

        let mut score = 0.0;
        for term in query_tokens {
            let Some(&df) = self.doc_freq.get(term) else {
                continue;
            };
            let idf = ((n - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();
            let tf = tf_dict.get(term).copied().unwrap_or(0) as f64;
            let tf_norm =
                (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * doc_len / self.avg_doc_len));
            score += idf * tf_norm;
        }
        score
    }
}

// ============================================================================
// Query Tag Extraction
// ============================================================================

// Reduced keyword set for detecting query intent. Tags produced here must
// spell exactly like the tagger's output or the overlap boost never fires.
const QUERY_STATUS_KEYWORDS: &[(&str, &[&str])] = &[
    ("状态:Burn", &["burn", "燃烧", "烧伤"]),
    ("状态:Bleed", &["bleed", "流血", "出血"]),
    ("状态:Tremor", &["tremor", "震颤"]),
    ("状态:Rupture", &["rupture", "破裂"]),
    ("状态:Sinking", &["sinking", "沉沦"]),
    ("状态:Poise", &["poise", "蓄力", "架势"]),
];

const QUERY_MODE_KEYWORDS: &[(&str, &[&str])] = &[
    ("主线", &["主线", "章节"]),
    ("镜牢", &["镜牢", "md", "镜像"]),
    ("铁道", &["铁道", "rr"]),
    ("活动", &["活动"]),
];

pub(crate) fn extract_query_tags(query_lower: &str) -> HashSet<String> {
    let mut tags = HashSet::new();

    for (tag, keywords) in QUERY_STATUS_KEYWORDS {
        if keywords.iter().any(|kw| query_lower.contains(kw)) {
            tags.insert(tag.to_string());
        }
    }
    for (tag, keywords) in QUERY_MODE_KEYWORDS {
        if keywords.iter().any(|kw| query_lower.contains(kw)) {
            tags.insert(tag.to_string());
        }
    }

    if ["拼点", "clash", "硬币", "速度"].iter().any(|kw| query_lower.contains(kw)) {
        tags.insert("拼点/冲突".to_string());
    }
    if ["ego", "侵蚀"].iter().any(|kw| query_lower.contains(kw)) {
        tags.insert("EGO".to_string());
        tags.insert("EGO机制".to_string());
    }
    if ["配队", "阵容", "队伍"].iter().any(|kw| query_lower.contains(kw)) {
        tags.insert("配队/阵容".to_string());
    }
    if ["人格", "identity", "id"].iter().any(|kw| query_lower.contains(kw)) {
        tags.insert("人格".to_string());
    }

    tags
}

// ============================================================================
// Results
// ============================================================================

/// How a hit's score was assembled.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScoreBreakdown {
    Lexical {
        bm25: f64,
        tag_boost: f64,
        group_boost: f64,
        matching_tags: Vec<String>,
    },
    Semantic {
        cosine: f64,
        tag_boost: f64,
        group_boost: f64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    /// Score before reranking replaced it, when a reranker ran.
    pub prior_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryInfo {
    pub original_query: String,
    pub processed_query: String,
    pub tokens: Vec<String>,
    pub extracted_tags: Vec<String>,
    /// Alias entries whose trigger text appears in the original query.
    /// Diagnostic only.
    pub alias_substitutions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStats {
    pub total_chunks: usize,
    pub results_count: usize,
    pub avg_doc_len: f64,
    pub unique_terms: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugSearch {
    pub results: Vec<SearchHit>,
    pub query_info: QueryInfo,
    pub stats: SearchStats,
}

// ============================================================================
// Searcher
// ============================================================================

struct AliasRule {
    alias: String,
    canonical: String,
    pattern: Regex,
}

/// BM25 searcher with alias rewriting and tag/scope boosts.
pub struct Searcher {
    chunks: Vec<Chunk>,
    index: Bm25Index,
    aliases: Vec<AliasRule>,
}

impl Searcher {
    pub fn new(chunks: Vec<Chunk>, alias_map: &[(String, String)]) -> Self {
        let index = Bm25Index::build(&chunks);
        let mut searcher = Self {
            chunks,
            index,
            aliases: Vec::new(),
        };
        searcher.update_aliases(alias_map);
        searcher
    }

    /// Replace the chunk set and rebuild the index.
    pub fn update_chunks(&mut self, chunks: Vec<Chunk>) {
        self.index = Bm25Index::build(&chunks);
        self.chunks = chunks;
    }

    /// Replace the alias map. Rules apply longest alias first, ties broken
    /// lexicographically, so overlapping aliases rewrite deterministically.
    pub fn update_aliases(&mut self, alias_map: &[(String, String)]) {
        let mut rules: Vec<AliasRule> = alias_map
            .iter()
            .map(|(alias, canonical)| AliasRule {
                alias: alias.clone(),
                canonical: canonical.clone(),
                pattern: Regex::new(&format!("(?i){}", regex::escape(alias))).unwrap(),
            })
            .collect();
        rules.sort_by(|a, b| {
            b.alias
                .chars()
                .count()
                .cmp(&a.alias.chars().count())
                .then_with(|| a.alias.cmp(&b.alias))
        });
        self.aliases = rules;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Lowercase the query and substitute every alias with its canonical term.
    pub fn apply_aliases(&self, query: &str) -> String {
        let mut result = query.to_lowercase();
        for rule in &self.aliases {
            result = rule
                .pattern
                .replace_all(&result, regex::NoExpand(&rule.canonical))
                .into_owned();
        }
        result
    }

    pub fn search(&self, query: &str, top_k: usize, group_id: Option<&str>) -> Vec<SearchHit> {
        if self.chunks.is_empty() {
            return Vec::new();
        }

        let processed_query = self.apply_aliases(query);
        let query_tokens = tokenize(&processed_query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let query_tags = extract_query_tags(&processed_query);

        let mut hits: Vec<SearchHit> = Vec::new();
        for (idx, chunk) in self.chunks.iter().enumerate() {
            let bm25 = self.index.score(&query_tokens, idx);

            let matching_tags: Vec<String> = chunk
                .tags
                .iter()
                .filter(|t| query_tags.contains(*t))
                .cloned()
                .collect();
            let tag_boost = matching_tags.len() as f64 * TAG_BOOST;

            let group_boost = if group_matches(chunk, group_id) {
                GROUP_BOOST
            } else {
                0.0
            };

            let score = bm25 + tag_boost + group_boost;
            if score > 0.0 {
                hits.push(SearchHit {
                    chunk: chunk.clone(),
                    score,
                    breakdown: ScoreBreakdown::Lexical {
                        bm25,
                        tag_boost,
                        group_boost,
                        matching_tags,
                    },
                    prior_score: None,
                });
            }
        }

        sort_hits(&mut hits);
        hits.truncate(top_k);
        hits
    }

    pub fn search_with_debug(
        &self,
        query: &str,
        top_k: usize,
        group_id: Option<&str>,
    ) -> DebugSearch {
        let processed_query = self.apply_aliases(query);
        let tokens = tokenize(&processed_query);
        let mut extracted_tags: Vec<String> =
            extract_query_tags(&processed_query).into_iter().collect();
        extracted_tags.sort();

        let query_lower = query.to_lowercase();
        let alias_substitutions = self
            .aliases
            .iter()
            .filter(|rule| query_lower.contains(&rule.alias))
            .map(|rule| format!("{} -> {}", rule.alias, rule.canonical))
            .collect();

        let results = self.search(query, top_k, group_id);
        let results_count = results.len();

        DebugSearch {
            results,
            query_info: QueryInfo {
                original_query: query.to_string(),
                processed_query,
                tokens,
                extracted_tags,
                alias_substitutions,
            },
            stats: SearchStats {
                total_chunks: self.chunks.len(),
                results_count,
                avg_doc_len: self.index.avg_doc_len(),
                unique_terms: self.index.unique_terms(),
            },
        }
    }
}

pub(crate) fn group_matches(chunk: &Chunk, group_id: Option<&str>) -> bool {
    match (group_id, &chunk.group_id) {
        (Some(gid), Some(cgid)) => {
            chunk.scope == super::store::Scope::Group && gid == cgid
        }
        _ => false,
    }
}

/// Stable descending sort by score.
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

// ============================================================================
// Fallback keyword searcher
// ============================================================================

#[derive(Debug, Clone)]
pub struct SimpleHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Degraded keyword-overlap scorer. Same call shape and sorted/truncated
/// output as `Searcher::search`, no score breakdown.
pub struct SimpleSearcher {
    chunks: Vec<Chunk>,
    alias_map: Vec<(String, String)>,
}

impl SimpleSearcher {
    pub fn new(chunks: Vec<Chunk>, alias_map: Vec<(String, String)>) -> Self {
        Self { chunks, alias_map }
    }

    pub fn update_chunks(&mut self, chunks: Vec<Chunk>) {
        self.chunks = chunks;
    }

    pub fn search(&self, query: &str, top_k: usize, group_id: Option<&str>) -> Vec<SimpleHit> {
        if self.chunks.is_empty() {
            return Vec::new();
        }

        let mut processed = query.to_lowercase();
        for (alias, canonical) in &self.alias_map {
            processed = processed.replace(&alias.to_lowercase(), &canonical.to_lowercase());
        }
        let keywords: HashSet<&str> = processed.split_whitespace().collect();

        let mut scored: Vec<SimpleHit> = Vec::new();
        for chunk in &self.chunks {
            let content_lower = chunk.content.to_lowercase();
            let matches = keywords
                .iter()
                .filter(|kw| content_lower.contains(*kw))
                .count();
            if matches == 0 {
                continue;
            }
            let mut score = matches as f64;
            if group_matches(chunk, group_id) {
                score *= 1.2;
            }
            scored.push(SimpleHit {
                chunk: chunk.clone(),
                score,
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

// ============================================================================
// Tests
// ============================================================================
