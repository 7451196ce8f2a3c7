//! Text chunking for guide documents.
//!
//! Splits raw text into bounded, overlap-linked segments at natural break
//! points (headings, paragraphs, sentences). Sizes are measured with a
//! visual-width metric suited to mixed Chinese/English guide text: a CJK
//! character fills a full cell, a Latin character half a cell.

use regex::Regex;

use super::store::{Chunk, Entities, Scope};

// ============================================================================
// Configuration
// ============================================================================

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum visual-character budget per chunk.
    pub target_size: usize,
    /// Visual-character budget carried from each chunk's tail into the next.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: 800,
            overlap: 120,
        }
    }
}

// ============================================================================
// Visual width
// ============================================================================

/// Visual length of `text`: non-ASCII counts as 1 unit, ASCII as 0.5,
/// floored. Approximates on-screen width, not bytes or code points.
pub fn visual_len(text: &str) -> usize {
    let halves: usize = text
        .chars()
        .map(|c| if (c as u32) > 127 { 2 } else { 1 })
        .sum();
    halves / 2
}

// ============================================================================
// Chunker
// ============================================================================

/// Boundary-aware document chunker.
pub struct Chunker {
    config: ChunkerConfig,
    header_re: Regex,
    collapse_re: Regex,
}

/// Sentence-ending delimiters (Chinese and English).
const SENTENCE_ENDERS: &[char] = &['。', '！', '？', '!', '?', '；', ';'];

/// Natural boundaries for trimming overlap tails, in preference order.
const TAIL_BOUNDARIES: &[&str] = &["\n\n", "\n", "。", "！", "？", "；", ". ", "! ", "? "];

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            // Bracket-style heading (【...】) or 1-3 '#' followed by whitespace,
            // at the start of a line.
            header_re: Regex::new(r"(?m)^(?:【|#{1,3}\s)").unwrap(),
            collapse_re: Regex::new(r"\n{3,}").unwrap(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default())
    }

    /// Split `text` into overlapping chunk strings.
    pub fn split_into_chunks(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }

        // Normalize: trim, CRLF -> LF, 3+ newlines -> 2.
        let text = text.trim().replace("\r\n", "\n");
        let text = self.collapse_re.replace_all(&text, "\n\n");

        let mut chunks = Vec::new();
        for section in self.split_by_headers(&text) {
            chunks.extend(self.split_section(&section));
        }

        if self.config.overlap > 0 && chunks.len() > 1 {
            chunks = self.apply_overlap(chunks);
        }

        chunks
    }

    /// Process a document into chunk records with contiguous ordinals.
    pub fn process_document(&self, text: &str, doc_name: &str) -> Vec<Chunk> {
        self.split_into_chunks(text)
            .into_iter()
            .enumerate()
            .map(|(i, content)| Chunk {
                char_count: visual_len(&content),
                content,
                index: i,
                doc_name: doc_name.to_string(),
                tags: Vec::new(),
                entities: Entities::default(),
                scope: Scope::Global,
                group_id: None,
            })
            .collect()
    }

    /// Split at heading markers, keeping the marker with the section that
    /// follows it. A document without headings is one section.
    fn split_by_headers(&self, text: &str) -> Vec<String> {
        let mut starts: Vec<usize> = self
            .header_re
            .find_iter(text)
            .map(|m| m.start())
            .collect();
        if starts.first() != Some(&0) {
            starts.insert(0, 0);
        }
        starts.push(text.len());

        starts
            .windows(2)
            .map(|w| text[w[0]..w[1]].trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Split a section into chunks no larger than the target size.
    fn split_section(&self, text: &str) -> Vec<String> {
        if visual_len(text) <= self.config.target_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_size = 0usize;

        for para in text.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }

            let para_size = visual_len(para);

            // A paragraph over budget on its own is split at sentences.
            if para_size > self.config.target_size {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current = String::new();
                    current_size = 0;
                }
                chunks.extend(self.split_by_sentences(para));
                continue;
            }

            if current_size + para_size > self.config.target_size {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                }
                current = para.to_string();
                current_size = para_size;
            } else {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(para);
                current_size += para_size;
            }
        }

        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks
    }

    /// Greedily pack sentences into chunks. Each sentence keeps its trailing
    /// delimiter. A delimiter-free run longer than the target stays unsplit.
    fn split_by_sentences(&self, text: &str) -> Vec<String> {
        let mut sentences: Vec<String> = Vec::new();
        let mut buf = String::new();

        for c in text.chars() {
            buf.push(c);
            if SENTENCE_ENDERS.contains(&c) {
                let s = buf.trim();
                if !s.is_empty() {
                    sentences.push(s.to_string());
                }
                buf.clear();
            }
        }
        let s = buf.trim();
        if !s.is_empty() {
            sentences.push(s.to_string());
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_size = 0usize;

        for sentence in sentences {
            let sentence_size = visual_len(&sentence);

            if current_size + sentence_size > self.config.target_size {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                }
                current = sentence;
                current_size = sentence_size;
            } else {
                current.push_str(&sentence);
                current_size += sentence_size;
            }
        }

        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }

        chunks
    }

    /// Prepend an ellipsis-marked tail of each chunk onto its successor,
    /// unless the successor already starts with that tail.
    fn apply_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        let mut result = Vec::with_capacity(chunks.len());
        result.push(chunks[0].clone());

        for i in 1..chunks.len() {
            let tail = self.tail_text(&chunks[i - 1], self.config.overlap);
            let curr = &chunks[i];

            let prefix: String = tail.chars().take(20).collect();
            if !tail.is_empty() && !curr.starts_with(&prefix) {
                result.push(format!("...{}\n\n{}", tail, curr));
            } else {
                result.push(curr.clone());
            }
        }

        result
    }

    /// Last ~`budget` visual characters of `text`, trimmed forward to the
    /// first natural boundary found within the first half of the candidate.
    fn tail_text(&self, text: &str, budget: usize) -> String {
        if visual_len(text) <= budget {
            return text.trim().to_string();
        }

        // Walk backwards in visual half-units to the approximate start.
        let mut halves = 0usize;
        let mut start = text.len();
        for (pos, c) in text.char_indices().rev() {
            halves += if (c as u32) > 127 { 2 } else { 1 };
            start = pos;
            if halves / 2 >= budget {
                break;
            }
        }

        let mut tail = &text[start..];
        for boundary in TAIL_BOUNDARIES {
            if let Some(idx) = tail.find(boundary) {
                if idx < tail.len() / 2 {
                    tail = &tail[idx + boundary.len()..];
                    break;
                }
            }
        }

        tail.trim().to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
