//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::embedding::{EmbeddingProvider, HttpEmbedding};
use crate::knowledge::{
    get_data_dir, GuideRetriever, GuideStore, ScoreBreakdown, Scope, SearchHit, SearchOutcome,
    DEFAULT_TOP_K,
};
use crate::rerank::{HttpRerank, RerankProvider};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "limbus-rag")]
#[command(version, about = "Limbus Company guide knowledge base", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a guide document from a file or inline text
    Import {
        /// Path to a text/markdown file
        file: Option<PathBuf>,

        /// Inline document text
        #[arg(short, long)]
        text: Option<String>,

        /// Document name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,

        /// Scope: global or group
        #[arg(short, long, default_value = "global")]
        scope: String,

        /// Group id (required for group scope)
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Search the knowledge base
    Search {
        /// Search query
        query: String,

        /// Number of results
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Group id for scope boosting
        #[arg(short, long)]
        group: Option<String>,

        /// Show query diagnostics (tokens, tags, alias rewrites)
        #[arg(long)]
        debug: bool,

        /// Skip embedding/rerank providers even if configured
        #[arg(long)]
        lexical: bool,
    },

    /// List stored documents
    List {
        /// Filter by scope: global or group
        #[arg(short, long)]
        scope: Option<String>,

        /// Filter by group id
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Delete a document (and its chunks) by id
    Delete {
        /// Document id
        id: i64,
    },

    /// Delete all documents matching a filter
    Clear {
        /// Filter by scope: global or group
        #[arg(short, long)]
        scope: Option<String>,

        /// Filter by group id
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Manage query aliases
    Alias {
        #[command(subcommand)]
        command: AliasCommands,
    },

    /// Show tag statistics over stored chunks
    Tags {
        /// Restrict to chunks visible to this group
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Show knowledge base status
    Status,
}

#[derive(Subcommand)]
pub enum AliasCommands {
    /// Add or overwrite an alias
    Add {
        /// Alias text (matched case-insensitively in queries)
        alias: String,

        /// Canonical term the alias rewrites to
        canonical: String,

        /// Alias type label
        #[arg(short, long, default_value = "general")]
        r#type: String,
    },

    /// List all aliases
    List,

    /// Remove an alias
    Remove {
        /// Alias text
        alias: String,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Import {
            file,
            text,
            name,
            scope,
            group,
        } => cmd_import(file, text, name, &scope, group.as_deref()),
        Commands::Search {
            query,
            top_k,
            group,
            debug,
            lexical,
        } => cmd_search(&query, top_k, group.as_deref(), debug, lexical).await,
        Commands::List { scope, group } => cmd_list(scope.as_deref(), group.as_deref()),
        Commands::Delete { id } => cmd_delete(id),
        Commands::Clear { scope, group } => cmd_clear(scope.as_deref(), group.as_deref()),
        Commands::Alias { command } => cmd_alias(command),
        Commands::Tags { group } => cmd_tags(group.as_deref()),
        Commands::Status => cmd_status(),
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

fn cmd_import(
    file: Option<PathBuf>,
    text: Option<String>,
    name: Option<String>,
    scope: &str,
    group: Option<&str>,
) -> Result<()> {
    let scope = parse_scope(scope)?;

    let (content, default_name) = match (file, text) {
        (Some(path), None) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            (content, stem)
        }
        (None, Some(text)) => (text, "inline".to_string()),
        (Some(_), Some(_)) => bail!("Provide either a file or --text, not both"),
        (None, None) => bail!("Provide a file path or --text"),
    };

    let name = name.unwrap_or(default_name);
    let retriever = open_retriever(false)?;
    let report = retriever.import_document(&name, &content, scope, group)?;

    println!(
        "[OK] Imported '{}' (doc #{}, {} chunks, scope={})",
        report.doc_name,
        report.doc_id,
        report.chunk_count,
        scope.as_str()
    );
    Ok(())
}

async fn cmd_search(
    query: &str,
    top_k: usize,
    group: Option<&str>,
    debug: bool,
    lexical: bool,
) -> Result<()> {
    let retriever = open_retriever(!lexical)?;

    if debug {
        let result = retriever.search_with_debug(query, top_k, group)?;
        let info = &result.query_info;
        println!("[*] Query: \"{}\"", info.original_query);
        println!("    Processed: \"{}\"", info.processed_query);
        println!("    Tokens: {}", info.tokens.join(" "));
        println!("    Tags: {}", info.extracted_tags.join(", "));
        if !info.alias_substitutions.is_empty() {
            println!("    Aliases: {}", info.alias_substitutions.join(", "));
        }
        println!(
            "    Corpus: {} chunks, {} unique terms, avg len {:.1}",
            result.stats.total_chunks, result.stats.unique_terms, result.stats.avg_doc_len
        );
        println!();
        print_hits(&result.results);
        return Ok(());
    }

    let outcome = if lexical {
        retriever.search_lexical(query, top_k, group)?
    } else {
        retriever.search(query, top_k, group).await?
    };

    match outcome {
        SearchOutcome::EmptyCorpus => {
            println!("[!] Knowledge base is empty. Import a document first.");
        }
        SearchOutcome::NoMatch => {
            println!("[!] No results for \"{}\"", query);
        }
        SearchOutcome::Hits(hits) => {
            println!("[OK] {} result(s):\n", hits.len());
            print_hits(&hits);
        }
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    for (i, hit) in hits.iter().enumerate() {
        let breakdown = match &hit.breakdown {
            ScoreBreakdown::Lexical {
                bm25,
                tag_boost,
                group_boost,
                ..
            } => format!("bm25={:.3} tag={:.1} group={:.1}", bm25, tag_boost, group_boost),
            ScoreBreakdown::Semantic {
                cosine,
                tag_boost,
                group_boost,
            } => format!("cos={:.3} tag={:.1} group={:.1}", cosine, tag_boost, group_boost),
        };
        let prior = hit
            .prior_score
            .map(|p| format!(" (pre-rerank {:.3})", p))
            .unwrap_or_default();

        println!(
            "{}. [{:.4}]{} {} #{} [{}]",
            i + 1,
            hit.score,
            prior,
            hit.chunk.doc_name,
            hit.chunk.index,
            breakdown
        );
        if !hit.chunk.tags.is_empty() {
            println!("   Tags: {}", hit.chunk.tags.join(", "));
        }
        println!("   {}", truncate_text(&hit.chunk.content, 200));
        println!();
    }
}

fn cmd_list(scope: Option<&str>, group: Option<&str>) -> Result<()> {
    let store = GuideStore::open_default()?;
    let scope = scope.map(parse_scope).transpose()?;
    let docs = store.get_documents(scope, group)?;

    if docs.is_empty() {
        println!("[!] No documents stored.");
        return Ok(());
    }

    println!("[OK] {} document(s):\n", docs.len());
    for doc in docs {
        let scope_display = match doc.group_id.as_deref() {
            Some(gid) => format!("{}:{}", doc.scope.as_str(), gid),
            None => doc.scope.as_str().to_string(),
        };
        println!("  #{:<4} [{}] {}", doc.id, scope_display, doc.name);
        println!("        {} | {} chars", doc.created_at, doc.raw_text_len);
        println!();
    }
    Ok(())
}

fn cmd_delete(id: i64) -> Result<()> {
    let store = GuideStore::open_default()?;
    if store.delete_document(id)? {
        println!("[OK] Deleted document #{}", id);
    } else {
        println!("[!] Document #{} not found", id);
    }
    Ok(())
}

fn cmd_clear(scope: Option<&str>, group: Option<&str>) -> Result<()> {
    let store = GuideStore::open_default()?;
    let scope = scope.map(parse_scope).transpose()?;
    let removed = store.clear_documents(scope, group)?;
    println!("[OK] Removed {} document(s)", removed);
    Ok(())
}

fn cmd_alias(command: AliasCommands) -> Result<()> {
    let store = GuideStore::open_default()?;

    match command {
        AliasCommands::Add {
            alias,
            canonical,
            r#type,
        } => {
            store.add_alias(&alias, &canonical, &r#type)?;
            println!("[OK] {} -> {}", alias.to_lowercase(), canonical);
        }
        AliasCommands::List => {
            let aliases = store.get_aliases()?;
            if aliases.is_empty() {
                println!("[!] No aliases defined.");
                return Ok(());
            }
            println!("[OK] {} alias(es):\n", aliases.len());
            for a in aliases {
                println!("  {} -> {} [{}]", a.alias, a.canonical, a.alias_type);
            }
        }
        AliasCommands::Remove { alias } => {
            if store.delete_alias(&alias)? {
                println!("[OK] Removed alias '{}'", alias.to_lowercase());
            } else {
                println!("[!] Alias '{}' not found", alias.to_lowercase());
            }
        }
    }
    Ok(())
}

fn cmd_tags(group: Option<&str>) -> Result<()> {
    let store = GuideStore::open_default()?;
    let retriever = GuideRetriever::new(store);
    let chunks = retriever.store().chunks_for_search(group)?;

    if chunks.is_empty() {
        println!("[!] No chunks stored.");
        return Ok(());
    }

    let stats = retriever.tagger().tag_statistics(&chunks);
    println!("[OK] Tags over {} chunks:\n", chunks.len());
    for (tag, count) in stats {
        println!("  {:<5} {}", count, tag);
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    println!("limbus-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] Data directory: {}", get_data_dir().display());

    if std::env::var("EMBEDDING_BASE_URL").is_ok() {
        println!("[OK] Embedding provider: configured");
    } else {
        println!("[!] Embedding provider: not configured (lexical search only)");
        println!("    Set EMBEDDING_BASE_URL / EMBEDDING_API_KEY to enable");
    }
    if std::env::var("RERANK_BASE_URL").is_ok() {
        println!("[OK] Rerank provider: configured");
    } else {
        println!("[!] Rerank provider: not configured");
    }

    match GuideStore::open_default() {
        Ok(store) => {
            let stats = store.stats(None)?;
            let group_docs = store.get_documents(Some(Scope::Group), None)?.len();
            let group_chunks = store.chunk_count(Some(Scope::Group), None)?;
            println!(
                "[OK] Documents: {} global, {} group ({} total)",
                stats.global_docs,
                group_docs,
                stats.global_docs + group_docs
            );
            println!(
                "     Chunks: {} global, {} group ({} total)",
                stats.global_chunks,
                group_chunks,
                stats.global_chunks + group_chunks
            );
            let groups = store.all_group_ids()?;
            if !groups.is_empty() {
                println!("     Groups: {}", groups.join(", "));
            }
        }
        Err(e) => {
            println!("[!] Failed to open store: {}", e);
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn open_retriever(with_providers: bool) -> Result<GuideRetriever> {
    let store = GuideStore::open_default().context("Failed to open knowledge store")?;

    if !with_providers {
        return Ok(GuideRetriever::new(store));
    }

    // Providers are optional: missing env config just means lexical search.
    let embedding: Option<Arc<dyn EmbeddingProvider>> = match HttpEmbedding::from_env() {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            tracing::debug!("No embedding provider: {}", e);
            None
        }
    };
    let reranker: Option<Arc<dyn RerankProvider>> = match HttpRerank::from_env() {
        Ok(p) => Some(Arc::new(p)),
        Err(e) => {
            tracing::debug!("No rerank provider: {}", e);
            None
        }
    };

    Ok(GuideRetriever::with_providers(store, embedding, reranker))
}

fn parse_scope(s: &str) -> Result<Scope> {
    Scope::parse(s).ok_or_else(|| anyhow::anyhow!("Invalid scope '{}': use global or group", s))
}

/// UTF-8 safe truncation for display.
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
