//! Guide store - rusqlite-backed storage for documents, chunks, aliases and
//! per-group settings.
//!
//! Documents own their chunks (1:N, cascade delete). Chunks carry a scope
//! tier: `global` chunks are visible everywhere, `group` chunks only to the
//! chat group that imported them. Aliases are global.
//!
//! Default location: ~/.limbus-rag/guide.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

// ============================================================================
// Data Directory
// ============================================================================

/// Data directory path (~/.limbus-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".limbus-rag")
}

// ============================================================================
// Data Model
// ============================================================================

/// Visibility tier of a document or chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Group,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "global" => Some(Scope::Global),
            "group" => Some(Scope::Group),
            _ => None,
        }
    }
}

/// Structured entity mentions extracted from chunk text.
///
/// Each list is duplicate-free and keeps first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default)]
    pub identities: Vec<String>,
    #[serde(default)]
    pub egos: Vec<String>,
    #[serde(default)]
    pub sinners: Vec<String>,
}

/// A retrievable unit of text.
///
/// Created in bulk when a document is imported (chunking + tagging),
/// immutable afterwards except for deletion cascading from its document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// 0-based ordinal within the source document, contiguous.
    pub index: usize,
    pub doc_name: String,
    /// Visual-size metric of the content (derived, not authoritative).
    pub char_count: usize,
    pub tags: Vec<String>,
    pub entities: Entities,
    pub scope: Scope,
    /// Required when `scope == Group`, meaningless otherwise.
    pub group_id: Option<String>,
}

/// A stored document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub scope: Scope,
    pub group_id: Option<String>,
    pub name: String,
    pub created_at: String,
    pub raw_text: String,
    pub raw_text_len: usize,
}

/// An alias entry: alternate name -> canonical term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub alias: String,
    pub canonical: String,
    pub alias_type: String,
}

/// Per-group settings.
#[derive(Debug, Clone)]
pub struct GroupSettings {
    pub group_id: String,
    pub default_mode: String,
    pub last_import_at: Option<String>,
}

/// Knowledge base statistics, split by scope.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub global_docs: usize,
    pub global_chunks: usize,
    pub group_docs: usize,
    pub group_chunks: usize,
}

impl StoreStats {
    pub fn total_docs(&self) -> usize {
        self.global_docs + self.group_docs
    }

    pub fn total_chunks(&self) -> usize {
        self.global_chunks + self.group_chunks
    }
}

// ============================================================================
// GuideStore
// ============================================================================

/// SQLite storage for the guide knowledge base.
pub struct GuideStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl GuideStore {
    /// Open the store at `path`, creating the file and schema if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// Open at the default location (~/.limbus-rag/guide.db).
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)
                .context("Failed to create data directory")?;
        }
        Self::open(&data_dir.join("guide.db"))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL DEFAULT 'global',
                group_id TEXT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                raw_text_len INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id INTEGER NOT NULL,
                scope TEXT NOT NULL DEFAULT 'global',
                group_id TEXT,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                char_count INTEGER NOT NULL DEFAULT 0,
                doc_name TEXT NOT NULL DEFAULT '',
                tags_json TEXT NOT NULL DEFAULT '[]',
                entities_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                FOREIGN KEY (doc_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS aliases (
                alias TEXT PRIMARY KEY,
                canonical TEXT NOT NULL,
                type TEXT DEFAULT 'other',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_settings (
                group_id TEXT PRIMARY KEY,
                default_mode TEXT DEFAULT 'simple',
                last_import_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_scope ON chunks(scope);
            CREATE INDEX IF NOT EXISTS idx_chunks_group_id ON chunks(group_id);
            CREATE INDEX IF NOT EXISTS idx_documents_scope ON documents(scope);
            CREATE INDEX IF NOT EXISTS idx_documents_group_id ON documents(group_id);
            "#,
        )
        .context("Failed to create schema")?;

        tracing::debug!("Guide store initialized at {:?}", self.db_path);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Insert a document and return its id.
    pub fn add_document(
        &self,
        name: &str,
        raw_text: &str,
        scope: Scope,
        group_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO documents (scope, group_id, name, created_at, raw_text, raw_text_len)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scope.as_str(),
                group_id,
                name,
                now,
                raw_text,
                raw_text.chars().count() as i64
            ],
        )
        .context("Failed to insert document")?;

        let id = conn.last_insert_rowid();
        tracing::info!("Added document: {} (id={}, scope={})", name, id, scope.as_str());
        Ok(id)
    }

    /// List documents, optionally filtered by scope and/or group.
    pub fn get_documents(
        &self,
        scope: Option<Scope>,
        group_id: Option<&str>,
    ) -> Result<Vec<Document>> {
        let conn = self.lock()?;

        let mut query = String::from(
            "SELECT id, scope, group_id, name, created_at, raw_text, raw_text_len
             FROM documents WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(s) = scope {
            query.push_str(" AND scope = ?");
            args.push(s.as_str().to_string());
        }
        if let Some(g) = group_id {
            query.push_str(" AND group_id = ?");
            args.push(g.to_string());
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_document)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_document(&self, doc_id: i64) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, scope, group_id, name, created_at, raw_text, raw_text_len
             FROM documents WHERE id = ?1",
        )?;
        let doc = stmt.query_row(params![doc_id], row_to_document).ok();
        Ok(doc)
    }

    /// Delete a document together with its chunks.
    pub fn delete_document(&self, doc_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![doc_id])?;
        Ok(rows > 0)
    }

    /// Delete all documents (and their chunks) matching the filter.
    /// Returns the number of documents removed.
    pub fn clear_documents(
        &self,
        scope: Option<Scope>,
        group_id: Option<&str>,
    ) -> Result<usize> {
        let conn = self.lock()?;

        let mut conditions: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(s) = scope {
            conditions.push("scope = ?");
            args.push(s.as_str().to_string());
        }
        if let Some(g) = group_id {
            conditions.push("group_id = ?");
            args.push(g.to_string());
        }
        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };

        let doc_ids: Vec<i64> = {
            let mut stmt =
                conn.prepare(&format!("SELECT id FROM documents WHERE {}", where_clause))?;
            let rows =
                stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        if doc_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; doc_ids.len()].join(",");
        conn.execute(
            &format!("DELETE FROM chunks WHERE doc_id IN ({})", placeholders),
            rusqlite::params_from_iter(doc_ids.iter()),
        )?;
        conn.execute(
            &format!("DELETE FROM documents WHERE {}", where_clause),
            rusqlite::params_from_iter(args.iter()),
        )?;

        tracing::info!("Cleared {} documents", doc_ids.len());
        Ok(doc_ids.len())
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Insert chunks for a document, preserving ordinal order.
    pub fn add_chunks(&self, doc_id: i64, chunks: &[Chunk]) -> Result<usize> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (doc_id, scope, group_id, chunk_index, content,
                                     char_count, doc_name, tags_json, entities_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    doc_id,
                    chunk.scope.as_str(),
                    chunk.group_id,
                    chunk.index as i64,
                    chunk.content,
                    chunk.char_count as i64,
                    chunk.doc_name,
                    serde_json::to_string(&chunk.tags)?,
                    serde_json::to_string(&chunk.entities)?,
                    now
                ],
            )?;
        }
        tx.commit()?;

        Ok(chunks.len())
    }

    /// Get chunks with optional filters, ordered by (doc_id, chunk_index).
    pub fn get_chunks(
        &self,
        scope: Option<Scope>,
        group_id: Option<&str>,
        doc_id: Option<i64>,
    ) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let mut query = String::from(
            "SELECT content, chunk_index, doc_name, char_count, tags_json, entities_json,
                    scope, group_id
             FROM chunks WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(s) = scope {
            query.push_str(" AND scope = ?");
            args.push(s.as_str().to_string());
        }
        if let Some(g) = group_id {
            query.push_str(" AND group_id = ?");
            args.push(g.to_string());
        }
        if let Some(d) = doc_id {
            query.push_str(" AND doc_id = ?");
            args.push(d.to_string());
        }
        query.push_str(" ORDER BY doc_id, chunk_index");

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_chunk)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All chunks visible to a group: global chunks plus that group's chunks.
    pub fn chunks_for_search(&self, group_id: Option<&str>) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let mut chunks: Vec<Chunk> = {
            let mut stmt = conn.prepare(
                "SELECT content, chunk_index, doc_name, char_count, tags_json, entities_json,
                        scope, group_id
                 FROM chunks WHERE scope = 'global' ORDER BY doc_id, chunk_index",
            )?;
            let rows = stmt.query_map([], row_to_chunk)?;
            rows.filter_map(|r| r.ok()).collect()
        };

        if let Some(g) = group_id {
            let mut stmt = conn.prepare(
                "SELECT content, chunk_index, doc_name, char_count, tags_json, entities_json,
                        scope, group_id
                 FROM chunks WHERE scope = 'group' AND group_id = ?1
                 ORDER BY doc_id, chunk_index",
            )?;
            let rows = stmt.query_map(params![g], row_to_chunk)?;
            chunks.extend(rows.filter_map(|r| r.ok()));
        }

        Ok(chunks)
    }

    pub fn chunk_count(&self, scope: Option<Scope>, group_id: Option<&str>) -> Result<usize> {
        let conn = self.lock()?;

        let mut query = String::from("SELECT COUNT(*) FROM chunks WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(s) = scope {
            query.push_str(" AND scope = ?");
            args.push(s.as_str().to_string());
        }
        if let Some(g) = group_id {
            query.push_str(" AND group_id = ?");
            args.push(g.to_string());
        }

        let count: i64 = conn.query_row(
            &query,
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========================================================================
    // Aliases
    // ========================================================================

    /// Add or overwrite an alias. Keys are stored lowercased.
    pub fn add_alias(&self, alias: &str, canonical: &str, alias_type: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO aliases (alias, canonical, type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![alias.to_lowercase(), canonical, alias_type, now],
        )?;
        Ok(())
    }

    pub fn get_aliases(&self) -> Result<Vec<Alias>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT alias, canonical, type FROM aliases ORDER BY alias")?;
        let rows = stmt.query_map([], |row| {
            Ok(Alias {
                alias: row.get(0)?,
                canonical: row.get(1)?,
                alias_type: row.get(2)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// alias -> canonical pairs.
    pub fn alias_map(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT alias, canonical FROM aliases")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_alias(&self, alias: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM aliases WHERE alias = ?1",
            params![alias.to_lowercase()],
        )?;
        Ok(rows > 0)
    }

    // ========================================================================
    // Group Settings
    // ========================================================================

    /// Get settings for a group, creating the default row on first access.
    pub fn group_settings(&self, group_id: &str) -> Result<GroupSettings> {
        let conn = self.lock()?;

        let existing = conn
            .query_row(
                "SELECT group_id, default_mode, last_import_at FROM group_settings
                 WHERE group_id = ?1",
                params![group_id],
                |row| {
                    Ok(GroupSettings {
                        group_id: row.get(0)?,
                        default_mode: row.get(1)?,
                        last_import_at: row.get(2)?,
                    })
                },
            )
            .ok();

        if let Some(settings) = existing {
            return Ok(settings);
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO group_settings (group_id, default_mode, created_at)
             VALUES (?1, 'simple', ?2)",
            params![group_id, now],
        )?;

        Ok(GroupSettings {
            group_id: group_id.to_string(),
            default_mode: "simple".to_string(),
            last_import_at: None,
        })
    }

    pub fn set_default_mode(&self, group_id: &str, mode: &str) -> Result<()> {
        self.group_settings(group_id)?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE group_settings SET default_mode = ?1 WHERE group_id = ?2",
            params![mode, group_id],
        )?;
        Ok(())
    }

    pub fn touch_last_import(&self, group_id: &str) -> Result<()> {
        self.group_settings(group_id)?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE group_settings SET last_import_at = ?1 WHERE group_id = ?2",
            params![Utc::now().to_rfc3339(), group_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self, group_id: Option<&str>) -> Result<StoreStats> {
        let conn = self.lock()?;
        let mut stats = StoreStats::default();

        stats.global_docs = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE scope = 'global'",
            [],
            |row| row.get::<_, i64>(0),
        )? as usize;
        stats.global_chunks = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE scope = 'global'",
            [],
            |row| row.get::<_, i64>(0),
        )? as usize;

        if let Some(g) = group_id {
            stats.group_docs = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE scope = 'group' AND group_id = ?1",
                params![g],
                |row| row.get::<_, i64>(0),
            )? as usize;
            stats.group_chunks = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE scope = 'group' AND group_id = ?1",
                params![g],
                |row| row.get::<_, i64>(0),
            )? as usize;
        }

        Ok(stats)
    }

    /// All group ids that own at least one document.
    pub fn all_group_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT group_id FROM documents WHERE group_id IS NOT NULL")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        scope: Scope::parse(&row.get::<_, String>(1)?).unwrap_or(Scope::Global),
        group_id: row.get(2)?,
        name: row.get(3)?,
        created_at: row.get(4)?,
        raw_text: row.get(5)?,
        raw_text_len: row.get::<_, i64>(6)? as usize,
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let tags_json: String = row.get(4)?;
    let entities_json: String = row.get(5)?;
    Ok(Chunk {
        content: row.get(0)?,
        index: row.get::<_, i64>(1)? as usize,
        doc_name: row.get(2)?,
        char_count: row.get::<_, i64>(3)? as usize,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        entities: serde_json::from_str(&entities_json).unwrap_or_default(),
        scope: Scope::parse(&row.get::<_, String>(6)?).unwrap_or(Scope::Global),
        group_id: row.get(7)?,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, GuideStore) {
        let dir = TempDir::new().unwrap();
        let store = GuideStore::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn sample_chunk(content: &str, index: usize, scope: Scope, group_id: Option<&str>) -> Chunk {
        Chunk {
            content: content.to_string(),
            index,
            doc_name: "测试文档".to_string(),
            char_count: content.chars().count(),
            tags: vec!["状态:Burn".to_string()],
            entities: Entities {
                statuses: vec!["burn".to_string()],
                ..Default::default()
            },
            scope,
            group_id: group_id.map(String::from),
        }
    }

    #[test]
    fn test_add_and_get_document() {
        let (_dir, store) = create_test_store();

        let id = store
            .add_document("燃烧队指南", "燃烧队的核心是叠层。", Scope::Global, None)
            .unwrap();
        assert!(id > 0);

        let doc = store.get_document(id).unwrap().unwrap();
        assert_eq!(doc.name, "燃烧队指南");
        assert_eq!(doc.scope, Scope::Global);
        assert_eq!(doc.raw_text_len, 10);
    }

    #[test]
    fn test_chunk_roundtrip_preserves_tags_and_entities() {
        let (_dir, store) = create_test_store();

        let doc_id = store.add_document("doc", "text", Scope::Global, None).unwrap();
        let chunks = vec![
            sample_chunk("第一块", 0, Scope::Global, None),
            sample_chunk("第二块", 1, Scope::Global, None),
        ];
        store.add_chunks(doc_id, &chunks).unwrap();

        let loaded = store.get_chunks(None, None, Some(doc_id)).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].index, 0);
        assert_eq!(loaded[1].index, 1);
        assert_eq!(loaded[0].tags, vec!["状态:Burn".to_string()]);
        assert_eq!(loaded[0].entities.statuses, vec!["burn".to_string()]);
    }

    #[test]
    fn test_delete_document_cascades_to_chunks() {
        let (_dir, store) = create_test_store();

        let doc_id = store.add_document("doc", "text", Scope::Global, None).unwrap();
        store
            .add_chunks(doc_id, &[sample_chunk("内容", 0, Scope::Global, None)])
            .unwrap();
        assert_eq!(store.chunk_count(None, None).unwrap(), 1);

        assert!(store.delete_document(doc_id).unwrap());
        assert_eq!(store.chunk_count(None, None).unwrap(), 0);
        assert!(store.get_document(doc_id).unwrap().is_none());
    }

    #[test]
    fn test_chunks_for_search_scope_union() {
        let (_dir, store) = create_test_store();

        let g_doc = store.add_document("global doc", "t", Scope::Global, None).unwrap();
        store
            .add_chunks(g_doc, &[sample_chunk("全局内容", 0, Scope::Global, None)])
            .unwrap();

        let a_doc = store
            .add_document("group a doc", "t", Scope::Group, Some("a"))
            .unwrap();
        store
            .add_chunks(a_doc, &[sample_chunk("A群内容", 0, Scope::Group, Some("a"))])
            .unwrap();

        let b_doc = store
            .add_document("group b doc", "t", Scope::Group, Some("b"))
            .unwrap();
        store
            .add_chunks(b_doc, &[sample_chunk("B群内容", 0, Scope::Group, Some("b"))])
            .unwrap();

        // No group: global only.
        assert_eq!(store.chunks_for_search(None).unwrap().len(), 1);

        // Group a sees global plus its own chunks, never b's.
        let visible = store.chunks_for_search(Some("a")).unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|c| c.group_id.as_deref() != Some("b")));
    }

    #[test]
    fn test_clear_documents_by_group() {
        let (_dir, store) = create_test_store();

        store.add_document("keep", "t", Scope::Global, None).unwrap();
        let doc = store
            .add_document("drop", "t", Scope::Group, Some("a"))
            .unwrap();
        store
            .add_chunks(doc, &[sample_chunk("x", 0, Scope::Group, Some("a"))])
            .unwrap();

        let removed = store.clear_documents(Some(Scope::Group), Some("a")).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_documents(None, None).unwrap().len(), 1);
        assert_eq!(store.chunk_count(None, None).unwrap(), 0);
    }

    #[test]
    fn test_alias_upsert_and_case_insensitive_key() {
        let (_dir, store) = create_test_store();

        store.add_alias("红叔", "洪鹿", "sinner").unwrap();
        store.add_alias("MD", "镜牢", "mode").unwrap();

        let map = store.alias_map().unwrap();
        assert!(map.contains(&("红叔".to_string(), "洪鹿".to_string())));
        // Key was lowercased on insert.
        assert!(map.contains(&("md".to_string(), "镜牢".to_string())));

        // Re-adding overwrites the canonical mapping.
        store.add_alias("红叔", "希斯克利夫", "sinner").unwrap();
        let map = store.alias_map().unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains(&("红叔".to_string(), "希斯克利夫".to_string())));

        assert!(store.delete_alias("MD").unwrap());
        assert_eq!(store.alias_map().unwrap().len(), 1);
    }

    #[test]
    fn test_group_settings_get_or_create() {
        let (_dir, store) = create_test_store();

        let settings = store.group_settings("12345").unwrap();
        assert_eq!(settings.default_mode, "simple");
        assert!(settings.last_import_at.is_none());

        store.set_default_mode("12345", "detail").unwrap();
        store.touch_last_import("12345").unwrap();

        let settings = store.group_settings("12345").unwrap();
        assert_eq!(settings.default_mode, "detail");
        assert!(settings.last_import_at.is_some());
    }

    #[test]
    fn test_stats_split_by_scope() {
        let (_dir, store) = create_test_store();

        let g = store.add_document("g", "t", Scope::Global, None).unwrap();
        store
            .add_chunks(g, &[sample_chunk("x", 0, Scope::Global, None)])
            .unwrap();
        let a = store.add_document("a", "t", Scope::Group, Some("a")).unwrap();
        store
            .add_chunks(a, &[sample_chunk("y", 0, Scope::Group, Some("a"))])
            .unwrap();

        let stats = store.stats(Some("a")).unwrap();
        assert_eq!(stats.global_docs, 1);
        assert_eq!(stats.group_docs, 1);
        assert_eq!(stats.total_chunks(), 2);

        let stats = store.stats(None).unwrap();
        assert_eq!(stats.group_docs, 0);
        assert_eq!(stats.total_docs(), 1);
    }

    #[test]
    fn test_all_group_ids() {
        let (_dir, store) = create_test_store();
        store.add_document("a", "t", Scope::Group, Some("g1")).unwrap();
        store.add_document("b", "t", Scope::Group, Some("g2")).unwrap();
        store.add_document("c", "t", Scope::Global, None).unwrap();

        let mut ids = store.all_group_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["g1".to_string(), "g2".to_string()]);
    }
}
