use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ocg_core::{OcgError, Result};

use crate::embedding::{select_provider, EmbeddingProvider};
use crate::index::{DistanceMetric, HnswConfig, HnswIndex};

/// Categories the store understands.
pub const MEMORY_CATEGORIES: &[&str] = &["preference", "decision", "fact", "entity", "other"];

/// Vector memory store configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// API key for the remote embedding provider (supports `${VAR}` refs).
    pub api_key: String,
    /// Remote embedding model name; empty disables the remote provider.
    pub embedding_model: String,
    /// Local embedding server URL; empty disables the local provider.
    pub embedding_server: String,
    /// Embedding dimension. 0 means auto-detect from the provider.
    pub embedding_dim: usize,
    pub max_results: usize,
    pub min_score: f32,
    /// Flat-dump path for the HNSW index; `None` disables persistence.
    pub hnsw_path: Option<PathBuf>,
    /// Disable the ANN index entirely (linear scan only).
    pub hnsw_enabled: bool,
    pub metric: DistanceMetric,
    /// Hybrid search toggle. Unset means enabled; only an explicit `false`
    /// turns it off.
    pub hybrid: Option<bool>,
    pub vector_weight: f32,
    pub text_weight: f32,
    pub candidate_multiplier: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            embedding_model: String::new(),
            embedding_server: String::new(),
            embedding_dim: 0,
            max_results: 5,
            min_score: 0.7,
            hnsw_path: None,
            hnsw_enabled: true,
            metric: DistanceMetric::Cosine,
            hybrid: None,
            vector_weight: 0.7,
            text_weight: 0.3,
            candidate_multiplier: 4,
        }
    }
}

impl MemoryConfig {
    pub fn hybrid_enabled(&self) -> bool {
        self.hybrid.unwrap_or(true)
    }
}

/// A long-term memory row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub text: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub importance: f64,
    pub category: String,
    pub source: String,
    pub embedding_dim: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A search hit with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResult {
    pub entry: MemoryEntry,
    pub score: f32,
    pub matched: bool,
}

struct Ann {
    index: HnswIndex,
    /// HNSW label position → memory id.
    ids: Vec<String>,
}

/// The unified vector memory store: SQLite rows + FTS5 keyword index +
/// optional HNSW approximate index, with hybrid ranking on top.
pub struct VectorMemoryStore {
    db: Arc<Mutex<Connection>>,
    ann: Mutex<Option<Ann>>,
    embedding: Option<Box<dyn EmbeddingProvider>>,
    fts_available: Mutex<bool>,
    cfg: MemoryConfig,
}

fn db_err(e: rusqlite::Error) -> OcgError {
    OcgError::Memory(e.to_string())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl VectorMemoryStore {
    /// Open the store, selecting an embedding provider in priority order:
    /// local server (with readiness probe), remote API, placeholder.
    pub async fn open(db_path: impl AsRef<Path>, mut cfg: MemoryConfig) -> Result<Self> {
        let provider = select_provider(
            &cfg.embedding_server,
            &cfg.embedding_model,
            &cfg.api_key,
            cfg.embedding_dim,
        )
        .await;
        if let Some(p) = &provider {
            cfg.embedding_dim = p.dim();
        }
        Self::open_with_provider(db_path, cfg, provider)
    }

    /// Open with an explicit provider (or none, degrading to keyword-only
    /// search). Used directly by tests and by `open`.
    pub fn open_with_provider(
        db_path: impl AsRef<Path>,
        mut cfg: MemoryConfig,
        provider: Option<Box<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        if let Some(p) = &provider {
            cfg.embedding_dim = p.dim();
        } else if cfg.embedding_dim == 0 {
            cfg.embedding_dim = 768;
        }

        let conn = Connection::open(db_path.as_ref()).map_err(db_err)?;
        conn.execute_batch("PRAGMA busy_timeout=5000;").map_err(db_err)?;
        init_schema(&conn)?;

        let store = Self {
            db: Arc::new(Mutex::new(conn)),
            ann: Mutex::new(None),
            embedding: provider,
            fts_available: Mutex::new(true),
            cfg,
        };

        store.ensure_fts();
        store.backfill_embedding_dim();

        if store.embedding.is_some() && store.cfg.hnsw_enabled {
            let hnsw_cfg = HnswConfig {
                metric: store.cfg.metric,
                storage_path: store.cfg.hnsw_path.clone(),
                ..HnswConfig::new(store.cfg.embedding_dim, None)
            };
            match HnswIndex::new(hnsw_cfg) {
                Ok(index) => {
                    *store.ann.lock() = Some(Ann {
                        index,
                        ids: Vec::new(),
                    });
                    store.load_existing_vectors();
                }
                Err(e) => {
                    warn!(error = %e, "HNSW init failed, falling back to linear scan");
                }
            }
        }

        info!(
            hnsw = store.ann.lock().is_some(),
            embedding = store
                .embedding
                .as_ref()
                .map(|p| p.name())
                .unwrap_or_else(|| "none".into()),
            dim = store.cfg.embedding_dim,
            "vector memory store initialized"
        );
        Ok(store)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.cfg
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn hnsw_active(&self) -> bool {
        self.ann.lock().is_some()
    }

    // ==================== Core operations ====================

    pub async fn store(&self, text: &str, category: &str, importance: f64) -> Result<String> {
        self.store_with_source(text, category, importance, "manual")
            .await
    }

    pub async fn store_with_source(
        &self,
        text: &str,
        category: &str,
        importance: f64,
        source: &str,
    ) -> Result<String> {
        let vector = self.get_embedding(text).await?;
        let id = Uuid::new_v4().to_string();
        let now = now_secs();
        let source = if source.is_empty() { "manual" } else { source };

        {
            let db = self.db.lock();
            db.execute(
                "INSERT INTO vector_memories
                    (id, text, vector, importance, category, source, embedding_dim,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    text,
                    serialize_vector(&vector),
                    importance,
                    category,
                    source,
                    self.cfg.embedding_dim,
                    now,
                ],
            )
            .map_err(db_err)?;
        }
        self.upsert_fts(&id, text, category);

        // Keep the ANN index in sync; a failed add disables the index.
        {
            let mut ann_guard = self.ann.lock();
            let mut disable = false;
            if let Some(ann) = ann_guard.as_mut() {
                match ann.index.add(&vector) {
                    Ok(()) => {
                        ann.ids.push(id.clone());
                        if let Err(e) = ann.index.save() {
                            warn!(error = %e, "failed to save HNSW dump");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "HNSW add failed, disabling index");
                        disable = true;
                    }
                }
            }
            if disable {
                *ann_guard = None;
            }
        }

        debug!(id = %short_id(&id), category, source, "memory stored");
        Ok(id)
    }

    /// Update text/category/importance of an existing entry. Changed text is
    /// re-embedded; the ANN index is rebuilt from scratch.
    pub async fn update(
        &self,
        id: &str,
        text: &str,
        category: &str,
        importance: f64,
    ) -> Result<bool> {
        if id.is_empty() {
            return Err(OcgError::Input("id required".into()));
        }
        let entry = self.get(id)?;

        let text_changed = !text.trim().is_empty() && text != entry.text;
        let new_text = if text.trim().is_empty() {
            entry.text.clone()
        } else {
            text.to_string()
        };
        let new_category = if category.is_empty() {
            entry.category.clone()
        } else {
            category.to_string()
        };
        let new_importance = if importance > 0.0 {
            importance
        } else {
            entry.importance
        };

        let vector = if text_changed {
            self.get_embedding(&new_text).await?
        } else {
            entry.vector
        };

        {
            let db = self.db.lock();
            db.execute(
                "UPDATE vector_memories
                 SET text = ?1, vector = ?2, importance = ?3, category = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    new_text,
                    serialize_vector(&vector),
                    new_importance,
                    new_category,
                    now_secs(),
                    id,
                ],
            )
            .map_err(db_err)?;
        }
        self.upsert_fts(id, &new_text, &new_category);
        self.rebuild_hnsw();
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<MemoryEntry> {
        let db = self.db.lock();
        let entry = db
            .query_row(
                "SELECT text, vector, importance, category, source, embedding_dim,
                        created_at, updated_at
                 FROM vector_memories WHERE id = ?1",
                params![id],
                |row| {
                    let blob: Vec<u8> = row.get(1)?;
                    Ok(MemoryEntry {
                        id: id.to_string(),
                        text: row.get(0)?,
                        vector: deserialize_vector(&blob).unwrap_or_default(),
                        importance: row.get(2)?,
                        category: row.get(3)?,
                        source: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        embedding_dim: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as usize,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?;
        entry.ok_or_else(|| OcgError::Memory(format!("memory not found: {id}")))
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = {
            let db = self.db.lock();
            db.execute("DELETE FROM vector_memories WHERE id = ?1", params![id])
                .map_err(db_err)?
        };
        if deleted == 0 {
            return Ok(false);
        }
        {
            let db = self.db.lock();
            let _ = db.execute(
                "DELETE FROM vector_memories_fts WHERE id = ?1",
                params![id],
            );
        }
        self.rebuild_hnsw();
        Ok(true)
    }

    pub fn count(&self) -> Result<i64> {
        let db = self.db.lock();
        db.query_row("SELECT COUNT(*) FROM vector_memories", [], |row| row.get(0))
            .map_err(db_err)
    }

    // ==================== Search ====================

    /// Similarity search. Mode selection: keyword-only without a provider,
    /// hybrid by default, otherwise pure vector (HNSW when populated, linear
    /// scan when not).
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<MemoryResult>> {
        let limit = if limit == 0 { self.cfg.max_results } else { limit };
        let min_score = if min_score == 0.0 {
            self.cfg.min_score
        } else {
            min_score
        };

        if self.embedding.is_none() {
            return self.keyword_search(query, limit);
        }

        let query_vec = self.get_embedding(query).await?;

        if self.cfg.hybrid_enabled() {
            return self.hybrid_search(query, &query_vec, limit, min_score);
        }

        self.vector_search(&query_vec, limit, min_score)
    }

    /// Vector candidates from HNSW when populated, else a linear scan.
    fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<MemoryResult>> {
        let ann_hits: Option<Vec<(String, f32)>> = {
            let ann = self.ann.lock();
            match ann.as_ref() {
                Some(ann) if !ann.index.is_empty() => {
                    let hits = ann.index.search(query_vec, limit)?;
                    Some(
                        hits.into_iter()
                            .filter_map(|(label, score)| {
                                ann.ids.get(label).map(|id| (id.clone(), score))
                            })
                            .collect(),
                    )
                }
                _ => None,
            }
        };

        match ann_hits {
            Some(hits) => {
                let mut results = Vec::with_capacity(hits.len());
                for (id, score) in hits {
                    if score < min_score {
                        continue;
                    }
                    match self.get(&id) {
                        Ok(entry) => results.push(MemoryResult {
                            entry,
                            score,
                            matched: true,
                        }),
                        Err(_) => continue,
                    }
                }
                Ok(results)
            }
            None => self.linear_search(query_vec, limit, min_score),
        }
    }

    /// Full-table cosine scan, the fallback when no ANN index is available.
    fn linear_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<MemoryResult>> {
        let mut scored: Vec<(MemoryEntry, f32)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare(
                    "SELECT id, text, vector, importance, category, source, embedding_dim,
                            created_at, updated_at
                     FROM vector_memories",
                )
                .map_err(db_err)?;
            let result: Vec<(MemoryEntry, f32)> = stmt.query_map([], |row| {
                let blob: Vec<u8> = row.get(2)?;
                Ok(MemoryEntry {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    vector: deserialize_vector(&blob).unwrap_or_default(),
                    importance: row.get(3)?,
                    category: row.get(4)?,
                    source: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    embedding_dim: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as usize,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .map(|entry| {
                let score = if entry.vector.len() == query_vec.len() {
                    cosine_similarity(query_vec, &entry.vector)
                } else {
                    0.0
                };
                (entry, score)
            })
            .collect();
            result
        };

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .filter(|(_, score)| *score >= min_score)
            .take(limit)
            .map(|(entry, score)| MemoryResult {
                entry,
                score,
                matched: true,
            })
            .collect())
    }

    /// Weighted vector + keyword ranking.
    fn hybrid_search(
        &self,
        query: &str,
        query_vec: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<MemoryResult>> {
        let cand = limit * self.cfg.candidate_multiplier.max(1);
        let vec_results = self.vector_search(query_vec, cand, 0.0)?;

        let text_scores = if *self.fts_available.lock() {
            self.fts_search(query, cand).unwrap_or_default()
        } else {
            self.like_scores(query, cand)
        };

        let mut merged: HashMap<String, (MemoryEntry, f32)> = HashMap::new();
        for r in vec_results {
            merged.insert(
                r.entry.id.clone(),
                (r.entry, self.cfg.vector_weight * r.score),
            );
        }
        for (id, bm25) in text_scores {
            let text_score = 1.0 / (1.0 + bm25.max(0.0));
            match merged.get_mut(&id) {
                Some((_, score)) => *score += self.cfg.text_weight * text_score,
                None => {
                    if let Ok(entry) = self.get(&id) {
                        merged.insert(id, (entry, self.cfg.text_weight * text_score));
                    }
                }
            }
        }

        let mut list: Vec<(MemoryEntry, f32)> = merged.into_values().collect();
        list.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(list
            .into_iter()
            .filter(|(_, score)| *score >= min_score)
            .take(limit)
            .map(|(entry, score)| MemoryResult {
                entry,
                score,
                matched: true,
            })
            .collect())
    }

    /// Keyword-only search used when no embedding provider is available.
    /// FTS5 with bm25 ranking when possible, LIKE otherwise.
    fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<MemoryResult>> {
        if *self.fts_available.lock() {
            if let Ok(scores) = self.fts_search(query, limit) {
                let mut hits: Vec<(String, f32)> = scores.into_iter().collect();
                hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                let mut results = Vec::new();
                for (id, _) in hits.into_iter().take(limit) {
                    if let Ok(entry) = self.get(&id) {
                        results.push(MemoryResult {
                            entry,
                            score: 1.0,
                            matched: true,
                        });
                    }
                }
                if !results.is_empty() {
                    return Ok(results);
                }
            }
        }

        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id FROM vector_memories
                 WHERE text LIKE ?1 OR category LIKE ?1
                 ORDER BY importance DESC, created_at DESC
                 LIMIT ?2",
            )
            .map_err(db_err)?;
        let ids: Vec<String> = stmt
            .query_map(params![format!("%{query}%"), limit as i64], |row| {
                row.get(0)
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(entry) = self.get(&id) {
                results.push(MemoryResult {
                    entry,
                    score: 1.0,
                    matched: true,
                });
            }
        }
        Ok(results)
    }

    /// FTS5 match scores: id → bm25 (lower is better).
    fn fts_search(&self, query: &str, limit: usize) -> Result<HashMap<String, f32>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(HashMap::new());
        }
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, bm25(vector_memories_fts) AS score
                 FROM vector_memories_fts
                 WHERE vector_memories_fts MATCH ?1
                 ORDER BY score ASC
                 LIMIT ?2",
            )
            .map_err(db_err)?;
        let out = stmt
            .query_map(params![escaped, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32))
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(out)
    }

    /// LIKE fallback when FTS5 is unavailable; every hit scores 1.0.
    fn like_scores(&self, query: &str, limit: usize) -> HashMap<String, f32> {
        let db = self.db.lock();
        let Ok(mut stmt) = db.prepare(
            "SELECT id FROM vector_memories
             WHERE text LIKE ?1 OR category LIKE ?1
             ORDER BY importance DESC, created_at DESC
             LIMIT ?2",
        ) else {
            return HashMap::new();
        };
        stmt.query_map(params![format!("%{query}%"), limit as i64], |row| {
            row.get::<_, String>(0)
        })
        .map(|rows| rows.filter_map(|r| r.ok()).map(|id| (id, 0.0)).collect())
        .unwrap_or_default()
    }

    // ==================== Embedding / index upkeep ====================

    async fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = match &self.embedding {
            Some(provider) => provider.embed(text).await?,
            None => (0..self.cfg.embedding_dim)
                .map(|i| (i % 256) as f32 / 256.0)
                .collect(),
        };
        if self.cfg.metric.normalizes() {
            normalize_vector(&mut vector);
        }
        Ok(vector)
    }

    /// Rebuild the ANN index from the database: close, recreate, re-add all
    /// rows, save. Any failure drops the index and searches go linear.
    fn rebuild_hnsw(&self) {
        let mut ann_guard = self.ann.lock();
        let Some(old) = ann_guard.take() else {
            return;
        };
        let cfg = old.index.config().clone();
        drop(old);
        drop(ann_guard);

        let mut index = match HnswIndex::new_empty(cfg) {
            Ok(idx) => idx,
            Err(e) => {
                warn!(error = %e, "HNSW rebuild failed");
                return;
            }
        };

        let (ids, vectors) = self.collect_index_rows(index.dim());
        if !vectors.is_empty() {
            if let Err(e) = index.add_all(&vectors) {
                warn!(error = %e, "HNSW rebuild add failed");
                return;
            }
        }
        if let Err(e) = index.save() {
            warn!(error = %e, "failed to save rebuilt HNSW dump");
        }

        *self.ann.lock() = Some(Ann { index, ids });
    }

    /// Rows eligible for the index: non-empty vectors of the right dimension,
    /// in insertion order. Backfills missing embedding_dim along the way and
    /// skips (with a log) rows whose dimension mismatches.
    fn collect_index_rows(&self, index_dim: usize) -> (Vec<String>, Vec<Vec<f32>>) {
        let rows: Vec<(String, Vec<u8>, Option<i64>)> = {
            let db = self.db.lock();
            let Ok(mut stmt) = db.prepare(
                "SELECT id, vector, embedding_dim FROM vector_memories ORDER BY rowid",
            ) else {
                return (Vec::new(), Vec::new());
            };
            stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map(|r| r.filter_map(|x| x.ok()).collect())
            .unwrap_or_default()
        };

        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        for (id, blob, embedding_dim) in rows {
            if blob.is_empty() {
                continue;
            }
            let Some(vector) = deserialize_vector(&blob) else {
                continue;
            };
            let dim = vector.len();
            if dim == 0 {
                continue;
            }
            if embedding_dim.unwrap_or(0) == 0 {
                let db = self.db.lock();
                if let Err(e) = db.execute(
                    "UPDATE vector_memories SET embedding_dim = ?1 WHERE id = ?2",
                    params![dim as i64, id],
                ) {
                    warn!(error = %e, "embedding_dim backfill during load failed");
                }
            }
            if dim != index_dim {
                warn!(
                    id = %short_id(&id),
                    dim,
                    index_dim,
                    "skipping vector with mismatched dimension"
                );
                continue;
            }
            ids.push(id);
            vectors.push(vector);
        }
        (ids, vectors)
    }

    /// Startup load: restore the id mapping, and populate the index from the
    /// database unless the dump already matched it.
    fn load_existing_vectors(&self) {
        self.rebuild_fts_if_empty();

        let mut ann_guard = self.ann.lock();
        let Some(ann) = ann_guard.as_mut() else {
            return;
        };

        let (ids, vectors) = self.collect_index_rows(ann.index.dim());
        if ann.index.loaded() && ann.index.len() == vectors.len() {
            ann.ids = ids;
            info!(count = ann.index.len(), "HNSW restored from dump, id mapping attached");
        } else {
            if ann.index.loaded() {
                warn!(
                    dump = ann.index.len(),
                    db = vectors.len(),
                    "HNSW dump out of sync with database, rebuilding"
                );
            }
            let cfg = ann.index.config().clone();
            match HnswIndex::new_empty(cfg) {
                Ok(mut fresh) => {
                    if let Err(e) = fresh.add_all(&vectors) {
                        warn!(error = %e, "failed to load vectors into HNSW");
                        *ann_guard = None;
                        return;
                    }
                    info!(count = vectors.len(), "loaded vectors into HNSW");
                    *ann_guard = Some(Ann { index: fresh, ids });
                }
                Err(e) => {
                    warn!(error = %e, "HNSW reload failed");
                    *ann_guard = None;
                    return;
                }
            }
        }

        if let Some(ann) = ann_guard.as_ref() {
            if let Err(e) = ann.index.save() {
                warn!(error = %e, "failed to save HNSW dump");
            }
        }
    }

    /// Backfill embedding_dim for legacy rows where it is NULL or 0.
    fn backfill_embedding_dim(&self) {
        let pending: Vec<(String, usize)> = {
            let db = self.db.lock();
            let Ok(mut stmt) = db.prepare(
                "SELECT id, vector FROM vector_memories
                 WHERE embedding_dim IS NULL OR embedding_dim = 0",
            ) else {
                return;
            };
            stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map(|rows| {
                rows.filter_map(|r| r.ok())
                    .filter_map(|(id, blob)| {
                        let dim = if blob.len() >= 4 {
                            blob.len() / 4
                        } else {
                            self.cfg.embedding_dim
                        };
                        (dim > 0).then_some((id, dim))
                    })
                    .collect()
            })
            .unwrap_or_default()
        };

        if pending.is_empty() {
            return;
        }
        let db = self.db.lock();
        let mut updated = 0;
        for (id, dim) in pending {
            if db
                .execute(
                    "UPDATE vector_memories SET embedding_dim = ?1 WHERE id = ?2",
                    params![dim as i64, id],
                )
                .is_ok()
            {
                updated += 1;
            }
        }
        if updated > 0 {
            info!(updated, "backfilled embedding_dim for legacy rows");
        }
    }

    // ==================== FTS upkeep ====================

    fn ensure_fts(&self) {
        let db = self.db.lock();
        let ok = db
            .execute_batch(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vector_memories_fts
                 USING fts5(id, text, category)",
            )
            .is_ok();
        *self.fts_available.lock() = ok;
        if !ok {
            warn!("FTS5 unavailable, keyword search degrades to LIKE");
        }
    }

    fn upsert_fts(&self, id: &str, text: &str, category: &str) {
        if !*self.fts_available.lock() {
            return;
        }
        let db = self.db.lock();
        let _ = db.execute(
            "DELETE FROM vector_memories_fts WHERE id = ?1",
            params![id],
        );
        if let Err(e) = db.execute(
            "INSERT INTO vector_memories_fts (id, text, category) VALUES (?1, ?2, ?3)",
            params![id, text, category],
        ) {
            warn!(error = %e, "FTS upsert failed");
            drop(db);
            *self.fts_available.lock() = false;
        }
    }

    fn rebuild_fts_if_empty(&self) {
        if !*self.fts_available.lock() {
            return;
        }
        let rows: Vec<(String, String, String)> = {
            let db = self.db.lock();
            let count: i64 = db
                .query_row("SELECT COUNT(*) FROM vector_memories_fts", [], |row| {
                    row.get(0)
                })
                .unwrap_or(0);
            if count > 0 {
                return;
            }
            let Ok(mut stmt) = db.prepare("SELECT id, text, category FROM vector_memories")
            else {
                return;
            };
            stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map(|r| r.filter_map(|x| x.ok()).collect())
            .unwrap_or_default()
        };
        for (id, text, category) in rows {
            self.upsert_fts(&id, &text, &category);
        }
    }
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS vector_memories (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            vector BLOB NOT NULL,
            importance REAL DEFAULT 0.5,
            category TEXT DEFAULT 'other',
            source TEXT DEFAULT 'manual',
            embedding_dim INTEGER,
            created_at INTEGER DEFAULT (strftime('%s','now')),
            updated_at INTEGER DEFAULT (strftime('%s','now'))
        );
        CREATE INDEX IF NOT EXISTS idx_vm_category ON vector_memories(category);
        CREATE INDEX IF NOT EXISTS idx_vm_created ON vector_memories(created_at);",
    )
    .map_err(db_err)?;

    // Legacy tables may miss columns added later.
    for (column, decl) in [
        ("embedding_dim", "INTEGER"),
        ("source", "TEXT DEFAULT 'manual'"),
        ("updated_at", "INTEGER DEFAULT (strftime('%s','now'))"),
    ] {
        let exists = db
            .prepare("PRAGMA table_info(vector_memories)")
            .and_then(|mut stmt| {
                let names: Vec<String> = stmt
                    .query_map([], |row| row.get::<_, String>(1))?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(names.iter().any(|n| n == column))
            })
            .unwrap_or(true);
        if !exists {
            let _ = db.execute_batch(&format!(
                "ALTER TABLE vector_memories ADD COLUMN {column} {decl}"
            ));
        }
    }
    Ok(())
}

// ==================== Vector helpers ====================

pub fn serialize_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

pub fn deserialize_vector(b: &[u8]) -> Option<Vec<f32>> {
    if b.len() % 4 != 0 {
        return None;
    }
    Some(
        b.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b).sqrt()
}

pub fn normalize_vector(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Wrap each word in quotes so punctuation cannot break FTS5 MATCH syntax.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

fn short_id(id: &str) -> &str {
    if id.len() <= 8 {
        id
    } else {
        &id[..8]
    }
}

/// Cheap keyword category detection used by auto-capture.
pub fn detect_category(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if ["prefer", "like", "love", "want"]
        .iter()
        .any(|k| lower.contains(k))
    {
        "preference"
    } else if ["decided", "will use"].iter().any(|k| lower.contains(k)) {
        "decision"
    } else if lower.contains('@') || lower.contains("e-mail") {
        "entity"
    } else {
        "other"
    }
}
