//! # ocg-storage
//!
//! The relational store behind the agent: one SQLite file in WAL mode holding
//! chat messages, session metadata, the persistent config table, and the
//! pulse event queue. Every other subsystem goes through the typed operations
//! here; nothing else opens the database directly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ocg_core::{Event, EventPriority, EventStatus, OcgError, Result};

/// A persisted chat message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_key: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Per-session bookkeeping mirrored out of the in-memory session objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_key: String,
    pub total_tokens: i64,
    pub compaction_count: i64,
    pub last_summary: String,
    pub memory_flush_at: Option<DateTime<Utc>>,
    pub memory_flush_compaction_count: i64,
}

fn db_err(e: rusqlite::Error) -> OcgError {
    OcgError::Storage(e.to_string())
}

/// Handle to the shared database. Cheap to clone.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) the database and bring the schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(db_err)?;

        let storage = Self {
            db: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;
        info!(path = %path.as_ref().display(), "storage opened");
        Ok(storage)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_key TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS messages_archive (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_key TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT,
                created_at DATETIME,
                archived_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS session_meta (
                session_key TEXT PRIMARY KEY,
                total_tokens INTEGER DEFAULT 0,
                compaction_count INTEGER DEFAULT 0,
                last_summary TEXT DEFAULT '',
                memory_flush_at DATETIME,
                memory_flush_compaction_count INTEGER DEFAULT 0,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS config (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                section TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(section, key)
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT,
                priority INTEGER DEFAULT 2,
                status TEXT DEFAULT 'pending',
                channel TEXT DEFAULT '',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                processed_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_key);
            CREATE INDEX IF NOT EXISTS idx_config_section ON config(section, key);
            CREATE INDEX IF NOT EXISTS idx_events_priority ON events(priority);
            CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);
            ",
        )
        .map_err(db_err)?;

        // Older databases may predate some columns. Repair in place rather
        // than rejecting the file.
        repair_missing_column(&db, "events", "channel", "TEXT DEFAULT ''");
        repair_missing_column(&db, "session_meta", "memory_flush_at", "DATETIME");
        repair_missing_column(
            &db,
            "session_meta",
            "memory_flush_compaction_count",
            "INTEGER DEFAULT 0",
        );

        Ok(())
    }

    // ============ Messages ============

    pub fn add_message(&self, session_key: &str, role: &str, content: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO messages (session_key, role, content) VALUES (?1, ?2, ?3)",
            params![session_key, role, content],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Last `limit` messages of a session, oldest first.
    pub fn get_messages(&self, session_key: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, session_key, role, content, created_at FROM messages
                 WHERE session_key = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(db_err)?;
        let mut rows: Vec<StoredMessage> = stmt
            .query_map(params![session_key, limit as i64], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    session_key: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    created_at: row.get(4)?,
                })
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    pub fn clear_messages(&self, session_key: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "DELETE FROM messages WHERE session_key = ?1",
            params![session_key],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Copy messages with id ≤ `up_to_id` into the archive table.
    pub fn archive_messages(&self, session_key: &str, up_to_id: i64) -> Result<usize> {
        let db = self.db.lock();
        let copied = db
            .execute(
                "INSERT INTO messages_archive (session_key, role, content, created_at)
                 SELECT session_key, role, content, created_at FROM messages
                 WHERE session_key = ?1 AND id <= ?2",
                params![session_key, up_to_id],
            )
            .map_err(db_err)?;
        Ok(copied)
    }

    // ============ Session meta ============

    pub fn get_session_meta(&self, session_key: &str) -> Result<SessionMeta> {
        let db = self.db.lock();
        let meta = db
            .query_row(
                "SELECT session_key, total_tokens, compaction_count,
                        COALESCE(last_summary, ''), memory_flush_at,
                        COALESCE(memory_flush_compaction_count, 0)
                 FROM session_meta WHERE session_key = ?1",
                params![session_key],
                |row| {
                    Ok(SessionMeta {
                        session_key: row.get(0)?,
                        total_tokens: row.get(1)?,
                        compaction_count: row.get(2)?,
                        last_summary: row.get(3)?,
                        memory_flush_at: row.get(4)?,
                        memory_flush_compaction_count: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?;
        Ok(meta.unwrap_or_else(|| SessionMeta {
            session_key: session_key.to_string(),
            ..SessionMeta::default()
        }))
    }

    pub fn upsert_session_meta(&self, meta: &SessionMeta) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO session_meta (session_key, total_tokens, compaction_count,
                                       last_summary, memory_flush_at,
                                       memory_flush_compaction_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)
             ON CONFLICT(session_key) DO UPDATE SET
                total_tokens = excluded.total_tokens,
                compaction_count = excluded.compaction_count,
                last_summary = excluded.last_summary,
                memory_flush_at = excluded.memory_flush_at,
                memory_flush_compaction_count = excluded.memory_flush_compaction_count,
                updated_at = CURRENT_TIMESTAMP",
            params![
                meta.session_key,
                meta.total_tokens,
                meta.compaction_count,
                meta.last_summary,
                meta.memory_flush_at,
                meta.memory_flush_compaction_count,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ============ Config ============

    pub fn set_config(&self, section: &str, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO config (section, key, value, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
            params![section, key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// A single config value; a missing row yields an empty string.
    pub fn get_config(&self, section: &str, key: &str) -> Result<String> {
        let db = self.db.lock();
        let value: Option<String> = db
            .query_row(
                "SELECT value FROM config WHERE section = ?1 AND key = ?2",
                params![section, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(value.unwrap_or_default())
    }

    pub fn get_config_section(&self, section: &str) -> Result<HashMap<String, String>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT key, value FROM config WHERE section = ?1")
            .map_err(db_err)?;
        let map = stmt
            .query_map(params![section], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ))
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(map)
    }

    pub fn config_exists(&self, section: &str) -> Result<bool> {
        let db = self.db.lock();
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM config WHERE section = ?1",
                params![section],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    pub fn delete_config(&self, section: &str, key: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "DELETE FROM config WHERE section = ?1 AND key = ?2",
            params![section, key],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn clear_config_section(&self, section: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute("DELETE FROM config WHERE section = ?1", params![section])
            .map_err(db_err)?;
        Ok(())
    }

    // ============ Stats ============

    /// Row counts exposed through the `Stats` RPC and `/storage/stats`.
    pub fn stats(&self) -> Result<HashMap<String, i64>> {
        let db = self.db.lock();
        let mut stats = HashMap::new();
        for (name, table) in [
            ("messages", "messages"),
            ("archived", "messages_archive"),
            ("events", "events"),
        ] {
            let count: i64 = db
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(db_err)?;
            stats.insert(name.to_string(), count);
        }
        Ok(stats)
    }

    // ============ Events (pulse queue) ============

    pub fn add_event(
        &self,
        title: &str,
        content: &str,
        priority: EventPriority,
        channel: &str,
    ) -> Result<i64> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO events (title, content, priority, status, channel)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![title, content, priority.as_u8(), channel],
        )
        .map_err(db_err)?;
        Ok(db.last_insert_rowid())
    }

    /// The next pending event in `(priority asc, created asc)` order.
    pub fn next_pending_event(&self) -> Result<Option<Event>> {
        let db = self.db.lock();
        let event = db
            .query_row(
                "SELECT id, title, content, priority, status, COALESCE(channel, ''),
                        created_at, processed_at
                 FROM events WHERE status = 'pending'
                 ORDER BY priority ASC, created_at ASC, id ASC
                 LIMIT 1",
                [],
                row_to_event,
            )
            .optional()
            .map_err(db_err)?;
        Ok(event)
    }

    pub fn pending_events(&self, limit: usize) -> Result<Vec<Event>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT id, title, content, priority, status, COALESCE(channel, ''),
                        created_at, processed_at
                 FROM events WHERE status = 'pending'
                 ORDER BY priority ASC, created_at ASC, id ASC
                 LIMIT ?1",
            )
            .map_err(db_err)?;
        let events = stmt
            .query_map(params![limit as i64], row_to_event)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(events)
    }

    /// Move an event to a new status, stamping `processed_at`.
    pub fn update_event_status(&self, id: i64, status: EventStatus) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE events SET status = ?1, processed_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![status.as_str(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn event_counts(&self) -> Result<HashMap<String, i64>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT status, COUNT(*) FROM events GROUP BY status")
            .map_err(db_err)?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }

    /// Delete completed/dismissed events whose `processed_at` is older than
    /// `older_than_hours`. Returns the number of deleted rows.
    pub fn clear_old_events(&self, older_than_hours: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(older_than_hours);
        let db = self.db.lock();
        let deleted = db
            .execute(
                "DELETE FROM events
                 WHERE status IN ('completed', 'dismissed')
                   AND datetime(processed_at) < datetime(?1)",
                params![cutoff],
            )
            .map_err(db_err)?;
        if deleted > 0 {
            debug!(deleted, older_than_hours, "cleared old events");
        }
        Ok(deleted)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let priority: i64 = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        priority: EventPriority::clamped(priority),
        status: status.parse().unwrap_or(EventStatus::Pending),
        channel: row.get(5)?,
        created_at: row.get(6)?,
        processed_at: row.get(7)?,
    })
}

fn repair_missing_column(db: &Connection, table: &str, column: &str, decl: &str) {
    let has = db
        .prepare(&format!("PRAGMA table_info({table})"))
        .and_then(|mut stmt| {
            let names: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(names.iter().any(|n| n == column))
        })
        .unwrap_or(true);
    if !has {
        if let Err(e) = db.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
        {
            warn!(table, column, error = %e, "schema repair failed");
        } else {
            info!(table, column, "added missing column to legacy schema");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_round_trip_in_order() {
        let storage = Storage::open_in_memory().unwrap();
        for i in 0..5 {
            storage
                .add_message("main", "user", &format!("message {i}"))
                .unwrap();
        }
        let msgs = storage.get_messages("main", 3).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].content, "message 2");
        assert_eq!(msgs[2].content, "message 4");
    }

    #[test]
    fn archive_copies_prefix() {
        let storage = Storage::open_in_memory().unwrap();
        for i in 0..4 {
            storage
                .add_message("main", "user", &format!("m{i}"))
                .unwrap();
        }
        let msgs = storage.get_messages("main", 100).unwrap();
        let cut_id = msgs[1].id;
        let copied = storage.archive_messages("main", cut_id).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(storage.stats().unwrap()["archived"], 2);
    }

    #[test]
    fn config_section_precedence_helpers() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(!storage.config_exists("llm").unwrap());
        storage.set_config("llm", "model", "gpt-4o").unwrap();
        storage.set_config("llm", "model", "gpt-4o-mini").unwrap();
        assert!(storage.config_exists("llm").unwrap());
        assert_eq!(storage.get_config("llm", "model").unwrap(), "gpt-4o-mini");
        assert_eq!(storage.get_config("llm", "missing").unwrap(), "");
        let section = storage.get_config_section("llm").unwrap();
        assert_eq!(section.len(), 1);
        storage.clear_config_section("llm").unwrap();
        assert!(!storage.config_exists("llm").unwrap());
    }

    #[test]
    fn events_ordered_by_priority_then_age() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .add_event("low", "", EventPriority::Low, "")
            .unwrap();
        storage
            .add_event("normal", "", EventPriority::Normal, "")
            .unwrap();
        storage
            .add_event("crit", "", EventPriority::Critical, "")
            .unwrap();
        storage
            .add_event("normal-2", "", EventPriority::Normal, "")
            .unwrap();

        let order: Vec<String> = storage
            .pending_events(10)
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(order, vec!["crit", "normal", "normal-2", "low"]);
    }

    #[test]
    fn event_status_transitions_stamp_processed_at() {
        let storage = Storage::open_in_memory().unwrap();
        let id = storage
            .add_event("x", "y", EventPriority::Critical, "")
            .unwrap();
        let event = storage.next_pending_event().unwrap().unwrap();
        assert_eq!(event.id, id);
        assert!(event.processed_at.is_none());

        storage
            .update_event_status(id, EventStatus::Processing)
            .unwrap();
        assert!(storage.next_pending_event().unwrap().is_none());

        storage
            .update_event_status(id, EventStatus::Completed)
            .unwrap();
        let counts = storage.event_counts().unwrap();
        assert_eq!(counts["completed"], 1);
    }

    #[test]
    fn clear_old_events_removes_only_stale_terminal_rows() {
        let storage = Storage::open_in_memory().unwrap();
        let old = storage
            .add_event("old", "", EventPriority::Normal, "")
            .unwrap();
        let fresh = storage
            .add_event("fresh", "", EventPriority::Normal, "")
            .unwrap();
        let pending = storage
            .add_event("pending", "", EventPriority::Normal, "")
            .unwrap();

        storage.update_event_status(old, EventStatus::Completed).unwrap();
        storage
            .update_event_status(fresh, EventStatus::Dismissed)
            .unwrap();
        // Backdate one terminal event past the cutoff.
        {
            let db = storage.db.lock();
            db.execute(
                "UPDATE events SET processed_at = ?1 WHERE id = ?2",
                params![Utc::now() - Duration::hours(48), old],
            )
            .unwrap();
        }

        let deleted = storage.clear_old_events(24).unwrap();
        assert_eq!(deleted, 1);
        let counts = storage.event_counts().unwrap();
        assert_eq!(counts.get("completed"), None);
        assert_eq!(counts["dismissed"], 1);
        assert_eq!(counts["pending"], 1);
        let _ = pending;
    }

    #[test]
    fn legacy_schema_gets_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    content TEXT,
                    priority INTEGER DEFAULT 2,
                    status TEXT DEFAULT 'pending',
                    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                    processed_at DATETIME
                );",
            )
            .unwrap();
        }
        let storage = Storage::open(&path).unwrap();
        storage
            .add_event("t", "c", EventPriority::High, "telegram")
            .unwrap();
        let event = storage.next_pending_event().unwrap().unwrap();
        assert_eq!(event.channel, "telegram");
    }

    #[test]
    fn session_meta_upsert() {
        let storage = Storage::open_in_memory().unwrap();
        let mut meta = storage.get_session_meta("main").unwrap();
        assert_eq!(meta.compaction_count, 0);
        meta.total_tokens = 640;
        meta.compaction_count = 1;
        meta.last_summary = "user: hi".into();
        storage.upsert_session_meta(&meta).unwrap();
        let back = storage.get_session_meta("main").unwrap();
        assert_eq!(back.total_tokens, 640);
        assert_eq!(back.compaction_count, 1);
        assert_eq!(back.last_summary, "user: hi");
    }
}
