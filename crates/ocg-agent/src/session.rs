use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use ocg_core::{Message, OcgError, Result};
use ocg_storage::Storage;

/// Persist session meta every this many appended messages.
const META_FLUSH_EVERY: usize = 10;

/// A conversation session keyed by a stable string
/// (`main`, `<channel>:<id>`, `cron:<job-id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub key: String,
    pub agent_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_tokens: usize,
    pub compaction_count: u32,
    pub is_active: bool,
    /// Free-form attribute bag.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Listing shape exposed through tools and RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub key: String,
    pub agent_id: String,
    pub message_count: usize,
    pub total_tokens: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Keyed session objects with in-memory history; meta is mirrored into the
/// relational store periodically and on clear.
pub struct SessionManager {
    store: Option<Storage>,
    sessions: RwLock<HashMap<String, Session>>,
    default_agent_id: String,
}

impl SessionManager {
    pub fn new(store: Option<Storage>, default_agent_id: &str) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
            default_agent_id: default_agent_id.to_string(),
        }
    }

    pub fn default_agent_id(&self) -> &str {
        &self.default_agent_id
    }

    pub fn create_session(&self, key: &str, agent_id: &str) -> Session {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(key) {
            return existing.clone();
        }
        let now = Utc::now();
        let session = Session {
            id: format!("sess-{}", now.timestamp_millis()),
            key: key.to_string(),
            agent_id: agent_id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            total_tokens: 0,
            compaction_count: 0,
            is_active: true,
            metadata: Map::new(),
        };
        sessions.insert(key.to_string(), session.clone());
        drop(sessions);

        self.persist_meta(&session);
        info!(key, agent_id, "session created");
        session
    }

    pub fn get_session(&self, key: &str) -> Option<Session> {
        self.sessions.read().get(key).cloned()
    }

    pub fn get_or_create_session(&self, key: &str, agent_id: &str) -> Session {
        if let Some(session) = self.get_session(key) {
            return session;
        }
        self.create_session(key, agent_id)
    }

    /// Session for a channel conversation: key is `<type>:<external-id>`.
    pub fn get_or_create_channel_session(
        &self,
        channel_type: &str,
        external_id: &str,
        agent_id: &str,
    ) -> Session {
        let key = format!("{channel_type}:{external_id}");
        self.get_or_create_session(&key, agent_id)
    }

    /// Append a message; per-session appends are atomic under the map lock.
    pub fn add_message(&self, key: &str, message: Message) -> Result<()> {
        let snapshot = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(key)
                .ok_or_else(|| OcgError::Input(format!("session not found: {key}")))?;
            session.total_tokens += message.estimate_tokens();
            session.messages.push(message);
            session.updated_at = Utc::now();
            (session.messages.len() % META_FLUSH_EVERY == 0).then(|| session.clone())
        };
        if let Some(session) = snapshot {
            self.persist_meta(&session);
        }
        Ok(())
    }

    pub fn get_messages(&self, key: &str) -> Result<Vec<Message>> {
        self.sessions
            .read()
            .get(key)
            .map(|s| s.messages.clone())
            .ok_or_else(|| OcgError::Input(format!("session not found: {key}")))
    }

    pub fn clear_session(&self, key: &str) -> Result<()> {
        let snapshot = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(key)
                .ok_or_else(|| OcgError::Input(format!("session not found: {key}")))?;
            session.messages.clear();
            session.total_tokens = 0;
            session.compaction_count += 1;
            session.updated_at = Utc::now();
            session.clone()
        };
        self.persist_meta(&snapshot);
        debug!(key, "session cleared");
        Ok(())
    }

    pub fn remove_session(&self, key: &str) -> Result<()> {
        if self.sessions.write().remove(key).is_none() {
            return Err(OcgError::Input(format!("session not found: {key}")));
        }
        debug!(key, "session removed");
        Ok(())
    }

    pub fn list_session_infos(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read();
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .map(|s| SessionInfo {
                key: s.key.clone(),
                agent_id: s.agent_id.clone(),
                message_count: s.messages.len(),
                total_tokens: s.total_tokens,
                created_at: s.created_at,
                updated_at: s.updated_at,
                is_active: s.is_active,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    fn persist_meta(&self, session: &Session) {
        let Some(store) = &self.store else {
            return;
        };
        let mut meta = match store.get_session_meta(&session.key) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "session meta read failed");
                return;
            }
        };
        meta.total_tokens = session.total_tokens as i64;
        meta.compaction_count = session.compaction_count as i64;
        if let Err(e) = store.upsert_session_meta(&meta) {
            debug!(error = %e, "session meta write failed");
        }
    }
}

/// Adapter for the `sessions` tool.
pub struct SessionListAdapter {
    pub manager: Arc<SessionManager>,
}

#[async_trait]
impl ocg_tools::SessionLister for SessionListAdapter {
    async fn session_infos(&self) -> Vec<Value> {
        self.manager
            .list_session_infos()
            .into_iter()
            .filter_map(|info| serde_json::to_value(info).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocg_core::Role;

    #[test]
    fn create_is_idempotent() {
        let manager = SessionManager::new(None, "agent-1");
        let a = manager.create_session("main", "agent-1");
        let b = manager.get_or_create_session("main", "other");
        assert_eq!(a.id, b.id);
        assert_eq!(b.agent_id, "agent-1");
    }

    #[test]
    fn channel_sessions_use_composite_keys() {
        let manager = SessionManager::new(None, "agent-1");
        let session = manager.get_or_create_channel_session("telegram", "42", "agent-1");
        assert_eq!(session.key, "telegram:42");
        assert!(manager.get_session("telegram:42").is_some());
    }

    #[test]
    fn append_order_is_preserved() {
        let manager = SessionManager::new(None, "agent-1");
        manager.create_session("main", "agent-1");
        for i in 0..5 {
            manager
                .add_message("main", Message::new(Role::User, format!("m{i}")))
                .unwrap();
        }
        let messages = manager.get_messages("main").unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn clear_resets_history_and_bumps_compactions() {
        let manager = SessionManager::new(None, "agent-1");
        manager.create_session("main", "agent-1");
        manager
            .add_message("main", Message::user("hello"))
            .unwrap();
        manager.clear_session("main").unwrap();

        let session = manager.get_session("main").unwrap();
        assert!(session.messages.is_empty());
        assert_eq!(session.compaction_count, 1);
        assert_eq!(session.total_tokens, 0);
    }

    #[test]
    fn meta_mirrors_into_storage() {
        let store = Storage::open_in_memory().unwrap();
        let manager = SessionManager::new(Some(store.clone()), "agent-1");
        manager.create_session("main", "agent-1");
        for _ in 0..META_FLUSH_EVERY {
            manager
                .add_message("main", Message::user("0123456789abcdef"))
                .unwrap();
        }
        let meta = store.get_session_meta("main").unwrap();
        assert!(meta.total_tokens > 0);
    }

    #[test]
    fn missing_sessions_error() {
        let manager = SessionManager::new(None, "agent-1");
        assert!(manager.get_messages("missing").is_err());
        assert!(manager.add_message("missing", Message::user("x")).is_err());
        assert!(manager.clear_session("missing").is_err());
        assert!(manager.remove_session("missing").is_err());
    }
}
