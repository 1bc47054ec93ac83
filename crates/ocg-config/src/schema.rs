use serde::{Deserialize, Serialize};

use crate::loader::EnvFile;

/// Everything the agent process needs to boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// LLM API key. Empty means "no model"; the agent answers with canned
    /// responses.
    pub api_key: String,
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model identifier sent on every chat completion.
    pub model: String,
    /// SQLite database file.
    pub db_path: String,
    /// Unix socket the RPC server listens on.
    pub agent_socket: String,
    /// Prefer env/env.config values over the database `llm` section.
    pub force_env_config: bool,
    pub auto_recall: bool,
    pub recall_limit: usize,
    pub recall_min_score: f64,
    pub memory: MemorySettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            db_path: "ocg.db".into(),
            agent_socket: "/tmp/ocg-agent.sock".into(),
            force_env_config: false,
            auto_recall: false,
            recall_limit: 3,
            recall_min_score: 0.3,
            memory: MemorySettings::default(),
        }
    }
}

/// Vector memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Local embedding server URL (llama.cpp style, `/health` + `/embed`).
    pub embedding_server_url: String,
    /// Remote embedding model name (OpenAI-compatible).
    pub embedding_model: String,
    /// API key for the remote embedding provider.
    pub embedding_api_key: String,
    /// HNSW flat-dump path. Empty disables persistence.
    pub hnsw_path: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            embedding_server_url: String::new(),
            embedding_model: String::new(),
            embedding_api_key: String::new(),
            hnsw_path: "vector.index".into(),
        }
    }
}

/// Everything the gateway process needs to boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub agent_socket: String,
    /// Bearer token required on every non-webhook endpoint. Empty rejects
    /// all API requests.
    pub ui_auth_token: String,
    /// Data directory holding `cron/jobs.json`.
    pub data_dir: String,
    /// Telegram bot token; empty disables the channel.
    pub telegram_bot_token: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 55003,
            agent_socket: "/tmp/ocg-agent.sock".into(),
            ui_auth_token: String::new(),
            data_dir: "data".into(),
            telegram_bot_token: String::new(),
        }
    }
}

/// Combined settings bundle, mostly for tests and tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub agent: AgentSettings,
    pub gateway: GatewaySettings,
}

fn pick(env_file: &EnvFile, key: &str) -> Option<String> {
    // Process environment beats the file.
    if let Ok(v) = std::env::var(key) {
        if !v.is_empty() {
            return Some(v);
        }
    }
    env_file.get(key).filter(|v| !v.is_empty()).cloned()
}

impl AgentSettings {
    /// Resolve agent settings from `env.config` plus the process environment.
    pub fn resolve(env_file: &EnvFile) -> Self {
        let mut s = Self::default();
        if let Some(v) = pick(env_file, "OPENCLAW_API_KEY") {
            s.api_key = v;
        }
        if let Some(v) = pick(env_file, "OPENCLAW_BASE_URL") {
            s.base_url = v;
        }
        if let Some(v) = pick(env_file, "OPENCLAW_MODEL") {
            s.model = v;
        }
        if let Some(v) = pick(env_file, "OPENCLAW_DB_PATH") {
            s.db_path = v;
        }
        if let Some(v) = pick(env_file, "OPENCLAW_AGENT_SOCK") {
            s.agent_socket = v;
        }
        s.force_env_config = pick(env_file, "OPENCLAW_FORCE_ENV_CONFIG")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        s.auto_recall = pick(env_file, "OPENCLAW_AUTO_RECALL")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if let Some(v) = pick(env_file, "OPENCLAW_RECALL_LIMIT") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    s.recall_limit = n;
                }
            }
        }
        if let Some(v) = pick(env_file, "OPENCLAW_RECALL_MINSCORE") {
            if let Ok(f) = v.parse::<f64>() {
                if f > 0.0 {
                    s.recall_min_score = f;
                }
            }
        }
        if let Some(v) = pick(env_file, "EMBEDDING_SERVER_URL") {
            s.memory.embedding_server_url = v;
        }
        if let Some(v) = pick(env_file, "EMBEDDING_MODEL") {
            s.memory.embedding_model = v;
        }
        if let Some(v) = pick(env_file, "OPENAI_API_KEY") {
            s.memory.embedding_api_key = v;
        }
        if let Some(v) = pick(env_file, "HNSW_PATH") {
            s.memory.hnsw_path = v;
        }
        s
    }
}

impl GatewaySettings {
    /// Resolve gateway settings from `env.config` plus the process environment.
    pub fn resolve(env_file: &EnvFile) -> Self {
        let mut s = Self::default();
        if let Some(v) = pick(env_file, "OPENCLAW_HOST") {
            s.host = v;
        }
        if let Some(v) = pick(env_file, "OPENCLAW_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                if p > 0 {
                    s.port = p;
                }
            }
        }
        if let Some(v) = pick(env_file, "OPENCLAW_AGENT_SOCK") {
            s.agent_socket = v;
        }
        if let Some(v) = pick(env_file, "OPENCLAW_UI_TOKEN") {
            s.ui_auth_token = v;
        }
        if let Some(v) = pick(env_file, "OPENCLAW_DATA_DIR") {
            s.data_dir = v;
        }
        if let Some(v) = pick(env_file, "TELEGRAM_BOT_TOKEN") {
            s.telegram_bot_token = v;
        }
        s
    }
}
