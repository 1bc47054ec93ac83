use thiserror::Error;

/// Unified error type for the entire OCG runtime.
#[derive(Error, Debug)]
pub enum OcgError {
    // ── Agent errors ───────────────────────────────────────────
    #[error("agent error: {0}")]
    Agent(String),

    #[error("llm error: {0}")]
    Llm(String),

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("invalid input: {0}")]
    Input(String),

    // ── Memory / storage errors ────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    // ── Scheduler errors ───────────────────────────────────────
    #[error("cron error: {0}")]
    Cron(String),

    #[error("pulse error: {0}")]
    Pulse(String),

    // ── RPC / config errors ────────────────────────────────────
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OcgError>;
