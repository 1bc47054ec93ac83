use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use ocg_core::{OcgError, Result};
use ocg_rpc::{
    ChatArgs, ChatReply, MemoryGetArgs, MemorySearchArgs, MemoryStoreArgs, RpcService,
    StatsReply, ToolResultReply,
};

use crate::agent::Agent;

/// The RPC surface the agent process exposes on its Unix socket.
pub struct AgentRpcService {
    agent: Arc<Agent>,
}

impl AgentRpcService {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    async fn chat(&self, params: Value) -> Result<Value> {
        let args: ChatArgs = serde_json::from_value(params)?;
        let content = self.agent.chat(args.messages).await;
        Ok(serde_json::to_value(ChatReply {
            content,
            tools: vec![],
        })?)
    }

    async fn stats(&self) -> Result<Value> {
        let mut stats = match self.agent.storage() {
            Some(store) => store.stats()?,
            None => Default::default(),
        };
        if let Some(memory) = self.agent.memory() {
            stats.insert("memories".into(), memory.count().unwrap_or(0));
        }
        Ok(serde_json::to_value(StatsReply { stats })?)
    }

    /// Run a memory tool and reply with its JSON result as a string; the
    /// gateway forwards it verbatim.
    async fn memory_tool(&self, tool: &str, args: Value) -> Result<Value> {
        let args = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(OcgError::Input(format!(
                    "expected an arguments object, got {other}"
                )))
            }
        };
        let result = self.agent.registry().call(tool, &args).await?;
        Ok(serde_json::to_value(ToolResultReply {
            result: serde_json::to_string(&result)?,
        })?)
    }
}

#[async_trait]
impl RpcService for AgentRpcService {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "Chat" => self.chat(params).await,
            "Stats" => self.stats().await,
            "MemorySearch" => {
                let args: MemorySearchArgs = serde_json::from_value(params)?;
                let mut map = serde_json::Map::new();
                map.insert("query".into(), Value::String(args.query));
                if !args.category.is_empty() {
                    map.insert("category".into(), Value::String(args.category));
                }
                if args.limit > 0 {
                    map.insert("limit".into(), Value::from(args.limit));
                }
                if args.min_score > 0.0 {
                    map.insert("minScore".into(), Value::from(args.min_score));
                }
                self.memory_tool("memory_search", Value::Object(map)).await
            }
            "MemoryGet" => {
                let args: MemoryGetArgs = serde_json::from_value(params)?;
                self.memory_tool("memory_get", serde_json::json!({ "path": args.path }))
                    .await
            }
            "MemoryStore" => {
                let args: MemoryStoreArgs = serde_json::from_value(params)?;
                let mut map = serde_json::Map::new();
                map.insert("text".into(), Value::String(args.text));
                if !args.category.is_empty() {
                    map.insert("category".into(), Value::String(args.category));
                }
                if args.importance > 0.0 {
                    map.insert("importance".into(), Value::from(args.importance));
                }
                self.memory_tool("memory_store", Value::Object(map)).await
            }
            other => Err(OcgError::Rpc(format!("unknown method: {other}"))),
        }
    }
}
