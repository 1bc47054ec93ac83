use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

use ocg_core::{Message, OcgError, Result};

use crate::frame::{read_frame, write_frame};
use crate::proto::{
    ChatArgs, ChatReply, MemoryGetArgs, MemorySearchArgs, MemoryStoreArgs, RpcRequest,
    RpcResponse, StatsReply, ToolResultReply,
};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Client side of the agent RPC. Calls are serialized over one stream; the
/// reply to a request is always the next frame.
pub struct RpcClient {
    stream: Mutex<UnixStream>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref())
            .await
            .map_err(|e| OcgError::Rpc(format!("connect failed: {e}")))?;
        Ok(Self {
            stream: Mutex::new(stream),
            next_id: AtomicU64::new(1),
        })
    }

    /// Retry the connect every 300 ms until the deadline; used at startup
    /// while the agent process is still coming up.
    pub async fn connect_with_deadline(
        path: impl AsRef<Path>,
        deadline: Duration,
    ) -> Result<Self> {
        let started = std::time::Instant::now();
        loop {
            match Self::connect(path.as_ref()).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    if started.elapsed() >= deadline {
                        return Err(OcgError::Rpc(format!(
                            "timeout waiting for agent at {}: {e}",
                            path.as_ref().display()
                        )));
                    }
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Raw call: serialize, frame, await the reply frame.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::to_vec(&RpcRequest {
            id,
            method: method.to_string(),
            params,
        })?;

        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &request).await?;
        let payload = read_frame(&mut *stream)
            .await?
            .ok_or_else(|| OcgError::Rpc("connection closed mid-call".into()))?;
        drop(stream);

        let response: RpcResponse = serde_json::from_slice(&payload)?;
        debug!(method, id = response.id, ok = response.error.is_none(), "rpc reply");
        if let Some(error) = response.error {
            return Err(OcgError::Rpc(error));
        }
        response
            .result
            .ok_or_else(|| OcgError::Rpc("reply carried neither result nor error".into()))
    }

    // ==================== Typed methods ====================

    pub async fn chat(&self, messages: Vec<Message>) -> Result<ChatReply> {
        let result = self
            .call(
                "Chat",
                serde_json::to_value(ChatArgs {
                    messages,
                    tools: vec![],
                })?,
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn stats(&self) -> Result<StatsReply> {
        let result = self.call("Stats", serde_json::json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn memory_search(&self, args: MemorySearchArgs) -> Result<ToolResultReply> {
        let result = self
            .call("MemorySearch", serde_json::to_value(args)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn memory_get(&self, args: MemoryGetArgs) -> Result<ToolResultReply> {
        let result = self.call("MemoryGet", serde_json::to_value(args)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn memory_store(&self, args: MemoryStoreArgs) -> Result<ToolResultReply> {
        let result = self.call("MemoryStore", serde_json::to_value(args)?).await?;
        Ok(serde_json::from_value(result)?)
    }
}
