use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ocg_channels::{ChannelAdapter, ChannelAgent, ChannelType, SendMessageRequest};
use ocg_core::{Message, OcgError, Result};
use ocg_cron::{AgentTurnRunner, CronBroadcast, SystemEventSink};
use ocg_rpc::RpcClient;

/// Channel-adapter view of the agent RPC client.
pub struct RpcChannelAgent {
    pub rpc: Arc<RpcClient>,
}

#[async_trait]
impl ChannelAgent for RpcChannelAgent {
    async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        Ok(self.rpc.chat(messages).await?.content)
    }

    async fn stats(&self) -> Result<HashMap<String, i64>> {
        Ok(self.rpc.stats().await?.stats)
    }
}

/// Cron `systemEvent` payloads become system turns on the main session.
pub struct RpcSystemEventSink {
    pub rpc: Arc<RpcClient>,
}

#[async_trait]
impl SystemEventSink for RpcSystemEventSink {
    async fn system_event(&self, text: &str) -> Result<()> {
        self.rpc.chat(vec![Message::system(text)]).await?;
        Ok(())
    }
}

/// Cron `agentTurn` payloads become user turns; the reply is the result.
pub struct RpcAgentTurnRunner {
    pub rpc: Arc<RpcClient>,
}

#[async_trait]
impl AgentTurnRunner for RpcAgentTurnRunner {
    async fn agent_turn(&self, message: &str, _model: &str, _thinking: &str) -> Result<String> {
        Ok(self.rpc.chat(vec![Message::user(message)]).await?.content)
    }
}

/// Announce delivery goes out through the channel adapter.
pub struct AdapterBroadcast {
    pub adapter: Arc<ChannelAdapter>,
}

#[async_trait]
impl CronBroadcast for AdapterBroadcast {
    async fn broadcast(&self, message: &str, channel: &str, to: &str) -> Result<()> {
        let channel_type = ChannelType::parse(channel)
            .ok_or_else(|| OcgError::ChannelNotFound(channel.to_string()))?;
        let chat_id: i64 = to.parse().unwrap_or_else(|_| {
            warn!(to, "announce target is not numeric, defaulting to 0");
            0
        });
        self.adapter
            .send_message(
                channel_type,
                &SendMessageRequest {
                    chat_id,
                    text: message.to_string(),
                    ..SendMessageRequest::default()
                },
            )
            .await?;
        Ok(())
    }
}
