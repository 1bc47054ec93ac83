use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use ocg_core::{Message, OcgError, Result};

/// The messaging platforms the adapter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Telegram,
    Whatsapp,
    Slack,
    Discord,
    Webchat,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Telegram => "telegram",
            ChannelType::Whatsapp => "whatsapp",
            ChannelType::Slack => "slack",
            ChannelType::Discord => "discord",
            ChannelType::Webchat => "webchat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "telegram" => Some(ChannelType::Telegram),
            "whatsapp" => Some(ChannelType::Whatsapp),
            "slack" => Some(ChannelType::Slack),
            "discord" => Some(ChannelType::Discord),
            "webchat" => Some(ChannelType::Webchat),
            _ => None,
        }
    }
}

/// Metadata a driver publishes about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub version: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

/// An outgoing send request, in the adapter's neutral shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parse_mode: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
    #[serde(rename = "replyToMessageId", default, skip_serializing_if = "is_zero")]
    pub reply_to: i64,
    #[serde(rename = "messageThreadId", default, skip_serializing_if = "is_zero")]
    pub thread_id: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// An inline keyboard button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub ok: bool,
    pub message_id: i64,
    pub chat_id: i64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// An incoming channel message normalized for the agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: String,
    pub channel: ChannelType,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub thread_id: i64,
}

impl Default for ChannelType {
    fn default() -> Self {
        ChannelType::Webchat
    }
}

/// Result of pumping one incoming message through the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

/// Seam through which channel drivers talk to the agent (RPC in production,
/// a fake in tests).
#[async_trait]
pub trait ChannelAgent: Send + Sync {
    async fn chat(&self, messages: Vec<Message>) -> Result<String>;

    async fn stats(&self) -> Result<HashMap<String, i64>>;
}

/// The contract every channel driver implements.
#[async_trait]
pub trait ChannelDriver: Send + Sync {
    fn info(&self) -> ChannelInfo;

    fn initialize(&self, config: &Map<String, Value>) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn send_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse>;

    /// Handle a webhook body and return the HTTP-level ack payload.
    async fn handle_webhook(&self, body: &[u8]) -> Result<Value>;

    async fn health_check(&self) -> Result<()>;
}

/// Registry of channel infos, kept beside the driver map.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, ChannelInfo>>,
}

impl ChannelRegistry {
    pub fn add(&self, info: ChannelInfo) {
        self.channels
            .write()
            .insert(info.channel_type.as_str().to_string(), info);
    }

    pub fn remove(&self, channel_type: ChannelType) {
        self.channels.write().remove(channel_type.as_str());
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<ChannelInfo> {
        self.channels.read().get(channel_type.as_str()).cloned()
    }

    pub fn list(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self.channels.read().values().cloned().collect();
        infos.sort_by_key(|i| i.channel_type.as_str());
        infos
    }
}

/// The channel adapter: a `ChannelType → driver` map plus the standard
/// incoming→agent→outgoing pump.
pub struct ChannelAdapter {
    channels: RwLock<HashMap<ChannelType, Arc<dyn ChannelDriver>>>,
    registry: ChannelRegistry,
    agent: Arc<dyn ChannelAgent>,
}

impl ChannelAdapter {
    pub fn new(agent: Arc<dyn ChannelAgent>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            registry: ChannelRegistry::default(),
            agent,
        }
    }

    pub fn agent(&self) -> Arc<dyn ChannelAgent> {
        self.agent.clone()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn register_channel(&self, driver: Arc<dyn ChannelDriver>) -> Result<()> {
        let info = driver.info();
        let channel_type = info.channel_type;
        {
            let channels = self.channels.read();
            if channels.contains_key(&channel_type) {
                return Err(OcgError::Channel {
                    channel: channel_type.as_str().into(),
                    reason: "already registered".into(),
                });
            }
        }
        driver.initialize(&info.config)?;
        self.channels.write().insert(channel_type, driver);
        self.registry.add(info.clone());
        info!(channel = channel_type.as_str(), version = %info.version, "channel registered");
        Ok(())
    }

    pub fn unregister_channel(&self, channel_type: ChannelType) -> Result<()> {
        let driver = self.channels.write().remove(&channel_type);
        match driver {
            Some(_) => {
                self.registry.remove(channel_type);
                Ok(())
            }
            None => Err(OcgError::ChannelNotFound(channel_type.as_str().into())),
        }
    }

    fn driver(&self, channel_type: ChannelType) -> Result<Arc<dyn ChannelDriver>> {
        self.channels
            .read()
            .get(&channel_type)
            .cloned()
            .ok_or_else(|| OcgError::ChannelNotFound(channel_type.as_str().into()))
    }

    pub fn has_channel(&self, channel_type: ChannelType) -> bool {
        self.channels.read().contains_key(&channel_type)
    }

    pub fn list_channels(&self) -> Vec<ChannelType> {
        self.channels.read().keys().copied().collect()
    }

    pub async fn start_channel(&self, channel_type: ChannelType) -> Result<()> {
        self.driver(channel_type)?.start().await
    }

    pub async fn stop_all(&self) {
        let drivers: Vec<Arc<dyn ChannelDriver>> =
            self.channels.write().drain().map(|(_, d)| d).collect();
        for driver in drivers {
            if let Err(e) = driver.stop().await {
                warn!(error = %e, "channel stop failed");
            }
        }
    }

    pub async fn send_message(
        &self,
        channel_type: ChannelType,
        req: &SendMessageRequest,
    ) -> Result<SendMessageResponse> {
        self.driver(channel_type)?.send_message(req).await
    }

    pub async fn handle_webhook(&self, channel_type: ChannelType, body: &[u8]) -> Result<Value> {
        self.driver(channel_type)?.handle_webhook(body).await
    }

    /// The standard pump: wrap the incoming text in a system+user pair, ask
    /// the agent, send the reply back where it came from.
    pub async fn process_message(&self, msg: &ChannelMessage) -> Result<ChannelResult> {
        let now = now_secs();
        let messages = vec![
            Message::system(format!(
                "You are an AI assistant. Received message from {} channel, chat ID: {}, user: @{}",
                msg.channel.as_str(),
                msg.chat_id,
                msg.username
            )),
            Message::user(&msg.text),
        ];

        let response = match self.agent.chat(messages).await {
            Ok(text) => text,
            Err(e) => {
                return Ok(ChannelResult {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                    timestamp: now,
                })
            }
        };

        let send_req = SendMessageRequest {
            chat_id: msg.chat_id,
            text: response,
            thread_id: msg.thread_id,
            ..SendMessageRequest::default()
        };
        match self.send_message(msg.channel, &send_req).await {
            Ok(resp) => Ok(ChannelResult {
                success: true,
                data: serde_json::to_value(resp).ok(),
                error: None,
                timestamp: now,
            }),
            Err(e) => Ok(ChannelResult {
                success: false,
                data: None,
                error: Some(e.to_string()),
                timestamp: now,
            }),
        }
    }

    /// Health snapshot across all drivers: type → error for failures.
    pub async fn health_check(&self) -> HashMap<ChannelType, String> {
        let drivers: Vec<(ChannelType, Arc<dyn ChannelDriver>)> = self
            .channels
            .read()
            .iter()
            .map(|(t, d)| (*t, d.clone()))
            .collect();
        let mut failures = HashMap::new();
        for (channel_type, driver) in drivers {
            if let Err(e) = driver.health_check().await {
                failures.insert(channel_type, e.to_string());
            }
        }
        failures
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeAgent {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelAgent for FakeAgent {
        async fn chat(&self, messages: Vec<Message>) -> Result<String> {
            let user = messages.last().unwrap().content.clone();
            self.replies.lock().push(user.clone());
            Ok(format!("echo: {user}"))
        }

        async fn stats(&self) -> Result<HashMap<String, i64>> {
            Ok(HashMap::new())
        }
    }

    struct FakeDriver {
        sent: Mutex<Vec<SendMessageRequest>>,
    }

    #[async_trait]
    impl ChannelDriver for FakeDriver {
        fn info(&self) -> ChannelInfo {
            ChannelInfo {
                name: "Fake".into(),
                channel_type: ChannelType::Webchat,
                version: "0.0.1".into(),
                description: "test driver".into(),
                capabilities: vec!["messages".into()],
                config: Map::new(),
            }
        }

        fn initialize(&self, _config: &Map<String, Value>) -> Result<()> {
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn send_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse> {
            self.sent.lock().push(req.clone());
            Ok(SendMessageResponse {
                ok: true,
                message_id: 1,
                chat_id: req.chat_id,
                timestamp: 0,
                error: String::new(),
            })
        }

        async fn handle_webhook(&self, _body: &[u8]) -> Result<Value> {
            Ok(serde_json::json!({ "ok": true }))
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn adapter_with_fake() -> (Arc<ChannelAdapter>, Arc<FakeDriver>) {
        let agent = Arc::new(FakeAgent {
            replies: Mutex::new(vec![]),
        });
        let adapter = Arc::new(ChannelAdapter::new(agent));
        let driver = Arc::new(FakeDriver {
            sent: Mutex::new(vec![]),
        });
        adapter.register_channel(driver.clone()).unwrap();
        (adapter, driver)
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let (adapter, driver) = adapter_with_fake();
        assert!(adapter.register_channel(driver).is_err());
        assert!(adapter.has_channel(ChannelType::Webchat));
        assert_eq!(adapter.registry().list().len(), 1);
    }

    #[tokio::test]
    async fn process_message_pumps_through_agent_and_back() {
        let (adapter, driver) = adapter_with_fake();
        let result = adapter
            .process_message(&ChannelMessage {
                id: "1".into(),
                channel: ChannelType::Webchat,
                chat_id: 42,
                user_id: 7,
                username: "sam".into(),
                text: "ping".into(),
                timestamp: 0,
                thread_id: 9,
            })
            .await
            .unwrap();

        assert!(result.success);
        let sent = driver.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 42);
        assert_eq!(sent[0].text, "echo: ping");
        assert_eq!(sent[0].thread_id, 9);
    }

    #[tokio::test]
    async fn unknown_channels_error() {
        let (adapter, _) = adapter_with_fake();
        let err = adapter
            .send_message(ChannelType::Slack, &SendMessageRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OcgError::ChannelNotFound(_)));
    }

    #[test]
    fn channel_type_parsing() {
        assert_eq!(ChannelType::parse("Telegram"), Some(ChannelType::Telegram));
        assert_eq!(ChannelType::parse(" slack "), Some(ChannelType::Slack));
        assert_eq!(ChannelType::parse("irc"), None);
    }
}
