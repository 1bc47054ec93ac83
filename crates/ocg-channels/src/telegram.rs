use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use ocg_core::{Message, OcgError, Result};

use crate::adapter::{
    ChannelAgent, ChannelDriver, ChannelInfo, ChannelType, SendMessageRequest,
    SendMessageResponse,
};

/// Telegram's hard message size limit.
const TEXT_CHUNK_LIMIT: usize = 4096;

/// Webhook-driven Telegram bot driver. State lives behind an inner Arc so
/// detached webhook processing shares greeting tracking with the driver.
pub struct TelegramDriver {
    inner: Arc<Inner>,
}

struct Inner {
    token: Mutex<String>,
    base_url: Mutex<String>,
    client: reqwest::Client,
    agent: Arc<dyn ChannelAgent>,
    running: AtomicBool,
    greeting_enabled: AtomicBool,
    greeting_text: Mutex<String>,
    greeted_users: Mutex<HashSet<i64>>,
}

impl TelegramDriver {
    pub fn new(token: &str, agent: Arc<dyn ChannelAgent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: Mutex::new(token.to_string()),
                base_url: Mutex::new(format!("https://api.telegram.org/bot{token}")),
                client: reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(30))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
                agent,
                running: AtomicBool::new(false),
                greeting_enabled: AtomicBool::new(true),
                greeting_text: Mutex::new(
                    "Hello! I'm OCG 🤖. How can I help you today?".into(),
                ),
                greeted_users: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Point the driver at a different API host (tests, proxies).
    pub fn with_api_base(self, base: &str) -> Self {
        *self.inner.base_url.lock() = base.trim_end_matches('/').to_string();
        self
    }

    pub fn set_greeting(&self, enabled: bool, text: &str) {
        self.inner.greeting_enabled.store(enabled, Ordering::SeqCst);
        *self.inner.greeting_text.lock() = text.to_string();
    }
}

impl Inner {
    fn api_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url.lock(), method)
    }

    async fn send_simple(&self, chat_id: i64, text: &str) {
        let req = SendMessageRequest {
            chat_id,
            text: text.to_string(),
            ..SendMessageRequest::default()
        };
        if let Err(e) = self.send(&req).await {
            warn!(chat_id, error = %e, "telegram send failed");
        }
    }

    async fn send(&self, req: &SendMessageRequest) -> Result<SendMessageResponse> {
        let text = truncate_message(&req.text);

        let mut api_req = serde_json::json!({
            "chat_id": req.chat_id,
            "text": text,
            "parse_mode": if req.parse_mode.is_empty() { "Markdown" } else { &req.parse_mode },
        });
        if req.reply_to > 0 {
            api_req["reply_to_message_id"] = req.reply_to.into();
        }
        if req.thread_id > 0 {
            api_req["message_thread_id"] = req.thread_id.into();
        }
        if !req.buttons.is_empty() {
            let keyboard: Vec<Vec<Value>> = req
                .buttons
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| {
                            serde_json::json!({
                                "text": b.text,
                                "callback_data": b.callback_data,
                            })
                        })
                        .collect()
                })
                .collect();
            api_req["reply_markup"] = serde_json::json!({ "inline_keyboard": keyboard });
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&api_req)
            .send()
            .await
            .map_err(|e| OcgError::Channel {
                channel: "telegram".into(),
                reason: format!("sendMessage failed: {e}"),
            })?;

        let body: TelegramResponse = resp.json().await.map_err(|e| OcgError::Channel {
            channel: "telegram".into(),
            reason: format!("sendMessage parse failed: {e}"),
        })?;

        if !body.ok {
            return Ok(SendMessageResponse {
                ok: false,
                message_id: 0,
                chat_id: req.chat_id,
                timestamp: now_secs(),
                error: body.description,
            });
        }

        let result = body.result.unwrap_or_default();
        Ok(SendMessageResponse {
            ok: true,
            message_id: result.message_id,
            chat_id: result.chat.id,
            timestamp: result.date,
            error: String::new(),
        })
    }

    async fn process_incoming(self: Arc<Self>, msg: IncomingMessage) {
        if msg.text.is_empty() {
            return;
        }
        let chat_id = msg.chat.id;
        let user_id = msg.from.id;
        let username = msg.from.username.clone();
        debug!(chat_id, user = %username, "telegram message received");

        // First-contact greeting for plain messages.
        if self.greeting_enabled.load(Ordering::SeqCst) && !msg.text.starts_with('/') {
            let newly_greeted = self.greeted_users.lock().insert(user_id);
            if newly_greeted {
                let inner = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    let text = inner.greeting_text.lock().clone();
                    inner.send_simple(chat_id, &text).await;
                });
            }
        }

        if msg.text.starts_with("/start") {
            self.greeted_users.lock().insert(user_id);
            self.send_simple(
                chat_id,
                &format!(
                    "Hello {}! I'm the OCG Telegram bot. Send me a message!",
                    msg.from.first_name
                ),
            )
            .await;
            return;
        }
        if msg.text.starts_with("/help") {
            self.send_simple(
                chat_id,
                "Commands:\n/start - Start bot\n/help - Help\n/stats - Stats\n/reset - Reset greeting\nAny message for AI assistance",
            )
            .await;
            return;
        }
        if msg.text.starts_with("/reset") {
            self.greeted_users.lock().remove(&user_id);
            self.send_simple(
                chat_id,
                "Greeting status reset! You'll receive a greeting on your next message.",
            )
            .await;
            return;
        }
        if msg.text.starts_with("/stats") {
            match self.agent.stats().await {
                Ok(stats) => {
                    self.send_simple(
                        chat_id,
                        &format!(
                            "📊 Stats:\nMessages: {}\nMemories: {}",
                            stats.get("messages").copied().unwrap_or(0),
                            stats.get("memories").copied().unwrap_or(0),
                        ),
                    )
                    .await;
                }
                Err(e) => self.send_simple(chat_id, &format!("Error: {e}")).await,
            }
            return;
        }

        let messages = vec![
            Message::system(format!(
                "You are an AI assistant. User @{username} (ID: {user_id}) sent a message in Telegram chat {chat_id}."
            )),
            Message::user(&msg.text),
        ];
        match self.agent.chat(messages).await {
            Ok(reply) => {
                let mut req = SendMessageRequest {
                    chat_id,
                    text: reply,
                    ..SendMessageRequest::default()
                };
                if msg.message_thread_id > 0 {
                    req.thread_id = msg.message_thread_id;
                }
                if let Err(e) = self.send(&req).await {
                    warn!(chat_id, error = %e, "failed to send agent reply");
                }
            }
            Err(e) => {
                warn!(error = %e, "agent chat failed");
                self.send_simple(chat_id, "Sorry, I encountered an error.").await;
            }
        }
    }
}

#[async_trait]
impl ChannelDriver for TelegramDriver {
    fn info(&self) -> ChannelInfo {
        let mut config = Map::new();
        config.insert("webhookPath".into(), "/telegram/webhook".into());
        config.insert("parseMode".into(), "Markdown".into());
        config.insert("textChunkLimit".into(), (TEXT_CHUNK_LIMIT as i64).into());
        config.insert("mediaMaxMb".into(), 5.into());
        config.insert("dmPolicy".into(), "pairing".into());
        config.insert("groupPolicy".into(), "allowlist".into());
        config.insert("requireMention".into(), true.into());
        config.insert(
            "greetingEnabled".into(),
            self.inner.greeting_enabled.load(Ordering::SeqCst).into(),
        );
        ChannelInfo {
            name: "Telegram Bot".into(),
            channel_type: ChannelType::Telegram,
            version: "1.0.0".into(),
            description: "Telegram Bot API integration with webhook support".into(),
            capabilities: vec![
                "messages".into(),
                "webhook".into(),
                "media".into(),
                "buttons".into(),
            ],
            config,
        }
    }

    fn initialize(&self, config: &Map<String, Value>) -> Result<()> {
        if let Some(token) = config.get("token").and_then(Value::as_str) {
            *self.inner.token.lock() = token.to_string();
            *self.inner.base_url.lock() = format!("https://api.telegram.org/bot{token}");
        }
        if let Some(enabled) = config.get("greetingEnabled").and_then(Value::as_bool) {
            self.inner.greeting_enabled.store(enabled, Ordering::SeqCst);
        }
        if let Some(text) = config.get("greetingText").and_then(Value::as_str) {
            *self.inner.greeting_text.lock() = text.to_string();
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            info!("telegram driver started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("telegram driver stopped");
        }
        Ok(())
    }

    async fn send_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse> {
        self.inner.send(req).await
    }

    async fn handle_webhook(&self, body: &[u8]) -> Result<Value> {
        let update: IncomingUpdate = serde_json::from_slice(body)
            .map_err(|e| OcgError::Input(format!("bad webhook payload: {e}")))?;

        if let Some(msg) = update.message {
            if !msg.text.is_empty() {
                // The webhook reply must not wait for the agent.
                tokio::spawn(self.inner.clone().process_incoming(msg));
            }
        }
        Ok(serde_json::json!({ "ok": true }))
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .inner
            .client
            .get(self.inner.api_url("getMe"))
            .send()
            .await
            .map_err(|e| OcgError::Channel {
                channel: "telegram".into(),
                reason: format!("API connection failed: {e}"),
            })?;
        if !resp.status().is_success() {
            return Err(OcgError::Channel {
                channel: "telegram".into(),
                reason: format!("API returned status {}", resp.status()),
            });
        }
        Ok(())
    }
}

fn truncate_message(text: &str) -> String {
    if text.len() <= TEXT_CHUNK_LIMIT {
        return text.to_string();
    }
    let end = text
        .char_indices()
        .take_while(|(i, _)| *i < TEXT_CHUNK_LIMIT)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(TEXT_CHUNK_LIMIT);
    format!("{}... (truncated)", &text[..end])
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ==================== Telegram wire shapes ====================

#[derive(Debug, Deserialize, Default)]
struct TelegramResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: String,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize, Default)]
struct SentMessage {
    #[serde(default)]
    message_id: i64,
    #[serde(default)]
    chat: ChatInfo,
    #[serde(default)]
    date: i64,
}

#[derive(Debug, Deserialize, Default)]
struct IncomingUpdate {
    #[serde(default)]
    #[allow(dead_code)]
    update_id: i64,
    #[serde(default)]
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct IncomingMessage {
    #[serde(default)]
    #[allow(dead_code)]
    message_id: i64,
    #[serde(default)]
    from: UserInfo,
    #[serde(default)]
    chat: ChatInfo,
    #[serde(default)]
    text: String,
    #[serde(default)]
    message_thread_id: i64,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct UserInfo {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct ChatInfo {
    #[serde(default)]
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct NullAgent;

    #[async_trait]
    impl ChannelAgent for NullAgent {
        async fn chat(&self, _messages: Vec<Message>) -> Result<String> {
            Ok("reply".into())
        }

        async fn stats(&self) -> Result<HashMap<String, i64>> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn truncation_respects_the_telegram_limit() {
        let long = "a".repeat(5000);
        let out = truncate_message(&long);
        assert!(out.ends_with("... (truncated)"));
        assert!(out.len() <= TEXT_CHUNK_LIMIT + "... (truncated)".len());
        assert_eq!(truncate_message("short"), "short");
    }

    #[test]
    fn webhook_updates_parse() {
        let body = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": { "id": 7, "first_name": "Sam", "username": "sam" },
                "chat": { "id": 42 },
                "date": 0,
                "text": "hello bot",
                "message_thread_id": 3,
            },
        });
        let update: IncomingUpdate =
            serde_json::from_slice(&serde_json::to_vec(&body).unwrap()).unwrap();
        let msg = update.message.unwrap();
        assert_eq!(msg.chat.id, 42);
        assert_eq!(msg.from.username, "sam");
        assert_eq!(msg.message_thread_id, 3);
    }

    #[test]
    fn info_advertises_the_contract() {
        let driver = TelegramDriver::new("tok", Arc::new(NullAgent));
        let info = driver.info();
        assert_eq!(info.channel_type, ChannelType::Telegram);
        assert_eq!(info.config["textChunkLimit"], 4096);
        assert_eq!(info.config["webhookPath"], "/telegram/webhook");
    }

    #[test]
    fn initialize_overrides_token_and_greeting() {
        let driver = TelegramDriver::new("old", Arc::new(NullAgent));
        let mut config = Map::new();
        config.insert("token".into(), "fresh".into());
        config.insert("greetingEnabled".into(), false.into());
        driver.initialize(&config).unwrap();
        assert!(driver.inner.api_url("getMe").contains("botfresh"));
        assert!(!driver.inner.greeting_enabled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn commands_answer_without_the_agent() {
        // Point the driver at a fake API server and drive the /help command
        // through the webhook path.
        let sent: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let state = sent.clone();
        let app = axum::Router::new().route(
            "/bottok/sendMessage",
            axum::routing::post(move |axum::Json(body): axum::Json<Value>| {
                let state = state.clone();
                async move {
                    state.lock().push(body);
                    axum::Json(serde_json::json!({
                        "ok": true,
                        "result": { "message_id": 1, "chat": { "id": 42 }, "date": 0 },
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let driver = TelegramDriver::new("tok", Arc::new(NullAgent))
            .with_api_base(&format!("http://{addr}/bottok"));

        let update = serde_json::json!({
            "update_id": 1,
            "message": {
                "from": { "id": 7, "username": "sam", "first_name": "Sam" },
                "chat": { "id": 42 },
                "text": "/help",
            },
        });
        let ack = driver
            .handle_webhook(&serde_json::to_vec(&update).unwrap())
            .await
            .unwrap();
        assert_eq!(ack["ok"], true);

        // The command reply goes out asynchronously.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["chat_id"], 42);
        assert!(sent[0]["text"].as_str().unwrap().contains("/stats"));
    }
}
