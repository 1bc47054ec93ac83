use std::sync::Arc;
use std::sync::OnceLock;

use chrono::Utc;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use ocg_core::tool::ToolSpec;
use ocg_core::{Message, Role, ToolCall, ToolResult};
use ocg_memory::{detect_category, VectorMemoryStore};
use ocg_storage::Storage;
use ocg_tools::{format_memories_for_context, should_capture, Registry};

use crate::pulse::{PulseConfig, PulseHandler};
use crate::session::SessionManager;

/// Config section holding the LLM credentials inside the database.
pub const CONFIG_SECTION: &str = "llm";
/// The agent's own conversation history lives under this session key.
pub const MAIN_SESSION: &str = "main";

const DEFAULT_CONTEXT_TOKENS: usize = 8192;
const DEFAULT_RESERVE_TOKENS: usize = 1024;
const DEFAULT_SOFT_TOKENS: usize = 800;
const DEFAULT_KEEP_MESSAGES: usize = 30;

/// Tool-call chains recurse at most this deep before returning raw results.
const MAX_TOOL_DEPTH: u32 = 2;

/// Category weights applied when re-ranking recalled memories.
const CATEGORY_BOOSTS: &[(&str, f32)] = &[
    ("decision", 0.2),
    ("preference", 0.15),
    ("fact", 0.1),
    ("entity", 0.05),
];

/// Agent construction parameters.
#[derive(Default)]
pub struct AgentConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub storage: Option<Storage>,
    pub memory: Option<Arc<VectorMemoryStore>>,
    pub registry: Option<Registry>,
    pub auto_recall: bool,
    pub recall_limit: usize,
    pub recall_min_score: f64,
    pub pulse_enabled: bool,
    pub pulse: Option<PulseConfig>,
}

struct LlmTarget {
    api_key: String,
    base_url: String,
    model: String,
}

/// The agent core: turns chat requests into iterative tool-calling
/// conversations, with compaction, auto-capture, and auto-recall on top of
/// the persistent session history.
pub struct Agent {
    name: String,
    llm: RwLock<LlmTarget>,
    client: reqwest::Client,
    store: Option<Storage>,
    memory: Option<Arc<VectorMemoryStore>>,
    registry: Registry,
    sessions: Arc<SessionManager>,
    auto_recall: bool,
    recall_limit: usize,
    recall_min_score: f32,
    tool_specs: RwLock<Vec<ToolSpec>>,
    pulse: Option<Arc<PulseHandler>>,
}

impl Agent {
    pub fn new(cfg: AgentConfig) -> Arc<Self> {
        let registry = cfg.registry.unwrap_or_else(ocg_tools::default_registry);
        let sessions = Arc::new(SessionManager::new(cfg.storage.clone(), "ocg"));

        let pulse = if cfg.pulse_enabled {
            cfg.storage.as_ref().map(|store| {
                Arc::new(PulseHandler::new(
                    store.clone(),
                    cfg.pulse.unwrap_or_default(),
                ))
            })
        } else {
            None
        };

        let agent = Arc::new(Self {
            name: "ocg".into(),
            llm: RwLock::new(LlmTarget {
                api_key: cfg.api_key,
                base_url: cfg.base_url,
                model: cfg.model,
            }),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            store: cfg.storage,
            memory: cfg.memory,
            registry,
            sessions,
            auto_recall: cfg.auto_recall,
            recall_limit: if cfg.recall_limit > 0 {
                cfg.recall_limit
            } else {
                3
            },
            recall_min_score: if cfg.recall_min_score > 0.0 {
                cfg.recall_min_score as f32
            } else {
                0.3
            },
            tool_specs: RwLock::new(Vec::new()),
            pulse,
        });

        if agent.store.is_some() {
            agent.load_config_from_db();
        }
        if let Some(pulse) = &agent.pulse {
            pulse.start();
            info!("pulse scheduler enabled");
        }
        agent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> Option<&Storage> {
        self.store.as_ref()
    }

    pub fn memory(&self) -> Option<&Arc<VectorMemoryStore>> {
        self.memory.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn pulse(&self) -> Option<&Arc<PulseHandler>> {
        self.pulse.as_ref()
    }

    /// Queue a pulse event (tool/RPC surface).
    pub fn add_pulse_event(
        &self,
        title: &str,
        content: &str,
        priority: i64,
        channel: &str,
    ) -> ocg_core::Result<i64> {
        match &self.pulse {
            Some(pulse) => pulse.add_event(title, content, priority, channel),
            None => Err(ocg_core::OcgError::Pulse("pulse system not enabled".into())),
        }
    }

    pub fn pulse_status(&self) -> Value {
        match &self.pulse {
            Some(pulse) => pulse
                .status()
                .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() })),
            None => serde_json::json!({ "enabled": false }),
        }
    }

    // ==================== Config persistence ====================

    fn load_config_from_db(&self) {
        let Some(store) = &self.store else { return };
        match store.config_exists(CONFIG_SECTION) {
            Ok(false) => {
                debug!("first start, seeding llm config section");
                self.save_config_to_db();
            }
            Ok(true) => {
                if let Ok(section) = store.get_config_section(CONFIG_SECTION) {
                    let mut llm = self.llm.write();
                    if let Some(v) = section.get("apiKey").filter(|v| !v.is_empty()) {
                        llm.api_key = v.clone();
                    }
                    if let Some(v) = section.get("baseUrl").filter(|v| !v.is_empty()) {
                        llm.base_url = v.clone();
                    }
                    if let Some(v) = section.get("model").filter(|v| !v.is_empty()) {
                        llm.model = v.clone();
                    }
                    debug!("llm config loaded from database");
                }
            }
            Err(e) => warn!(error = %e, "failed to check llm config section"),
        }
    }

    fn save_config_to_db(&self) {
        let Some(store) = &self.store else { return };
        let llm = self.llm.read();
        for (key, value) in [
            ("apiKey", &llm.api_key),
            ("baseUrl", &llm.base_url),
            ("model", &llm.model),
        ] {
            if !value.is_empty() {
                if let Err(e) = store.set_config(CONFIG_SECTION, key, value) {
                    warn!(error = %e, key, "failed to persist llm config");
                }
            }
        }
    }

    pub fn update_config(&self, api_key: &str, base_url: &str, model: &str) {
        {
            let mut llm = self.llm.write();
            llm.api_key = api_key.to_string();
            llm.base_url = base_url.to_string();
            llm.model = model.to_string();
        }
        self.save_config_to_db();
    }

    fn llm_target(&self) -> (String, String, String) {
        let llm = self.llm.read();
        (llm.api_key.clone(), llm.base_url.clone(), llm.model.clone())
    }

    // ==================== Chat pipeline ====================

    /// Turn a conversation into a single reply string. This is the whole
    /// pipeline: persist, capture, flush, compact, shortcut, recall, model
    /// call, tool chain.
    pub async fn chat(&self, mut messages: Vec<Message>) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if self.store.is_some() && !last_user.is_empty() {
            if let Some(store) = &self.store {
                if let Err(e) = store.add_message(MAIN_SESSION, "user", "[redacted]") {
                    warn!(error = %e, "failed to persist user turn");
                }
            }
            self.maybe_capture(&last_user).await;
            self.maybe_flush_memory(&last_user).await;
            self.compact_session(MAIN_SESSION).await;
        }

        // Caller-initiated tool calls short-circuit the model.
        if let Some(last) = messages.last() {
            if !last.tool_calls.is_empty() {
                let calls = last.tool_calls.clone();
                return self.handle_tool_calls(messages, calls, None, 0).await;
            }
        }

        // Natural-language edit requests go straight to the edit tool.
        if let Some(args) = detect_edit_intent(&last_user) {
            return self.handle_edit(args).await;
        }

        // Recall injection: explicit request or always-on auto-recall.
        if self.memory.is_some() && (is_recall_request(&last_user) || self.auto_recall) {
            if let Some(block) = self.recall_relevant_memories(&last_user).await {
                debug!(memories = block.matches("- [").count(), "recall injected");
                messages.insert(0, Message::system(block));
            }
        }

        let (api_key, _, _) = self.llm_target();
        if api_key.is_empty() {
            return self.simple_response(&messages);
        }
        self.call_api(messages, 0).await
    }

    /// Opportunistic long-term memory write for capture-worthy user turns.
    async fn maybe_capture(&self, text: &str) {
        let Some(memory) = &self.memory else { return };
        if !should_capture(text) {
            return;
        }
        let duplicates = memory.search(text, 1, 0.95).await.unwrap_or_default();
        if !duplicates.is_empty() {
            return;
        }
        let category = detect_category(text);
        if let Err(e) = memory.store_with_source(text, category, 0.6, "auto").await {
            warn!(error = %e, "auto memory write failed");
        }
    }

    /// Soft memory flush: every 50 persisted messages, at most once per ten
    /// minutes, try a second capture and remember when we did.
    async fn maybe_flush_memory(&self, last_msg: &str) {
        let (Some(store), Some(memory)) = (&self.store, &self.memory) else {
            return;
        };

        let msg_count = match store.stats() {
            Ok(stats) => stats.get("messages").copied().unwrap_or(0),
            Err(_) => return,
        };
        if msg_count == 0 || msg_count % 50 != 0 {
            return;
        }

        let last_flush_at: i64 = store
            .get_config("memory", "lastFlushAt")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let last_flush_count: i64 = store
            .get_config("memory", "lastFlushCount")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if last_flush_count == msg_count {
            return;
        }
        let now = Utc::now().timestamp();
        if now - last_flush_at < 600 {
            return;
        }

        if !last_msg.is_empty() && should_capture(last_msg) {
            let category = detect_category(last_msg);
            let _ = memory
                .store_with_source(last_msg, category, 0.5, "flush")
                .await;
        }

        let _ = store.set_config("memory", "lastFlushAt", &now.to_string());
        let _ = store.set_config("memory", "lastFlushCount", &msg_count.to_string());
    }

    /// Session compaction: when the stored history outgrows the context
    /// budget, archive everything but the newest tail and replace it with a
    /// short summary message.
    pub async fn compact_session(&self, session_key: &str) {
        let Some(store) = &self.store else { return };

        let mut meta = match store.get_session_meta(session_key) {
            Ok(m) => m,
            Err(_) => return,
        };
        let stored = match store.get_messages(session_key, 500) {
            Ok(m) => m,
            Err(_) => return,
        };

        let tokens: usize = stored.iter().map(|m| m.content.len() / 4 + 4).sum();
        meta.total_tokens = tokens as i64;
        let _ = store.upsert_session_meta(&meta);

        let threshold = DEFAULT_CONTEXT_TOKENS - DEFAULT_RESERVE_TOKENS - DEFAULT_SOFT_TOKENS;
        if tokens < threshold || stored.len() <= DEFAULT_KEEP_MESSAGES {
            return;
        }

        let cut = stored.len() - DEFAULT_KEEP_MESSAGES;
        let (old, keep) = stored.split_at(cut);

        let summary = build_summary(old);
        meta.compaction_count += 1;
        meta.last_summary = summary.clone();
        meta.memory_flush_compaction_count = meta.compaction_count;
        meta.memory_flush_at = Some(Utc::now());
        let _ = store.upsert_session_meta(&meta);

        if let Some(last_old) = old.last() {
            let _ = store.archive_messages(session_key, last_old.id);
        }
        let _ = store.clear_messages(session_key);
        for m in keep {
            let _ = store.add_message(session_key, &m.role, &m.content);
        }
        if !summary.is_empty() {
            let _ = store.add_message(session_key, "system", &format!("[summary]\n{summary}"));
        }
        info!(
            session = session_key,
            kept = keep.len(),
            total_tokens = tokens,
            "compaction done"
        );
    }

    // ==================== Recall ====================

    /// Top-ranked memories for the prompt, re-ranked by importance and
    /// category, formatted as the `<relevant-memories>` block.
    async fn recall_relevant_memories(&self, prompt: &str) -> Option<String> {
        let memory = self.memory.as_ref()?;
        if prompt.is_empty() {
            return None;
        }

        let limit = self.recall_limit;
        let mut results = memory
            .search(prompt, limit * 2, self.recall_min_score)
            .await
            .ok()
            .filter(|r| !r.is_empty())?;

        results.sort_by(|a, b| {
            let weight = |r: &ocg_memory::MemoryResult| {
                r.score
                    * (1.0 + r.entry.importance as f32)
                    * (1.0 + category_boost(&r.entry.category))
            };
            weight(b)
                .partial_cmp(&weight(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        Some(format_memories_for_context(&results))
    }

    // ==================== Tool-call chain ====================

    async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let name = &call.function.name;
            let args = ocg_tools::parse_args(&call.function.arguments);
            let result = match self.registry.call(name, &args).await {
                Ok(data) => ToolResult::ok(&call.id, name, data),
                Err(e) => ToolResult::err(&call.id, name, &e.to_string()),
            };
            results.push(result);
        }
        results
    }

    /// One round of the tool chain. At the depth bound (or with no model to
    /// hand results back to) the aggregated results are returned as JSON.
    async fn handle_tool_calls(
        &self,
        messages: Vec<Message>,
        calls: Vec<ToolCall>,
        assistant_msg: Option<Message>,
        depth: u32,
    ) -> String {
        let results = self.execute_tool_calls(&calls).await;
        let blob = serde_json::json!({ "tool_results": results }).to_string();

        let (api_key, _, _) = self.llm_target();
        if api_key.is_empty() || depth >= MAX_TOOL_DEPTH {
            return blob;
        }

        let mut next = messages;
        match assistant_msg {
            Some(msg) => next.push(msg),
            None => {
                // Caller-initiated chains synthesize the assistant turn that
                // carries the calls, unless the tail already has them.
                let tail_has_calls = next
                    .last()
                    .map(|m| !m.tool_calls.is_empty())
                    .unwrap_or(false);
                if !tail_has_calls {
                    let mut msg = Message::assistant("");
                    msg.tool_calls = calls.clone();
                    next.push(msg);
                }
            }
        }
        for (call, result) in calls.iter().zip(&results) {
            let content = serde_json::to_string(&result.result).unwrap_or_default();
            next.push(Message::tool(content, &call.id));
        }

        Box::pin(self.call_api(next, depth + 1)).await
    }

    async fn handle_edit(&self, args: Map<String, Value>) -> String {
        match self.registry.call("edit", &args).await {
            Ok(result) => format!(
                "Edit completed: {}",
                serde_json::to_string(&result).unwrap_or_default()
            ),
            Err(e) => format!("Edit failed: {e}"),
        }
    }

    // ==================== Model call ====================

    fn cached_tool_specs(&self) -> Vec<ToolSpec> {
        {
            let specs = self.tool_specs.read();
            if !specs.is_empty() {
                return specs.clone();
            }
        }
        let fresh = self.registry.specs();
        *self.tool_specs.write() = fresh.clone();
        fresh
    }

    /// Drop the schema cache; the next call re-exports from the registry.
    pub fn refresh_tool_specs(&self) {
        self.tool_specs.write().clear();
    }

    async fn call_api(&self, messages: Vec<Message>, depth: u32) -> String {
        let (api_key, base_url, model) = self.llm_target();

        let request = ChatCompletionRequest {
            model,
            messages: messages.clone(),
            temperature: 0.7,
            max_tokens: 1000,
            tools: self.cached_tool_specs(),
        };

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let resp = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return format!("API error: {e}"),
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return format!("API error ({status}): {body}");
        }

        let completion: ChatCompletionResponse = match resp.json().await {
            Ok(c) => c,
            Err(e) => return format!("parse error: {e}"),
        };
        let Some(choice) = completion.choices.into_iter().next() else {
            return "no response".into();
        };

        // Standard tool calls, filtering entries with empty name/arguments.
        let valid_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .iter()
            .filter(|tc| !tc.function.name.is_empty() && !tc.function.arguments.is_empty())
            .cloned()
            .collect();
        if !valid_calls.is_empty() {
            let assistant = choice.message.clone();
            return self
                .handle_tool_calls(messages, valid_calls, Some(assistant), depth)
                .await;
        }

        // Some models emit an XML-ish tool-call format inside the content.
        let content = choice.message.content.clone();
        let custom_calls = parse_custom_tool_calls(&content);
        if !custom_calls.is_empty() {
            let mut assistant = Message::assistant(&content);
            assistant.tool_calls = custom_calls.clone();
            return self
                .handle_tool_calls(messages, custom_calls, Some(assistant), depth)
                .await;
        }

        if let Some(store) = &self.store {
            let _ = store.add_message(MAIN_SESSION, "assistant", "[redacted]");
        }
        content
    }

    /// Canned replies when no API key is configured.
    fn simple_response(&self, messages: &[Message]) -> String {
        let user_msg = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let input = user_msg.trim().to_lowercase();

        let response = if input.contains("hello") || input.contains("hi") {
            format!(
                "Hello! I am {}.\n\nAvailable tools:\n- exec: run commands\n- read: read files\n- write: write files",
                self.name
            )
        } else if input.contains("time") {
            Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
        } else if input.contains("stat") {
            let stats = self
                .store
                .as_ref()
                .and_then(|s| s.stats().ok())
                .unwrap_or_default();
            let memories = self
                .memory
                .as_ref()
                .and_then(|m| m.count().ok())
                .unwrap_or(0);
            format!(
                "Storage stats:\n- messages: {}\n- memories: {}\n- events: {}",
                stats.get("messages").copied().unwrap_or(0),
                memories,
                stats.get("events").copied().unwrap_or(0),
            )
        } else if input.contains("tools") {
            format!("Available tools:\n- {}", self.registry.list().join("\n- "))
        } else if input.contains("help") {
            format!(
                "{}\n\nCommands:\n- hello - greeting\n- time - time\n- stat - stats\n- tools - list tools\n- help - help",
                self.name
            )
        } else {
            format!("I received: {user_msg}")
        };

        if let Some(store) = &self.store {
            let _ = store.add_message(MAIN_SESSION, "assistant", &response);
        }
        response
    }
}

// ==================== Wire shapes ====================

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: Message,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

// ==================== Text heuristics ====================

fn category_boost(category: &str) -> f32 {
    let lower = category.to_lowercase();
    CATEGORY_BOOSTS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, boost)| *boost)
        .unwrap_or(0.0)
}

/// Build the compaction summary: one `role: content` line per message,
/// content capped at 200 chars and the whole summary at 2000.
fn build_summary(messages: &[ocg_storage::StoredMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = messages
        .iter()
        .map(|m| {
            let content: String = if m.content.len() > 200 {
                let cut: String = m.content.chars().take(200).collect();
                format!("{cut}...")
            } else {
                m.content.clone()
            };
            format!("{}: {}", m.role, content)
        })
        .collect();
    let summary = lines.join("\n");
    if summary.len() > 2000 {
        let cut: String = summary.chars().take(2000).collect();
        format!("{cut}...")
    } else {
        summary
    }
}

pub(crate) fn is_recall_request(msg: &str) -> bool {
    let low = msg.trim().to_lowercase();
    low.starts_with("/recall") || low.starts_with("recall") || low.starts_with("remember")
}

/// Detect "edit this file" phrasings and translate them to edit-tool args.
pub fn detect_edit_intent(msg: &str) -> Option<Map<String, Value>> {
    static PATTERNS: OnceLock<[(Regex, [usize; 3]); 4]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            // Edit <path>: replace <old> with <new>
            (
                Regex::new(r"(?i)Edit\s+([^:]+):\s*replace\s+(.+)\s+with\s+(.+)").unwrap(),
                [1, 2, 3],
            ),
            // Edit <path>: change <old> to <new>
            (
                Regex::new(r"(?i)Edit\s+([^:]+):\s*change\s+(.+)\s+to\s+(.+)").unwrap(),
                [1, 2, 3],
            ),
            // Replace <old> with <new> in <path>
            (
                Regex::new(r"(?i)Replace\s+(.+)\s+with\s+(.+)\s+in\s+(.+)").unwrap(),
                [3, 1, 2],
            ),
            // Permissive fallback with a bare path token.
            (
                Regex::new(r"(?i)replace\s+(.+)\s+with\s+(.+)\s+in\s+([^ ]+)").unwrap(),
                [3, 1, 2],
            ),
        ]
    });

    for (re, [path_idx, old_idx, new_idx]) in patterns {
        if let Some(caps) = re.captures(msg) {
            let mut args = Map::new();
            args.insert(
                "path".into(),
                Value::String(caps[*path_idx].trim().to_string()),
            );
            args.insert(
                "oldText".into(),
                Value::String(caps[*old_idx].trim().to_string()),
            );
            args.insert(
                "newText".into(),
                Value::String(caps[*new_idx].trim().to_string()),
            );
            return Some(args);
        }
    }
    None
}

/// Parse the XML-ish tool-call format some models emit inside text content:
/// `<vendor:tool_call><invoke name="X"><parameter name="k">v</parameter>…`.
pub fn parse_custom_tool_calls(content: &str) -> Vec<ToolCall> {
    static INVOKE: OnceLock<Regex> = OnceLock::new();
    static PARAM: OnceLock<Regex> = OnceLock::new();
    let invoke = INVOKE.get_or_init(|| {
        Regex::new(r#"(?is)<\w+:tool_call>\s*<invoke\s+name="([^"]+)"[^>]*>(.*?)</invoke>"#)
            .unwrap()
    });
    let param = PARAM
        .get_or_init(|| Regex::new(r#"<parameter\s+name="([^"]+)">([^<]*)</parameter>"#).unwrap());

    let mut calls = Vec::new();
    for caps in invoke.captures_iter(content) {
        let tool_name = map_tool_name(&caps[1]);
        let params_str = &caps[2];

        let mut args = Map::new();
        for p in param.captures_iter(params_str) {
            args.insert(p[1].to_string(), Value::String(p[2].trim().to_string()));
        }
        let arguments = serde_json::to_string(&args).unwrap_or_else(|_| "{}".into());

        calls.push(ToolCall::new(
            format!("call_{}", calls.len()),
            tool_name,
            arguments,
        ));
    }
    calls
}

/// Model-specific tool aliases rewritten to registry names.
fn map_tool_name(name: &str) -> String {
    match name {
        "read_file" | "cat" => "read".into(),
        "write_file" => "write".into(),
        "execute_command" | "exec_cmd" => "exec".into(),
        other => other.to_string(),
    }
}
