use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use ocg_core::{EventPriority, OcgError, Result, Schema};

use crate::args::{get_string, get_i64};
use crate::registry::Tool;

/// Seam between the pulse tools and the scheduler that owns the queue.
#[async_trait]
pub trait PulseControl: Send + Sync {
    async fn add_event(
        &self,
        title: &str,
        content: &str,
        priority: EventPriority,
        channel: &str,
    ) -> Result<i64>;

    async fn status(&self) -> Result<Value>;
}

/// Seam between the sessions tool and the session manager.
#[async_trait]
pub trait SessionLister: Send + Sync {
    async fn session_infos(&self) -> Vec<Value>;
}

/// The `pulse_event` tool: enqueue an event for the heartbeat scheduler.
pub struct PulseEventTool {
    pulse: Arc<dyn PulseControl>,
}

impl PulseEventTool {
    pub fn new(pulse: Arc<dyn PulseControl>) -> Self {
        Self { pulse }
    }
}

#[async_trait]
impl Tool for PulseEventTool {
    fn name(&self) -> &str {
        "pulse_event"
    }

    fn description(&self) -> &str {
        "Queue an event for the heartbeat scheduler (priority 0=critical..3=low)."
    }

    fn parameters(&self) -> Schema {
        Schema::object(
            [
                ("title", Schema::string("Short event title")),
                ("content", Schema::string("Event description")),
                (
                    "priority",
                    Schema::string("0/critical, 1/high, 2/normal, 3/low")
                        .with_default(serde_json::json!("normal")),
                ),
                (
                    "channel",
                    Schema::string("Target channel (empty = all channels)"),
                ),
            ],
            ["title"],
        )
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<Value> {
        let title = get_string(args, "title");
        if title.is_empty() {
            return Err(OcgError::Input("title is required".into()));
        }
        let content = get_string(args, "content");
        let channel = get_string(args, "channel");
        let priority = match args.get("priority") {
            Some(Value::String(s)) => EventPriority::parse(s),
            Some(Value::Number(_)) => EventPriority::clamped(get_i64(args, "priority")),
            _ => EventPriority::Normal,
        };

        let id = self
            .pulse
            .add_event(&title, &content, priority, &channel)
            .await?;
        Ok(serde_json::json!({
            "id": id,
            "priority": priority.as_u8(),
            "result": format!("Event queued: {title}"),
        }))
    }
}

/// The `pulse_status` tool: scheduler status snapshot.
pub struct PulseStatusTool {
    pulse: Arc<dyn PulseControl>,
}

impl PulseStatusTool {
    pub fn new(pulse: Arc<dyn PulseControl>) -> Self {
        Self { pulse }
    }
}

#[async_trait]
impl Tool for PulseStatusTool {
    fn name(&self) -> &str {
        "pulse_status"
    }

    fn description(&self) -> &str {
        "Get the heartbeat scheduler status and event queue counts."
    }

    fn parameters(&self) -> Schema {
        Schema::object([], [])
    }

    async fn execute(&self, _args: &Map<String, Value>) -> Result<Value> {
        self.pulse.status().await
    }
}

/// The `sessions` tool: list active conversation sessions.
pub struct SessionsTool {
    sessions: Arc<dyn SessionLister>,
}

impl SessionsTool {
    pub fn new(sessions: Arc<dyn SessionLister>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for SessionsTool {
    fn name(&self) -> &str {
        "sessions"
    }

    fn description(&self) -> &str {
        "List conversation sessions with message counts and token usage."
    }

    fn parameters(&self) -> Schema {
        Schema::object([], [])
    }

    async fn execute(&self, _args: &Map<String, Value>) -> Result<Value> {
        let infos = self.sessions.session_infos().await;
        Ok(serde_json::json!({ "count": infos.len(), "sessions": infos }))
    }
}
