use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pulse event priority. Lower value means higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventPriority {
    /// Broadcast to all channels immediately.
    Critical,
    /// Broadcast to the configured channel.
    High,
    /// Process when idle.
    Normal,
    /// Process when available.
    Low,
}

impl EventPriority {
    pub fn as_u8(self) -> u8 {
        match self {
            EventPriority::Critical => 0,
            EventPriority::High => 1,
            EventPriority::Normal => 2,
            EventPriority::Low => 3,
        }
    }

    /// Out-of-range values clamp to `Normal`.
    pub fn clamped(value: i64) -> Self {
        match value {
            0 => EventPriority::Critical,
            1 => EventPriority::High,
            3 => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    /// Parse the human spellings accepted by the pulse tool.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "0" | "critical" | "crit" | "c" => EventPriority::Critical,
            "1" | "high" | "important" | "h" => EventPriority::High,
            "3" | "low" | "l" => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }
}

impl From<EventPriority> for u8 {
    fn from(p: EventPriority) -> u8 {
        p.as_u8()
    }
}

impl TryFrom<u8> for EventPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventPriority::Critical),
            1 => Ok(EventPriority::High),
            2 => Ok(EventPriority::Normal),
            3 => Ok(EventPriority::Low),
            other => Err(format!("priority out of range: {other}")),
        }
    }
}

/// Lifecycle of a pulse event. Events leave `Pending` only through the pulse
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Dismissed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::CompletedWithErrors => "completed_with_errors",
            EventStatus::Dismissed => "dismissed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::CompletedWithErrors | EventStatus::Dismissed
        )
    }
}

impl std::str::FromStr for EventStatus {
    type Err = crate::OcgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "completed" => Ok(EventStatus::Completed),
            "completed_with_errors" => Ok(EventStatus::CompletedWithErrors),
            "dismissed" => Ok(EventStatus::Dismissed),
            other => Err(crate::OcgError::Input(format!("unknown event status: {other}"))),
        }
    }
}

/// A queued pulse event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub priority: EventPriority,
    pub status: EventStatus,
    /// Target channel, empty meaning "all channels".
    #[serde(default)]
    pub channel: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}
