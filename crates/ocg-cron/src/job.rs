use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use ocg_core::{OcgError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    #[default]
    At,
    Every,
    Cron,
}

/// When a job runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub kind: ScheduleKind,
    /// RFC-3339 instant, for `at` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
    /// Interval in milliseconds, for `every` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<i64>,
    /// Five-field cron expression, for `cron` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// IANA timezone name for cron evaluation. Defaults to UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionTarget {
    #[default]
    Main,
    Isolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WakeMode {
    #[default]
    Now,
    NextHeartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PayloadKind {
    #[default]
    SystemEvent,
    AgentTurn,
}

/// What a job does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub kind: PayloadKind,
    /// Text for `systemEvent` payloads.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Message for `agentTurn` payloads.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Announce,
    #[default]
    None,
}

/// Where a job result goes besides the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub mode: DeliveryMode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(default)]
    pub best_effort: bool,
}

/// Mutable run state, persisted with the job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub next_run_at_ms: i64,
    pub last_run_at_ms: i64,
    /// "ok", "error", or "" before the first run.
    #[serde(default)]
    pub last_status: String,
    pub last_duration_ms: i64,
    pub consecutive_errors: u32,
}

/// A scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub session_target: SessionTarget,
    pub wake_mode: WakeMode,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
    pub delete_after_run: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub state: JobState,
}

/// Incoming job description from the API; everything optional except name
/// and schedule.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub session_target: Option<SessionTarget>,
    #[serde(default)]
    pub wake_mode: Option<WakeMode>,
    #[serde(default)]
    pub payload: Option<Payload>,
    #[serde(default)]
    pub delivery: Option<Delivery>,
    #[serde(default)]
    pub delete_after_run: Option<bool>,
}

impl Job {
    /// Build a job from an API spec, applying defaults and the
    /// session-target/payload-kind pairing rule.
    pub fn from_spec(spec: JobSpec) -> Result<Self> {
        if spec.name.is_empty() {
            return Err(OcgError::Input("name is required".into()));
        }
        let schedule = spec
            .schedule
            .ok_or_else(|| OcgError::Input("schedule is required".into()))?;

        let now = Utc::now();
        let mut job = Job {
            id: format!("job-{}", now.timestamp_millis()),
            name: spec.name,
            description: spec.description,
            agent_id: spec.agent_id,
            enabled: spec.enabled.unwrap_or(true),
            // One-shot jobs delete themselves after a terminal run unless the
            // caller says otherwise.
            delete_after_run: spec
                .delete_after_run
                .unwrap_or(schedule.kind == ScheduleKind::At),
            schedule,
            session_target: spec.session_target.unwrap_or_default(),
            wake_mode: spec.wake_mode.unwrap_or_default(),
            payload: spec.payload.unwrap_or_default(),
            delivery: spec.delivery,
            created_at: now,
            updated_at: now,
            state: JobState::default(),
        };
        job.enforce_payload_pairing();
        Ok(job)
    }

    /// Main sessions only take system events; isolated sessions only take
    /// agent turns. Correct silently rather than rejecting.
    pub fn enforce_payload_pairing(&mut self) {
        match self.session_target {
            SessionTarget::Main => self.payload.kind = PayloadKind::SystemEvent,
            SessionTarget::Isolated => self.payload.kind = PayloadKind::AgentTurn,
        }
    }

    /// Compute the next fire time in epoch milliseconds. 0 means "never".
    pub fn next_run_at_ms(&self, now: DateTime<Utc>) -> i64 {
        match self.schedule.kind {
            ScheduleKind::At => self
                .schedule
                .at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.timestamp_millis())
                .unwrap_or(0),
            ScheduleKind::Every => match self.schedule.every_ms {
                Some(ms) if ms > 0 => now.timestamp_millis() + ms,
                _ => 0,
            },
            ScheduleKind::Cron => {
                let Some(expr) = self.schedule.expr.as_deref() else {
                    return 0;
                };
                next_cron_fire(expr, self.schedule.tz.as_deref(), now)
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(0)
            }
        }
    }
}

/// Evaluate a five-field cron expression in the given timezone and return
/// the next fire time after `now`.
pub fn next_cron_fire(
    expr: &str,
    tz: Option<&str>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    // The evaluator takes a seconds field; five-field expressions fire at
    // second zero.
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    let schedule = match cron::Schedule::from_str(&normalized) {
        Ok(s) => s,
        Err(e) => {
            warn!(expr, error = %e, "invalid cron expression");
            return None;
        }
    };

    let tz: Tz = tz
        .and_then(|name| name.parse().ok())
        .unwrap_or(chrono_tz::UTC);
    let local_now = now.with_timezone(&tz);
    schedule
        .after(&local_now)
        .next()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_spec(at: &str) -> JobSpec {
        JobSpec {
            name: "test".into(),
            schedule: Some(Schedule {
                kind: ScheduleKind::At,
                at: Some(at.into()),
                ..Schedule::default()
            }),
            ..JobSpec::default()
        }
    }

    #[test]
    fn at_jobs_default_to_delete_after_run() {
        let job = Job::from_spec(at_spec("2030-01-01T00:00:00Z")).unwrap();
        assert!(job.delete_after_run);
        assert!(job.enabled);
    }

    #[test]
    fn main_target_forces_system_event() {
        let mut spec = at_spec("2030-01-01T00:00:00Z");
        spec.session_target = Some(SessionTarget::Main);
        spec.payload = Some(Payload {
            kind: PayloadKind::AgentTurn,
            message: "hi".into(),
            ..Payload::default()
        });
        let job = Job::from_spec(spec).unwrap();
        assert_eq!(job.payload.kind, PayloadKind::SystemEvent);
    }

    #[test]
    fn isolated_target_forces_agent_turn() {
        let mut spec = at_spec("2030-01-01T00:00:00Z");
        spec.session_target = Some(SessionTarget::Isolated);
        spec.payload = Some(Payload {
            kind: PayloadKind::SystemEvent,
            text: "tick".into(),
            ..Payload::default()
        });
        let job = Job::from_spec(spec).unwrap();
        assert_eq!(job.payload.kind, PayloadKind::AgentTurn);
    }

    #[test]
    fn missing_name_or_schedule_is_rejected() {
        assert!(Job::from_spec(JobSpec::default()).is_err());
        let spec = JobSpec {
            name: "x".into(),
            ..JobSpec::default()
        };
        assert!(Job::from_spec(spec).is_err());
    }

    #[test]
    fn past_at_jobs_fire_immediately() {
        let job = Job::from_spec(at_spec("2020-01-01T00:00:00Z")).unwrap();
        let next = job.next_run_at_ms(Utc::now());
        assert!(next > 0);
        assert!(next <= Utc::now().timestamp_millis());
    }

    #[test]
    fn every_jobs_fire_after_interval() {
        let spec = JobSpec {
            name: "tick".into(),
            schedule: Some(Schedule {
                kind: ScheduleKind::Every,
                every_ms: Some(60_000),
                ..Schedule::default()
            }),
            ..JobSpec::default()
        };
        let job = Job::from_spec(spec).unwrap();
        let now = Utc::now();
        let next = job.next_run_at_ms(now);
        assert_eq!(next, now.timestamp_millis() + 60_000);
    }

    #[test]
    fn quarter_hour_cron_fires_four_times_per_hour() {
        let start = DateTime::parse_from_rfc3339("2026-03-01T10:00:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut fires = Vec::new();
        let mut cursor = start;
        while let Some(next) = next_cron_fire("*/15 * * * *", None, cursor) {
            if next >= start + chrono::Duration::hours(1) {
                break;
            }
            fires.push(next);
            cursor = next;
        }
        assert_eq!(fires.len(), 4);
        assert_eq!(fires[0].format("%M:%S").to_string(), "15:00");
        assert_eq!(fires[3].format("%M:%S").to_string(), "00:00");
    }

    #[test]
    fn cron_respects_timezone() {
        let now = DateTime::parse_from_rfc3339("2026-06-15T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        // 09:00 daily in New York (UTC-4 in June) = 13:00 UTC.
        let next = next_cron_fire("0 9 * * *", Some("America/New_York"), now).unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "13:00");
    }

    #[test]
    fn invalid_cron_yields_no_fire() {
        assert!(next_cron_fire("not a cron", None, Utc::now()).is_none());
        let job = Job {
            schedule: Schedule {
                kind: ScheduleKind::Cron,
                expr: Some("bad".into()),
                ..Schedule::default()
            },
            ..Job::from_spec(at_spec("2030-01-01T00:00:00Z")).unwrap()
        };
        assert_eq!(job.next_run_at_ms(Utc::now()), 0);
    }
}
