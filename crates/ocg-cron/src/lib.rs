//! # ocg-cron
//!
//! The cron scheduler: jobs live in a JSON file, a 1 s tick fires whatever is
//! due, and payloads are dispatched through injected callbacks: system
//! events into the main session, agent turns into isolated sessions, and
//! optional announce delivery to a channel.

pub mod handler;
pub mod job;
pub mod store;

pub use handler::{AgentTurnRunner, CronBroadcast, CronHandler, SystemEventSink};
pub use job::{
    next_cron_fire, Delivery, DeliveryMode, Job, JobSpec, JobState, Payload, PayloadKind,
    Schedule, ScheduleKind, SessionTarget, WakeMode,
};
pub use store::JobStore;
