use std::sync::Arc;

use async_trait::async_trait;
use chrono::Timelike;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ocg_core::{Event, EventPriority, EventStatus, Result};
use ocg_storage::Storage;

/// Heartbeat scheduler configuration.
#[derive(Debug, Clone)]
pub struct PulseConfig {
    pub interval: std::time::Duration,
    pub llm_enabled: bool,
    pub cleanup_hours: i64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(1),
            llm_enabled: true,
            cleanup_hours: 24,
        }
    }
}

/// Fan-out callback for critical/high events.
#[async_trait]
pub trait PulseBroadcast: Send + Sync {
    /// `channel` empty means "all channels".
    async fn broadcast(&self, message: &str, priority: u8, channel: &str) -> Result<()>;
}

/// LLM analysis callback for normal/low events.
#[async_trait]
pub trait PulseLlm: Send + Sync {
    async fn process(&self, input: &str) -> Result<String>;
}

/// Post-processing observer.
pub trait PulseObserver: Send + Sync {
    fn on_event(&self, event: &ProcessedEvent);
}

/// Outcome of one processed event.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event: Event,
    pub response: String,
    pub errors: Vec<String>,
}

#[derive(Default)]
struct PulseState {
    is_processing: bool,
    current: Option<Event>,
}

/// The pulse scheduler: every tick, admit and process the highest-priority
/// oldest pending event from the queue.
pub struct PulseHandler {
    storage: Storage,
    config: PulseConfig,
    state: Mutex<PulseState>,
    on_broadcast: RwLock<Option<Arc<dyn PulseBroadcast>>>,
    on_llm: RwLock<Option<Arc<dyn PulseLlm>>>,
    on_event: RwLock<Option<Arc<dyn PulseObserver>>>,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl PulseHandler {
    pub fn new(storage: Storage, config: PulseConfig) -> Self {
        Self {
            storage,
            config,
            state: Mutex::new(PulseState::default()),
            on_broadcast: RwLock::new(None),
            on_llm: RwLock::new(None),
            on_event: RwLock::new(None),
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn set_broadcast(&self, cb: Arc<dyn PulseBroadcast>) {
        *self.on_broadcast.write() = Some(cb);
    }

    pub fn set_llm(&self, cb: Arc<dyn PulseLlm>) {
        *self.on_llm.write() = Some(cb);
    }

    pub fn set_observer(&self, cb: Arc<dyn PulseObserver>) {
        *self.on_event.write() = Some(cb);
    }

    /// Spawn the heartbeat loop.
    pub fn start(self: &Arc<Self>) {
        if self.shutdown_tx.read().is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.write() = Some(tx);

        info!(interval = ?self.config.interval, "pulse scheduler started");
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(handler.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            info!("pulse scheduler stopped");
                            return;
                        }
                    }
                    _ = ticker.tick() => handler.tick().await,
                }
            }
        });
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.write().take() {
            let _ = tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.read().is_some()
    }

    pub fn is_processing(&self) -> bool {
        self.state.lock().is_processing
    }

    /// One heartbeat: pop the queue head, apply the admission rules, process.
    /// Once a minute, terminal events older than the cleanup window are
    /// deleted.
    pub async fn tick(&self) {
        let event = match self.storage.next_pending_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                if chrono::Utc::now().second() == 0 {
                    if let Err(e) = self.storage.clear_old_events(self.config.cleanup_hours) {
                        warn!(error = %e, "event cleanup failed");
                    }
                }
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read event queue");
                return;
            }
        };

        if !self.should_process(&event) {
            return;
        }
        self.process_event(event).await;
    }

    /// Admission rules: critical always runs; high runs unless something is
    /// already in flight (a critical in flight blocks it); normal/low only
    /// run when idle.
    pub fn should_process(&self, event: &Event) -> bool {
        let state = self.state.lock();
        if state.is_processing && event.priority > EventPriority::Critical {
            // While busy, only a critical event may preempt admission, and
            // high still gets in when the in-flight work is lower priority.
            if event.priority == EventPriority::High {
                return state
                    .current
                    .as_ref()
                    .map(|cur| cur.priority >= EventPriority::Normal)
                    .unwrap_or(true);
            }
            return false;
        }
        true
    }

    async fn process_event(&self, event: Event) {
        {
            let mut state = self.state.lock();
            state.is_processing = true;
            state.current = Some(event.clone());
        }
        info!(
            event_id = event.id,
            priority = event.priority.as_u8(),
            title = %event.title,
            "processing event"
        );

        if let Err(e) = self
            .storage
            .update_event_status(event.id, EventStatus::Processing)
        {
            warn!(error = %e, "failed to mark event processing");
        }

        let mut response = String::new();
        let mut errors: Vec<String> = Vec::new();

        match event.priority {
            EventPriority::Critical => {
                let msg = format!("🔴 CRITICAL: {}\n\n{}", event.title, event.content);
                let cb = self.on_broadcast.read().clone();
                if let Some(cb) = cb {
                    if let Err(e) = cb.broadcast(&msg, 0, "").await {
                        errors.push(e.to_string());
                    }
                }
                response = "Broadcasted to all channels".into();
            }
            EventPriority::High => {
                let msg = format!("⚠️ {}\n\n{}", event.title, event.content);
                let cb = self.on_broadcast.read().clone();
                if let Some(cb) = cb {
                    if let Err(e) = cb.broadcast(&msg, 1, &event.channel).await {
                        errors.push(e.to_string());
                    }
                }
                response = "Broadcasted to channel".into();
            }
            EventPriority::Normal | EventPriority::Low => {
                if self.config.llm_enabled {
                    let cb = self.on_llm.read().clone();
                    if let Some(cb) = cb {
                        let input = format!(
                            "Event: {}\n\nDescription: {}\n\nPlease analyze and respond:",
                            event.title, event.content
                        );
                        match cb.process(&input).await {
                            Ok(text) => response = text,
                            Err(e) => errors.push(e.to_string()),
                        }
                    }
                }
            }
        }

        let processed = ProcessedEvent {
            event: event.clone(),
            response,
            errors: errors.clone(),
        };
        {
            let observer = self.on_event.read().clone();
            if let Some(observer) = observer {
                observer.on_event(&processed);
            }
        }

        let status = if errors.is_empty() {
            EventStatus::Completed
        } else {
            error!(event_id = event.id, errors = ?errors, "event completed with errors");
            EventStatus::CompletedWithErrors
        };
        if let Err(e) = self.storage.update_event_status(event.id, status) {
            warn!(error = %e, "failed to finalize event status");
        }

        let mut state = self.state.lock();
        state.is_processing = false;
        state.current = None;
        debug!(event_id = event.id, status = status.as_str(), "event done");
    }

    /// Queue a new event. Out-of-range priorities clamp to normal.
    pub fn add_event(
        &self,
        title: &str,
        content: &str,
        priority: i64,
        channel: &str,
    ) -> Result<i64> {
        self.storage
            .add_event(title, content, EventPriority::clamped(priority), channel)
    }

    pub fn status(&self) -> Result<Value> {
        let counts = self.storage.event_counts()?;
        let state = self.state.lock();
        Ok(serde_json::json!({
            "running": self.is_running(),
            "is_processing": state.is_processing,
            "current_event": state.current,
            "event_counts": counts,
            "interval_ms": self.config.interval.as_millis() as u64,
            "cleanup_hours": self.config.cleanup_hours,
        }))
    }
}

#[async_trait]
impl ocg_tools::PulseControl for PulseHandler {
    async fn add_event(
        &self,
        title: &str,
        content: &str,
        priority: EventPriority,
        channel: &str,
    ) -> Result<i64> {
        PulseHandler::add_event(self, title, content, priority.as_u8() as i64, channel)
    }

    async fn status(&self) -> Result<Value> {
        PulseHandler::status(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocg_core::OcgError;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        broadcasts: PlMutex<Vec<(String, u8, String)>>,
        llm_inputs: PlMutex<Vec<String>>,
        fail_broadcast: bool,
    }

    impl Recorder {
        fn new(fail_broadcast: bool) -> Arc<Self> {
            Arc::new(Self {
                broadcasts: PlMutex::new(vec![]),
                llm_inputs: PlMutex::new(vec![]),
                fail_broadcast,
            })
        }
    }

    #[async_trait]
    impl PulseBroadcast for Recorder {
        async fn broadcast(&self, message: &str, priority: u8, channel: &str) -> Result<()> {
            if self.fail_broadcast {
                return Err(OcgError::Channel {
                    channel: "telegram".into(),
                    reason: "offline".into(),
                });
            }
            self.broadcasts
                .lock()
                .push((message.to_string(), priority, channel.to_string()));
            Ok(())
        }
    }

    #[async_trait]
    impl PulseLlm for Recorder {
        async fn process(&self, input: &str) -> Result<String> {
            self.llm_inputs.lock().push(input.to_string());
            Ok("analyzed".into())
        }
    }

    fn handler(recorder: Arc<Recorder>) -> PulseHandler {
        let storage = Storage::open_in_memory().unwrap();
        let handler = PulseHandler::new(storage, PulseConfig::default());
        handler.set_broadcast(recorder.clone());
        handler.set_llm(recorder);
        handler
    }

    #[tokio::test]
    async fn critical_event_broadcasts_and_completes() {
        let recorder = Recorder::new(false);
        let handler = handler(recorder.clone());

        let id = handler.add_event("disk", "full", 0, "").unwrap();
        handler.tick().await;

        let broadcasts = recorder.broadcasts.lock();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].0.contains("CRITICAL"));
        assert!(broadcasts[0].0.contains("disk"));
        assert_eq!(broadcasts[0].1, 0);
        drop(broadcasts);

        let counts = handler.storage.event_counts().unwrap();
        assert_eq!(counts["completed"], 1);
        let _ = id;
    }

    #[tokio::test]
    async fn high_events_honor_the_channel_field() {
        let recorder = Recorder::new(false);
        let handler = handler(recorder.clone());

        handler.add_event("deploy", "done", 1, "telegram").unwrap();
        handler.tick().await;

        let broadcasts = recorder.broadcasts.lock();
        assert_eq!(broadcasts[0].2, "telegram");
        assert_eq!(broadcasts[0].1, 1);
    }

    #[tokio::test]
    async fn normal_events_go_through_the_llm() {
        let recorder = Recorder::new(false);
        let handler = handler(recorder.clone());

        handler.add_event("digest", "daily summary", 2, "").unwrap();
        handler.tick().await;

        let inputs = recorder.llm_inputs.lock();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].starts_with("Event: digest"));
        assert!(inputs[0].contains("Please analyze and respond:"));
    }

    #[tokio::test]
    async fn callback_failure_marks_completed_with_errors() {
        let recorder = Recorder::new(true);
        let handler = handler(recorder);

        handler.add_event("disk", "full", 0, "").unwrap();
        handler.tick().await;

        let counts = handler.storage.event_counts().unwrap();
        assert_eq!(counts["completed_with_errors"], 1);
    }

    #[tokio::test]
    async fn admission_rules_gate_by_in_flight_priority() {
        let recorder = Recorder::new(false);
        let handler = handler(recorder);

        let pending = |p: i64| Event {
            id: 1,
            title: "t".into(),
            content: String::new(),
            priority: EventPriority::clamped(p),
            status: EventStatus::Pending,
            channel: String::new(),
            created_at: chrono::Utc::now(),
            processed_at: None,
        };

        // Idle: everything is admitted.
        for p in 0..4 {
            assert!(handler.should_process(&pending(p)));
        }

        // A normal event is in flight: critical passes, high passes (in-flight
        // work is lower priority), normal and low wait.
        {
            let mut state = handler.state.lock();
            state.is_processing = true;
            state.current = Some(pending(2));
        }
        assert!(handler.should_process(&pending(0)));
        assert!(handler.should_process(&pending(1)));
        assert!(!handler.should_process(&pending(2)));
        assert!(!handler.should_process(&pending(3)));

        // A critical event is in flight: even high waits.
        {
            let mut state = handler.state.lock();
            state.current = Some(pending(0));
        }
        assert!(handler.should_process(&pending(0)));
        assert!(!handler.should_process(&pending(1)));
    }

    #[tokio::test]
    async fn events_process_in_priority_then_age_order() {
        let recorder = Recorder::new(false);
        let handler = handler(recorder.clone());

        handler.add_event("slow", "", 3, "").unwrap();
        handler.add_event("first", "", 1, "").unwrap();
        handler.add_event("second", "", 1, "").unwrap();

        handler.tick().await;
        handler.tick().await;

        let broadcasts = recorder.broadcasts.lock();
        assert!(broadcasts[0].0.contains("first"));
        assert!(broadcasts[1].0.contains("second"));
    }

    #[tokio::test]
    async fn out_of_range_priority_clamps_to_normal() {
        let recorder = Recorder::new(false);
        let handler = handler(recorder);
        handler.add_event("odd", "", 9, "").unwrap();
        let event = handler.storage.next_pending_event().unwrap().unwrap();
        assert_eq!(event.priority, EventPriority::Normal);
    }
}
