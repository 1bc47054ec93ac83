use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ocg_core::{OcgError, Result};

use crate::job::{DeliveryMode, Job, JobSpec, PayloadKind, ScheduleKind};
use crate::store::JobStore;

/// Delivers a `systemEvent` payload into the main session.
#[async_trait]
pub trait SystemEventSink: Send + Sync {
    async fn system_event(&self, text: &str) -> Result<()>;
}

/// Runs an `agentTurn` payload against an isolated session.
#[async_trait]
pub trait AgentTurnRunner: Send + Sync {
    async fn agent_turn(&self, message: &str, model: &str, thinking: &str) -> Result<String>;
}

/// Forwards an announced job result to a channel.
#[async_trait]
pub trait CronBroadcast: Send + Sync {
    async fn broadcast(&self, message: &str, channel: &str, to: &str) -> Result<()>;
}

/// The cron scheduler: a 1 s tick over the job store, with callbacks injected
/// by the host process.
pub struct CronHandler {
    store: JobStore,
    system_event: RwLock<Option<Arc<dyn SystemEventSink>>>,
    agent_turn: RwLock<Option<Arc<dyn AgentTurnRunner>>>,
    broadcast: RwLock<Option<Arc<dyn CronBroadcast>>>,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl CronHandler {
    pub fn new(store_path: impl AsRef<Path>) -> Self {
        Self {
            store: JobStore::new(store_path),
            system_event: RwLock::new(None),
            agent_turn: RwLock::new(None),
            broadcast: RwLock::new(None),
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn set_system_event_sink(&self, sink: Arc<dyn SystemEventSink>) {
        *self.system_event.write() = Some(sink);
    }

    pub fn set_agent_turn_runner(&self, runner: Arc<dyn AgentTurnRunner>) {
        *self.agent_turn.write() = Some(runner);
    }

    pub fn set_broadcast(&self, broadcast: Arc<dyn CronBroadcast>) {
        *self.broadcast.write() = Some(broadcast);
    }

    /// Compute initial next-run times and spawn the tick loop.
    pub fn start(self: &Arc<Self>) {
        if self.shutdown_tx.read().is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.write() = Some(tx);

        let now = Utc::now();
        for mut job in self.store.list() {
            job.state.next_run_at_ms = job.next_run_at_ms(now);
            let _ = self.store.put(job);
        }
        let _ = self.store.save();

        info!("cron scheduler started");
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            info!("cron scheduler stopped");
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

    /// One scheduler pass: fire every due job in list order.
    pub async fn tick(&self) {
        let now_ms = Utc::now().timestamp_millis();
        for job in self.store.due_jobs(now_ms) {
            self.execute_job(job).await;
        }
    }

    async fn execute_job(&self, mut job: Job) {
        info!(job_id = %job.id, name = %job.name, "executing cron job");
        let started = Utc::now();
        job.state.last_run_at_ms = started.timestamp_millis();

        let mut result = String::new();
        let mut failure: Option<String> = None;

        match job.payload.kind {
            PayloadKind::SystemEvent => {
                let sink = self.system_event.read().clone();
                match sink {
                    Some(sink) => match sink.system_event(&job.payload.text).await {
                        Ok(()) => result = "System event sent".into(),
                        Err(e) => failure = Some(e.to_string()),
                    },
                    None => result = "No callback configured".into(),
                }
            }
            PayloadKind::AgentTurn => {
                let runner = self.agent_turn.read().clone();
                match runner {
                    Some(runner) => {
                        match runner
                            .agent_turn(
                                &job.payload.message,
                                &job.payload.model,
                                &job.payload.thinking,
                            )
                            .await
                        {
                            Ok(text) => {
                                result = text;
                                job.state.consecutive_errors = 0;
                            }
                            Err(e) => {
                                failure = Some(e.to_string());
                                job.state.consecutive_errors += 1;
                            }
                        }
                    }
                    None => failure = Some("no callback configured".into()),
                }

                if let Some(delivery) = &job.delivery {
                    if delivery.mode == DeliveryMode::Announce && !result.is_empty() {
                        let broadcast = self.broadcast.read().clone();
                        if let Some(broadcast) = broadcast {
                            if let Err(e) = broadcast
                                .broadcast(&result, &delivery.channel, &delivery.to)
                                .await
                            {
                                if delivery.best_effort {
                                    warn!(job_id = %job.id, error = %e, "announce delivery failed (best effort)");
                                } else {
                                    failure.get_or_insert_with(|| e.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }

        job.state.last_duration_ms = (Utc::now() - started).num_milliseconds();
        match &failure {
            Some(e) => {
                job.state.last_status = "error".into();
                error!(job_id = %job.id, error = %e, "cron job failed");
            }
            None => {
                job.state.last_status = "ok".into();
                debug!(job_id = %job.id, "cron job completed");
            }
        }

        job.state.next_run_at_ms = job.next_run_at_ms(Utc::now());

        // One-shot jobs disable themselves after any terminal run.
        if job.schedule.kind == ScheduleKind::At && job.delete_after_run {
            job.enabled = false;
        }

        if let Err(e) = self.store.put(job) {
            warn!(error = %e, "failed to persist cron job state");
        }
    }

    // ==================== Operations ====================

    pub fn add_job(&self, spec: JobSpec) -> Result<Job> {
        let mut job = Job::from_spec(spec)?;
        job.state.next_run_at_ms = job.next_run_at_ms(Utc::now());
        self.store.add(job.clone())?;
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.store.get(id)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.store.list()
    }

    pub fn update_job(&self, id: &str, patch: &Value) -> Result<Job> {
        let mut job = self.store.update(id, patch)?;
        job.state.next_run_at_ms = job.next_run_at_ms(Utc::now());
        self.store.put(job.clone())?;
        Ok(job)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        self.store.remove(id)
    }

    /// Execute a job immediately, regardless of its schedule.
    pub async fn run_now(&self, id: &str) -> Result<()> {
        let job = self
            .store
            .get(id)
            .ok_or_else(|| OcgError::Input(format!("job not found: {id}")))?;
        self.execute_job(job).await;
        Ok(())
    }

    pub fn status(&self) -> Value {
        let jobs = self.store.list();
        let now_ms = Utc::now().timestamp_millis();
        let enabled = jobs.iter().filter(|j| j.enabled).count();
        let due_now = jobs
            .iter()
            .filter(|j| j.enabled && j.state.next_run_at_ms > 0 && j.state.next_run_at_ms <= now_ms)
            .count();
        serde_json::json!({
            "running": self.is_running(),
            "total_jobs": jobs.len(),
            "enabled": enabled,
            "disabled": jobs.len() - enabled,
            "due_now": due_now,
            "next_check": now_ms + 1000,
        })
    }
}
