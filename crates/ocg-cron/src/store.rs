use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use ocg_core::{OcgError, Result};

use crate::job::{Delivery, Job, Payload, Schedule};

/// Jobs persisted as a pretty JSON array. Insertion order is preserved, and
/// due jobs fire in this order.
pub struct JobStore {
    file_path: PathBuf,
    jobs: RwLock<Vec<Job>>,
}

impl JobStore {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        let store = Self {
            file_path: file_path.as_ref().to_path_buf(),
            jobs: RwLock::new(Vec::new()),
        };
        store.load();
        store
    }

    fn load(&self) {
        let data = match std::fs::read(&self.file_path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(error = %e, path = %self.file_path.display(), "failed to load cron jobs");
                return;
            }
        };
        match serde_json::from_slice::<Vec<Job>>(&data) {
            Ok(jobs) => {
                info!(count = jobs.len(), "loaded cron jobs");
                *self.jobs.write() = jobs;
            }
            Err(e) => warn!(error = %e, "failed to parse cron jobs file"),
        }
    }

    pub fn save(&self) -> Result<()> {
        let jobs = self.jobs.read();
        let data = serde_json::to_vec_pretty(&*jobs)?;
        drop(jobs);
        if let Some(dir) = self.file_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(&self.file_path, data)?;
        Ok(())
    }

    pub fn add(&self, job: Job) -> Result<()> {
        self.jobs.write().push(job);
        self.save()
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().iter().find(|j| j.id == id).cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.read().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(OcgError::Input(format!("job not found: {id}")));
        }
        drop(jobs);
        self.save()
    }

    /// Jobs whose next run has arrived, in list order.
    pub fn due_jobs(&self, now_ms: i64) -> Vec<Job> {
        self.jobs
            .read()
            .iter()
            .filter(|j| j.enabled && j.state.next_run_at_ms > 0 && j.state.next_run_at_ms <= now_ms)
            .cloned()
            .collect()
    }

    /// Replace a job in place (matched by id) and persist.
    pub fn put(&self, job: Job) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(slot) => *slot = job,
                None => return Err(OcgError::Input(format!("job not found: {}", job.id))),
            }
        }
        self.save()
    }

    /// Apply a partial patch (name, description, enabled, schedule, payload,
    /// delivery) to a job. The session-target/payload pairing rule is
    /// re-applied afterwards so a patch can never produce an invalid pairing.
    pub fn update(&self, id: &str, patch: &Value) -> Result<Job> {
        let mut job = self
            .get(id)
            .ok_or_else(|| OcgError::Input(format!("job not found: {id}")))?;

        if let Some(name) = patch.get("name").and_then(Value::as_str) {
            job.name = name.to_string();
        }
        if let Some(description) = patch.get("description").and_then(Value::as_str) {
            job.description = description.to_string();
        }
        if let Some(enabled) = patch.get("enabled").and_then(Value::as_bool) {
            job.enabled = enabled;
        }
        if let Some(schedule) = patch.get("schedule") {
            let merged = merge_into(serde_json::to_value(&job.schedule)?, schedule);
            job.schedule = serde_json::from_value::<Schedule>(merged)
                .map_err(|e| OcgError::Input(format!("bad schedule patch: {e}")))?;
        }
        if let Some(payload) = patch.get("payload") {
            let merged = merge_into(serde_json::to_value(&job.payload)?, payload);
            job.payload = serde_json::from_value::<Payload>(merged)
                .map_err(|e| OcgError::Input(format!("bad payload patch: {e}")))?;
        }
        if let Some(delivery) = patch.get("delivery") {
            job.delivery = Some(
                serde_json::from_value::<Delivery>(delivery.clone())
                    .map_err(|e| OcgError::Input(format!("bad delivery patch: {e}")))?,
            );
        }

        job.enforce_payload_pairing();
        job.updated_at = chrono::Utc::now();
        self.put(job.clone())?;
        Ok(job)
    }
}

/// Shallow-merge `patch` object keys over `base`.
fn merge_into(base: Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k.clone(), v.clone());
            }
            Value::Object(base_map)
        }
        (_, patch) => patch.clone(),
    }
}
