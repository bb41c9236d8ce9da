//! Job record model and durable per-job file store (spec §3, §4.D).

use crate::error::{Result, StoreError};
use crate::store::{cleanup_stale_temp_files, read_json_opt, write_json_atomic, FileLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Actions a job may dispatch. The extension set (e.g. `blinds`) is
/// whitelisted alongside the core equipment/scheduling actions.
pub const ACTION_WHITELIST: &[&str] = &[
    "heater-on",
    "heater-off",
    "pump-run",
    "heat-to-target",
    "heat-target-check",
    "maintenance",
    "blinds",
];

/// One scheduled unit of work, persisted as `<jobs_dir>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    #[serde(rename = "jobId")]
    pub id: String,
    pub action: String,
    pub endpoint: String,
    #[serde(rename = "apiBaseUrl")]
    pub api_base_url: String,
    #[serde(rename = "scheduledTime")]
    pub scheduled_time: String,
    pub recurring: bool,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "healthcheckUuid", default, skip_serializing_if = "Option::is_none")]
    pub healthcheck_uuid: Option<String>,
    #[serde(rename = "healthcheckPingUrl", default, skip_serializing_if = "Option::is_none")]
    pub healthcheck_ping_url: Option<String>,
    /// Crontab tag group this job belongs to, for atomic pair cancellation
    /// (spec §4.I "both are tagged so cancellation of the pair is atomic").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_tag: Option<String>,
}

impl Job {
    pub fn crontab_tag(&self) -> String {
        format!("HOTTUB:{}", self.id)
    }
}

/// Durable per-job record store.
#[derive(Debug, Clone)]
pub struct JobStore {
    jobs_dir: PathBuf,
}

impl JobStore {
    pub fn new(jobs_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&jobs_dir)?;
        cleanup_stale_temp_files(&jobs_dir)?;
        Ok(Self { jobs_dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }

    /// Persist a job record atomically, serializing concurrent writes to
    /// the same id via an exclusive file lock.
    pub async fn save(&self, job: &Job) -> Result<()> {
        let path = self.path_for(&job.id);
        let job = job.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&path)?;
            write_json_atomic(&path, &job)
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))??;
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<Option<Job>> {
        let path = self.path_for(id);
        tokio::task::spawn_blocking(move || read_json_opt(&path))
            .await
            .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    /// Delete a job record. Idempotent: deleting an already-missing
    /// record is not an error (covers the dispatcher/cancel race in §5).
    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&path);
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(error) => Err(crate::error::Error::Io(error)),
            }
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    /// List every job record currently in the store.
    pub async fn list(&self) -> Result<Vec<Job>> {
        let dir = self.jobs_dir.clone();
        tokio::task::spawn_blocking(move || {
            let mut jobs = Vec::new();
            if !dir.exists() {
                return Ok(jobs);
            }
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !name.ends_with(".json") || name.starts_with(".tmp-") {
                    continue;
                }
                if let Some(job) = read_json_opt::<Job>(&path)? {
                    jobs.push(job);
                }
            }
            Ok::<_, crate::error::Error>(jobs)
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    pub fn require_known_action(action: &str) -> Result<()> {
        if ACTION_WHITELIST.contains(&action) {
            Ok(())
        } else {
            Err(crate::error::SchedulerError::InvalidInput(format!(
                "unknown action '{action}'"
            ))
            .into())
        }
    }
}

/// Surface a missing job as the scheduler-facing error rather than a raw
/// `Option::None`, for call sites that require the job to exist (cancel).
pub fn require_job(job: Option<Job>, id: &str) -> Result<Job> {
    job.ok_or_else(|| StoreError::JobNotFound(id.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            action: "heater-on".to_string(),
            endpoint: "/api/equipment/heater/on".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            scheduled_time: "2030-01-15T06:30:00Z".to_string(),
            recurring: false,
            created_at: chrono::Utc::now(),
            params: None,
            healthcheck_uuid: Some("uuid-1".to_string()),
            healthcheck_ping_url: None,
            pair_tag: None,
        }
    }

    #[tokio::test]
    async fn save_load_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf()).unwrap();
        let job = sample_job("job-abc123");

        store.save(&job).await.unwrap();
        let loaded = store.load(&job.id).await.unwrap();
        assert_eq!(loaded, Some(job.clone()));

        store.delete(&job.id).await.unwrap();
        assert_eq!(store.load(&job.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_missing_job_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf()).unwrap();
        store.delete("job-does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_all_saved_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().to_path_buf()).unwrap();
        store.save(&sample_job("job-1")).await.unwrap();
        store.save(&sample_job("job-2")).await.unwrap();

        let mut jobs = store.list().await.unwrap();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "job-1");
        assert_eq!(jobs[1].id, "job-2");
    }

    #[tokio::test]
    async fn startup_cleans_up_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".tmp-job-1.json-deadbeef"), b"{}").unwrap();
        JobStore::new(dir.path().to_path_buf()).unwrap();
        assert!(!dir.path().join(".tmp-job-1.json-deadbeef").exists());
    }
}
