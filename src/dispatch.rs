//! Dispatcher Runner (spec §4.E): the logic executed by the standalone
//! `hottub-dispatch` binary. Deliberately synchronous — this process is
//! invoked once per cron tick and exits, so paying for a tokio runtime
//! buys nothing (spec additions, grounded in the corpus's preference for
//! the lightest client that fits the call shape).

use crate::store::jobs::Job;
use crate::store::{read_json_opt, FileLock};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration the dispatcher reads from the same environment as the
/// HTTP service (spec additions §4.E) — no network call needed to
/// discover where to POST.
pub struct DispatchConfig {
    pub api_base_url: String,
    pub jobs_dir: PathBuf,
    pub liveness_api_key: Option<String>,
    pub liveness_api_base: String,
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, String> {
        let api_base_url = std::env::var("API_BASE_URL").map_err(|_| "API_BASE_URL not set".to_string())?;
        let data_dir = std::env::var("HOTTUB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        Ok(Self {
            api_base_url,
            jobs_dir: data_dir.join("jobs"),
            liveness_api_key: std::env::var("LIVENESS_API_KEY").ok(),
            liveness_api_base: std::env::var("LIVENESS_API_BASE")
                .unwrap_or_else(|_| "https://healthchecks.io/api/v3".to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The job record did not exist — a cancel raced this tick. Silent success.
    JobMissing,
    /// The action endpoint returned 2xx and bookkeeping completed.
    Success,
    /// The action endpoint returned non-2xx, or the request could not be sent.
    Failed,
}

impl DispatchOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            DispatchOutcome::JobMissing | DispatchOutcome::Success => 0,
            DispatchOutcome::Failed => 1,
        }
    }
}

/// Execute the job identified by `job_id` (spec §4.E's five-step program).
pub fn run(config: &DispatchConfig, job_id: &str) -> DispatchOutcome {
    let job_path = config.jobs_dir.join(format!("{job_id}.json"));
    let job: Job = match load_job(&job_path) {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::info!(job_id, "job record missing, treating as cancel race");
            return DispatchOutcome::JobMissing;
        }
        Err(error) => {
            tracing::error!(job_id, %error, "failed to read job record");
            return DispatchOutcome::Failed;
        }
    };

    let http = match reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(job_id, %error, "failed to build HTTP client");
            return DispatchOutcome::Failed;
        }
    };

    let url = format!("{}{}", job.api_base_url, job.endpoint);
    let mut request = http.post(&url);
    if let Some(params) = &job.params {
        request = request.header("Content-Type", "application/json").json(params);
    }

    let response = match request.send() {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(job_id, %error, %url, "dispatch request failed");
            return DispatchOutcome::Failed;
        }
    };

    if !response.status().is_success() {
        tracing::error!(job_id, status = %response.status(), "dispatch endpoint returned non-2xx");
        return DispatchOutcome::Failed;
    }

    on_success(config, &http, &job, &job_path);
    DispatchOutcome::Success
}

fn load_job(path: &Path) -> crate::error::Result<Option<Job>> {
    let _lock = FileLock::acquire(path)?;
    read_json_opt(path)
}

fn on_success(config: &DispatchConfig, http: &reqwest::blocking::Client, job: &Job, job_path: &Path) {
    if job.recurring {
        if let Some(ping_url) = &job.healthcheck_ping_url {
            if let Err(error) = http.get(ping_url).send() {
                tracing::warn!(job_id = %job.id, %error, "liveness ping failed");
            }
        }
        return;
    }

    if let Some(uuid) = &job.healthcheck_uuid {
        delete_healthcheck(config, http, uuid);
    }
    delete_job_file(job_path, &job.id);
}

fn delete_healthcheck(config: &DispatchConfig, http: &reqwest::blocking::Client, uuid: &str) {
    let Some(key) = &config.liveness_api_key else { return };
    let url = format!("{}/checks/{uuid}", config.liveness_api_base);
    match http.delete(&url).header("X-Api-Key", key).send() {
        Ok(response) if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND => {}
        Ok(response) => tracing::warn!(uuid, status = %response.status(), "liveness check deletion failed"),
        Err(error) => tracing::warn!(uuid, %error, "liveness check deletion failed"),
    }
}

fn delete_job_file(path: &Path, job_id: &str) {
    let _lock = FileLock::acquire(path);
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => tracing::warn!(job_id, %error, "failed to delete job record after dispatch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::jobs::Job;
    use std::collections::HashMap;

    fn write_job(dir: &Path, job: &Job) {
        std::fs::write(dir.join(format!("{}.json", job.id)), serde_json::to_string_pretty(job).unwrap()).unwrap();
    }

    fn sample_job(id: &str, recurring: bool) -> Job {
        Job {
            id: id.to_string(),
            action: "heater-on".to_string(),
            endpoint: "/api/equipment/heater/on".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            scheduled_time: "2030-01-15T06:30:00Z".to_string(),
            recurring,
            created_at: chrono::Utc::now(),
            params: None,
            healthcheck_uuid: None,
            healthcheck_ping_url: None,
            pair_tag: None,
        }
    }

    #[test]
    fn missing_job_is_silent_success() {
        let dir = tempfile::tempdir().unwrap();
        let config = DispatchConfig {
            api_base_url: "http://127.0.0.1:9".to_string(),
            jobs_dir: dir.path().to_path_buf(),
            liveness_api_key: None,
            liveness_api_base: "https://healthchecks.io/api/v3".to_string(),
        };
        let outcome = run(&config, "job-does-not-exist");
        assert_eq!(outcome, DispatchOutcome::JobMissing);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn unreachable_endpoint_fails_without_deleting_job() {
        let dir = tempfile::tempdir().unwrap();
        let job = sample_job("job-abc", false);
        write_job(dir.path(), &job);

        let config = DispatchConfig {
            api_base_url: job.api_base_url.clone(),
            jobs_dir: dir.path().to_path_buf(),
            liveness_api_key: None,
            liveness_api_base: "https://healthchecks.io/api/v3".to_string(),
        };
        let outcome = run(&config, "job-abc");
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(outcome.exit_code(), 1);
        assert!(dir.path().join("job-abc.json").exists());
    }

    #[test]
    fn params_round_trip_through_pretty_printed_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = sample_job("job-xyz", true);
        let mut params = HashMap::new();
        params.insert("target_temp_f".to_string(), serde_json::json!(102.5));
        job.params = Some(params);
        write_job(dir.path(), &job);

        let loaded = load_job(&dir.path().join("job-xyz.json")).unwrap().unwrap();
        assert_eq!(loaded.params, job.params);
    }
}
