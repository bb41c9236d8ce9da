//! Maintenance Setup (spec §4.J): idempotently install the monthly
//! log-rotation crontab entry, its liveness check, and the recurring job
//! record the dispatcher needs to actually invoke it every month.

use crate::config::Config;
use crate::crontab::CrontabAdapter;
use crate::error::Result;
use crate::liveness::LivenessClient;
use crate::store::healthcheck_state::{HealthcheckStateFile, HealthcheckStateStore};
use crate::store::jobs::{Job, JobStore};
use std::sync::Arc;

/// Job id embedded as the dispatcher's positional argument in the
/// installed crontab line, and the job record's own id (spec §4.J, §6).
const MAINTENANCE_JOB_ID: &str = "maintenance";
const LOG_ROTATION_CRON: &str = "0 3 1 * *";
/// Large grace window (spec §4.J "e.g. 6h") since this check only needs
/// to fire once a month.
const LOG_ROTATION_GRACE_SECS: u64 = 6 * 60 * 60;
/// Rotated log files older than this are pruned on each maintenance run.
/// The daily split itself is handled by `tracing_appender`'s rolling
/// writer (spec §1 non-goal: "log rotation plumbing"); this only enforces
/// retention on what that writer has already produced.
const LOG_RETENTION_DAYS: u64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSetupResult {
    pub cron_created: bool,
    pub healthcheck_created: bool,
}

pub struct MaintenanceSetup {
    config: Config,
    crontab: Arc<dyn CrontabAdapter>,
    liveness: Arc<dyn LivenessClient>,
    healthcheck_state: Arc<HealthcheckStateStore>,
    jobs: Arc<JobStore>,
}

impl MaintenanceSetup {
    pub fn new(
        config: Config,
        crontab: Arc<dyn CrontabAdapter>,
        liveness: Arc<dyn LivenessClient>,
        healthcheck_state: Arc<HealthcheckStateStore>,
        jobs: Arc<JobStore>,
    ) -> Self {
        Self { config, crontab, liveness, healthcheck_state, jobs }
    }

    fn crontab_tag(&self) -> String {
        format!("HOTTUB:{MAINTENANCE_JOB_ID}")
    }

    /// Run the bootstrap. Safe to call on every deploy and at every
    /// service startup (spec §4.J, §9 "Idempotency on restart").
    pub async fn run(&self) -> Result<MaintenanceSetupResult> {
        let cron_created = self.ensure_cron_entry().await?;
        let (healthcheck_created, healthcheck) = self.ensure_healthcheck().await;
        self.ensure_job_record(healthcheck).await;
        Ok(MaintenanceSetupResult { cron_created, healthcheck_created })
    }

    async fn ensure_cron_entry(&self) -> Result<bool> {
        let tag = self.crontab_tag();
        let entries = self.crontab.list_entries().await?;
        if entries.iter().any(|line| line.contains(&tag)) {
            return Ok(false);
        }

        let line = format!(
            "{LOG_ROTATION_CRON} {} {MAINTENANCE_JOB_ID} # {tag}",
            self.config.dispatcher_path.display()
        );
        self.crontab.add_entry(&line).await?;
        Ok(true)
    }

    /// Returns whether a check was newly created this call, and the
    /// check state (existing or new) to thread into the job record.
    /// Never errors when liveness creation fails, matching "must succeed
    /// even when liveness creation fails" (spec §4.J).
    async fn ensure_healthcheck(&self) -> (bool, Option<HealthcheckStateFile>) {
        match self.healthcheck_state.load().await {
            Ok(Some(existing)) => return (false, Some(existing)),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, "failed to read maintenance healthcheck state, assuming none installed");
            }
        }

        let Some(check) = self
            .liveness
            .create_check(
                "hottub maintenance: log rotation",
                LOG_ROTATION_CRON,
                &self.config.system_tz,
                LOG_ROTATION_GRACE_SECS,
                self.config.liveness_channel.as_deref(),
            )
            .await
        else {
            return (false, None);
        };

        self.liveness.ping(&check.ping_url).await;

        let record = HealthcheckStateFile {
            uuid: check.uuid,
            ping_url: check.ping_url,
            created_at: chrono::Utc::now(),
        };
        if let Err(error) = self.healthcheck_state.save(&record).await {
            tracing::warn!(%error, "failed to persist maintenance healthcheck state");
            return (false, Some(record));
        }
        (true, Some(record))
    }

    /// Upsert the recurring job record the dispatcher loads when the host
    /// cron fires `hottub-dispatch maintenance`. Without this record the
    /// dispatcher finds nothing under `jobs/maintenance.json` and exits
    /// silently (spec §4.E step 1), so the monthly check would only ever
    /// be pinged once, at setup, and would then false-alert forever once
    /// its schedule + grace elapsed.
    async fn ensure_job_record(&self, healthcheck: Option<HealthcheckStateFile>) {
        let job = Job {
            id: MAINTENANCE_JOB_ID.to_string(),
            action: MAINTENANCE_JOB_ID.to_string(),
            endpoint: "/api/maintenance/rotate-logs".to_string(),
            api_base_url: self.config.api_base_url.clone(),
            scheduled_time: LOG_ROTATION_CRON.to_string(),
            recurring: true,
            created_at: chrono::Utc::now(),
            params: None,
            healthcheck_uuid: healthcheck.as_ref().map(|h| h.uuid.clone()),
            healthcheck_ping_url: healthcheck.as_ref().map(|h| h.ping_url.clone()),
            pair_tag: None,
        };
        if let Err(error) = self.jobs.save(&job).await {
            tracing::warn!(%error, "failed to persist maintenance job record");
        }
    }

    /// The actual monthly maintenance action (spec §6 "Log rotation +
    /// monthly health ping"), invoked via `/api/maintenance/rotate-logs`
    /// when the dispatcher's cron-driven POST lands here. Prunes rotated
    /// log files past their retention window and re-arms the monthly
    /// liveness check directly, in addition to the ping the dispatcher
    /// itself issues on a 2xx response (spec §4.E step 4) — belt and
    /// braces against the job record ever going missing.
    pub async fn rotate_logs(&self) -> Result<()> {
        self.prune_old_logs();

        if let Ok(Some(state)) = self.healthcheck_state.load().await {
            self.liveness.ping(&state.ping_url).await;
        }

        Ok(())
    }

    fn prune_old_logs(&self) {
        let log_dir = self.config.log_dir();
        let Ok(entries) = std::fs::read_dir(&log_dir) else { return };
        let cutoff = std::time::SystemTime::now()
            .checked_sub(std::time::Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60));
        let Some(cutoff) = cutoff else { return };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else { continue };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else { continue };
            if modified < cutoff {
                if let Err(error) = std::fs::remove_file(&path) {
                    tracing::warn!(%error, file = %path.display(), "failed to prune old log file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crontab::FakeCrontab;
    use crate::liveness::NullLivenessClient;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            api_base_url: "http://localhost:8080".to_string(),
            bind: "127.0.0.1:0".parse().unwrap(),
            liveness_api_key: None,
            liveness_api_base: "https://healthchecks.io/api/v3".to_string(),
            liveness_channel: None,
            equipment_webhook_key: None,
            equipment_webhook_url: "http://stub".to_string(),
            system_tz: "UTC".to_string(),
            heat_target_check_interval_min: 10,
            deadband_f: 1.0,
            dispatcher_path: std::path::PathBuf::from("/usr/local/bin/hottub-dispatch"),
            liveness_min_grace_secs: 60,
            overlap_window_min: 30,
            #[cfg(feature = "metrics")]
            metrics_bind: None,
        }
    }

    fn test_setup(dir: &std::path::Path) -> (MaintenanceSetup, Arc<FakeCrontab>) {
        let crontab = Arc::new(FakeCrontab::new());
        let jobs = Arc::new(JobStore::new(dir.join("jobs")).unwrap());
        let setup = MaintenanceSetup::new(
            test_config(dir),
            crontab.clone(),
            Arc::new(NullLivenessClient),
            Arc::new(HealthcheckStateStore::new(dir.join("maintenance_healthcheck.json"))),
            jobs,
        );
        (setup, crontab)
    }

    #[tokio::test]
    async fn first_run_installs_cron_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, crontab) = test_setup(dir.path());

        let result = setup.run().await.unwrap();
        assert!(result.cron_created);
        assert_eq!(crontab.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op_on_cron_but_refreshes_job_record() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, crontab) = test_setup(dir.path());

        setup.run().await.unwrap();
        let result = setup.run().await.unwrap();
        assert!(!result.cron_created);
        assert_eq!(crontab.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_persists_a_dispatchable_job_record() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, _crontab) = test_setup(dir.path());

        setup.run().await.unwrap();

        let jobs = JobStore::new(dir.path().join("jobs")).unwrap();
        let job = jobs.load(MAINTENANCE_JOB_ID).await.unwrap().expect("job record persisted");
        assert_eq!(job.action, "maintenance");
        assert_eq!(job.endpoint, "/api/maintenance/rotate-logs");
        assert!(job.recurring);
    }

    #[tokio::test]
    async fn rotate_logs_prunes_files_older_than_retention() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, _crontab) = test_setup(dir.path());
        let log_dir = setup.config.log_dir();
        std::fs::create_dir_all(&log_dir).unwrap();

        let old_file = log_dir.join("hottubd.log.2020-01-01");
        std::fs::write(&old_file, b"old").unwrap();
        let old_time = std::time::SystemTime::now() - std::time::Duration::from_secs(200 * 24 * 60 * 60);
        filetime_set(&old_file, old_time);

        let fresh_file = log_dir.join("hottubd.log");
        std::fs::write(&fresh_file, b"fresh").unwrap();

        setup.rotate_logs().await.unwrap();

        assert!(!old_file.exists());
        assert!(fresh_file.exists());
    }

    /// Backdate a file's mtime without pulling in a dedicated crate,
    /// scoped to this test module only.
    fn filetime_set(path: &std::path::Path, time: std::time::SystemTime) {
        use std::process::Command;
        let epoch = time.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs();
        let timestamp = chrono::DateTime::<chrono::Utc>::from(std::time::UNIX_EPOCH + std::time::Duration::from_secs(epoch))
            .format("%Y%m%d%H%M")
            .to_string();
        let status = Command::new("touch").arg("-t").arg(timestamp).arg(path).status().unwrap();
        assert!(status.success());
    }
}
