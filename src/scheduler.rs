//! Scheduler (spec §4.F): orchestrates the Crontab Adapter, Liveness
//! Client, Time Converter and Job Store into `schedule`/`list`/`cancel`.

use crate::config::Config;
use crate::crontab::{build_crontab_line, CrontabAdapter};
use crate::error::{Result, SchedulerError};
use crate::liveness::{check_name, LivenessClient};
use crate::store::jobs::{require_job, Job, JobStore};
use crate::time_convert::{daily_to_utc_cron, one_off_to_utc_cron};
use std::collections::HashMap;
use std::sync::Arc;

/// Actions whose projected heating window participates in the overlap
/// check (spec §4.F "Overlap policy").
const HEATING_ACTIONS: &[&str] = &["heater-on", "heat-to-target"];

/// A job listed alongside whether its crontab entry was actually found,
/// so callers can distinguish healthy jobs from ones whose crontab line
/// has gone missing without being cancelled.
#[derive(Debug, Clone)]
pub struct ListedJob {
    pub job: Job,
    pub has_crontab_entry: bool,
}

/// Crontab tags present in the host crontab with no corresponding job
/// record — candidates for maintenance cleanup (spec §4.F, §9).
#[derive(Debug, Clone)]
pub struct OrphanEntry {
    pub line: String,
    pub job_id: String,
}

pub struct Scheduler {
    config: Config,
    store: Arc<JobStore>,
    crontab: Arc<dyn CrontabAdapter>,
    liveness: Arc<dyn LivenessClient>,
}

impl Scheduler {
    pub fn new(
        config: Config,
        store: Arc<JobStore>,
        crontab: Arc<dyn CrontabAdapter>,
        liveness: Arc<dyn LivenessClient>,
    ) -> Self {
        Self { config, store, crontab, liveness }
    }

    /// Create and persist a new job (spec §4.F steps 1-10).
    pub async fn schedule(
        &self,
        action: &str,
        scheduled_time: &str,
        recurring: bool,
        params: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Job> {
        #[cfg(feature = "metrics")]
        let timer = crate::telemetry::Metrics::global().schedule_duration_seconds.start_timer();

        let result = self.schedule_inner(action, scheduled_time, recurring, params).await;

        #[cfg(feature = "metrics")]
        timer.observe_duration();
        #[cfg(feature = "metrics")]
        if let Err(error) = &result {
            let reason = match error {
                crate::error::Error::Scheduler(SchedulerError::InvalidInput(_)) => "invalid_input",
                crate::error::Error::Scheduler(SchedulerError::OverlappingSchedule { .. }) => "overlapping_schedule",
                _ => "other",
            };
            crate::telemetry::Metrics::global()
                .schedule_rejections_total
                .with_label_values(&[reason])
                .inc();
        }

        result
    }

    async fn schedule_inner(
        &self,
        action: &str,
        scheduled_time: &str,
        recurring: bool,
        params: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<Job> {
        JobStore::require_known_action(action)?;

        if action == "heat-to-target" {
            validate_target_temp(&params)?;
        }

        let now = chrono::Utc::now();
        let (cron, instant) = if recurring {
            (daily_to_utc_cron(scheduled_time, &self.config.system_tz)?, None)
        } else {
            let (cron, instant) = one_off_to_utc_cron(scheduled_time, now)?;
            (cron, Some(instant))
        };

        if HEATING_ACTIONS.contains(&action) {
            self.reject_if_overlapping(recurring, &cron, instant).await?;
        }

        let id = generate_job_id(recurring);
        let endpoint = endpoint_for_action(action);
        let line = build_crontab_line(&cron.0, &self.config.dispatcher_path, &id);

        // The liveness check-create call happens before any job-store or
        // crontab lock is taken (spec §5).
        let check = self
            .liveness
            .create_check(
                &check_name(&id, action, recurring),
                &cron.0,
                "UTC",
                self.config.liveness_min_grace_secs,
                self.config.liveness_channel.as_deref(),
            )
            .await;

        if let Some(check) = &check {
            self.liveness.ping(&check.ping_url).await;
        }

        let mut job = Job {
            id: id.clone(),
            action: action.to_string(),
            endpoint,
            api_base_url: self.config.api_base_url.clone(),
            scheduled_time: scheduled_time.to_string(),
            recurring,
            created_at: now,
            params,
            healthcheck_uuid: check.as_ref().map(|c| c.uuid.clone()),
            healthcheck_ping_url: None,
            pair_tag: None,
        };
        if recurring {
            job.healthcheck_ping_url = check.as_ref().map(|c| c.ping_url.clone());
        }

        if let Err(error) = self.store.save(&job).await {
            self.rollback_check(&check).await;
            return Err(error);
        }

        if let Err(error) = self.crontab.add_entry(&line).await {
            tracing::warn!(%error, job_id = %id, "crontab append failed, rolling back");
            self.rollback_check(&check).await;
            let _ = self.store.delete(&id).await;
            return Err(error);
        }

        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .jobs_scheduled_total
            .with_label_values(&[action, if recurring { "true" } else { "false" }])
            .inc();

        Ok(job)
    }

    async fn rollback_check(&self, check: &Option<crate::liveness::HealthCheck>) {
        if let Some(check) = check {
            self.liveness.delete(&check.uuid).await;
        }
    }

    /// List job records, annotated with whether their crontab tag is
    /// still present (spec §4.F "join against crontab entries only to
    /// confirm liveness").
    pub async fn list(&self) -> Result<Vec<ListedJob>> {
        let jobs = self.store.list().await?;
        let entries = self.crontab.list_entries().await.unwrap_or_default();

        Ok(jobs
            .into_iter()
            .map(|job| {
                let tag = job.crontab_tag();
                let has_crontab_entry = entries.iter().any(|line| line.contains(&tag));
                ListedJob { job, has_crontab_entry }
            })
            .collect())
    }

    /// Crontab entries tagged `HOTTUB:` with no matching job record
    /// (spec §4.F, §9 "orphaned entries").
    pub async fn orphans(&self) -> Result<Vec<OrphanEntry>> {
        let jobs = self.store.list().await?;
        let known_ids: std::collections::HashSet<_> = jobs.iter().map(|j| j.id.clone()).collect();

        let entries = self.crontab.list_entries().await.unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter_map(|line| {
                let tag = extract_tag(&line)?;
                if known_ids.contains(&tag) {
                    None
                } else {
                    Some(OrphanEntry { line, job_id: tag })
                }
            })
            .collect())
    }

    /// Cancel a job: remove its crontab line, delete its liveness check,
    /// delete its record (spec §4.F).
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let job = require_job(self.store.load(id).await?, id)?;

        self.crontab.remove_by_pattern(&job.crontab_tag()).await?;

        if let Some(uuid) = &job.healthcheck_uuid {
            self.liveness.delete(uuid).await;
        }

        self.store.delete(id).await?;

        #[cfg(feature = "metrics")]
        crate::telemetry::Metrics::global()
            .jobs_cancelled_total
            .with_label_values(&[&job.action])
            .inc();

        Ok(())
    }

    /// Attach a pair tag to an already-persisted job record, used by the
    /// Ready-By Transformer to mark its two legs for atomic cancellation
    /// (spec §4.I).
    pub async fn tag_pair(&self, id: &str, pair_tag: &str) -> Result<()> {
        let mut job = require_job(self.store.load(id).await?, id)?;
        job.pair_tag = Some(pair_tag.to_string());
        self.store.save(&job).await
    }

    /// Cancel every job sharing `pair_tag` atomically from the caller's
    /// perspective: best-effort, continuing even if one leg fails, so a
    /// partially-cancelled pair never leaves an orphaned crontab line.
    pub async fn cancel_pair(&self, pair_tag: &str) -> Result<()> {
        let jobs = self.store.list().await?;
        for job in jobs.into_iter().filter(|j| j.pair_tag.as_deref() == Some(pair_tag)) {
            if let Err(error) = self.cancel(&job.id).await {
                tracing::warn!(%error, job_id = %job.id, "failed to cancel paired job");
            }
        }
        Ok(())
    }

    /// `instant` is `Some` for one-off jobs, compared as absolute points
    /// in time; recurring jobs are compared as daily UTC wall-clock
    /// windows via `cron`'s encoded hour/minute.
    async fn reject_if_overlapping(
        &self,
        recurring: bool,
        cron: &crate::time_convert::CronExpr,
        instant: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let window = self.config.overlap_window_min;
        let existing = self.store.list().await?;

        for other in existing.into_iter().filter(|j| HEATING_ACTIONS.contains(&j.action.as_str())) {
            if other.recurring != recurring {
                continue;
            }

            let conflicts = if recurring {
                let Some((hour, minute)) = crate::time_convert::cron_to_hm(cron) else {
                    continue;
                };
                let Ok(other_cron) = daily_to_utc_cron(&other.scheduled_time, "UTC") else {
                    continue;
                };
                let Some((other_hour, other_minute)) = crate::time_convert::cron_to_hm(&other_cron) else {
                    continue;
                };
                windows_overlap((hour * 60 + minute) as i64, (other_hour * 60 + other_minute) as i64, window)
            } else {
                let Some(instant) = instant else { continue };
                let Some(other_instant) = chrono::DateTime::parse_from_rfc3339(&other.scheduled_time)
                    .ok()
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                else {
                    continue;
                };
                (instant - other_instant).num_minutes().abs() < window
            };

            if conflicts {
                return Err(SchedulerError::OverlappingSchedule {
                    conflicting_job_id: other.id,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Two daily windows of length `window_min` starting at `a`/`b` (minutes
/// since UTC midnight) overlap, accounting for midnight wraparound.
fn windows_overlap(a: i64, b: i64, window_min: i64) -> bool {
    let day = 24 * 60;
    let diff = ((a - b).rem_euclid(day)).min((b - a).rem_euclid(day));
    diff < window_min
}

fn extract_tag(line: &str) -> Option<String> {
    line.rsplit_once("# HOTTUB:").map(|(_, tag)| tag.trim().to_string())
}

fn endpoint_for_action(action: &str) -> String {
    match action {
        "heater-on" => "/api/equipment/heater/on",
        "heater-off" => "/api/equipment/heater/off",
        "pump-run" => "/api/equipment/pump/run",
        "heat-to-target" => "/api/equipment/heat-to-target",
        "heat-target-check" => "/api/maintenance/heat-target-check",
        "maintenance" => "/api/maintenance/rotate-logs",
        other => {
            tracing::warn!(action = other, "no dedicated endpoint mapping, using /api/equipment/{action}");
            return format!("/api/equipment/{other}");
        }
    }
    .to_string()
}

fn validate_target_temp(params: &Option<HashMap<String, serde_json::Value>>) -> Result<()> {
    let target = params
        .as_ref()
        .and_then(|p| p.get("target_temp_f"))
        .and_then(|v| v.as_f64())
        .ok_or_else(|| SchedulerError::InvalidInput("heat-to-target requires params.target_temp_f".to_string()))?;

    if !(80.0..=110.0).contains(&target) {
        return Err(SchedulerError::InvalidInput(format!(
            "target_temp_f {target} out of range [80, 110]"
        ))
        .into());
    }

    // Quarter-degree resolution: target * 4 must be a whole number.
    if ((target * 4.0).round() - target * 4.0).abs() > 1e-9 {
        return Err(SchedulerError::InvalidInput(format!(
            "target_temp_f {target} must be at quarter-degree resolution"
        ))
        .into());
    }

    Ok(())
}

fn generate_job_id(recurring: bool) -> String {
    let prefix = if recurring { "rec" } else { "job" };
    let mut bytes = [0u8; 8];
    use rand::RngCore as _;
    rand::rng().fill_bytes(&mut bytes);
    format!("{prefix}-{}", hex::encode(bytes))
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

    async fn test_scheduler(dir: &std::path::Path) -> Scheduler {
        let store = Arc::new(JobStore::new(dir.join("jobs")).unwrap());
        Scheduler::new(
            test_config(dir),
            store,
            Arc::new(FakeCrontab::new()),
            Arc::new(NullLivenessClient),
        )
    }

    #[tokio::test]
    async fn schedule_then_list_echoes_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path()).await;

        let job = scheduler
            .schedule("heater-on", "2030-01-15T06:30:00Z", false, None)
            .await
            .unwrap();
        assert!(job.id.starts_with("job-"));

        let listed = scheduler.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job.action, "heater-on");
        assert!(listed[0].has_crontab_entry);
    }

    #[tokio::test]
    async fn schedule_past_instant_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path()).await;
        let error = scheduler
            .schedule("heater-on", "2020-01-01T00:00:00Z", false, None)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("past"));
    }

    #[tokio::test]
    async fn cancel_removes_crontab_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path()).await;
        let job = scheduler
            .schedule("heater-on", "2030-01-15T06:30:00Z", false, None)
            .await
            .unwrap();

        scheduler.cancel(&job.id).await.unwrap();

        assert!(scheduler.store.load(&job.id).await.unwrap().is_none());
        let listed = scheduler.list().await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn cancel_missing_job_fails() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path()).await;
        let error = scheduler.cancel("job-does-not-exist").await.unwrap_err();
        assert!(matches!(error, crate::error::Error::Store(crate::error::StoreError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn overlapping_recurring_heating_jobs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path()).await;
        scheduler
            .schedule("heater-on", "06:00+00:00", true, None)
            .await
            .unwrap();

        let error = scheduler
            .schedule("heater-on", "06:15+00:00", true, None)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            crate::error::Error::Scheduler(SchedulerError::OverlappingSchedule { .. })
        ));
    }

    #[tokio::test]
    async fn heat_to_target_requires_target_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path()).await;
        let mut params = HashMap::new();
        params.insert("target_temp_f".to_string(), serde_json::json!(150.0));
        let error = scheduler
            .schedule("heat-to-target", "2030-01-15T06:30:00Z", false, Some(params))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("out of range"));
    }
}
