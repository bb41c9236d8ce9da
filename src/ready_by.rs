//! Ready-By Transformer (spec §4.I): given a desired ready-by time and
//! learned heating characteristics, derive a coordinated pair of jobs.

use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::store::jobs::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default minutes the heater is left on past `ready_by` before the
/// auto-off job fires (spec §4.I "e.g. 45 min").
pub const DEFAULT_HOLD_WINDOW_MIN: i64 = 45;

/// Conservative rise rate assumed when the current water temperature is
/// unknown, chosen from the slow end of a typical residential hot tub
/// heater so the computed start time errs early rather than late.
pub const DEFAULT_RISE_ASSUMPTION_F_PER_MIN: f64 = 0.25;

/// Learned heating characteristics (derived externally; this component
/// is a pure consumer per spec §4.I).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeatingCharacteristics {
    pub velocity_f_per_min: f64,
    pub startup_lag_min: f64,
    pub overshoot_f: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadyByPlan {
    pub start_time: DateTime<Utc>,
    pub auto_off_time: DateTime<Utc>,
}

/// Pure computation: derive the start-heat and auto-off instants for a
/// desired ready-by time (spec §4.I).
pub fn compute_plan(
    ready_by: DateTime<Utc>,
    target_temp_f: f64,
    current_water_temp_f: Option<f64>,
    characteristics: HeatingCharacteristics,
    hold_window_min: i64,
) -> ReadyByPlan {
    let rise = match current_water_temp_f {
        Some(current) => (target_temp_f - current).max(0.0),
        None => {
            (target_temp_f - 80.0).max(0.0) // conservative: assume a cold tub
        }
    };

    let velocity = if characteristics.velocity_f_per_min > 0.0 {
        characteristics.velocity_f_per_min
    } else {
        DEFAULT_RISE_ASSUMPTION_F_PER_MIN
    };

    let duration_min = rise / velocity + characteristics.startup_lag_min;
    let start_time = ready_by - chrono::Duration::minutes(duration_min.round() as i64);
    let auto_off_time = ready_by + chrono::Duration::minutes(hold_window_min);

    ReadyByPlan { start_time, auto_off_time }
}

/// Emit the coordinated pair via the Scheduler, atomically: if the
/// auto-off leg fails to schedule, the start-heat leg is cancelled
/// (spec §4.I, §9 "Atomic pair-scheduling"). Both legs are scheduled as
/// one-off ISO instants (`recurring=false`) rather than daily `HH:MM`
/// jobs: `T_start`/`T_off` are computed instants for a single ready-by
/// target, not a recurring wall-clock time, and the Job Store's own
/// `scheduledTime` contract (spec §3) ties `recurring=true` to an
/// `"HH:MM"` string — see DESIGN.md's Open Question decisions.
pub async fn schedule_ready_by(
    scheduler: &Scheduler,
    ready_by: DateTime<Utc>,
    target_temp_f: f64,
    current_water_temp_f: Option<f64>,
    characteristics: HeatingCharacteristics,
    hold_window_min: i64,
) -> Result<(Job, Job)> {
    let plan = compute_plan(ready_by, target_temp_f, current_water_temp_f, characteristics, hold_window_min);

    let mut start_params = HashMap::new();
    start_params.insert("target_temp_f".to_string(), serde_json::json!(target_temp_f));
    start_params.insert("ready_by_time".to_string(), serde_json::json!(ready_by.to_rfc3339()));

    let start_job = scheduler
        .schedule("heat-to-target", &plan.start_time.to_rfc3339(), false, Some(start_params))
        .await?;

    let pair_tag = format!("ready-by-{}", start_job.id);
    scheduler.tag_pair(&start_job.id, &pair_tag).await?;

    match scheduler
        .schedule("heater-off", &plan.auto_off_time.to_rfc3339(), false, None)
        .await
    {
        Ok(auto_off_job) => {
            scheduler.tag_pair(&auto_off_job.id, &pair_tag).await?;
            Ok((start_job, auto_off_job))
        }
        Err(error) => {
            tracing::warn!(%error, job_id = %start_job.id, "auto-off leg failed, cancelling start-heat leg");
            if let Err(rollback_error) = scheduler.cancel(&start_job.id).await {
                tracing::warn!(%rollback_error, job_id = %start_job.id, "rollback of start-heat leg also failed");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristics() -> HeatingCharacteristics {
        HeatingCharacteristics { velocity_f_per_min: 0.5, startup_lag_min: 5.0, overshoot_f: 0.5 }
    }

    #[test]
    fn plan_computes_start_before_ready_by() {
        let ready_by: DateTime<Utc> = "2030-01-15T18:00:00Z".parse().unwrap();
        let plan = compute_plan(ready_by, 102.0, Some(90.0), characteristics(), DEFAULT_HOLD_WINDOW_MIN);
        // (102-90)/0.5 + 5 = 29 minutes
        assert_eq!(plan.start_time, ready_by - chrono::Duration::minutes(29));
        assert_eq!(plan.auto_off_time, ready_by + chrono::Duration::minutes(45));
    }

    #[test]
    fn plan_with_unknown_current_temp_uses_conservative_default() {
        let ready_by: DateTime<Utc> = "2030-01-15T18:00:00Z".parse().unwrap();
        let plan = compute_plan(ready_by, 102.0, None, characteristics(), DEFAULT_HOLD_WINDOW_MIN);
        assert!(plan.start_time < ready_by);
    }

    #[tokio::test]
    async fn schedule_ready_by_creates_both_legs_with_shared_pair_tag() {
        use crate::crontab::FakeCrontab;
        use crate::liveness::NullLivenessClient;
        use crate::scheduler::Scheduler;
        use crate::store::jobs::JobStore;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::Config {
            data_dir: dir.path().to_path_buf(),
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
        };
        let store = Arc::new(JobStore::new(dir.path().join("jobs")).unwrap());
        let scheduler = Scheduler::new(config, store, Arc::new(FakeCrontab::new()), Arc::new(NullLivenessClient));

        let ready_by: DateTime<Utc> = (Utc::now() + chrono::Duration::hours(6)).to_rfc3339().parse().unwrap();
        let (start_job, off_job) =
            schedule_ready_by(&scheduler, ready_by, 102.0, Some(90.0), characteristics(), DEFAULT_HOLD_WINDOW_MIN)
                .await
                .unwrap();

        assert_eq!(start_job.pair_tag, off_job.pair_tag);
        assert!(start_job.pair_tag.is_some());
    }
}
