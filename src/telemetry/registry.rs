//! Global metrics registry and metric handle definitions for the hot tub
//! scheduling/heating-control core.

use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry};

use std::sync::LazyLock;

/// Global metrics instance. Initialized once, accessed from any call site.
static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// All Prometheus metric handles for the `hottubd` process.
///
/// Access via `Metrics::global()`. Metric handles are cheap to clone (Arc
/// internally) so call sites can grab references without threading state.
pub struct Metrics {
    pub(crate) registry: Registry,

    /// Jobs created via `Scheduler::schedule`, by action and recurrence.
    /// Labels: action, recurring ("true"/"false").
    pub jobs_scheduled_total: IntCounterVec,

    /// Jobs removed via `Scheduler::cancel`.
    /// Labels: action.
    pub jobs_cancelled_total: IntCounterVec,

    /// Scheduling attempts rejected before any side effect.
    /// Labels: reason (invalid_input, overlapping_schedule).
    pub schedule_rejections_total: IntCounterVec,

    /// healthchecks.io-shaped liveness client calls.
    /// Labels: operation (create, ping, delete), result (ok, failed).
    pub liveness_operations_total: IntCounterVec,

    /// Outbound equipment webhook calls.
    /// Labels: event, result (ok, failed).
    pub equipment_webhook_calls_total: IntCounterVec,

    /// Current on/off state of each piece of equipment, as last observed
    /// by this process (0 = off, 1 = on).
    /// Label: equipment (heater, pump).
    pub equipment_state: IntGaugeVec,

    /// Host crontab mutations.
    /// Labels: operation (add_entry, remove_by_pattern), result (ok, failed).
    pub crontab_operations_total: IntCounterVec,

    /// Target-temperature check-and-adjust ticks, by outcome.
    /// Labels: outcome (heater_on, heater_off, no_change, stale_sensor, inactive).
    pub target_temp_check_ticks_total: IntCounterVec,

    /// Whether the target-temperature control loop is currently active
    /// (0 = idle, 1 = active).
    pub target_temp_active: prometheus::IntGauge,

    /// Wall-clock duration of a single `Scheduler::schedule` call,
    /// including the liveness-check round trip.
    pub schedule_duration_seconds: Histogram,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let jobs_scheduled_total = IntCounterVec::new(
            Opts::new("hottub_jobs_scheduled_total", "Jobs created via Scheduler::schedule"),
            &["action", "recurring"],
        )
        .expect("hardcoded metric descriptor");

        let jobs_cancelled_total = IntCounterVec::new(
            Opts::new("hottub_jobs_cancelled_total", "Jobs removed via Scheduler::cancel"),
            &["action"],
        )
        .expect("hardcoded metric descriptor");

        let schedule_rejections_total = IntCounterVec::new(
            Opts::new(
                "hottub_schedule_rejections_total",
                "Scheduling attempts rejected before any side effect",
            ),
            &["reason"],
        )
        .expect("hardcoded metric descriptor");

        let liveness_operations_total = IntCounterVec::new(
            Opts::new("hottub_liveness_operations_total", "Liveness client calls"),
            &["operation", "result"],
        )
        .expect("hardcoded metric descriptor");

        let equipment_webhook_calls_total = IntCounterVec::new(
            Opts::new("hottub_equipment_webhook_calls_total", "Outbound equipment webhook calls"),
            &["event", "result"],
        )
        .expect("hardcoded metric descriptor");

        let equipment_state = IntGaugeVec::new(
            Opts::new("hottub_equipment_state", "Current on/off state of each piece of equipment"),
            &["equipment"],
        )
        .expect("hardcoded metric descriptor");

        let crontab_operations_total = IntCounterVec::new(
            Opts::new("hottub_crontab_operations_total", "Host crontab mutations"),
            &["operation", "result"],
        )
        .expect("hardcoded metric descriptor");

        let target_temp_check_ticks_total = IntCounterVec::new(
            Opts::new(
                "hottub_target_temp_check_ticks_total",
                "Target-temperature check-and-adjust ticks, by outcome",
            ),
            &["outcome"],
        )
        .expect("hardcoded metric descriptor");

        let target_temp_active = prometheus::IntGauge::new(
            "hottub_target_temp_active",
            "Whether the target-temperature control loop is currently active",
        )
        .expect("hardcoded metric descriptor");

        let schedule_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "hottub_schedule_duration_seconds",
                "Duration of a Scheduler::schedule call, including the liveness round trip",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .expect("hardcoded metric descriptor");

        registry
            .register(Box::new(jobs_scheduled_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(jobs_cancelled_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(schedule_rejections_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(liveness_operations_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(equipment_webhook_calls_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(equipment_state.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(crontab_operations_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(target_temp_check_ticks_total.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(target_temp_active.clone()))
            .expect("hardcoded metric");
        registry
            .register(Box::new(schedule_duration_seconds.clone()))
            .expect("hardcoded metric");

        Self {
            registry,
            jobs_scheduled_total,
            jobs_cancelled_total,
            schedule_rejections_total,
            liveness_operations_total,
            equipment_webhook_calls_total,
            equipment_state,
            crontab_operations_total,
            target_temp_check_ticks_total,
            target_temp_active,
            schedule_duration_seconds,
        }
    }

    /// Access the global metrics instance.
    pub fn global() -> &'static Self {
        &METRICS
    }
}
