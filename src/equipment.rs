//! Equipment Controller (spec §4.G): drive the heater/pump via outbound
//! webhooks, keep `EquipmentStatus` current, and append `HeatingEvent`s.

use crate::error::{EquipmentError, Result};
use crate::store::equipment::{EquipmentStatus, EquipmentStatusStore};
use crate::store::heating_event::{Equipment, EquipmentAction, HeatingEvent, HeatingEventLog};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Breaks the Equipment Controller / Target-Temperature Service cycle
/// (spec §9 "Cyclic handler coupling"): the Target-Temperature Service
/// implements this and is injected after both are constructed.
#[async_trait]
pub trait HeaterOffHook: Send + Sync {
    async fn cancel(&self) -> Result<()>;
}

/// Supplies the current calibrated reading for `HeatingEvent` logging.
/// Optional — if absent, events are logged without temperature fields.
#[async_trait]
pub trait SensorReadingSource: Send + Sync {
    async fn current_reading(&self) -> Option<crate::store::sensors::CalibratedReading>;
}

#[async_trait]
pub trait EquipmentWebhookClient: Send + Sync {
    async fn trigger(&self, event: &str) -> Result<()>;
}

/// IFTTT Maker-webhook-shaped client (spec §6 `EQUIPMENT_WEBHOOK_URL`):
/// `POST {base_url}/{event}/with/key/{key}`. With no key configured,
/// calls are logged and treated as successful so the service runs
/// against no physical hardware during development.
pub struct HttpEquipmentWebhook {
    http: reqwest::Client,
    base_url: String,
    key: Option<String>,
}

impl HttpEquipmentWebhook {
    pub fn new(base_url: String, key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client configuration is valid");
        Self { http, base_url, key }
    }
}

#[async_trait]
impl EquipmentWebhookClient for HttpEquipmentWebhook {
    async fn trigger(&self, event: &str) -> Result<()> {
        let Some(key) = &self.key else {
            tracing::info!(event, "equipment webhook stub mode, skipping outbound call");
            return Ok(());
        };

        let url = format!("{}/{event}/with/key/{key}", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|error| EquipmentError::WebhookFailure(error.to_string()))?;

        if !response.status().is_success() {
            return Err(EquipmentError::WebhookFailure(format!(
                "webhook for '{event}' returned {}",
                response.status()
            ))
            .into());
        }
        Ok(())
    }
}

const EVENT_HEATER_ON: &str = "hot-tub-heat-on";
const EVENT_HEATER_OFF: &str = "hot-tub-heat-off";
const EVENT_PUMP_RUN: &str = "hot-tub-pump-on";

pub struct EquipmentController {
    status: Arc<EquipmentStatusStore>,
    events: Arc<HeatingEventLog>,
    webhook: Arc<dyn EquipmentWebhookClient>,
    sensors: Option<Arc<dyn SensorReadingSource>>,
    heater_off_hook: ArcSwapOption<dyn HeaterOffHook>,
}

impl EquipmentController {
    pub fn new(
        status: Arc<EquipmentStatusStore>,
        events: Arc<HeatingEventLog>,
        webhook: Arc<dyn EquipmentWebhookClient>,
        sensors: Option<Arc<dyn SensorReadingSource>>,
    ) -> Self {
        Self {
            status,
            events,
            webhook,
            sensors,
            heater_off_hook: ArcSwapOption::empty(),
        }
    }

    /// Wire in the Target-Temperature Service's cancel capability once it
    /// exists, breaking the construction-order cycle (spec §9).
    pub fn set_heater_off_hook(&self, hook: Arc<dyn HeaterOffHook>) {
        self.heater_off_hook.store(Some(hook));
    }

    /// Turn the heater on unconditionally (manual intent, spec §4.G).
    /// The webhook call and the status write happen under the same
    /// `EquipmentStatus` lock (spec §5) — see [`EquipmentStatusStore::with_lock`].
    pub async fn heater_on(&self) -> Result<EquipmentStatus> {
        match self.set_heater(true, false).await {
            Ok((status, changed)) => {
                if changed {
                    self.log_event(Equipment::Heater, EquipmentAction::On, false).await;
                }
                Ok(status)
            }
            Err(error) => {
                self.log_event(Equipment::Heater, EquipmentAction::On, true).await;
                Err(error)
            }
        }
    }

    /// Turn the heater on only if it is currently off. The check and the
    /// webhook call + state write happen inside one `EquipmentStatus`
    /// lock, so a concurrent manual `heaterOff` can never race this
    /// decision (spec §5). Returns whether it actually turned the
    /// heater on.
    pub async fn heater_on_if_off(&self) -> Result<(EquipmentStatus, bool)> {
        match self.set_heater(true, true).await {
            Ok((status, changed)) => {
                if changed {
                    self.log_event(Equipment::Heater, EquipmentAction::On, false).await;
                }
                Ok((status, changed))
            }
            Err(error) => {
                self.log_event(Equipment::Heater, EquipmentAction::On, true).await;
                Err(error)
            }
        }
    }

    /// `heaterOff` also stops the pump (hardware coupling) and cancels
    /// any active target-temperature control loop (spec §4.G).
    pub async fn heater_off(&self) -> Result<EquipmentStatus> {
        let webhook = self.webhook.clone();
        let result = self
            .status
            .with_lock(|mut status| async move {
                webhook.trigger(EVENT_HEATER_OFF).await?;
                let now = Some(chrono::Utc::now());
                status.heater.on = false;
                status.heater.last_changed_at = now;
                status.pump.on = false;
                status.pump.last_changed_at = now;
                Ok((status, status))
            })
            .await;

        let status = match result {
            Ok(status) => status,
            Err(error) => {
                self.log_event(Equipment::Heater, EquipmentAction::Off, true).await;
                return Err(error);
            }
        };
        self.log_event(Equipment::Heater, EquipmentAction::Off, false).await;

        if let Some(hook) = self.heater_off_hook.load_full() {
            if let Err(error) = hook.cancel().await {
                tracing::warn!(%error, "failed to cancel target-temperature control after manual heater-off");
            }
        }

        Ok(status)
    }

    /// Turn the heater off only if it is currently on, without the manual
    /// `heaterOff` cross-equipment rule (pump-off, control-loop cancel).
    /// Used by the Target-Temperature Service's own Holding transition,
    /// which must keep the control loop (and its recurring check cron)
    /// alive so the heater can turn back on if the water cools below the
    /// deadband (spec §4.H check-and-adjust step 3/4). The check and the
    /// webhook call + state write happen inside one lock, for the same
    /// reason as [`Self::heater_on_if_off`].
    pub async fn heater_off_if_on(&self) -> Result<(EquipmentStatus, bool)> {
        match self.set_heater(false, true).await {
            Ok((status, changed)) => {
                if changed {
                    self.log_event(Equipment::Heater, EquipmentAction::Off, false).await;
                }
                Ok((status, changed))
            }
            Err(error) => {
                self.log_event(Equipment::Heater, EquipmentAction::Off, true).await;
                Err(error)
            }
        }
    }

    /// Shared implementation for the heater's target-control transitions:
    /// decide (if `only_if_changing`) and act under a single
    /// `EquipmentStatus` lock, so the webhook call and the state write
    /// are one atomic section (spec §5).
    async fn set_heater(&self, desired_on: bool, only_if_changing: bool) -> Result<(EquipmentStatus, bool)> {
        let webhook = self.webhook.clone();
        let event = if desired_on { EVENT_HEATER_ON } else { EVENT_HEATER_OFF };
        self.status
            .with_lock(|mut status| async move {
                if only_if_changing && status.heater.on == desired_on {
                    return Ok((status, (status, false)));
                }
                webhook.trigger(event).await?;
                status.heater.on = desired_on;
                status.heater.last_changed_at = Some(chrono::Utc::now());
                Ok((status, (status, true)))
            })
            .await
    }

    pub async fn pump_run(&self) -> Result<EquipmentStatus> {
        let webhook = self.webhook.clone();
        let result = self
            .status
            .with_lock(|mut status| async move {
                webhook.trigger(EVENT_PUMP_RUN).await?;
                status.pump.on = true;
                status.pump.last_changed_at = Some(chrono::Utc::now());
                Ok((status, status))
            })
            .await;

        let status = match result {
            Ok(status) => status,
            Err(error) => {
                self.log_event(Equipment::Pump, EquipmentAction::On, true).await;
                return Err(error);
            }
        };
        self.log_event(Equipment::Pump, EquipmentAction::On, false).await;
        Ok(status)
    }

    pub async fn status(&self) -> Result<EquipmentStatus> {
        self.status.load().await
    }

    async fn log_event(&self, equipment: Equipment, action: EquipmentAction, failed: bool) {
        let reading = match &self.sensors {
            Some(source) => source.current_reading().await,
            None => None,
        };

        #[cfg(feature = "metrics")]
        {
            let event_label = match (&equipment, &action) {
                (Equipment::Heater, EquipmentAction::On) => EVENT_HEATER_ON,
                (Equipment::Heater, EquipmentAction::Off) => EVENT_HEATER_OFF,
                (Equipment::Pump, _) => EVENT_PUMP_RUN,
                (Equipment::Ionizer, _) => "hot-tub-ionizer",
            };
            let metrics = crate::telemetry::Metrics::global();
            metrics
                .equipment_webhook_calls_total
                .with_label_values(&[event_label, if failed { "failed" } else { "ok" }])
                .inc();
            if !failed {
                let gauge_label = match equipment {
                    Equipment::Heater => "heater",
                    Equipment::Pump => "pump",
                    Equipment::Ionizer => "ionizer",
                };
                let on = !matches!(action, EquipmentAction::Off);
                metrics
                    .equipment_state
                    .with_label_values(&[gauge_label])
                    .set(if on { 1 } else { 0 });
            }
        }

        let event = HeatingEvent {
            timestamp: chrono::Utc::now(),
            equipment,
            action,
            water_temp_f: reading.and_then(|r| r.water_temp_f),
            ambient_temp_f: reading.and_then(|r| r.ambient_temp_f),
            failed,
        };
        if let Err(error) = self.events.append(event).await {
            tracing::warn!(%error, "failed to append heating event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingWebhook;
    #[async_trait]
    impl EquipmentWebhookClient for FailingWebhook {
        async fn trigger(&self, _event: &str) -> Result<()> {
            Err(EquipmentError::WebhookFailure("simulated".to_string()).into())
        }
    }

    struct StubWebhook;
    #[async_trait]
    impl EquipmentWebhookClient for StubWebhook {
        async fn trigger(&self, _event: &str) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingHook {
        cancelled: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }
    #[async_trait]
    impl HeaterOffHook for RecordingHook {
        async fn cancel(&self) -> Result<()> {
            self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(dir: &std::path::Path, webhook: Arc<dyn EquipmentWebhookClient>) -> EquipmentController {
        EquipmentController::new(
            Arc::new(EquipmentStatusStore::new(dir.join("equipment_status.json"))),
            Arc::new(HeatingEventLog::new(dir.join("heating_events.jsonl"))),
            webhook,
            None,
        )
    }

    #[tokio::test]
    async fn heater_on_updates_status() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), Arc::new(StubWebhook));
        let status = controller.heater_on().await.unwrap();
        assert!(status.heater.on);
        assert!(status.heater.last_changed_at.is_some());
    }

    #[tokio::test]
    async fn heater_off_also_stops_pump_and_calls_hook() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), Arc::new(StubWebhook));
        controller.heater_on().await.unwrap();
        controller.pump_run().await.unwrap();

        let cancelled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        controller.set_heater_off_hook(Arc::new(RecordingHook { cancelled: cancelled.clone() }));

        let status = controller.heater_off().await.unwrap();
        assert!(!status.heater.on);
        assert!(!status.pump.on);
        assert!(cancelled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn webhook_failure_leaves_status_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), Arc::new(FailingWebhook));
        let error = controller.heater_on().await.unwrap_err();
        assert!(matches!(error, crate::error::Error::Equipment(EquipmentError::WebhookFailure(_))));

        let status = controller.status().await.unwrap();
        assert!(!status.heater.on);
    }

    #[tokio::test]
    async fn webhook_failure_still_logs_a_failed_heating_event() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), Arc::new(FailingWebhook));
        controller.heater_on().await.unwrap_err();

        let log = std::fs::read_to_string(dir.path().join("heating_events.jsonl")).unwrap();
        let event: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert_eq!(event["equipment"], "heater");
        assert_eq!(event["action"], "on");
        assert_eq!(event["failed"], true);
    }

    #[tokio::test]
    async fn heater_on_if_off_is_a_no_op_when_already_on() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), Arc::new(StubWebhook));
        controller.heater_on().await.unwrap();

        let (status, changed) = controller.heater_on_if_off().await.unwrap();
        assert!(!changed);
        assert!(status.heater.on);
    }

    #[tokio::test]
    async fn heater_off_if_on_is_a_no_op_when_already_off() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path(), Arc::new(StubWebhook));

        let (status, changed) = controller.heater_off_if_on().await.unwrap();
        assert!(!changed);
        assert!(!status.heater.on);
    }

    struct SpanRecordingWebhook {
        spans: std::sync::Arc<std::sync::Mutex<Vec<(std::time::Instant, std::time::Instant)>>>,
        delay: Duration,
    }
    #[async_trait]
    impl EquipmentWebhookClient for SpanRecordingWebhook {
        async fn trigger(&self, _event: &str) -> Result<()> {
            let start = std::time::Instant::now();
            tokio::time::sleep(self.delay).await;
            let end = std::time::Instant::now();
            self.spans.lock().unwrap().push((start, end));
            Ok(())
        }
    }

    /// Regression test for spec §5: a concurrent manual `heaterOff` and a
    /// target-temperature transition must take the `EquipmentStatus` lock
    /// for their whole webhook call + state write, not just the write, so
    /// their webhook calls can never overlap in time.
    #[tokio::test]
    async fn concurrent_heater_on_and_off_never_overlap_their_webhook_call() {
        let dir = tempfile::tempdir().unwrap();
        let spans = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let controller = Arc::new(controller(
            dir.path(),
            Arc::new(SpanRecordingWebhook { spans: spans.clone(), delay: Duration::from_millis(30) }),
        ));

        let c1 = controller.clone();
        let c2 = controller.clone();
        let (r1, r2) = tokio::join!(tokio::spawn(async move { c1.heater_on().await }), tokio::spawn(async move {
            c2.heater_off().await
        }));
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 2);
        let (a, b) = (spans[0], spans[1]);
        assert!(a.1 <= b.0 || b.1 <= a.0, "webhook calls overlapped: {a:?} vs {b:?}");
    }
}
