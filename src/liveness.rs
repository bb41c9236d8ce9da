//! Liveness Client (spec §4.B): create/ping/delete/read external
//! schedule-based checks against a healthchecks.io-shaped API.
//!
//! Failure policy throughout: "try to create, try to ping; if
//! monitoring fails, scheduling still succeeds" (spec §4.B). Every
//! fallible call here logs and returns a benign value rather than
//! propagating an error up to the scheduler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    pub uuid: String,
    pub ping_url: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait LivenessClient: Send + Sync {
    async fn create_check(
        &self,
        name: &str,
        cron_schedule: &str,
        timezone: &str,
        grace_seconds: u64,
        channel_id: Option<&str>,
    ) -> Option<HealthCheck>;

    async fn ping(&self, ping_url: &str) -> bool;

    async fn delete(&self, uuid: &str) -> bool;

    async fn get_check(&self, uuid: &str) -> Option<HealthCheck>;
}

/// Live client against the healthchecks.io-shaped API.
pub struct HttpLivenessClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl HttpLivenessClient {
    pub fn new(api_base: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client configuration is valid");
        Self { http, api_base, api_key }
    }
}

#[derive(Serialize)]
struct CreateCheckRequest<'a> {
    name: &'a str,
    schedule: &'a str,
    tz: &'a str,
    grace: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateCheckResponse {
    ping_url: String,
    #[serde(default)]
    uuid: Option<String>,
}

#[async_trait]
impl LivenessClient for HttpLivenessClient {
    async fn create_check(
        &self,
        name: &str,
        cron_schedule: &str,
        timezone: &str,
        grace_seconds: u64,
        channel_id: Option<&str>,
    ) -> Option<HealthCheck> {
        let body = CreateCheckRequest {
            name,
            schedule: cron_schedule,
            tz: timezone,
            grace: grace_seconds,
            channels: channel_id,
        };

        let result = self
            .http
            .post(format!("{}/checks/", self.api_base))
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, check_name = name, "liveness check creation failed, proceeding without monitoring");
                return None;
            }
        };

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            tracing::warn!(check_name = name, status = %response.status(), "liveness API authentication failed, proceeding without monitoring");
            return None;
        }

        if !response.status().is_success() {
            tracing::warn!(check_name = name, status = %response.status(), "liveness check creation failed, proceeding without monitoring");
            return None;
        }

        let check = match response.json::<CreateCheckResponse>().await {
            Ok(parsed) => {
                let uuid = parsed
                    .uuid
                    .or_else(|| parsed.ping_url.rsplit('/').next().map(str::to_string))
                    .unwrap_or_default();
                Some(HealthCheck {
                    uuid,
                    ping_url: parsed.ping_url,
                    status: Some("new".to_string()),
                })
            }
            Err(error) => {
                tracing::warn!(%error, check_name = name, "failed to parse liveness check response");
                None
            }
        };

        #[cfg(feature = "metrics")]
        record_liveness_op("create", check.is_some());

        check
    }

    async fn ping(&self, ping_url: &str) -> bool {
        let ok = match self.http.get(ping_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::warn!(%error, %ping_url, "liveness ping failed");
                false
            }
        };

        #[cfg(feature = "metrics")]
        record_liveness_op("ping", ok);

        ok
    }

    async fn delete(&self, uuid: &str) -> bool {
        let result = self
            .http
            .delete(format!("{}/checks/{uuid}", self.api_base))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await;

        let ok = match result {
            // A 404 here means a cancel raced a dispatch and the check
            // was already removed — treat as success.
            Ok(response) => response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND,
            Err(error) => {
                tracing::warn!(%error, uuid, "liveness check deletion failed");
                false
            }
        };

        #[cfg(feature = "metrics")]
        record_liveness_op("delete", ok);

        ok
    }

    async fn get_check(&self, uuid: &str) -> Option<HealthCheck> {
        let result = self
            .http
            .get(format!("{}/checks/{uuid}", self.api_base))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            _ => None,
        }
    }
}

#[cfg(feature = "metrics")]
fn record_liveness_op(operation: &str, ok: bool) {
    crate::telemetry::Metrics::global()
        .liveness_operations_total
        .with_label_values(&[operation, if ok { "ok" } else { "failed" }])
        .inc();
}

/// No-op client selected when `LIVENESS_API_KEY` is absent. Every call
/// is advisory-only, so every call here simply succeeds without
/// reaching the network.
pub struct NullLivenessClient;

#[async_trait]
impl LivenessClient for NullLivenessClient {
    async fn create_check(
        &self,
        _name: &str,
        _cron_schedule: &str,
        _timezone: &str,
        _grace_seconds: u64,
        _channel_id: Option<&str>,
    ) -> Option<HealthCheck> {
        None
    }

    async fn ping(&self, _ping_url: &str) -> bool {
        true
    }

    async fn delete(&self, _uuid: &str) -> bool {
        true
    }

    async fn get_check(&self, _uuid: &str) -> Option<HealthCheck> {
        None
    }
}

/// Build the liveness check name exactly as spec §4.F step 7 / §6 require:
/// `"<jobId> <action> <ONCE|DAILY>"`.
pub fn check_name(job_id: &str, action: &str, recurring: bool) -> String {
    format!("{job_id} {action} {}", if recurring { "DAILY" } else { "ONCE" })
}
