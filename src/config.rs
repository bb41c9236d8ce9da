//! Configuration loading and validation.
//!
//! All settings are environment-provided (spec §6), with an optional
//! TOML file layer underneath for local overrides during development.

use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for job records, equipment/target-temp state, and lock files.
    pub data_dir: PathBuf,

    /// Absolute URL prefix the dispatcher POSTs against, and that this
    /// service's own job records embed as `apiBaseUrl`.
    pub api_base_url: String,

    /// Address the HTTP API server binds to.
    pub bind: std::net::SocketAddr,

    /// healthchecks.io-shaped API key. Absence disables the liveness client.
    pub liveness_api_key: Option<String>,

    /// healthchecks.io API base (overridable for self-hosted instances/tests).
    pub liveness_api_base: String,

    /// Notification channel attached to every created check.
    pub liveness_channel: Option<String>,

    /// Bearer key for the equipment webhook provider. Absence selects stub mode.
    pub equipment_webhook_key: Option<String>,

    /// Equipment webhook base URL.
    pub equipment_webhook_url: String,

    /// IANA timezone used to interpret "HH:MM" schedule inputs.
    pub system_tz: String,

    /// Minutes between target-temperature check-and-adjust ticks.
    pub heat_target_check_interval_min: u32,

    /// Hysteresis band (°F) around the target temperature.
    pub deadband_f: f64,

    /// Absolute path to the `hottub-dispatch` binary, embedded in crontab lines.
    pub dispatcher_path: PathBuf,

    /// Minimum grace period (seconds) for any liveness check.
    pub liveness_min_grace_secs: u64,

    /// Overlap window (minutes) used by the scheduler's conflict check.
    pub overlap_window_min: i64,

    /// Address the Prometheus `/metrics` server binds to, behind the
    /// `metrics` cargo feature. `None` disables the metrics server even
    /// when the feature is compiled in.
    #[cfg(feature = "metrics")]
    pub metrics_bind: Option<std::net::SocketAddr>,
}

impl Config {
    /// Load configuration from the process environment, applying the
    /// defaults documented in spec §6/§9 for values the spec leaves
    /// configurable rather than hard-coded.
    pub fn load() -> Result<Self> {
        let overrides = load_file_overrides();

        let data_dir = env_or_file("HOTTUB_DATA_DIR", &overrides)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .map(|d| d.join("hottub"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });
        std::fs::create_dir_all(&data_dir).map_err(|error| {
            crate::error::Error::Config(ConfigError::Invalid(format!(
                "failed to create data directory {}: {error}",
                data_dir.display()
            )))
        })?;

        let api_base_url = required(&overrides, "API_BASE_URL")?;

        let bind = env_or_file("HOTTUB_BIND", &overrides).unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let bind = bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("HOTTUB_BIND '{bind}' is not a valid socket address")))?;

        let liveness_api_key = env_or_file("LIVENESS_API_KEY", &overrides);
        let liveness_api_base = env_or_file("LIVENESS_API_BASE", &overrides)
            .unwrap_or_else(|| "https://healthchecks.io/api/v3".to_string());
        let liveness_channel = env_or_file("LIVENESS_CHANNEL", &overrides);

        let equipment_webhook_key = env_or_file("EQUIPMENT_WEBHOOK_KEY", &overrides);
        let equipment_webhook_url = env_or_file("EQUIPMENT_WEBHOOK_URL", &overrides)
            .unwrap_or_else(|| "https://maker.ifttt.com/trigger".to_string());

        let system_tz = env_or_file("SYSTEM_TZ", &overrides).unwrap_or_else(|| "UTC".to_string());
        system_tz.parse::<chrono_tz::Tz>().map_err(|_| {
            crate::error::Error::Config(ConfigError::Invalid(format!(
                "SYSTEM_TZ '{system_tz}' is not a valid IANA timezone"
            )))
        })?;

        let heat_target_check_interval_min = required_parse(&overrides, "HEAT_TARGET_CHECK_INTERVAL_MIN")?;
        let deadband_f = required_parse(&overrides, "DEADBAND_F")?;

        let dispatcher_path = env_or_file("HOTTUB_DISPATCHER_PATH", &overrides)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/usr/local/bin/hottub-dispatch"));

        let liveness_min_grace_secs = env_or_file("LIVENESS_MIN_GRACE_SECS", &overrides)
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let overlap_window_min = env_or_file("HEAT_OVERLAP_WINDOW_MIN", &overrides)
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        #[cfg(feature = "metrics")]
        let metrics_bind = match env_or_file("HOTTUB_METRICS_BIND", &overrides) {
            Some(raw) => Some(raw.parse().map_err(|_| {
                ConfigError::Invalid(format!("HOTTUB_METRICS_BIND '{raw}' is not a valid socket address"))
            })?),
            None => None,
        };

        Ok(Self {
            data_dir,
            api_base_url,
            bind,
            liveness_api_key,
            liveness_api_base,
            liveness_channel,
            equipment_webhook_key,
            equipment_webhook_url,
            system_tz,
            heat_target_check_interval_min,
            deadband_f,
            dispatcher_path,
            liveness_min_grace_secs,
            overlap_window_min,
            #[cfg(feature = "metrics")]
            metrics_bind,
        })
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn crontab_lock_path(&self) -> PathBuf {
        self.data_dir.join("crontab.lock")
    }

    pub fn equipment_status_path(&self) -> PathBuf {
        self.data_dir.join("equipment_status.json")
    }

    pub fn target_temp_state_path(&self) -> PathBuf {
        self.data_dir.join("target_temp_state.json")
    }

    pub fn sensors_path(&self) -> PathBuf {
        self.data_dir.join("sensors.json")
    }

    pub fn maintenance_healthcheck_path(&self) -> PathBuf {
        self.data_dir.join("maintenance_healthcheck.json")
    }

    pub fn heating_events_path(&self) -> PathBuf {
        self.data_dir.join("heating_events.jsonl")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("hottubd.pid")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Path to the optional local override file, itself environment-overridable.
/// Defaults to `hottub.toml` in the current directory, matching how the
/// dispatcher and daemon are typically launched from an install directory.
fn override_file_path() -> PathBuf {
    std::env::var("HOTTUB_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("hottub.toml"))
}

/// Load the optional TOML override file into a flat string map. Absence is
/// normal (the file layer is opt-in); a malformed file is logged and
/// ignored rather than failing startup, since every setting it could
/// supply is also settable directly via the environment.
fn load_file_overrides() -> HashMap<String, String> {
    let path = override_file_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => return HashMap::new(),
    };
    match contents.parse::<toml::Table>() {
        Ok(table) => table
            .into_iter()
            .filter_map(|(key, value)| value.as_str().map(|s| (key, s.to_string())))
            .collect(),
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "ignoring unparsable config override file");
            HashMap::new()
        }
    }
}

/// Environment variable value, falling back to the override file when unset.
/// The environment always wins, so a deployed `HOTTUB_*` env var can
/// override a checked-in `hottub.toml` without editing it.
fn env_or_file(key: &str, overrides: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| overrides.get(key).cloned())
}

fn required(overrides: &HashMap<String, String>, key: &str) -> Result<String> {
    env_or_file(key, overrides).ok_or_else(|| ConfigError::MissingKey(key.to_string()).into())
}

fn required_parse<T: std::str::FromStr>(overrides: &HashMap<String, String>, key: &str) -> Result<T> {
    let raw = required(overrides, key)?;
    raw.parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} is not a valid number: '{raw}'")).into())
}
