//! `HeatingEvent` — append-only equipment event log.
//!
//! Read by the (external, out-of-scope) historical-characteristics
//! analyzer; the scheduler never reads this log back.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    Heater,
    Pump,
    Ionizer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentAction {
    On,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeatingEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub equipment: Equipment,
    pub action: EquipmentAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_temp_f: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_temp_f: Option<f64>,
    /// Set when the webhook call that produced this event failed, so the
    /// record still exists but is flagged (spec §7 `EquipmentWebhookFailure`
    /// row: "HeatingEvent still logged with failure flag").
    #[serde(default)]
    pub failed: bool,
}

/// Append-only JSONL log. Rotation is an external concern (spec §1).
#[derive(Debug, Clone)]
pub struct HeatingEventLog {
    path: PathBuf,
}

impl HeatingEventLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn append(&self, event: HeatingEvent) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            Ok::<_, crate::error::Error>(())
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }
}
