//! `TargetTemperatureState` — single-record closed-loop controller state.

use crate::error::Result;
use crate::store::{read_json_opt, write_json_atomic, FileLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct TargetTemperatureState {
    pub active: bool,
    pub target_temp_f: Option<f64>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub heater_turned_on: bool,
    pub heater_turned_off: bool,
    pub target_reached: bool,
}

#[derive(Debug, Clone)]
pub struct TargetTempStateStore {
    path: PathBuf,
}

impl TargetTempStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<TargetTemperatureState> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Ok(read_json_opt(&path)?.unwrap_or_default()))
            .await
            .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    /// Replace the whole record atomically. Every transition (spec §4.H's
    /// state table) writes the full state before equipment is commanded,
    /// or immediately after, per the call site's ordering requirement.
    pub async fn replace(&self, state: TargetTemperatureState) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&path)?;
            write_json_atomic(&path, &state)
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }
}
