//! `SensorConfig` — per-sensor role and calibration mapping.

use crate::error::Result;
use crate::store::{read_json_opt, write_json_atomic, FileLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorRole {
    Water,
    Ambient,
    Unassigned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    pub address: String,
    pub role: SensorRole,
    pub calibration_offset_f: f64,
    pub name: String,
}

/// A single reading pulled from the (externally owned) sensor device,
/// after per-sensor calibration has been applied.
#[derive(Debug, Clone, Copy)]
pub struct CalibratedReading {
    pub water_temp_f: Option<f64>,
    pub ambient_temp_f: Option<f64>,
    pub taken_at: chrono::DateTime<chrono::Utc>,
}

impl CalibratedReading {
    /// Spec §4.H step 1: a reading older than 15 minutes is treated as stale.
    pub fn is_stale(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now.signed_duration_since(self.taken_at) > chrono::Duration::minutes(15)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SensorConfigStore {
    path: Option<PathBuf>,
}

impl SensorConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub async fn load_all(&self) -> Result<Vec<SensorConfig>> {
        let Some(path) = self.path.clone() else {
            return Ok(Vec::new());
        };
        tokio::task::spawn_blocking(move || Ok(read_json_opt(&path)?.unwrap_or_default()))
            .await
            .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    pub async fn save_all(&self, sensors: Vec<SensorConfig>) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&path)?;
            write_json_atomic(&path, &sensors)
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    /// Apply the calibration offset for sensors assigned the `water` and
    /// `ambient` roles to a raw reading pair (spec §4.H step 2).
    pub fn apply_calibration(
        sensors: &[SensorConfig],
        raw_water_f: Option<f64>,
        raw_ambient_f: Option<f64>,
        taken_at: chrono::DateTime<chrono::Utc>,
    ) -> CalibratedReading {
        let water_offset = sensors
            .iter()
            .find(|s| s.role == SensorRole::Water)
            .map(|s| s.calibration_offset_f)
            .unwrap_or(0.0);
        let ambient_offset = sensors
            .iter()
            .find(|s| s.role == SensorRole::Ambient)
            .map(|s| s.calibration_offset_f)
            .unwrap_or(0.0);

        CalibratedReading {
            water_temp_f: raw_water_f.map(|t| t + water_offset),
            ambient_temp_f: raw_ambient_f.map(|t| t + ambient_offset),
            taken_at,
        }
    }
}
