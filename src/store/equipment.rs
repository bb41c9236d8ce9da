//! `EquipmentStatus` — single-record mapping of heater/pump on/off state.

use crate::error::Result;
use crate::store::{read_json_opt, write_json_atomic, FileLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct EquipmentLine {
    pub on: bool,
    #[serde(rename = "lastChangedAt")]
    pub last_changed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct EquipmentStatus {
    pub heater: EquipmentLine,
    pub pump: EquipmentLine,
}

/// Single-writer file store for `EquipmentStatus`.
#[derive(Debug, Clone)]
pub struct EquipmentStatusStore {
    path: PathBuf,
}

impl EquipmentStatusStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<EquipmentStatus> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Ok(read_json_opt(&path)?.unwrap_or_default()))
            .await
            .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    /// Hold the exclusive lock across `f`, not just the final write, so a
    /// caller's webhook call and its resulting state write happen as one
    /// critical section — a concurrent `heaterOff` and target-temperature
    /// check can never interleave their webhook call + state write
    /// (spec §5). `f` receives the current status, performs whatever
    /// async work it needs (typically an outbound webhook trigger), and
    /// returns the status to persist plus an arbitrary output value.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(EquipmentStatus) -> Fut,
        Fut: std::future::Future<Output = Result<(EquipmentStatus, T)>>,
    {
        let lock_path = self.path.clone();
        let lock = tokio::task::spawn_blocking(move || FileLock::acquire(&lock_path))
            .await
            .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))??;

        let current = self.load().await?;
        let (next, output) = f(current).await?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_json_atomic(&path, &next))
            .await
            .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))??;

        drop(lock);
        Ok(output)
    }
}
