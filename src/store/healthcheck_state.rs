//! `HealthcheckStateFile` — singleton record for the maintenance check,
//! enabling idempotent deploy-time setup (spec §3, §4.J).

use crate::error::Result;
use crate::store::{read_json_opt, write_json_atomic, FileLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthcheckStateFile {
    pub uuid: String,
    pub ping_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct HealthcheckStateStore {
    path: PathBuf,
}

impl HealthcheckStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<Option<HealthcheckStateFile>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_json_opt(&path))
            .await
            .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }

    pub async fn save(&self, state: &HealthcheckStateFile) -> Result<()> {
        let path = self.path.clone();
        let state = state.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&path)?;
            write_json_atomic(&path, &state)
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }
}
