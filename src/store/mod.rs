//! File-backed persistence primitives shared by every store in this crate.
//!
//! Every mutable record in this service (`Job`, `EquipmentStatus`,
//! `TargetTemperatureState`, `SensorConfig`, `HealthcheckStateFile`) is a
//! single JSON file rewritten via write-temp + fsync + rename, with an
//! exclusive `flock` held on a lock file for the full read-modify-write
//! span (spec §4.D, §5).

pub mod equipment;
pub mod healthcheck_state;
pub mod heating_event;
pub mod jobs;
pub mod sensors;
pub mod target_temp;

use crate::error::{Result, StoreError};
use fs2::FileExt as _;
use std::fs::File;
use std::path::{Path, PathBuf};

/// RAII guard around an exclusive `flock` on a sibling `.lock` file.
///
/// Held for the duration of a read-modify-write critical section; dropped
/// (and thus unlocked) whether the section succeeded or failed.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Acquire an exclusive lock on `<path>.lock`, creating it if absent.
    pub fn acquire(path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(path);
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StoreError::Lock {
                path: lock_path.display().to_string(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| StoreError::Lock {
            path: lock_path.display().to_string(),
            source,
        })?;
        Ok(Self { _file: file })
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

/// Write `value` to `path` atomically: serialize to a sibling temp file,
/// fsync it, then rename over the destination. The rename is atomic on
/// POSIX filesystems, so a crash mid-write never leaves a torn record.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp_name = format!(
        ".tmp-{}-{:x}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("record"),
        rand::random::<u32>()
    );
    let tmp_path = dir.join(tmp_name);

    let file = File::create(&tmp_path).map_err(StoreError::AtomicWrite)?;
    serde_json::to_writer_pretty(&file, value)?;
    file.sync_all().map_err(StoreError::AtomicWrite)?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(StoreError::AtomicWrite)?;
    Ok(())
}

/// Read and deserialize a JSON record, returning `Ok(None)` if the file
/// does not exist.
pub fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Remove any leftover `.tmp-*` files in `dir`, left behind by a torn
/// write across a crash. Safe to call on every startup.
pub fn cleanup_stale_temp_files(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(".tmp-") {
            tracing::warn!(file = %name, "removing leftover temp file from a torn write");
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}
