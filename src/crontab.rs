//! Crontab Adapter (spec §4.A): read/add/remove tagged entries in the
//! host OS crontab, serialized by a single exclusive file lock so
//! concurrent adds never lose entries.

use crate::error::{CrontabError, Result};
use crate::store::FileLock;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Command;

/// Trait boundary so the scheduler can be driven by an in-memory fake in
/// tests, per spec §4.A "must be replaceable by an in-memory adapter".
#[async_trait]
pub trait CrontabAdapter: Send + Sync {
    async fn add_entry(&self, line: &str) -> Result<()>;
    async fn remove_by_pattern(&self, substring: &str) -> Result<()>;
    async fn list_entries(&self) -> Result<Vec<String>>;
}

/// Adapter backed by the host's `crontab` binary.
pub struct SystemCrontab {
    lock_path: PathBuf,
}

impl SystemCrontab {
    pub fn new(lock_path: PathBuf) -> Self {
        Self { lock_path }
    }

    fn read_lines() -> Result<Vec<String>> {
        let output = Command::new("crontab").arg("-l").output().map_err(|error| {
            CrontabError::Unavailable(format!("failed to invoke crontab: {error}"))
        })?;

        // An empty crontab makes `crontab -l` exit non-zero with
        // "no crontab for <user>" on stderr; treat that as zero entries
        // rather than a hard failure.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no crontab") {
                return Ok(Vec::new());
            }
            return Err(CrontabError::Read(stderr.trim().to_string()).into());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn write_lines(lines: &[String]) -> Result<()> {
        let body = lines.join("\n") + "\n";

        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(std::process::Stdio::piped())
            .spawn()
            .map_err(|error| CrontabError::Unavailable(format!("failed to invoke crontab: {error}")))?;

        {
            use std::io::Write as _;
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| CrontabError::Write("crontab stdin unavailable".to_string()))?;
            stdin
                .write_all(body.as_bytes())
                .map_err(|error| CrontabError::Write(error.to_string()))?;
        }

        let status = child
            .wait()
            .map_err(|error| CrontabError::Write(error.to_string()))?;
        if !status.success() {
            return Err(CrontabError::Write(format!("crontab exited with {status}")).into());
        }
        Ok(())
    }
}

#[async_trait]
impl CrontabAdapter for SystemCrontab {
    async fn add_entry(&self, line: &str) -> Result<()> {
        let line = line.to_string();
        let lock_path = self.lock_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&lock_path)?;
            let mut lines = Self::read_lines()?;
            lines.push(line);
            Self::write_lines(&lines)
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?;

        #[cfg(feature = "metrics")]
        record_crontab_op("add_entry", &result);

        result
    }

    async fn remove_by_pattern(&self, substring: &str) -> Result<()> {
        let substring = substring.to_string();
        let lock_path = self.lock_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&lock_path)?;
            let lines = Self::read_lines()?;
            let retained: Vec<String> = lines
                .into_iter()
                .filter(|line| !line.contains(&substring))
                .collect();
            Self::write_lines(&retained)
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?;

        #[cfg(feature = "metrics")]
        record_crontab_op("remove_by_pattern", &result);

        result
    }

    async fn list_entries(&self) -> Result<Vec<String>> {
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(&lock_path)?;
            Self::read_lines()
        })
        .await
        .map_err(|error| crate::error::Error::Other(anyhow::anyhow!(error)))?
    }
}

#[cfg(feature = "metrics")]
fn record_crontab_op<T>(operation: &str, result: &Result<T>) {
    let label = if result.is_ok() { "ok" } else { "failed" };
    crate::telemetry::Metrics::global()
        .crontab_operations_total
        .with_label_values(&[operation, label])
        .inc();
}

/// In-memory crontab used by scheduler/dispatcher tests, so end-to-end
/// scenarios never touch the real host crontab.
#[derive(Default)]
pub struct FakeCrontab {
    lines: tokio::sync::Mutex<Vec<String>>,
}

impl FakeCrontab {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrontabAdapter for FakeCrontab {
    async fn add_entry(&self, line: &str) -> Result<()> {
        self.lines.lock().await.push(line.to_string());
        Ok(())
    }

    async fn remove_by_pattern(&self, substring: &str) -> Result<()> {
        self.lines.lock().await.retain(|line| !line.contains(substring));
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<String>> {
        Ok(self.lines.lock().await.clone())
    }
}

/// Build the exact crontab line shape required by spec §6:
/// `<cron> <dispatcherPath> <jobId> # HOTTUB:<jobId>`.
pub fn build_crontab_line(cron_expr: &str, dispatcher_path: &std::path::Path, job_id: &str) -> String {
    format!("{cron_expr} {} {job_id} # HOTTUB:{job_id}", dispatcher_path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_crontab_add_and_remove_by_pattern() {
        let crontab = FakeCrontab::new();
        crontab
            .add_entry(&build_crontab_line("30 6 15 1 *", std::path::Path::new("/bin/dispatch"), "job-1"))
            .await
            .unwrap();
        crontab
            .add_entry(&build_crontab_line("0 3 1 * *", std::path::Path::new("/bin/dispatch"), "job-2"))
            .await
            .unwrap();

        let entries = crontab.list_entries().await.unwrap();
        assert_eq!(entries.len(), 2);

        crontab.remove_by_pattern("HOTTUB:job-1").await.unwrap();
        let entries = crontab.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("HOTTUB:job-2"));
    }

    #[test]
    fn crontab_line_has_exact_shape() {
        let line = build_crontab_line("30 6 15 1 *", std::path::Path::new("/usr/local/bin/hottub-dispatch"), "job-abc");
        assert_eq!(
            line,
            "30 6 15 1 * /usr/local/bin/hottub-dispatch job-abc # HOTTUB:job-abc"
        );
    }
}
