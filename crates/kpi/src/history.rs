//! Append-only KPI history store.
//!
//! One JSON line per finished KPI run, tagged with environment, app,
//! and build so the trend detectors compare like with like. Loading is
//! tolerant the same way trace ingestion is: bad lines are skipped and
//! counted, never fatal.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use axle_core::types::Timestamp;

use crate::aggregate::KpiSummary;
use crate::error::KpiError;

/// One timestamped summary in the time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiHistoryRecord {
    pub ts: Timestamp,
    pub env: String,
    pub app: String,
    pub build: String,
    pub summary: KpiSummary,
}

impl KpiHistoryRecord {
    pub fn new(env: &str, app: &str, build: &str, summary: KpiSummary) -> Self {
        Self {
            ts: chrono::Utc::now(),
            env: env.to_string(),
            app: app.to_string(),
            build: build.to_string(),
            summary,
        }
    }
}

/// A JSONL file of [`KpiHistoryRecord`]s.
pub struct KpiHistory {
    path: PathBuf,
}

impl KpiHistory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn append(&self, record: &KpiHistoryRecord) -> Result<(), KpiError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Load all records in append order. A missing file is an empty
    /// series; malformed lines are skipped with a warning.
    pub fn load(&self) -> Result<Vec<KpiHistoryRecord>, KpiError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(
                path = %self.path.display(),
                skipped,
                "Skipped malformed history lines",
            );
        }
        Ok(records)
    }

    /// Rewrite the store keeping only the newest `n` records.
    pub fn retain_last(&self, n: usize) -> Result<(), KpiError> {
        let records = self.load()?;
        if records.len() <= n {
            return Ok(());
        }
        let keep = &records[records.len() - n..];
        let mut lines = String::new();
        for record in keep {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }
        std::fs::write(&self.path, lines)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
