//! Append-only trace writer.
//!
//! One writer per run id owns one log file. Every `log_*` call stamps
//! the timestamp, run id, and a strictly increasing step counter, then
//! appends a single JSON line and flushes. The step counter and file
//! handle live behind one mutex so the single-writer contract also holds
//! for multi-threaded callers.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use axle_core::{AttemptRecord, AttemptSink};

use crate::error::TraceError;
use crate::event::{
    ActionEvent, DecisionEvent, ErrorEvent, ScreenshotEvent, StateEvent, TraceEvent, TracePayload,
};

/// Subdirectory (next to the log file) where screenshot bytes land.
const SCREENSHOT_DIR: &str = "shots";

struct WriterState {
    file: File,
    step: u64,
}

/// Append-only structured log for one automation run.
pub struct TraceWriter {
    run_id: String,
    dir: PathBuf,
    path: PathBuf,
    inner: Mutex<WriterState>,
}

impl TraceWriter {
    /// Open (or create) the log for `run_id` under `dir`. Reopening an
    /// existing run resumes the step counter after the last appended
    /// record, so `step` stays strictly increasing across restarts.
    pub fn create(dir: impl AsRef<Path>, run_id: impl Into<String>) -> Result<Self, TraceError> {
        let run_id = run_id.into();
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{run_id}.jsonl"));
        let step = if path.exists() {
            fs::read_to_string(&path)?
                .lines()
                .filter(|l| !l.trim().is_empty())
                .count() as u64
        } else {
            0
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            run_id,
            dir,
            path,
            inner: Mutex::new(WriterState { file, step }),
        })
    }

    /// Open a log with a fresh random run id.
    pub fn create_new_run(dir: impl AsRef<Path>) -> Result<Self, TraceError> {
        Self::create(dir, uuid::Uuid::new_v4().to_string())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp and append one event. Returns the step number assigned.
    pub fn log(&self, payload: TracePayload) -> Result<u64, TraceError> {
        let mut state = self.inner.lock().expect("trace writer poisoned");
        state.step += 1;
        let event = TraceEvent {
            ts: chrono::Utc::now(),
            run_id: self.run_id.clone(),
            step: state.step,
            payload,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(state.file, "{line}")?;
        state.file.flush()?;
        Ok(event.step)
    }

    /// Log the outcome of one runner attempt.
    pub fn log_action(&self, record: &AttemptRecord) -> Result<u64, TraceError> {
        self.log(TracePayload::Action(ActionEvent {
            action: record.action_kind.clone(),
            screen_key: record.screen_key.clone(),
            layer: record.layer.map(|l| l.as_str().to_string()),
            success: record.success,
            fail_type: record.fail_kind.map(|k| k.as_str().to_string()),
            fail_message: record.fail_message.clone(),
            elapsed_ms: record.elapsed_ms,
            attempt: record.attempt,
            locator: record.locator.clone(),
            params: record.params.clone(),
            snapshot: record.snapshot.clone(),
        }))
    }

    /// Store screenshot bytes externally and log only hash + path.
    pub fn log_screenshot(
        &self,
        screen_key: &str,
        bytes: &[u8],
    ) -> Result<u64, TraceError> {
        let hash = hex_digest(bytes);
        let shots = self.dir.join(SCREENSHOT_DIR);
        fs::create_dir_all(&shots)?;
        let file_path = shots.join(format!("{hash}.png"));
        // Content addressing: identical bytes land on the same path, so
        // an existing file needs no rewrite.
        if !file_path.exists() {
            fs::write(&file_path, bytes)?;
        }
        self.log(TracePayload::Screenshot(ScreenshotEvent {
            screen_key: screen_key.to_string(),
            sha256: hash,
            path: file_path.to_string_lossy().into_owned(),
        }))
    }

    /// Log a caller-observed state snapshot.
    pub fn log_state(&self, screen_key: &str, state: serde_json::Value) -> Result<u64, TraceError> {
        self.log(TracePayload::State(StateEvent {
            screen_key: screen_key.to_string(),
            state,
        }))
    }

    /// Log a control-plane decision (route choice, breaker skip, ...).
    pub fn log_decision(
        &self,
        decision: &str,
        layer: Option<&str>,
        score: Option<f64>,
        detail: serde_json::Value,
    ) -> Result<u64, TraceError> {
        self.log(TracePayload::Decision(DecisionEvent {
            decision: decision.to_string(),
            layer: layer.map(str::to_string),
            score,
            detail,
        }))
    }

    /// Log an error observed outside the runner's attempt loop.
    pub fn log_error(&self, message: &str, fail_type: Option<&str>) -> Result<u64, TraceError> {
        self.log(TracePayload::Error(ErrorEvent {
            message: message.to_string(),
            fail_type: fail_type.map(str::to_string),
        }))
    }
}

/// The runner reports attempts through this seam. A failed write must
/// never disturb the attempt loop, so it is logged and swallowed here.
impl AttemptSink for TraceWriter {
    fn record_attempt(&self, record: &AttemptRecord) {
        if let Err(e) = self.log_action(record) {
            tracing::error!(
                run_id = %self.run_id,
                action = %record.action_kind,
                error = %e,
                "Failed to append attempt to trace",
            );
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_increase_strictly_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::create(dir.path(), "run-a").unwrap();

        assert_eq!(writer.log_error("first", None).unwrap(), 1);
        assert_eq!(writer.log_error("second", None).unwrap(), 2);
        assert_eq!(writer.log_error("third", None).unwrap(), 3);
    }

    #[test]
    fn reopened_run_resumes_step_counter() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = "run-resume";

        let writer = TraceWriter::create(dir.path(), run_id).unwrap();
        writer.log_error("first", None).unwrap();
        writer.log_error("second", None).unwrap();
        drop(writer);

        // Crash/resume: a second writer on the same run id must pick up
        // after the last appended record, not restart at 1.
        let writer = TraceWriter::create(dir.path(), run_id).unwrap();
        assert_eq!(writer.log_error("third", None).unwrap(), 3);

        let content = fs::read_to_string(writer.path()).unwrap();
        let steps: Vec<u64> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["step"].as_u64().unwrap())
            .collect();
        assert_eq!(steps, [1, 2, 3]);
    }

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::create(dir.path(), "run-b").unwrap();
        writer.log_state("login", serde_json::json!({"ready": true})).unwrap();
        writer.log_error("boom", Some("UNKNOWN")).unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["run_id"], "run-b");
        }
    }

    #[test]
    fn screenshot_stores_bytes_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::create(dir.path(), "run-c").unwrap();
        writer.log_screenshot("checkout", b"fake png bytes").unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(v["type"], "screenshot");

        let hash = v["sha256"].as_str().unwrap();
        assert_eq!(hash.len(), 64);
        let stored = dir.path().join(SCREENSHOT_DIR).join(format!("{hash}.png"));
        assert_eq!(fs::read(stored).unwrap(), b"fake png bytes");
    }

    #[test]
    fn identical_screenshots_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::create(dir.path(), "run-d").unwrap();
        writer.log_screenshot("a", b"same").unwrap();
        writer.log_screenshot("b", b"same").unwrap();

        let shots: Vec<_> = fs::read_dir(dir.path().join(SCREENSHOT_DIR))
            .unwrap()
            .collect();
        assert_eq!(shots.len(), 1);
    }

    #[test]
    fn fresh_run_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = TraceWriter::create_new_run(dir.path()).unwrap();
        let b = TraceWriter::create_new_run(dir.path()).unwrap();
        assert_ne!(a.run_id(), b.run_id());
    }
}
