//! Trace ingestion: walk trace files and directories and normalize raw
//! log records into [`KpiEvent`]s for the aggregator.
//!
//! Ingestion is tolerant by contract: unknown fields are ignored,
//! malformed lines are counted and skipped, and a bad line never aborts
//! a batch. Only an unreadable file or directory is an error.

use std::path::{Path, PathBuf};

use axle_trace::TraceReplay;

use crate::error::KpiError;

// ---------------------------------------------------------------------------
// Decision markers
// ---------------------------------------------------------------------------

/// Decision record emitted when the circuit breaker refuses a route.
pub const DECISION_BREAKER_OPEN: &str = "breaker_open";
/// Decision record emitted when a human takes over an action.
pub const DECISION_HITL: &str = "human_intervention";

// ---------------------------------------------------------------------------
// Normalized events
// ---------------------------------------------------------------------------

/// One normalized trace record, scoped to the run it came from.
#[derive(Debug, Clone)]
pub struct KpiEvent {
    pub run_id: String,
    pub kind: KpiEventKind,
}

#[derive(Debug, Clone)]
pub enum KpiEventKind {
    /// One runner attempt (trace `type: action`).
    Attempt(AttemptSample),
    /// The breaker refused a route for this run.
    BreakerFire,
    /// A human intervened in this run.
    HumanIntervention,
    /// End of one run's log. Closes the run's task and pending step.
    RunEnd,
}

/// The fields of an action record the aggregator cares about.
#[derive(Debug, Clone)]
pub struct AttemptSample {
    pub action: String,
    pub success: bool,
    /// Retry index (0 = first try). A reset to 0 starts a new step.
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub layer: Option<String>,
    pub fail_type: Option<String>,
}

/// What ingestion saw, for the tool's one-line report.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub files: usize,
    pub records: usize,
    pub skipped_lines: usize,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load every trace file under `paths` (files are read directly,
/// directories are scanned for `*.jsonl`) into normalized events.
pub fn load_events(paths: &[PathBuf]) -> Result<(Vec<KpiEvent>, IngestStats), KpiError> {
    let mut files = Vec::new();
    for path in paths {
        collect_trace_files(path, &mut files)?;
    }
    // Deterministic aggregation regardless of directory iteration order.
    files.sort();

    let mut events = Vec::new();
    let mut stats = IngestStats::default();
    for file in &files {
        ingest_file(file, &mut events, &mut stats)?;
    }
    Ok((events, stats))
}

fn collect_trace_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<(), KpiError> {
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry_path = entry?.path();
            if entry_path.is_file()
                && entry_path.extension().and_then(|e| e.to_str()) == Some("jsonl")
            {
                out.push(entry_path);
            }
        }
    } else {
        out.push(path.to_path_buf());
    }
    Ok(())
}

fn ingest_file(
    path: &Path,
    events: &mut Vec<KpiEvent>,
    stats: &mut IngestStats,
) -> Result<(), KpiError> {
    let replay = TraceReplay::load(path)?;
    stats.files += 1;
    stats.skipped_lines += replay.skipped;

    // A file without a parseable run_id still groups as one run.
    let fallback_run_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());
    let mut run_id = fallback_run_id.clone();
    let mut saw_any = false;

    for record in &replay.events {
        if let Some(id) = record.get("run_id").and_then(|v| v.as_str()) {
            run_id = id.to_string();
        }
        let Some(kind) = normalize(record) else {
            continue;
        };
        stats.records += 1;
        saw_any = true;
        events.push(KpiEvent {
            run_id: run_id.clone(),
            kind,
        });
    }

    if saw_any {
        events.push(KpiEvent {
            run_id,
            kind: KpiEventKind::RunEnd,
        });
    }
    Ok(())
}

/// Map one raw record to a normalized event. Records the aggregator has
/// no use for (screenshots, state observations, plain errors, other
/// decisions) yield `None`.
fn normalize(record: &serde_json::Value) -> Option<KpiEventKind> {
    match record.get("type").and_then(|t| t.as_str())? {
        "action" => Some(KpiEventKind::Attempt(AttemptSample {
            action: record.get("action")?.as_str()?.to_string(),
            success: record.get("success").and_then(|s| s.as_bool())?,
            attempt: record.get("attempt").and_then(|a| a.as_u64()).unwrap_or(0) as u32,
            elapsed_ms: record.get("elapsed_ms").and_then(|e| e.as_u64()).unwrap_or(0),
            layer: record
                .get("layer")
                .and_then(|l| l.as_str())
                .map(str::to_string),
            fail_type: record
                .get("fail_type")
                .and_then(|f| f.as_str())
                .map(str::to_string),
        })),
        "decision" => match record.get("decision").and_then(|d| d.as_str()) {
            Some(DECISION_BREAKER_OPEN) => Some(KpiEventKind::BreakerFire),
            Some(DECISION_HITL) => Some(KpiEventKind::HumanIntervention),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
