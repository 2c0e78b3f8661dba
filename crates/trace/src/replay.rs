//! Read-side of the trace log.
//!
//! [`TraceReplay`] loads one run's log into raw JSON values — tolerating
//! unknown fields and skipping malformed lines, never failing a batch on
//! them — and computes a basic [`RunSummary`] without requiring the KPI
//! pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::TraceError;

/// A loaded run log.
pub struct TraceReplay {
    /// Parsed records, in append order.
    pub events: Vec<serde_json::Value>,
    /// Lines that failed to parse and were skipped.
    pub skipped: usize,
}

/// Basic per-run statistics derived from action events.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_actions: u64,
    pub actions_by_kind: BTreeMap<String, u64>,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub layers_used: BTreeMap<String, u64>,
    /// Successful attempts / total attempts; 1.0 for a run without
    /// actions.
    pub success_rate: f64,
}

impl TraceReplay {
    /// Load a run log. Malformed lines are counted and skipped; only an
    /// unreadable file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut events = Vec::new();
        let mut skipped = 0usize;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) => events.push(value),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!(
                path = %path.as_ref().display(),
                skipped,
                "Skipped malformed trace lines",
            );
        }

        Ok(Self { events, skipped })
    }

    /// Summarize the run's action events.
    pub fn summary(&self) -> RunSummary {
        let mut total = 0u64;
        let mut successes = 0u64;
        let mut actions_by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut failures_by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut layers_used: BTreeMap<String, u64> = BTreeMap::new();

        for event in &self.events {
            if event.get("type").and_then(|t| t.as_str()) != Some("action") {
                continue;
            }
            total += 1;
            if event.get("success").and_then(|s| s.as_bool()) == Some(true) {
                successes += 1;
            }
            if let Some(kind) = event.get("action").and_then(|a| a.as_str()) {
                *actions_by_kind.entry(kind.to_string()).or_default() += 1;
            }
            if let Some(fail) = event.get("fail_type").and_then(|f| f.as_str()) {
                *failures_by_kind.entry(fail.to_string()).or_default() += 1;
            }
            if let Some(layer) = event.get("layer").and_then(|l| l.as_str()) {
                *layers_used.entry(layer.to_string()).or_default() += 1;
            }
        }

        RunSummary {
            total_actions: total,
            actions_by_kind,
            failures_by_kind,
            layers_used,
            success_rate: if total == 0 {
                1.0
            } else {
                successes as f64 / total as f64
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
