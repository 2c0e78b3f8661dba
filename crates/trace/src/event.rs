//! Trace record shapes.
//!
//! One [`TraceEvent`] per line in a run's log file. The envelope stamps
//! `ts`, `run_id`, and a strictly increasing `step`; the payload carries
//! event-specific fields under a `type` tag. Consumers must tolerate
//! unknown fields, so readers work on raw JSON values rather than these
//! structs (see `replay`).

use serde::{Deserialize, Serialize};

use axle_core::types::{Params, Timestamp};
use axle_core::ConditionProbe;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One append-only log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: Timestamp,
    pub run_id: String,
    /// Monotonic per-run counter, strictly increasing by 1.
    pub step: u64,
    #[serde(flatten)]
    pub payload: TracePayload,
}

/// Event-specific payload, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TracePayload {
    Action(ActionEvent),
    Screenshot(ScreenshotEvent),
    State(StateEvent),
    Decision(DecisionEvent),
    Error(ErrorEvent),
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Outcome of one runner attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    pub action: String,
    pub screen_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_message: Option<String>,
    pub elapsed_ms: u64,
    /// Retry index of this attempt (0 = first try).
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshot: Vec<ConditionProbe>,
}

/// Reference to an externally stored screenshot. Only the content hash
/// and path are logged; bytes never enter the trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotEvent {
    pub screen_key: String,
    pub sha256: String,
    pub path: String,
}

/// A state observation supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub screen_key: String,
    pub state: serde_json::Value,
}

/// A decision made by the control plane (routing choice, breaker skip).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// A free-form error observation outside the runner's attempt loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
