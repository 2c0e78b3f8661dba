//! KPI pipeline errors.
//!
//! Only unreadable inputs and unwritable outputs are errors; malformed
//! trace lines are skipped during ingest and threshold violations are
//! reported as values, never raised.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KpiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Trace error: {0}")]
    Trace(#[from] axle_trace::TraceError),
}
