//! `axle-kpi` -- offline KPI pipeline over trace logs.
//!
//! Batch-only: ingest trace files, aggregate per task/step/action,
//! gate the result against fixed thresholds, append to a history store,
//! and run quantile/EWMA anomaly detection over the series. Nothing
//! here shares state with the live execution path.

pub mod aggregate;
pub mod error;
pub mod history;
pub mod ingest;
pub mod thresholds;
pub mod trend;

pub use aggregate::{ActionSummary, KpiAggregator, KpiSummary, ScopeSummary};
pub use error::KpiError;
pub use history::{KpiHistory, KpiHistoryRecord};
pub use ingest::{load_events, IngestStats, KpiEvent, KpiEventKind};
pub use thresholds::{check_quality, BoundKind, KpiThresholds, Violation};
pub use trend::{detect_trends, AlertLevel, Detector, TrendAlert};
