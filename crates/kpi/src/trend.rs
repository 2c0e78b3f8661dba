//! Trend anomaly detection over the KPI history series.
//!
//! Two independent detectors inspect the latest point of each monitored
//! metric against its trailing history:
//! - **quantile**: the latest value lies above the 98th percentile of
//!   the trailing window (must-not-rise metrics) or below the 2nd
//!   (must-not-fall metrics); silent until enough history exists;
//! - **EWMA**: an exponentially weighted mean plus rolling standard
//!   deviation; |z| > 3 is a warning, |z| > 4 escalates to critical.

use serde::Serialize;

use crate::aggregate::KpiSummary;
use crate::history::KpiHistoryRecord;

// ---------------------------------------------------------------------------
// Detector constants
// ---------------------------------------------------------------------------

/// Trailing points required before the quantile detector speaks.
pub const QUANTILE_MIN_HISTORY: usize = 10;
/// Upper trailing-window percentile for must-not-rise metrics.
pub const UPPER_PERCENTILE: u64 = 98;
/// Lower trailing-window percentile for must-not-fall metrics.
pub const LOWER_PERCENTILE: u64 = 2;

/// Trailing points required before the EWMA detector speaks.
pub const EWMA_MIN_HISTORY: usize = 5;
/// Smoothing factor for the trend mean and variance.
pub const TREND_EWMA_ALPHA: f64 = 0.2;
/// |z| past this is a warning.
pub const Z_WARNING: f64 = 3.0;
/// |z| past this escalates to critical.
pub const Z_CRITICAL: f64 = 4.0;

// ---------------------------------------------------------------------------
// Monitored metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    MustNotRise,
    MustNotFall,
}

struct MonitoredMetric {
    name: &'static str,
    direction: Direction,
    extract: fn(&KpiSummary) -> f64,
}

/// Every metric the detectors watch, with its direction of harm.
const MONITORED_METRICS: &[MonitoredMetric] = &[
    MonitoredMetric {
        name: "pixel_rate",
        direction: Direction::MustNotRise,
        extract: |s| s.actions.pixel_rate,
    },
    MonitoredMetric {
        name: "misclick_rate",
        direction: Direction::MustNotRise,
        extract: |s| s.actions.misclick_rate,
    },
    MonitoredMetric {
        name: "wrong_state_rate",
        direction: Direction::MustNotRise,
        extract: |s| s.actions.wrong_state_rate,
    },
    MonitoredMetric {
        name: "cb_fire_rate",
        direction: Direction::MustNotRise,
        extract: |s| s.actions.cb_fire_rate,
    },
    MonitoredMetric {
        name: "hitl_rate",
        direction: Direction::MustNotRise,
        extract: |s| s.actions.hitl_rate,
    },
    MonitoredMetric {
        name: "tasks.success_rate",
        direction: Direction::MustNotFall,
        extract: |s| s.tasks.success_rate,
    },
    MonitoredMetric {
        name: "steps.success_rate",
        direction: Direction::MustNotFall,
        extract: |s| s.steps.success_rate,
    },
    MonitoredMetric {
        name: "actions.success_rate",
        direction: Direction::MustNotFall,
        extract: |s| s.actions.base.success_rate,
    },
];

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Severity of a trend anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Which detector fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Detector {
    Quantile,
    Ewma,
}

/// One anomalous latest point.
#[derive(Debug, Clone, Serialize)]
pub struct TrendAlert {
    pub metric: String,
    pub detector: Detector,
    pub level: AlertLevel,
    pub observed: f64,
    /// Quantile bound or EWMA mean the observation was compared to.
    pub reference: f64,
}

impl std::fmt::Display for TrendAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:?}/{:?}] {}: observed {:.4} vs reference {:.4}",
            self.level, self.detector, self.metric, self.observed, self.reference
        )
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Run both detectors over every monitored metric. The last history
/// record is the point under test; everything before it is the trailing
/// window.
pub fn detect_trends(history: &[KpiHistoryRecord]) -> Vec<TrendAlert> {
    let mut alerts = Vec::new();
    if history.len() < 2 {
        return alerts;
    }

    for metric in MONITORED_METRICS {
        let series: Vec<f64> = history.iter().map(|r| (metric.extract)(&r.summary)).collect();
        let (trailing, latest) = series.split_at(series.len() - 1);
        let latest = latest[0];

        if let Some(alert) = quantile_alert(metric, trailing, latest) {
            alerts.push(alert);
        }
        if let Some(alert) = ewma_alert(metric, trailing, latest) {
            alerts.push(alert);
        }
    }
    alerts
}

fn quantile_alert(metric: &MonitoredMetric, trailing: &[f64], latest: f64) -> Option<TrendAlert> {
    if trailing.len() < QUANTILE_MIN_HISTORY {
        return None;
    }
    let mut sorted = trailing.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let (bound, fired) = match metric.direction {
        Direction::MustNotRise => {
            let bound = nearest_rank(&sorted, UPPER_PERCENTILE);
            (bound, latest > bound)
        }
        Direction::MustNotFall => {
            let bound = nearest_rank(&sorted, LOWER_PERCENTILE);
            (bound, latest < bound)
        }
    };
    fired.then(|| TrendAlert {
        metric: metric.name.to_string(),
        detector: Detector::Quantile,
        level: AlertLevel::Warning,
        observed: latest,
        reference: bound,
    })
}

fn ewma_alert(metric: &MonitoredMetric, trailing: &[f64], latest: f64) -> Option<TrendAlert> {
    if trailing.len() < EWMA_MIN_HISTORY {
        return None;
    }

    // Exponentially weighted mean plus incrementally updated variance.
    let mut mean = trailing[0];
    let mut variance = 0.0;
    for &x in &trailing[1..] {
        let diff = x - mean;
        let incr = TREND_EWMA_ALPHA * diff;
        mean += incr;
        variance = (1.0 - TREND_EWMA_ALPHA) * (variance + diff * incr);
    }

    let deviation = latest - mean;
    if deviation.abs() < 1e-12 {
        return None;
    }
    let std = variance.sqrt().max(1e-9);
    let z = deviation / std;

    let level = if z.abs() > Z_CRITICAL {
        AlertLevel::Critical
    } else if z.abs() > Z_WARNING {
        AlertLevel::Warning
    } else {
        return None;
    };
    Some(TrendAlert {
        metric: metric.name.to_string(),
        detector: Detector::Ewma,
        level,
        observed: latest,
        reference: mean,
    })
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn nearest_rank(sorted: &[f64], percentile: u64) -> f64 {
    let rank = (percentile as usize * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
