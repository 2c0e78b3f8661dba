//! Fixed quality thresholds and violation checking.
//!
//! Upper bounds cover the rates that must never rise (fallback-layer
//! usage, misclicks, wrong-state failures, breaker fires, human
//! interventions); lower bounds cover the success rates that must never
//! fall. Violations are returned as values and change only the tool's
//! exit code; nothing here raises.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::KpiSummary;

/// Fixed bounds for one quality gate run. Deserializable so an override
/// file may replace any subset of the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiThresholds {
    // Upper bounds (rate must stay at or below).
    pub max_pixel_rate: f64,
    pub max_misclick_rate: f64,
    pub max_wrong_state_rate: f64,
    pub max_cb_fire_rate: f64,
    pub max_hitl_rate: f64,
    // Lower bounds (rate must stay at or above).
    pub min_task_success_rate: f64,
    pub min_step_success_rate: f64,
    pub min_action_success_rate: f64,
}

impl Default for KpiThresholds {
    fn default() -> Self {
        Self {
            max_pixel_rate: 0.02,
            max_misclick_rate: 0.01,
            max_wrong_state_rate: 0.02,
            max_cb_fire_rate: 0.05,
            max_hitl_rate: 0.05,
            min_task_success_rate: 0.90,
            min_step_success_rate: 0.95,
            min_action_success_rate: 0.90,
        }
    }
}

/// Which side of the bound the metric crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    /// Observed value exceeded an upper bound.
    Upper,
    /// Observed value fell below a lower bound.
    Lower,
}

/// One crossed bound.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// Metric name as it appears in the summary document.
    pub metric: String,
    pub observed: f64,
    pub bound: f64,
    pub kind: BoundKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            BoundKind::Upper => write!(
                f,
                "{}: {:.4} exceeds maximum {:.4}",
                self.metric, self.observed, self.bound
            ),
            BoundKind::Lower => write!(
                f,
                "{}: {:.4} below minimum {:.4}",
                self.metric, self.observed, self.bound
            ),
        }
    }
}

/// Compare a summary against fixed bounds. Returns every crossed bound;
/// an empty list means the gate passes.
pub fn check_quality(summary: &KpiSummary, thresholds: &KpiThresholds) -> Vec<Violation> {
    let mut violations = Vec::new();
    let a = &summary.actions;

    let upper = [
        ("pixel_rate", a.pixel_rate, thresholds.max_pixel_rate),
        ("misclick_rate", a.misclick_rate, thresholds.max_misclick_rate),
        (
            "wrong_state_rate",
            a.wrong_state_rate,
            thresholds.max_wrong_state_rate,
        ),
        ("cb_fire_rate", a.cb_fire_rate, thresholds.max_cb_fire_rate),
        ("hitl_rate", a.hitl_rate, thresholds.max_hitl_rate),
    ];
    for (metric, observed, bound) in upper {
        if observed > bound {
            violations.push(Violation {
                metric: metric.to_string(),
                observed,
                bound,
                kind: BoundKind::Upper,
            });
        }
    }

    let lower = [
        (
            "tasks.success_rate",
            summary.tasks.success_rate,
            thresholds.min_task_success_rate,
        ),
        (
            "steps.success_rate",
            summary.steps.success_rate,
            thresholds.min_step_success_rate,
        ),
        (
            "actions.success_rate",
            a.base.success_rate,
            thresholds.min_action_success_rate,
        ),
    ];
    for (metric, observed, bound) in lower {
        if observed < bound {
            violations.push(Violation {
                metric: metric.to_string(),
                observed,
                bound,
                kind: BoundKind::Lower,
            });
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
