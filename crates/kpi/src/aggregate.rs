//! KPI aggregation over normalized trace events.
//!
//! Three scopes, derived from the event stream:
//! - **actions**: one sample per runner attempt;
//! - **steps**: one sample per retry group (the attempt counter
//!   resetting to 0 starts a new step); a step succeeds when its final
//!   attempt does;
//! - **tasks**: one sample per run; a task succeeds when every step in
//!   the run does.
//!
//! `process` accumulates counts; `finalize` is a pure read over the
//! accumulated state, so calling it twice without further `process`
//! calls yields identical summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ingest::{AttemptSample, KpiEvent, KpiEventKind};

// ---------------------------------------------------------------------------
// Summary shapes
// ---------------------------------------------------------------------------

/// Counts and rates shared by all three scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub count: u64,
    /// Successes / count; 1.0 for an empty scope.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    /// Nearest-rank 50th percentile; 0 for an empty scope.
    pub p50_duration_ms: u64,
    /// Nearest-rank 90th percentile; 0 for an empty scope.
    pub p90_duration_ms: u64,
}

/// Action-scope summary: the shared block plus the must-not-rise rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    #[serde(flatten)]
    pub base: ScopeSummary,
    /// Attempts that were retries (attempt index > 0) / attempts.
    pub retry_rate: f64,
    /// Breaker refusals / attempts.
    pub cb_fire_rate: f64,
    /// Human interventions / attempts.
    pub hitl_rate: f64,
    /// Attempts executed on the pixel fallback layer / attempts.
    pub pixel_rate: f64,
    /// MISCLICK failures / attempts.
    pub misclick_rate: f64,
    /// WRONG_STATE failures / attempts.
    pub wrong_state_rate: f64,
    /// Failed attempts by failure kind tag.
    pub failures: BTreeMap<String, u64>,
}

/// The aggregated document the KPI tool emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub tasks: ScopeSummary,
    pub steps: ScopeSummary,
    pub actions: ActionSummary,
}

// ---------------------------------------------------------------------------
// Accumulators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ScopeAcc {
    count: u64,
    successes: u64,
    durations: Vec<u64>,
}

impl ScopeAcc {
    fn record(&mut self, success: bool, duration_ms: u64) {
        self.count += 1;
        if success {
            self.successes += 1;
        }
        self.durations.push(duration_ms);
    }

    fn summarize(&self) -> ScopeSummary {
        let mut sorted = self.durations.clone();
        sorted.sort_unstable();
        let total: u64 = sorted.iter().sum();
        ScopeSummary {
            count: self.count,
            success_rate: ratio(self.successes, self.count, 1.0),
            avg_duration_ms: if self.count == 0 {
                0.0
            } else {
                total as f64 / self.count as f64
            },
            p50_duration_ms: nearest_rank(&sorted, 50),
            p90_duration_ms: nearest_rank(&sorted, 90),
        }
    }
}

/// The step currently being built from consecutive attempts.
#[derive(Debug, Clone)]
struct PendingStep {
    duration_ms: u64,
    last_success: bool,
}

/// The run currently being built.
#[derive(Debug, Clone)]
struct PendingRun {
    run_id: String,
    duration_ms: u64,
    all_steps_ok: bool,
    saw_step: bool,
    step: Option<PendingStep>,
}

impl PendingRun {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            duration_ms: 0,
            all_steps_ok: true,
            saw_step: false,
            step: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Streaming accumulator over [`KpiEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct KpiAggregator {
    tasks: ScopeAcc,
    steps: ScopeAcc,
    actions: ScopeAcc,
    retried: u64,
    breaker_fires: u64,
    hitl: u64,
    pixel_attempts: u64,
    failures: BTreeMap<String, u64>,
    run: Option<PendingRun>,
}

impl KpiAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the accumulated state.
    pub fn process(&mut self, event: &KpiEvent) {
        // Runs arrive contiguously (one file at a time); a changed
        // run id without a RunEnd still closes the previous run.
        if self
            .run
            .as_ref()
            .is_some_and(|r| r.run_id != event.run_id)
        {
            self.close_run();
        }

        match &event.kind {
            KpiEventKind::Attempt(sample) => self.record_attempt(&event.run_id, sample),
            KpiEventKind::BreakerFire => self.breaker_fires += 1,
            KpiEventKind::HumanIntervention => self.hitl += 1,
            KpiEventKind::RunEnd => self.close_run(),
        }
    }

    /// Compute the summary from the accumulated state. Pure: repeated
    /// calls without intervening `process` calls return identical
    /// summaries, and in-flight runs are closed only in a local copy.
    pub fn finalize(&self) -> KpiSummary {
        let mut snapshot = self.clone();
        snapshot.close_run();

        let actions = snapshot.actions.summarize();
        let n = actions.count;
        KpiSummary {
            tasks: snapshot.tasks.summarize(),
            steps: snapshot.steps.summarize(),
            actions: ActionSummary {
                retry_rate: ratio(snapshot.retried, n, 0.0),
                cb_fire_rate: ratio(snapshot.breaker_fires, n, 0.0),
                hitl_rate: ratio(snapshot.hitl, n, 0.0),
                pixel_rate: ratio(snapshot.pixel_attempts, n, 0.0),
                misclick_rate: ratio(snapshot.failure_count("MISCLICK"), n, 0.0),
                wrong_state_rate: ratio(snapshot.failure_count("WRONG_STATE"), n, 0.0),
                failures: snapshot.failures,
                base: actions,
            },
        }
    }

    fn record_attempt(&mut self, run_id: &str, sample: &AttemptSample) {
        self.actions.record(sample.success, sample.elapsed_ms);
        if sample.attempt > 0 {
            self.retried += 1;
        }
        if sample.layer.as_deref() == Some("pixel") {
            self.pixel_attempts += 1;
        }
        if let Some(kind) = &sample.fail_type {
            *self.failures.entry(kind.clone()).or_default() += 1;
        }

        let run = self
            .run
            .get_or_insert_with(|| PendingRun::new(run_id.to_string()));
        run.duration_ms += sample.elapsed_ms;

        // attempt == 0 opens a new step; later attempts extend it.
        if sample.attempt == 0 {
            if let Some(step) = run.step.take() {
                self.steps.record(step.last_success, step.duration_ms);
                if !step.last_success {
                    run.all_steps_ok = false;
                }
            }
            run.step = Some(PendingStep {
                duration_ms: sample.elapsed_ms,
                last_success: sample.success,
            });
            run.saw_step = true;
        } else if let Some(step) = run.step.as_mut() {
            step.duration_ms += sample.elapsed_ms;
            step.last_success = sample.success;
        } else {
            // Retry record with no opening attempt (truncated log):
            // treat it as its own step rather than dropping it.
            run.step = Some(PendingStep {
                duration_ms: sample.elapsed_ms,
                last_success: sample.success,
            });
            run.saw_step = true;
        }
    }

    fn close_run(&mut self) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        if let Some(step) = run.step.take() {
            self.steps.record(step.last_success, step.duration_ms);
            if !step.last_success {
                run.all_steps_ok = false;
            }
        }
        // Runs that never attempted anything carry no task sample.
        if run.saw_step {
            self.tasks.record(run.all_steps_ok, run.duration_ms);
        }
    }

    fn failure_count(&self, tag: &str) -> u64 {
        self.failures.get(tag).copied().unwrap_or(0)
    }
}

fn ratio(numerator: u64, denominator: u64, empty: f64) -> f64 {
    if denominator == 0 {
        empty
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn nearest_rank(sorted: &[u64], percentile: u64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (percentile * sorted.len() as u64).div_ceil(100).max(1) as usize;
    sorted[rank - 1]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
