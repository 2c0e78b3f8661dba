//! Action contract and runner.
//!
//! An [`Action`] is an immutable intent to perform one UI operation,
//! bracketed by explicit pre- and postconditions. [`Runner::run`]
//! executes it against a supplied [`Executor`]: preconditions are checked
//! in order, the backend is invoked, postconditions are polled until they
//! all hold simultaneously, and failures are retried with linear backoff.
//! Every attempt (success or failure) is reported to the attached
//! [`AttemptSink`], and nothing escapes the runner as an error: the
//! outcome is always a structured [`ActionResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::condition::{CheckContext, Condition, ConditionProbe};
use crate::executor::Executor;
use crate::failure::{classify, FailureKind};
use crate::router::Layer;
use crate::types::Params;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Linear backoff unit: sleep `BACKOFF_STEP x attempt_number` between
/// attempts.
pub const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Default postcondition timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default postcondition poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// An immutable intent to perform one operation. Built once per attempt
/// series by the caller; never mutated after construction.
pub struct Action {
    pub kind: String,
    pub params: Params,
    pub description: String,
    pub preconditions: Vec<Box<dyn Condition>>,
    pub postconditions: Vec<Box<dyn Condition>>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            description: kind.clone(),
            kind,
            params: Params::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_precondition(mut self, cond: Box<dyn Condition>) -> Self {
        self.preconditions.push(cond);
        self
    }

    pub fn with_postcondition(mut self, cond: Box<dyn Condition>) -> Self {
        self.postconditions.push(cond);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

// ---------------------------------------------------------------------------
// Result shapes
// ---------------------------------------------------------------------------

/// Outcome of running one [`Action`]. Read-only after creation.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    /// Total wall time across all attempts.
    pub elapsed: Duration,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    /// Retries actually performed; always `<= max_retries`.
    pub retry_count: u32,
    /// Condition snapshot from the final attempt, for offline
    /// classification.
    pub snapshot: Vec<ConditionProbe>,
}

/// One attempt as reported to the [`AttemptSink`].
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub action_kind: String,
    pub description: String,
    pub params: Params,
    pub screen_key: String,
    pub layer: Option<Layer>,
    pub locator: Option<String>,
    /// Retry index of this attempt (0 = first try).
    pub attempt: u32,
    pub success: bool,
    pub fail_kind: Option<FailureKind>,
    pub fail_message: Option<String>,
    pub elapsed_ms: u64,
    pub snapshot: Vec<ConditionProbe>,
}

/// Receives every attempt outcome. The trace writer implements this; a
/// runner without a sink simply runs silently.
pub trait AttemptSink: Send + Sync {
    fn record_attempt(&self, record: &AttemptRecord);
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Outcome of a single attempt, before retry bookkeeping.
enum AttemptOutcome {
    Success(Vec<ConditionProbe>),
    Failure {
        kind: FailureKind,
        message: String,
        snapshot: Vec<ConditionProbe>,
    },
}

/// Executes actions with retry, condition checking, and trace emission.
pub struct Runner {
    sink: Option<Arc<dyn AttemptSink>>,
    cancel: Option<CancellationToken>,
    layer: Option<Layer>,
    locator: Option<String>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            sink: None,
            cancel: None,
            layer: None,
            locator: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AttemptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Caller-driven cancellation. A cancelled runner stops retrying and
    /// returns the failure it has; it never panics or errors.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attach routing metadata so attempt records carry the chosen layer
    /// and resolved locator.
    pub fn with_route(mut self, layer: Layer, locator: impl Into<String>) -> Self {
        self.layer = Some(layer);
        self.locator = Some(locator.into());
        self
    }

    /// Run `action` against `executor`, retrying up to `max_retries`
    /// extra attempts with linear backoff.
    pub async fn run(
        &self,
        action: &Action,
        executor: &dyn Executor,
        ctx: &CheckContext,
        max_retries: u32,
    ) -> ActionResult {
        let run_start = Instant::now();
        let mut last_kind = FailureKind::Unknown;
        let mut last_message = String::new();
        let mut last_snapshot = Vec::new();

        for attempt in 0..=max_retries {
            let attempt_start = Instant::now();
            let outcome = self.attempt_once(action, executor, ctx).await;
            let attempt_elapsed = attempt_start.elapsed();

            match outcome {
                AttemptOutcome::Success(snapshot) => {
                    self.emit(action, ctx, attempt, true, None, None, attempt_elapsed, &snapshot);
                    return ActionResult {
                        success: true,
                        elapsed: run_start.elapsed(),
                        failure: None,
                        message: None,
                        retry_count: attempt,
                        snapshot,
                    };
                }
                AttemptOutcome::Failure {
                    kind,
                    message,
                    snapshot,
                } => {
                    self.emit(
                        action,
                        ctx,
                        attempt,
                        false,
                        Some(kind),
                        Some(&message),
                        attempt_elapsed,
                        &snapshot,
                    );
                    tracing::warn!(
                        action = %action.kind,
                        attempt,
                        kind = kind.as_str(),
                        message = %message,
                        "Action attempt failed",
                    );
                    last_kind = kind;
                    last_message = message;
                    last_snapshot = snapshot;
                }
            }

            // Linear backoff before the next attempt; a cancelled token
            // ends the retry series immediately.
            if attempt < max_retries {
                let backoff = BACKOFF_STEP * (attempt + 1);
                if !self.sleep(backoff).await {
                    return ActionResult {
                        success: false,
                        elapsed: run_start.elapsed(),
                        failure: Some(last_kind),
                        message: Some(last_message),
                        retry_count: attempt,
                        snapshot: last_snapshot,
                    };
                }
            }
        }

        ActionResult {
            success: false,
            elapsed: run_start.elapsed(),
            failure: Some(last_kind),
            message: Some(last_message),
            retry_count: max_retries,
            snapshot: last_snapshot,
        }
    }

    /// One attempt: preconditions, execution, postcondition polling.
    async fn attempt_once(
        &self,
        action: &Action,
        executor: &dyn Executor,
        ctx: &CheckContext,
    ) -> AttemptOutcome {
        // Preconditions, in order. The first failure aborts the attempt
        // before the executor is ever invoked.
        let mut pre_probes = Vec::with_capacity(action.preconditions.len());
        for cond in &action.preconditions {
            let probe = cond.probe(ctx);
            let ok = probe.ok;
            pre_probes.push(probe);
            if !ok {
                return AttemptOutcome::Failure {
                    kind: FailureKind::Precondition,
                    message: format!("precondition {} did not hold", cond.name()),
                    snapshot: pre_probes,
                };
            }
        }

        if let Err(e) = executor.execute(ctx, &action.kind, &action.params).await {
            let text = e.to_string();
            // Executor exceptions are UNKNOWN unless a context signal or
            // text pattern reclassifies them.
            let kind = classify(&ctx.signals, Some(&text), &[]);
            return AttemptOutcome::Failure {
                kind,
                message: text,
                snapshot: Vec::new(),
            };
        }

        if action.postconditions.is_empty() {
            return AttemptOutcome::Success(Vec::new());
        }

        // Poll until every postcondition holds simultaneously.
        let deadline = Instant::now() + action.timeout;
        loop {
            let probes: Vec<ConditionProbe> = action
                .postconditions
                .iter()
                .map(|c| c.probe(ctx))
                .collect();
            if probes.iter().all(|p| p.ok) {
                return AttemptOutcome::Success(probes);
            }
            if Instant::now() >= deadline {
                let failed: Vec<&str> = probes
                    .iter()
                    .filter(|p| !p.ok)
                    .map(|p| p.name.as_str())
                    .collect();
                return AttemptOutcome::Failure {
                    kind: FailureKind::PostconditionTimeout,
                    message: format!(
                        "postconditions not met within {:?}: {}",
                        action.timeout,
                        failed.join(", ")
                    ),
                    snapshot: probes,
                };
            }
            if !self.sleep(action.poll_interval).await {
                return AttemptOutcome::Failure {
                    kind: FailureKind::PostconditionTimeout,
                    message: "cancelled before postconditions held".to_string(),
                    snapshot: probes,
                };
            }
        }
    }

    /// Sleep for `duration`, honoring cancellation. Returns `false` when
    /// cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        match &self.cancel {
            None => {
                tokio::time::sleep(duration).await;
                true
            }
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(duration) => true,
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        action: &Action,
        ctx: &CheckContext,
        attempt: u32,
        success: bool,
        fail_kind: Option<FailureKind>,
        fail_message: Option<&str>,
        elapsed: Duration,
        snapshot: &[ConditionProbe],
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        sink.record_attempt(&AttemptRecord {
            action_kind: action.kind.clone(),
            description: action.description.clone(),
            params: action.params.clone(),
            screen_key: ctx.screen_key.clone(),
            layer: self.layer,
            locator: self.locator.clone(),
            attempt,
            success,
            fail_kind,
            fail_message: fail_message.map(str::to_string),
            elapsed_ms: elapsed.as_millis() as u64,
            snapshot: snapshot.to_vec(),
        });
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
