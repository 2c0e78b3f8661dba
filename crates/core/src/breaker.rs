//! Per-resource circuit breaker.
//!
//! Tracks a CLOSED -> OPEN -> HALF_OPEN state machine per
//! (screen, action kind, locator) key and answers "is this key allowed to
//! be attempted right now?". An open circuit is a normal control-flow
//! signal, not an error; callers check [`CircuitBreaker::allow`] before
//! running an action and feed every outcome back via
//! [`CircuitBreaker::record`].
//!
//! Thresholds are per failure kind and deliberately uneven: a permission
//! prompt trips on a single occurrence with a long cool-down, while
//! transient and network failures tolerate several occurrences with a
//! short one.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::failure::FailureKind;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of lock shards. Keys hash to a shard so unrelated resources
/// never contend on the same lock.
const SHARD_COUNT: usize = 16;

/// Maximum retained history entries per key; oldest are evicted first.
pub const MAX_HISTORY: usize = 50;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Identity of a protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakerKey {
    pub screen: String,
    pub action_kind: String,
    pub locator: String,
}

impl BreakerKey {
    pub fn new(
        screen: impl Into<String>,
        action_kind: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            screen: screen.into(),
            action_kind: action_kind.into(),
            locator: locator.into(),
        }
    }
}

impl std::fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.screen, self.action_kind, self.locator)
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Breaker state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Mutable health record per key. Created lazily on the first `record`
/// call; lives for the process lifetime.
#[derive(Debug)]
struct BreakerRecord {
    state: BreakerState,
    /// While OPEN, the instant after which a single probe is allowed.
    opened_until: Option<Instant>,
    /// Bounded history of (when, kind, ok) observations.
    history: VecDeque<(Instant, FailureKind, bool)>,
    consecutive_failures: u32,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            opened_until: None,
            history: VecDeque::with_capacity(MAX_HISTORY),
            consecutive_failures: 0,
        }
    }

    fn push_history(&mut self, now: Instant, kind: FailureKind, ok: bool) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((now, kind, ok));
    }

    /// Count same-kind failures inside the trailing window.
    fn failures_in_window(&self, kind: FailureKind, now: Instant, window: Duration) -> u32 {
        self.history
            .iter()
            .filter(|(ts, k, ok)| {
                !ok && *k == kind && now.saturating_duration_since(*ts) <= window
            })
            .count() as u32
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Per-failure-kind breaker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerThreshold {
    /// Trailing window over which same-kind failures are counted.
    pub window: Duration,
    /// Same-kind failures inside the window that trip the breaker.
    pub fail_count: u32,
    /// Consecutive failures (any kind) that trip the breaker; 0 disables
    /// the consecutive rule.
    pub consecutive_fail: u32,
    /// How long the circuit stays open once tripped.
    pub open_for: Duration,
}

/// Default per-kind thresholds.
///
/// Severity differs sharply by kind: structural failures (permission,
/// stale locator) trip fast and cool down long, while passing
/// disturbances (transient, network) get generous budgets and short
/// cool-downs.
pub const DEFAULT_THRESHOLDS: &[(FailureKind, BreakerThreshold)] = &[
    (
        FailureKind::Permission,
        BreakerThreshold {
            window: Duration::from_secs(600),
            fail_count: 1,
            consecutive_fail: 1,
            open_for: Duration::from_secs(900),
        },
    ),
    (
        FailureKind::ModalDialog,
        BreakerThreshold {
            window: Duration::from_secs(300),
            fail_count: 2,
            consecutive_fail: 2,
            open_for: Duration::from_secs(300),
        },
    ),
    (
        FailureKind::LocatorStale,
        BreakerThreshold {
            window: Duration::from_secs(600),
            fail_count: 3,
            consecutive_fail: 3,
            open_for: Duration::from_secs(600),
        },
    ),
    (
        FailureKind::UiUpdate,
        BreakerThreshold {
            window: Duration::from_secs(300),
            fail_count: 3,
            consecutive_fail: 3,
            open_for: Duration::from_secs(300),
        },
    ),
    (
        FailureKind::WrongState,
        BreakerThreshold {
            window: Duration::from_secs(180),
            fail_count: 4,
            consecutive_fail: 3,
            open_for: Duration::from_secs(180),
        },
    ),
    (
        FailureKind::Misclick,
        BreakerThreshold {
            window: Duration::from_secs(120),
            fail_count: 4,
            consecutive_fail: 3,
            open_for: Duration::from_secs(120),
        },
    ),
    (
        FailureKind::Network,
        BreakerThreshold {
            window: Duration::from_secs(120),
            fail_count: 5,
            consecutive_fail: 4,
            open_for: Duration::from_secs(60),
        },
    ),
    (
        FailureKind::Transient,
        BreakerThreshold {
            window: Duration::from_secs(60),
            fail_count: 6,
            consecutive_fail: 5,
            open_for: Duration::from_secs(30),
        },
    ),
    (
        FailureKind::Precondition,
        BreakerThreshold {
            window: Duration::from_secs(120),
            fail_count: 5,
            consecutive_fail: 4,
            open_for: Duration::from_secs(60),
        },
    ),
    (
        FailureKind::PostconditionTimeout,
        BreakerThreshold {
            window: Duration::from_secs(180),
            fail_count: 4,
            consecutive_fail: 3,
            open_for: Duration::from_secs(120),
        },
    ),
    (
        FailureKind::Unknown,
        BreakerThreshold {
            window: Duration::from_secs(120),
            fail_count: 4,
            consecutive_fail: 3,
            open_for: Duration::from_secs(120),
        },
    ),
];

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Process-wide breaker service. Records live in a sharded lock table so
/// concurrent sessions touching unrelated keys never serialize.
pub struct CircuitBreaker {
    shards: Vec<Mutex<HashMap<BreakerKey, BreakerRecord>>>,
    thresholds: HashMap<FailureKind, BreakerThreshold>,
}

impl CircuitBreaker {
    /// Breaker with the default per-kind thresholds.
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_THRESHOLDS.iter().copied().collect())
    }

    /// Breaker with caller-supplied thresholds. Kinds without an entry
    /// fall back to the `Unknown` policy, which must be present.
    pub fn with_thresholds(thresholds: HashMap<FailureKind, BreakerThreshold>) -> Self {
        debug_assert!(thresholds.contains_key(&FailureKind::Unknown));
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards, thresholds }
    }

    fn shard(&self, key: &BreakerKey) -> &Mutex<HashMap<BreakerKey, BreakerRecord>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn threshold_for(&self, kind: FailureKind) -> BreakerThreshold {
        self.thresholds
            .get(&kind)
            .or_else(|| self.thresholds.get(&FailureKind::Unknown))
            .copied()
            .unwrap_or(BreakerThreshold {
                window: Duration::from_secs(120),
                fail_count: 4,
                consecutive_fail: 3,
                open_for: Duration::from_secs(120),
            })
    }

    /// Is this key allowed to be attempted right now?
    ///
    /// The only side effect is the OPEN -> HALF_OPEN flip once the
    /// cool-down expires (single-probe semantics).
    pub fn allow(&self, key: &BreakerKey) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// [`Self::allow`] with an explicit clock, for deterministic tests.
    pub fn allow_at(&self, key: &BreakerKey, now: Instant) -> bool {
        let mut shard = self.shard(key).lock().expect("breaker shard poisoned");
        let Some(record) = shard.get_mut(key) else {
            // Never recorded: closed by default.
            return true;
        };
        match record.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let expired = record.opened_until.is_none_or(|until| now >= until);
                if expired {
                    record.state = BreakerState::HalfOpen;
                    record.opened_until = None;
                    tracing::info!(key = %key, "Circuit half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Feed an attempt outcome back into the breaker.
    pub fn record(&self, key: &BreakerKey, ok: bool, kind: FailureKind) {
        self.record_at(key, ok, kind, Instant::now());
    }

    /// [`Self::record`] with an explicit clock, for deterministic tests.
    pub fn record_at(&self, key: &BreakerKey, ok: bool, kind: FailureKind, now: Instant) {
        let mut shard = self.shard(key).lock().expect("breaker shard poisoned");
        let record = shard
            .entry(key.clone())
            .or_insert_with(BreakerRecord::new);

        record.push_history(now, kind, ok);

        if ok {
            record.consecutive_failures = 0;
            if record.state == BreakerState::HalfOpen {
                record.state = BreakerState::Closed;
                record.opened_until = None;
                tracing::info!(key = %key, "Circuit closed after successful probe");
            }
            return;
        }

        record.consecutive_failures += 1;
        let threshold = self.threshold_for(kind);

        let half_open_probe_failed = record.state == BreakerState::HalfOpen;
        let consecutive_tripped = threshold.consecutive_fail > 0
            && record.consecutive_failures >= threshold.consecutive_fail;
        let window_tripped =
            record.failures_in_window(kind, now, threshold.window) >= threshold.fail_count;

        if half_open_probe_failed || consecutive_tripped || window_tripped {
            record.state = BreakerState::Open;
            record.opened_until = Some(now + threshold.open_for);
            tracing::warn!(
                key = %key,
                kind = kind.as_str(),
                consecutive = record.consecutive_failures,
                open_secs = threshold.open_for.as_secs(),
                "Circuit opened",
            );
        }
    }

    /// Current state for a key, without side effects. Keys never recorded
    /// report `Closed`.
    pub fn state(&self, key: &BreakerKey) -> BreakerState {
        let shard = self.shard(key).lock().expect("breaker shard poisoned");
        shard
            .get(key)
            .map(|r| r.state)
            .unwrap_or(BreakerState::Closed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
