//! Rolling success-rate statistics for routing decisions.
//!
//! [`MetricsStore`] keeps an exponentially weighted success estimate per
//! stat key. Unseen keys are seeded optimistically and penalized with a
//! cold-start factor until enough observations exist.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// EWMA smoothing factor: weight given to the newest observation.
pub const EWMA_ALPHA: f64 = 0.25;

/// Optimistic prior for keys with no observations yet.
pub const SEED_SUCCESS_RATE: f64 = 0.80;

/// Observations required before the cold-start penalty is lifted.
pub const COLD_START_MIN_OBSERVATIONS: u32 = 5;

/// Multiplier applied to the estimate while a key is cold.
pub const COLD_START_PENALTY: f64 = 0.9;

/// Number of lock shards (mirrors the breaker's key-scoped locking).
const SHARD_COUNT: usize = 16;

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

/// Snapshot of the rolling estimate for one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessEstimate {
    /// EWMA success probability in `0.0..=1.0`.
    pub probability: f64,
    /// Number of observations recorded for the key.
    pub observations: u32,
}

impl SuccessEstimate {
    /// `true` while the key has too few observations to trust.
    pub fn is_cold(&self) -> bool {
        self.observations < COLD_START_MIN_OBSERVATIONS
    }

    /// Probability with the cold-start penalty applied when applicable.
    pub fn penalized_probability(&self) -> f64 {
        if self.is_cold() {
            self.probability * COLD_START_PENALTY
        } else {
            self.probability
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsStore
// ---------------------------------------------------------------------------

/// Process-wide EWMA success store, sharded by key hash.
pub struct MetricsStore {
    shards: Vec<Mutex<HashMap<String, (f64, u32)>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, (f64, u32)>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Fold one attempt outcome into the rolling estimate.
    pub fn record(&self, key: &str, ok: bool) {
        let mut shard = self.shard(key).lock().expect("metrics shard poisoned");
        let entry = shard
            .entry(key.to_string())
            .or_insert((SEED_SUCCESS_RATE, 0));
        let observation = if ok { 1.0 } else { 0.0 };
        entry.0 = EWMA_ALPHA * observation + (1.0 - EWMA_ALPHA) * entry.0;
        entry.1 += 1;
    }

    /// Current estimate for a key. Unseen keys report the seed rate with
    /// zero observations.
    pub fn estimate(&self, key: &str) -> SuccessEstimate {
        let shard = self.shard(key).lock().expect("metrics shard poisoned");
        let (probability, observations) = shard
            .get(key)
            .copied()
            .unwrap_or((SEED_SUCCESS_RATE, 0));
        SuccessEstimate {
            probability,
            observations,
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
