//! Shared type aliases used across the engine.

/// Timestamp type used on all persisted records.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Parameter map passed to executors alongside an action kind.
pub type Params = serde_json::Map<String, serde_json::Value>;
