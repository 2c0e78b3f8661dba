#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Trace I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trace serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
