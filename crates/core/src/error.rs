use crate::executor::ExecError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Locator resolution failed: {0}")]
    Resolution(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Internal error: {0}")]
    Internal(String),
}
