//! Execution backend capability boundary.
//!
//! Concrete backends (browser DOM control, OS UI automation, pixel
//! fallback) live outside this crate. The engine only depends on the
//! [`Executor`] trait: perform one action kind with parameters, or raise
//! a typed error.

use async_trait::async_trait;

use crate::condition::CheckContext;
use crate::types::Params;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type raised by a concrete execution backend.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The target element could not be located by the backend.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The backend does not implement the requested action kind.
    #[error("Action not supported: {0}")]
    ActionNotSupported(String),

    /// Any other backend-specific failure.
    #[error("Execution failed: {0}")]
    Exec(String),
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// One interchangeable execution backend.
///
/// Implementations are injected by the caller; the engine never
/// constructs one itself.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Perform `action_kind` with `params` against live UI state.
    async fn execute(
        &self,
        ctx: &CheckContext,
        action_kind: &str,
        params: &Params,
    ) -> Result<(), ExecError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_error_display_element_not_found() {
        let err = ExecError::ElementNotFound("#submit".to_string());
        assert_eq!(err.to_string(), "Element not found: #submit");
    }

    #[test]
    fn exec_error_display_not_supported() {
        let err = ExecError::ActionNotSupported("hover".to_string());
        assert_eq!(err.to_string(), "Action not supported: hover");
    }

    #[test]
    fn exec_error_display_generic() {
        let err = ExecError::Exec("ECONNRESET while dispatching".to_string());
        assert!(err.to_string().contains("ECONNRESET"));
    }
}
