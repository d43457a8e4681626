use thiserror::Error;

/// Error kinds recognised at component boundaries (§7). These are control-flow
/// classifications, not a catch-all wrapper — callers match on variant to decide
/// whether to retry, skip, or abort.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient I/O failure calling {component}: {message}")]
    TransientIo { component: String, message: String },

    #[error("permanent I/O failure calling {component}: {message}")]
    PermanentIo { component: String, message: String },

    #[error("failed to parse {component} reply: {message}")]
    ParseFailure { component: String, message: String },

    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("store operation failed: {0}")]
    StoreFailure(String),

    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl EngineError {
    /// TransientIO and network-class errors are candidates for `retry_transient`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientIo { .. })
    }
}
