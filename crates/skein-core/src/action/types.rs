use uuid::Uuid;

/// Context passed to an action handler for a single invocation.
///
/// Carries identifying metadata and a cancellation token; handlers are
/// expected to observe the token cooperatively (e.g. in a `tokio::select!`
/// around any long-running I/O) so that worker shutdown can cancel
/// in-flight work.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub ref_id: String,
    pub attempt: i32,
    pub cancel: tokio_util::sync::CancellationToken,
}

/// Error returned by an action handler.
///
/// The orchestrator distinguishes retryable failures (subject to the
/// worker's retry policy) from terminal failures (the task -- and the
/// workflow -- go straight to `failed`, no retry attempted).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Terminal(String),
}

impl ActionError {
    /// The error message, regardless of retryable/terminal kind.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(m) | Self::Terminal(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
