use handoff_core_types::JobId;
use thiserror::Error;

/// Fault raised by the browser driver while executing an action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("driver transport failed: {0}")]
    Transport(String),
    #[error("driver protocol error: {0}")]
    Protocol(String),
}

/// Errors emitted by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// A transition was attempted from a state that does not allow it.
    #[error("invalid job state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The human did not answer before the request window closed.
    #[error("input request timed out")]
    Timeout,

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} has no pending input request")]
    NoPendingRequest(JobId),

    /// The oracle could not produce a usable action.
    #[error("action oracle failed: {0}")]
    Oracle(String),

    #[error("job cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn oracle(message: impl Into<String>) -> Self {
        Self::Oracle(message.into())
    }

    /// Transport misuse errors leave the job untouched.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::JobNotFound(_) | Self::NoPendingRequest(_))
    }
}
