//! Error Types
//!
//! Two layers of failure exist in a run:
//!
//! - [`StepError`]: travels through continuations and is delivered to the
//!   "error" and "done" channels of a run. Cloneable because one error may be
//!   handed to several listeners.
//! - [`EngineError`]: stops the host [`Scheduler`](crate::scheduler::Scheduler).
//!   Returned from `Scheduler::run` when a run escalates an error nobody
//!   listens for, or when a finalizer fails.

use thiserror::Error;

/// An error raised by a step, or synthesized by the engine when a
/// continuation protocol is violated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("continuation was called more than {limit} times")]
    TooManyCalls { limit: usize },

    #[error("parallel callback was called more than {expected} times")]
    ParallelOverflow { expected: usize },

    #[error("group callback was called more than {expected} times")]
    GroupOverflow { expected: usize },

    #[error("step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// Creates a plain step failure from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true for errors synthesized by the engine itself.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::TooManyCalls { .. } | Self::ParallelOverflow { .. } | Self::GroupOverflow { .. }
        )
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

/// A failure that terminates the host scheduler.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("uncaught error within run: {0}")]
    Unhandled(StepError),

    #[error("finalizer failed: {0}")]
    Finalizer(StepError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
