//! Error types for the orchestrator crate.

use aviary_core::CoreError;
use aviary_executor::ExecutorError;

/// Errors surfaced by instance lifecycle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// An error propagated from the executor layer.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// A domain-type validation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The installer-source provisioning collaborator failed. Fatal to
    /// the calling operation.
    #[error("installer source provisioning failed: {0}")]
    Provisioning(String),

    /// No instance with the given name is known to this orchestrator.
    #[error("unknown instance '{name}'")]
    UnknownInstance { name: String },

    /// The instance name is not usable as a directory component.
    #[error("invalid instance name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
