//! Process-control abstraction.
//!
//! Abstracts the process lifecycle manager so orchestration logic and
//! tests can verify launch decisions (boot order, ports) without a real
//! hypervisor.

use async_trait::async_trait;

use crate::process::{ProcessHandle, ProcessManager, StopOptions};
use crate::qemu::LaunchSpec;
use crate::ExecutorError;

/// The four lifecycle operations the orchestration layer depends on.
///
/// Implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Spawn the hypervisor described by `spec`.
    ///
    /// # Errors
    /// See [`ProcessManager::start`].
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle, ExecutorError>;

    /// Stop via the escalation ladder. Idempotent on a dead handle.
    ///
    /// # Errors
    /// See [`ProcessManager::stop`].
    async fn stop(
        &self,
        handle: &mut ProcessHandle,
        options: StopOptions,
    ) -> Result<(), ExecutorError>;

    /// Forced termination only; an absent process is success.
    ///
    /// # Errors
    /// See [`ProcessManager::kill`].
    async fn kill(&self, handle: &mut ProcessHandle) -> Result<(), ExecutorError>;

    /// Liveness of the handle's process.
    async fn is_running(&self, handle: &ProcessHandle) -> bool;
}

#[async_trait]
impl ProcessControl for ProcessManager {
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle, ExecutorError> {
        ProcessManager::start(self, spec).await
    }

    async fn stop(
        &self,
        handle: &mut ProcessHandle,
        options: StopOptions,
    ) -> Result<(), ExecutorError> {
        ProcessManager::stop(self, handle, options).await
    }

    async fn kill(&self, handle: &mut ProcessHandle) -> Result<(), ExecutorError> {
        ProcessManager::kill(self, handle).await
    }

    async fn is_running(&self, handle: &ProcessHandle) -> bool {
        ProcessManager::is_running(self, handle).await
    }
}
