//! Platform termination strategies.
//!
//! Two implementations of the same three-operation interface: POSIX
//! signal semantics (TERM then KILL) on Unix, and process-tree
//! termination via `taskkill` on Windows. The concrete strategy is
//! selected once at process start; call sites never branch on OS.

use async_trait::async_trait;

use crate::ExecutorError;

/// Three-operation termination interface.
///
/// Implementations must be `Send + Sync`; the process manager treats the
/// strategy as opaque.
#[async_trait]
pub trait TerminationStrategy: Send + Sync {
    /// Ask the process to exit politely (SIGTERM / `taskkill` without `/F`).
    ///
    /// # Errors
    /// Returns [`ExecutorError::ProcessControl`] if the request could not
    /// be delivered to a live process. "No such process" is not an error.
    async fn terminate_graceful(&self, pid: u32) -> Result<(), ExecutorError>;

    /// Force-kill the process tree (SIGKILL / `taskkill /F /T`).
    ///
    /// Must succeed when the process has already disappeared.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ProcessControl`] only for delivery
    /// failures against a live process.
    async fn terminate_forced(&self, pid: u32) -> Result<(), ExecutorError>;

    /// Non-destructive existence probe.
    ///
    /// "Process not found" is `false`; "exists but not signalable by us"
    /// is `true` — a running-but-inaccessible process still counts as
    /// running.
    async fn is_running(&self, pid: u32) -> bool;
}

/// Select the termination strategy for the host OS. Called once at
/// manager construction, never per call.
#[must_use]
pub fn platform_strategy() -> Box<dyn TerminationStrategy> {
    #[cfg(unix)]
    {
        Box::new(SignalStrategy)
    }
    #[cfg(not(unix))]
    {
        Box::new(TaskkillStrategy)
    }
}

/// POSIX signal strategy: SIGTERM for polite, SIGKILL for forced,
/// `kill(pid, 0)` for the existence probe.
#[cfg(unix)]
pub struct SignalStrategy;

#[cfg(unix)]
#[async_trait]
impl TerminationStrategy for SignalStrategy {
    async fn terminate_graceful(&self, pid: u32) -> Result<(), ExecutorError> {
        send_signal(pid, nix::sys::signal::Signal::SIGTERM)
    }

    async fn terminate_forced(&self, pid: u32) -> Result<(), ExecutorError> {
        send_signal(pid, nix::sys::signal::Signal::SIGKILL)
    }

    async fn is_running(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid_as_raw(pid)), None) {
            Ok(()) => true,
            // Exists, but we may not signal it.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(unix)]
fn pid_as_raw(pid: u32) -> i32 {
    i32::try_from(pid).unwrap_or(i32::MAX)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), ExecutorError> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid_as_raw(pid)), signal) {
        Ok(()) => Ok(()),
        // Already gone: treat as success.
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ExecutorError::ProcessControl {
            pid,
            reason: format!("{signal:?}: {e}"),
        }),
    }
}

/// Windows strategy: `taskkill /PID n /T` for polite, `taskkill /F /T`
/// for forced, process-table lookup for the existence probe.
#[cfg(not(unix))]
pub struct TaskkillStrategy;

#[cfg(not(unix))]
#[async_trait]
impl TerminationStrategy for TaskkillStrategy {
    async fn terminate_graceful(&self, pid: u32) -> Result<(), ExecutorError> {
        run_taskkill(pid, false).await
    }

    async fn terminate_forced(&self, pid: u32) -> Result<(), ExecutorError> {
        run_taskkill(pid, true).await
    }

    async fn is_running(&self, pid: u32) -> bool {
        crate::scan::pid_exists(pid)
    }
}

#[cfg(not(unix))]
async fn run_taskkill(pid: u32, force: bool) -> Result<(), ExecutorError> {
    let mut cmd = tokio::process::Command::new("taskkill");
    if force {
        cmd.arg("/F");
    }
    cmd.args(["/T", "/PID"]).arg(pid.to_string());

    let output = cmd
        .output()
        .await
        .map_err(|e| ExecutorError::ProcessControl { pid, reason: format!("taskkill: {e}") })?;

    if output.status.success() || !crate::scan::pid_exists(pid) {
        // taskkill reports an error for an already-dead PID; that is
        // success for our purposes.
        return Ok(());
    }
    Err(ExecutorError::ProcessControl {
        pid,
        reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}
