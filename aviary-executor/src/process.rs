//! Process lifecycle manager.
//!
//! Spawns hypervisor processes and controls their shutdown through an
//! escalation ladder: cooperative power-down over the monitor channel,
//! then the platform strategy's graceful primitive, then forced
//! termination. The manager is strategy-agnostic; the concrete
//! [`TerminationStrategy`] is chosen once at construction.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::qemu::LaunchSpec;
use crate::strategy::{platform_strategy, TerminationStrategy};
use crate::{ExecutorError, MonitorClient};

/// Poll interval while waiting for a process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Channel timeout for the cooperative power-down command.
const POWERDOWN_CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// A handle to a spawned hypervisor process.
///
/// Dropping the handle does NOT terminate the VM; the guest is expected
/// to outlive any single control-process operation. Call
/// [`ProcessManager::stop`] or [`ProcessManager::kill`] explicitly.
#[derive(Debug)]
pub struct ProcessHandle {
    /// OS process id.
    pub pid: u32,

    /// Monitor control-channel address, when the launch wired one up.
    pub monitor_addr: Option<String>,

    /// Disk image owned by this process.
    pub disk_path: PathBuf,

    /// Timestamp when the process was spawned.
    pub started_at: DateTime<Utc>,

    /// Child reference kept for reaping; absent for re-attached handles.
    child: Option<tokio::process::Child>,
}

impl ProcessHandle {
    /// Wrap an already-spawned child.
    #[must_use]
    pub fn new(
        pid: u32,
        monitor_addr: Option<String>,
        disk_path: PathBuf,
        child: Option<tokio::process::Child>,
    ) -> Self {
        Self { pid, monitor_addr, disk_path, started_at: Utc::now(), child }
    }

    /// Reap the child if it has already exited, so no zombie lingers.
    fn reap(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                self.child = None;
            }
        }
    }
}

/// Options for [`ProcessManager::stop`].
#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    /// Attempt cooperative and graceful shutdown before forcing.
    pub graceful: bool,

    /// How long to wait for the process to exit at each ladder rung.
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self { graceful: true, timeout: Duration::from_secs(30) }
    }
}

/// Platform-agnostic hypervisor process control.
pub struct ProcessManager {
    strategy: Box<dyn TerminationStrategy>,
    monitor: MonitorClient,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    /// Create a manager with the host OS's termination strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_strategy(platform_strategy())
    }

    /// Create a manager with an explicit strategy (used by tests).
    #[must_use]
    pub fn with_strategy(strategy: Box<dyn TerminationStrategy>) -> Self {
        Self { strategy, monitor: MonitorClient::new() }
    }

    /// Spawn the hypervisor described by `spec`.
    ///
    /// At most one live hypervisor process may own a disk image; a scan
    /// of the process table enforces this before spawning.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BinaryNotFound`] when the binary is
    /// missing, [`ExecutorError::DiskBusy`] when the disk already has a
    /// live owner, and [`ExecutorError::SpawnFailed`] on exec failure.
    pub async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle, ExecutorError> {
        which_binary(&spec.binary)?;

        let disk_str = spec.disk_path.display().to_string();
        if let Some(owner) = crate::scan::processes_matching(&disk_str).first() {
            return Err(ExecutorError::DiskBusy {
                disk: spec.disk_path.clone(),
                pid: owner.pid,
            });
        }

        let mut command = spec.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let child = command
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(format!(
                "exec {}: {e}",
                spec.binary.display()
            )))?;

        let Some(pid) = child.id() else {
            return Err(ExecutorError::SpawnFailed(format!(
                "{} exited before a pid could be observed",
                spec.binary.display()
            )));
        };

        tracing::info!(
            pid,
            disk = %spec.disk_path.display(),
            monitor = spec.monitor_port,
            "hypervisor spawned"
        );

        Ok(ProcessHandle::new(
            pid,
            Some(spec.monitor_addr()),
            spec.disk_path.clone(),
            Some(child),
        ))
    }

    /// Liveness of the handle's process.
    pub async fn is_running(&self, handle: &ProcessHandle) -> bool {
        self.strategy.is_running(handle.pid).await
    }

    /// Stop the process, escalating as needed.
    ///
    /// Ladder: monitor `system_powerdown` → strategy graceful → strategy
    /// forced, polling for exit between rungs. Stopping an
    /// already-stopped handle returns immediately with no error.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ProcessControl`] only when the forced
    /// rung fails against a process that still exists.
    pub async fn stop(
        &self,
        handle: &mut ProcessHandle,
        options: StopOptions,
    ) -> Result<(), ExecutorError> {
        if !self.strategy.is_running(handle.pid).await {
            handle.reap();
            return Ok(());
        }

        if options.graceful {
            if let Some(addr) = handle.monitor_addr.clone() {
                match self
                    .monitor
                    .send(&addr, "system_powerdown", POWERDOWN_CHANNEL_TIMEOUT)
                    .await
                {
                    Ok(_) => {
                        tracing::debug!(pid = handle.pid, "power-down requested via monitor");
                        if self.wait_for_exit(handle.pid, options.timeout).await {
                            handle.reap();
                            return Ok(());
                        }
                    }
                    // Channel failure is inconclusive; fall through to
                    // the strategy primitives.
                    Err(e) => {
                        tracing::debug!(pid = handle.pid, error = %e, "monitor power-down failed");
                    }
                }
            }

            match self.strategy.terminate_graceful(handle.pid).await {
                Ok(()) => {
                    tracing::debug!(pid = handle.pid, "graceful termination requested");
                    if self.wait_for_exit(handle.pid, options.timeout).await {
                        handle.reap();
                        return Ok(());
                    }
                }
                // A failed graceful rung is not final; only the forced
                // rung below decides the outcome.
                Err(e) => {
                    tracing::warn!(pid = handle.pid, error = %e, "graceful termination failed");
                }
            }
        }

        tracing::warn!(pid = handle.pid, "escalating to forced termination");
        self.strategy.terminate_forced(handle.pid).await?;
        self.wait_for_exit(handle.pid, options.timeout).await;
        handle.reap();
        Ok(())
    }

    /// Forced termination only, skipping the cooperative rungs.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ProcessControl`] on delivery failure to a
    /// live process; an absent process is success.
    pub async fn kill(&self, handle: &mut ProcessHandle) -> Result<(), ExecutorError> {
        self.strategy.terminate_forced(handle.pid).await?;
        self.wait_for_exit(handle.pid, Duration::from_secs(5)).await;
        handle.reap();
        Ok(())
    }

    /// Poll `is_running` at [`EXIT_POLL_INTERVAL`] until the process
    /// exits or `timeout` elapses. Returns `true` if it exited.
    async fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.strategy.is_running(pid).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

/// Verify a binary exists at the given path or somewhere on PATH.
fn which_binary(path: &Path) -> Result<(), ExecutorError> {
    if path.is_absolute() {
        if path.exists() {
            return Ok(());
        }
        return Err(ExecutorError::BinaryNotFound { path: path.to_owned() });
    }

    let found = std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(path).exists())
        })
        .unwrap_or(false);

    if found {
        Ok(())
    } else {
        Err(ExecutorError::BinaryNotFound { path: path.to_owned() })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;

    /// Strategy whose graceful rung always fails against a process that
    /// stays alive until force-terminated.
    struct StubbornProcessStrategy {
        alive: Arc<AtomicBool>,
        forced: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TerminationStrategy for StubbornProcessStrategy {
        async fn terminate_graceful(&self, pid: u32) -> Result<(), ExecutorError> {
            Err(ExecutorError::ProcessControl { pid, reason: "EPERM".to_owned() })
        }

        async fn terminate_forced(&self, _pid: u32) -> Result<(), ExecutorError> {
            self.forced.store(true, Ordering::SeqCst);
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_running(&self, _pid: u32) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    /// Spawn a short-lived real child for handle-level tests.
    async fn sleeping_handle(secs: u32) -> ProcessHandle {
        let child = match tokio::process::Command::new("sleep")
            .arg(secs.to_string())
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => panic!("failed to spawn sleep: {e}"),
        };
        let Some(pid) = child.id() else { panic!("sleep child must have a pid") };
        ProcessHandle::new(pid, None, PathBuf::from("/tmp/none"), Some(child))
    }

    #[test]
    fn which_binary_finds_path_entries() {
        assert!(which_binary(Path::new("sleep")).is_ok(), "sleep must be on PATH");
        assert!(
            matches!(
                which_binary(Path::new("aviary-no-such-binary-91c")),
                Err(ExecutorError::BinaryNotFound { .. })
            ),
            "a missing binary must be a BinaryNotFound precondition failure"
        );
    }

    #[tokio::test]
    async fn stop_terminates_live_process() {
        let manager = ProcessManager::new();
        let mut handle = sleeping_handle(30).await;
        assert!(manager.is_running(&handle).await, "child must be alive before stop");

        let options = StopOptions { graceful: true, timeout: Duration::from_secs(5) };
        let result = manager.stop(&mut handle, options).await;
        assert!(result.is_ok(), "stop must succeed: {result:?}");
        assert!(!manager.is_running(&handle).await, "child must be gone after stop");
    }

    #[tokio::test]
    async fn stop_is_idempotent_on_dead_handle() {
        let manager = ProcessManager::new();
        let mut handle = sleeping_handle(30).await;
        let options = StopOptions { graceful: true, timeout: Duration::from_secs(5) };
        manager.stop(&mut handle, options).await.ok();

        let second = manager.stop(&mut handle, options).await;
        assert!(second.is_ok(), "second stop must return success without side effects");
    }

    #[tokio::test]
    async fn stop_escalates_to_forced_when_graceful_rung_fails() {
        let alive = Arc::new(AtomicBool::new(true));
        let forced = Arc::new(AtomicBool::new(false));
        let manager = ProcessManager::with_strategy(Box::new(StubbornProcessStrategy {
            alive: Arc::clone(&alive),
            forced: Arc::clone(&forced),
        }));

        let mut handle = ProcessHandle::new(4242, None, PathBuf::from("/tmp/none"), None);
        let options = StopOptions { graceful: true, timeout: Duration::from_secs(2) };
        let result = manager.stop(&mut handle, options).await;

        assert!(
            result.is_ok(),
            "a failed graceful primitive must not abort the ladder: {result:?}"
        );
        assert!(
            forced.load(Ordering::SeqCst),
            "the forced rung must run after the graceful rung fails"
        );
    }

    #[tokio::test]
    async fn kill_succeeds_for_absent_process() {
        let manager = ProcessManager::new();
        let mut handle = ProcessHandle::new(0x3FFF_FFF0, None, PathBuf::from("/tmp/none"), None);
        assert!(
            manager.kill(&mut handle).await.is_ok(),
            "killing a process that never existed must be success"
        );
    }

    #[tokio::test]
    async fn start_rejects_missing_binary() {
        let manager = ProcessManager::new();
        let spec = LaunchSpec {
            binary: PathBuf::from("aviary-no-such-hypervisor"),
            disk_path: PathBuf::from("/tmp/disk.img"),
            install_image: None,
            memory_mb: 1024,
            vcpu_count: 1,
            boot_order: crate::BootOrder::Disk,
            display: crate::DisplayMode::Headless,
            monitor_port: 45001,
            debug_bridge_port: 5555,
            hold_on_halt: false,
        };
        let result = manager.start(&spec).await;
        assert!(
            matches!(result, Err(ExecutorError::BinaryNotFound { .. })),
            "spawn must fail fast when the hypervisor binary is absent"
        );
    }
}
