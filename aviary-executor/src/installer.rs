//! Unattended OS installer.
//!
//! Drives a fixed installation wizard blindly: the hypervisor boots the
//! installer image headless, and synthetic key events are injected over
//! the monitor channel at fixed offsets in time. There is no visual
//! feedback and no per-step verification — the script is a strictly
//! ordered (key, delay) table, and success is judged afterwards by a
//! disk-growth heuristic. The fixed timing is a known fragility of this
//! design, preserved deliberately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aviary_core::InstallationResult;

use crate::control::ProcessControl;
use crate::process::ProcessHandle;
use crate::qemu::{BootOrder, DisplayMode, LaunchSpec};
use crate::{ExecutorError, MonitorClient};

/// Milestone callback: `(percentage, message)`.
pub type ProgressFn = Arc<dyn Fn(u8, &str) + Send + Sync>;

/// One scripted keystroke and the fixed wait that follows it.
#[derive(Debug, Clone)]
pub struct InstallStep {
    /// Key name in the monitor channel's native syntax.
    pub key: &'static str,

    /// Wait after injecting the key, chosen per installer phase (short
    /// for menu navigation, long for formatting/copy phases).
    pub delay: Duration,

    /// Stage label for progress reporting.
    pub label: &'static str,
}

/// Installer tuning knobs and the scripted step table.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Wait after spawn for the installer's boot menu to render.
    pub settle_delay: Duration,

    /// The ordered keystroke script.
    pub steps: Vec<InstallStep>,

    /// Minimum absolute disk size after install, in MB.
    pub min_post_install_mb: u64,

    /// Minimum disk growth over the run, in MB.
    pub min_growth_mb: u64,

    /// Hard bound on the whole run; expiry force-kills the hypervisor.
    pub global_timeout: Duration,

    /// Grace period between `quit` and forced termination.
    pub quit_grace: Duration,

    /// Per-command monitor channel timeout.
    pub monitor_timeout: Duration,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(10),
            steps: default_script(),
            min_post_install_mb: 500,
            min_growth_mb: 100,
            global_timeout: Duration::from_secs(600),
            quit_grace: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(5),
        }
    }
}

/// The wizard script for the Android-x86 installer.
///
/// Offsets are empirical: menu navigation settles in about a second,
/// formatting and system-image copy dominate the long waits.
fn default_script() -> Vec<InstallStep> {
    vec![
        InstallStep { key: "down", delay: Duration::from_secs(1), label: "menu" },
        InstallStep { key: "down", delay: Duration::from_secs(1), label: "menu" },
        InstallStep { key: "ret", delay: Duration::from_secs(15), label: "select install option" },
        InstallStep { key: "ret", delay: Duration::from_secs(5), label: "accept partition layout" },
        InstallStep { key: "ret", delay: Duration::from_secs(90), label: "confirm formatting" },
        InstallStep { key: "ret", delay: Duration::from_secs(60), label: "install bootloader" },
        InstallStep { key: "ret", delay: Duration::from_secs(10), label: "finish" },
    ]
}

/// Inputs for one installer run.
#[derive(Clone)]
pub struct InstallRequest {
    /// Hypervisor binary.
    pub binary: PathBuf,

    /// Blank or partially-written target disk image.
    pub disk_path: PathBuf,

    /// Installation source image (attached as CD-ROM).
    pub install_source: PathBuf,

    /// Guest memory in MB.
    pub memory_mb: u32,

    /// Guest vCPU count.
    pub vcpu_count: u8,

    /// Monitor control-channel port for this run.
    pub monitor_port: u16,

    /// Debug-bridge forward port for this run.
    pub debug_bridge_port: u16,

    /// Optional milestone callback.
    pub progress: Option<ProgressFn>,
}

/// Drives one blind wizard run and verifies the outcome.
pub struct UnattendedInstaller {
    manager: Arc<dyn ProcessControl>,
    monitor: MonitorClient,
    config: InstallerConfig,
}

impl UnattendedInstaller {
    /// Create an installer with default tuning.
    #[must_use]
    pub fn new(manager: Arc<dyn ProcessControl>) -> Self {
        Self::with_config(manager, InstallerConfig::default())
    }

    /// Create an installer with explicit tuning (tests shrink the waits).
    #[must_use]
    pub fn with_config(manager: Arc<dyn ProcessControl>, config: InstallerConfig) -> Self {
        Self { manager, monitor: MonitorClient::new(), config }
    }

    /// Run the unattended installation.
    ///
    /// Preconditions fail fast before any process is spawned. Once the
    /// script has been replayed the hypervisor is asked to `quit`,
    /// force-terminated if it lingers, and the disk is re-measured.
    /// Expiry of the global timeout force-kills the hypervisor and fails
    /// the run regardless of how the disk measures.
    /// Verification failure deletes the partial disk so a retry starts
    /// clean, and is reported as data, not as an `Err`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Precondition`] for missing inputs and
    /// spawn-level errors from the process manager.
    pub async fn run(&self, request: InstallRequest) -> Result<InstallationResult, ExecutorError> {
        if !request.disk_path.exists() {
            return Err(ExecutorError::Precondition {
                what: "target disk image".to_owned(),
                path: request.disk_path.clone(),
            });
        }
        if !request.install_source.exists() {
            return Err(ExecutorError::Precondition {
                what: "installation source image".to_owned(),
                path: request.install_source.clone(),
            });
        }

        let initial_mb = disk_size_mb(&request.disk_path).await?;
        report(&request.progress, 10, "disk image confirmed");

        let spec = LaunchSpec {
            binary: request.binary.clone(),
            disk_path: request.disk_path.clone(),
            install_image: Some(request.install_source.clone()),
            memory_mb: request.memory_mb,
            vcpu_count: request.vcpu_count,
            boot_order: BootOrder::Cdrom,
            display: DisplayMode::Headless,
            monitor_port: request.monitor_port,
            debug_bridge_port: request.debug_bridge_port,
            hold_on_halt: true,
        };

        let mut handle = self.manager.start(&spec).await?;
        report(&request.progress, 20, "installer boot started");

        tracing::info!(
            disk = %request.disk_path.display(),
            source = %request.install_source.display(),
            initial_mb,
            "unattended installation started"
        );

        let timed_out = tokio::time::timeout(
            self.config.global_timeout,
            self.drive_script(&handle, &request.progress),
        )
        .await
        .is_err();

        if timed_out {
            tracing::warn!(
                disk = %request.disk_path.display(),
                timeout_s = self.config.global_timeout.as_secs(),
                "installation global timeout expired, force-killing hypervisor"
            );
            self.manager.kill(&mut handle).await?;
        } else {
            self.quit_hypervisor(&mut handle).await?;
        }

        report(&request.progress, 90, "verifying installation");
        let final_mb = disk_size_mb(&request.disk_path).await.unwrap_or(0);
        let increase_mb = final_mb.saturating_sub(initial_mb);

        // An interrupted run never verifies, whatever the disk measures:
        // the script did not finish, so the image cannot be trusted.
        let verdict = if timed_out {
            Err(format!(
                "installation timed out after {}s",
                self.config.global_timeout.as_secs()
            ))
        } else {
            verify_installation(initial_mb, final_mb, &self.config)
        };

        match verdict {
            Ok(()) => {
                report(&request.progress, 100, "installation complete");
                tracing::info!(final_mb, increase_mb, "installation verified");
                Ok(InstallationResult::succeeded(final_mb, increase_mb))
            }
            Err(reason) => {
                let message = format!(
                    "{reason} (disk {}, {initial_mb} MB -> {final_mb} MB)",
                    request.disk_path.display()
                );
                cleanup_partial_disk(&request.disk_path).await;
                report(&request.progress, 100, &message);
                tracing::warn!(final_mb, increase_mb, %message, "installation failed");
                Ok(InstallationResult::failed(final_mb, increase_mb, message))
            }
        }
    }

    /// Replay the keystroke script against the monitor channel.
    ///
    /// Channel errors on individual keys are inconclusive and logged,
    /// never fatal: a dropped key simply joins the design's accepted
    /// fragility.
    async fn drive_script(&self, handle: &ProcessHandle, progress: &Option<ProgressFn>) {
        tokio::time::sleep(self.config.settle_delay).await;

        let total = self.config.steps.len();
        for (index, step) in self.config.steps.iter().enumerate() {
            if let Some(addr) = &handle.monitor_addr {
                let command = format!("sendkey {}", step.key);
                if let Err(e) = self
                    .monitor
                    .send(addr, &command, self.config.monitor_timeout)
                    .await
                {
                    tracing::warn!(step = step.label, error = %e, "keystroke injection failed");
                }
            }
            tokio::time::sleep(step.delay).await;
            report(progress, step_percentage(index, total), step.label);
        }
    }

    /// Ask the hypervisor to quit, then force-terminate if it lingers.
    async fn quit_hypervisor(&self, handle: &mut ProcessHandle) -> Result<(), ExecutorError> {
        if let Some(addr) = handle.monitor_addr.clone() {
            if let Err(e) = self.monitor.send(&addr, "quit", self.config.monitor_timeout).await {
                tracing::debug!(error = %e, "quit command failed, will force-terminate");
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.quit_grace;
        while self.manager.is_running(handle).await {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(pid = handle.pid, "hypervisor ignored quit, force-terminating");
                return self.manager.kill(handle).await;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }
}

/// Disk-growth verification: both thresholds must hold.
///
/// # Errors
/// Returns the human-readable reason when either threshold fails.
pub fn verify_installation(
    initial_mb: u64,
    final_mb: u64,
    config: &InstallerConfig,
) -> Result<(), String> {
    if final_mb < config.min_post_install_mb {
        return Err(format!(
            "disk is {final_mb} MB, below the {} MB post-install minimum",
            config.min_post_install_mb
        ));
    }
    let growth = final_mb.saturating_sub(initial_mb);
    if growth < config.min_growth_mb {
        return Err(format!(
            "disk grew {growth} MB, below the {} MB growth minimum",
            config.min_growth_mb
        ));
    }
    Ok(())
}

/// Interpolate scripted-step progress into the 20..=80 band.
fn step_percentage(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 80;
    }
    let completed = index + 1;
    let p = 20 + (completed * 60) / total;
    u8::try_from(p.min(80)).unwrap_or(80)
}

/// Delete a partially-installed disk; an already-absent file is success.
async fn cleanup_partial_disk(disk_path: &Path) {
    match tokio::fs::remove_file(disk_path).await {
        Ok(()) => {
            tracing::info!(disk = %disk_path.display(), "partial disk removed for clean retry");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(disk = %disk_path.display(), error = %e, "failed to remove partial disk");
        }
    }
}

fn report(progress: &Option<ProgressFn>, percentage: u8, message: &str) {
    if let Some(cb) = progress {
        cb(percentage, message);
    }
}

/// File size in whole megabytes.
async fn disk_size_mb(path: &Path) -> Result<u64, ExecutorError> {
    let meta = tokio::fs::metadata(path).await?;
    Ok(meta.len() / (1024 * 1024))
}
