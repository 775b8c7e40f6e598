//! Instance orchestrator — the top-level façade.
//!
//! Composes the process lifecycle manager, unattended installer,
//! resource tracker and progress reporter into named-instance
//! operations. Lifecycle calls on the *same* instance must be
//! serialized by the caller; different instances proceed in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use aviary_core::{InstanceState, InstanceStatus, PortMap, ProgressEvent, ResourceProfile};
use aviary_executor::installer::{InstallRequest, ProgressFn};
use aviary_executor::{
    scan, BootOrder, DisplayMode, InstallerConfig, LaunchSpec, MonitorClient, ProcessControl,
    ProcessHandle, ProgressReporter, ResourceKind, ResourceTracker, StopOptions, TrackedResource,
    UnattendedInstaller,
};

use crate::config::OrchestratorConfig;
use crate::keys::map_logical_key;
use crate::provision::ImageProvisioner;
use crate::slots::SlotRegistry;
use crate::OrchestratorError;

/// Channel timeout for one-off input injection.
const SEND_INPUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level façade over the executor machinery.
///
/// One orchestrator owns one root directory; independent orchestrators
/// (e.g. in tests) never share state.
pub struct InstanceOrchestrator {
    config: OrchestratorConfig,
    control: Arc<dyn ProcessControl>,
    installer: Arc<UnattendedInstaller>,
    provisioner: Arc<dyn ImageProvisioner>,
    tracker: Arc<ResourceTracker>,
    reporter: Arc<ProgressReporter>,
    monitor: MonitorClient,
    slots: SlotRegistry,
    running: Arc<Mutex<HashMap<String, ProcessHandle>>>,
}

impl InstanceOrchestrator {
    /// Create an orchestrator with default installer tuning.
    ///
    /// # Errors
    /// Returns I/O errors from creating the root layout or loading the
    /// slot registry.
    pub async fn new(
        config: OrchestratorConfig,
        control: Arc<dyn ProcessControl>,
        provisioner: Arc<dyn ImageProvisioner>,
    ) -> Result<Self, OrchestratorError> {
        Self::with_installer_config(config, control, provisioner, InstallerConfig::default()).await
    }

    /// Create an orchestrator with explicit installer tuning.
    ///
    /// # Errors
    /// Returns I/O errors from creating the root layout or loading the
    /// slot registry.
    pub async fn with_installer_config(
        config: OrchestratorConfig,
        control: Arc<dyn ProcessControl>,
        provisioner: Arc<dyn ImageProvisioner>,
        installer_config: InstallerConfig,
    ) -> Result<Self, OrchestratorError> {
        tokio::fs::create_dir_all(config.instances_dir()).await?;
        tokio::fs::create_dir_all(config.images_dir()).await?;
        let slots = SlotRegistry::load(config.slots_path()).await?;
        let installer = Arc::new(UnattendedInstaller::with_config(
            Arc::clone(&control),
            installer_config,
        ));
        Ok(Self {
            config,
            control,
            installer,
            provisioner,
            tracker: Arc::new(ResourceTracker::new()),
            reporter: Arc::new(ProgressReporter::default()),
            monitor: MonitorClient::new(),
            slots,
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Subscribe to the progress event fan-out.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.reporter.subscribe()
    }

    /// The resource tracker, for registering external cleanups.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    /// Provision and start a named instance.
    ///
    /// Ensures the installer source is available, creates the instance
    /// directory and a fresh disk when missing, then delegates to
    /// [`start`](Self::start).
    ///
    /// # Errors
    /// Provisioning failure is fatal to the call; I/O and executor
    /// errors propagate.
    pub async fn create(
        &self,
        name: &str,
        profile: ResourceProfile,
    ) -> Result<(), OrchestratorError> {
        validate_name(name)?;
        self.provisioner.ensure_install_image().await?;

        tokio::fs::create_dir_all(self.config.instance_dir(name)).await?;
        let disk = self.config.disk_path(name);
        if !disk.exists() {
            self.create_disk(&disk).await?;
        }

        tracing::info!(instance = name, disk = %disk.display(), "instance provisioned");
        self.start(name, profile).await
    }

    /// Start a named instance.
    ///
    /// A blank disk routes through the unattended installer
    /// (fire-and-forget; completion is observed via the progress
    /// channel) and is relaunched in disk boot order afterwards. A disk
    /// with content boots directly.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::UnknownInstance`] when no disk
    /// exists for the name; executor errors propagate.
    pub async fn start(
        &self,
        name: &str,
        profile: ResourceProfile,
    ) -> Result<(), OrchestratorError> {
        validate_name(name)?;
        let disk = self.config.disk_path(name);
        if !disk.exists() {
            return Err(OrchestratorError::UnknownInstance { name: name.to_owned() });
        }

        {
            let mut running = self.running.lock().await;
            if let Some(handle) = running.get(name) {
                if self.control.is_running(handle).await {
                    tracing::warn!(instance = name, pid = handle.pid, "already running");
                    return Ok(());
                }
                running.remove(name);
            }
        }

        let slot = self.slots.assign(name).await?;
        let ports = PortMap::for_slot(slot, &self.config.port_layout);

        let size_mb = tokio::fs::metadata(&disk).await?.len() / (1024 * 1024);
        if size_mb < self.config.blank_disk_threshold_mb {
            tracing::info!(instance = name, size_mb, "blank disk, taking the installer path");
            self.start_install(name, profile, ports).await
        } else {
            tracing::info!(instance = name, size_mb, "disk has content, booting directly");
            self.start_direct(name, profile, ports).await
        }
    }

    /// Stop a named instance through the shutdown ladder.
    ///
    /// Succeeds when no process is currently running for the name.
    ///
    /// # Errors
    /// Propagates forced-termination failures from the executor.
    pub async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        validate_name(name)?;

        let mut handle = match self.running.lock().await.remove(name) {
            Some(handle) => handle,
            None => match self.find_detached_handle(name).await {
                Some(handle) => handle,
                None => {
                    tracing::debug!(instance = name, "stop with nothing running");
                    return Ok(());
                }
            },
        };

        let options = StopOptions { graceful: true, timeout: self.config.stop_timeout };
        self.control.stop(&mut handle, options).await?;
        tracing::info!(instance = name, "instance stopped");
        Ok(())
    }

    /// Delete a named instance: best-effort force stop, release all
    /// tracked resources, remove the directory tree, free the slot.
    ///
    /// An already-absent directory is success.
    ///
    /// # Errors
    /// Returns I/O errors other than "not found" from directory removal.
    pub async fn delete(&self, name: &str) -> Result<(), OrchestratorError> {
        validate_name(name)?;

        let existing = self.running.lock().await.remove(name);
        let detached = match existing {
            Some(handle) => Some(handle),
            None => self.find_detached_handle(name).await,
        };
        if let Some(mut handle) = detached {
            if let Err(e) = self.control.kill(&mut handle).await {
                tracing::warn!(instance = name, error = %e, "force stop during delete failed");
            }
        }

        if self.reporter.is_active(name).await {
            self.reporter.cancel(name, "instance deleted").await;
        }

        let report = self.tracker.release_all(name).await;
        if !report.success {
            tracing::warn!(instance = name, errors = ?report.errors, "partial resource cleanup");
        }

        match tokio::fs::remove_dir_all(self.config.instance_dir(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.slots.release(name).await?;

        tracing::info!(instance = name, "instance deleted");
        Ok(())
    }

    /// Reconcile configured instances against live hypervisor processes.
    ///
    /// A process belongs to an instance when its command line contains
    /// the instance's own directory path. Instances with an active
    /// install operation report as installing regardless of process
    /// state.
    ///
    /// # Errors
    /// Returns I/O errors from reading the instances directory.
    pub async fn list(&self) -> Result<Vec<InstanceState>, OrchestratorError> {
        let mut entries = match tokio::fs::read_dir(self.config.instances_dir()).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let slot = self.slots.assign(&name).await?;
            let ports = PortMap::for_slot(slot, &self.config.port_layout);
            let disk = self.config.disk_path(&name);

            let dir_needle = self.config.instance_dir(&name).display().to_string();
            let owner = scan::processes_matching(&dir_needle).into_iter().next();

            let installing =
                self.reporter.active_operation(&name).await.as_deref() == Some("install");
            let (status, pid) = if installing {
                (InstanceStatus::Installing, owner.map(|m| m.pid))
            } else if let Some(m) = owner {
                (InstanceStatus::Running, Some(m.pid))
            } else if !disk.exists() {
                (InstanceStatus::Absent, None)
            } else if disk_size_mb(&disk).await < self.config.blank_disk_threshold_mb {
                (InstanceStatus::Creating, None)
            } else {
                (InstanceStatus::Stopped, None)
            };

            out.push(InstanceState { name, status, ports, disk_path: disk, pid });
        }

        out.sort_by_key(|state| state.ports.display);
        Ok(out)
    }

    /// Inject one key press into a running instance.
    ///
    /// Logical names (UP/DOWN/LEFT/RIGHT/ENTER/BACK/HOME/MENU) map to
    /// the monitor's native syntax; anything else is forwarded verbatim.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::UnknownInstance`] for a name with no
    /// slot, and channel errors from the monitor.
    pub async fn send_input(&self, name: &str, key: &str) -> Result<(), OrchestratorError> {
        validate_name(name)?;
        let Some(slot) = self.slots.get(name).await else {
            return Err(OrchestratorError::UnknownInstance { name: name.to_owned() });
        };
        let ports = PortMap::for_slot(slot, &self.config.port_layout);
        let native = map_logical_key(key);

        self.monitor
            .send(&ports.monitor_addr(), &format!("sendkey {native}"), SEND_INPUT_TIMEOUT)
            .await
            .map_err(aviary_executor::ExecutorError::from)?;
        tracing::debug!(instance = name, key = native, "key injected");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Direct boot from the disk image.
    async fn start_direct(
        &self,
        name: &str,
        profile: ResourceProfile,
        ports: PortMap,
    ) -> Result<(), OrchestratorError> {
        let metadata = serde_json::json!({ "profile": profile.to_string() });
        self.reporter.start(name, "start", metadata).await;

        let spec = self.launch_spec(name, profile, ports, None);
        self.reporter.update(name, "booting", 50, "launching hypervisor").await;

        match self.control.start(&spec).await {
            Ok(handle) => {
                register_instance_resources(
                    &self.tracker,
                    &self.control,
                    name,
                    &self.config.disk_path(name),
                    ports,
                    handle.pid,
                )
                .await;
                self.running.lock().await.insert(name.to_owned(), handle);
                self.reporter.complete(name, true, "instance running").await;
                Ok(())
            }
            Err(e) => {
                self.reporter
                    .complete(name, false, &format!("launch failed: {e}"))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Installer path for a blank disk: fire-and-forget installation,
    /// then relaunch in disk boot order.
    async fn start_install(
        &self,
        name: &str,
        profile: ResourceProfile,
        ports: PortMap,
    ) -> Result<(), OrchestratorError> {
        let install_source = self.provisioner.ensure_install_image().await?;

        let metadata = serde_json::json!({
            "profile": profile.to_string(),
            "source": install_source.display().to_string(),
        });
        self.reporter.start(name, "install", metadata).await;

        let progress: ProgressFn = {
            let reporter = Arc::clone(&self.reporter);
            let name = name.to_owned();
            Arc::new(move |percentage, message| {
                let reporter = Arc::clone(&reporter);
                let name = name.clone();
                let message = message.to_owned();
                tokio::spawn(async move {
                    reporter.update(&name, "install", percentage, &message).await;
                });
            })
        };

        let request = InstallRequest {
            binary: self.config.binary.clone(),
            disk_path: self.config.disk_path(name),
            install_source,
            memory_mb: profile.memory_mb(),
            vcpu_count: profile.vcpu_count(),
            monitor_port: ports.monitor,
            debug_bridge_port: ports.debug_bridge,
            progress: Some(progress),
        };

        let installer = Arc::clone(&self.installer);
        let control = Arc::clone(&self.control);
        let tracker = Arc::clone(&self.tracker);
        let reporter = Arc::clone(&self.reporter);
        let running = Arc::clone(&self.running);
        let relaunch = self.launch_spec(name, profile, ports, None);
        let disk = self.config.disk_path(name);
        let name = name.to_owned();

        tokio::spawn(async move {
            match installer.run(request).await {
                Ok(result) if result.success => {
                    tracing::info!(instance = %name, "installation finished, relaunching from disk");
                    match control.start(&relaunch).await {
                        Ok(handle) => {
                            register_instance_resources(
                                &tracker, &control, &name, &disk, ports, handle.pid,
                            )
                            .await;
                            running.lock().await.insert(name.clone(), handle);
                            reporter.complete(&name, true, &result.message).await;
                        }
                        Err(e) => {
                            reporter
                                .complete(&name, false, &format!("relaunch failed: {e}"))
                                .await;
                        }
                    }
                }
                Ok(result) => {
                    reporter.complete(&name, false, &result.message).await;
                }
                Err(e) => {
                    reporter
                        .complete(&name, false, &format!("installation failed: {e}"))
                        .await;
                }
            }
        });

        Ok(())
    }

    fn launch_spec(
        &self,
        name: &str,
        profile: ResourceProfile,
        ports: PortMap,
        install_image: Option<PathBuf>,
    ) -> LaunchSpec {
        let installing = install_image.is_some();
        LaunchSpec {
            binary: self.config.binary.clone(),
            disk_path: self.config.disk_path(name),
            install_image,
            memory_mb: profile.memory_mb(),
            vcpu_count: profile.vcpu_count(),
            boot_order: if installing { BootOrder::Cdrom } else { BootOrder::Disk },
            display: DisplayMode::RemoteDisplay(ports.display),
            monitor_port: ports.monitor,
            debug_bridge_port: ports.debug_bridge,
            hold_on_halt: installing,
        }
    }

    /// Build a handle for a process found in the table but not in our
    /// running map (e.g. after a control-process restart).
    async fn find_detached_handle(&self, name: &str) -> Option<ProcessHandle> {
        let dir_needle = self.config.instance_dir(name).display().to_string();
        let owner = scan::processes_matching(&dir_needle).into_iter().next()?;
        let monitor_addr = match self.slots.get(name).await {
            Some(slot) => {
                Some(PortMap::for_slot(slot, &self.config.port_layout).monitor_addr())
            }
            None => None,
        };
        Some(ProcessHandle::new(
            owner.pid,
            monitor_addr,
            self.config.disk_path(name),
            None,
        ))
    }

    /// Create a fresh disk via the disk tool, falling back to an empty
    /// file when the tool is unavailable (the blank-disk semantics are
    /// preserved either way).
    async fn create_disk(&self, disk: &Path) -> Result<(), OrchestratorError> {
        let size = format!("{}G", self.config.fresh_disk_size_gb);
        match tokio::process::Command::new(&self.config.disk_tool)
            .args(["create", "-f", "qcow2"])
            .arg(disk)
            .arg(&size)
            .output()
            .await
        {
            Ok(out) if out.status.success() => {
                tracing::info!(disk = %disk.display(), %size, "fresh disk created");
                Ok(())
            }
            Ok(out) => Err(OrchestratorError::Io(std::io::Error::other(format!(
                "{} create failed for {}: {}",
                self.config.disk_tool.display(),
                disk.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    tool = %self.config.disk_tool.display(),
                    "disk tool unavailable, creating an empty image"
                );
                tokio::fs::write(disk, b"").await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Register the standard per-instance cleanups: the child process and
/// the port bookkeeping for the slot.
async fn register_instance_resources(
    tracker: &Arc<ResourceTracker>,
    control: &Arc<dyn ProcessControl>,
    name: &str,
    disk: &Path,
    ports: PortMap,
    pid: u32,
) {
    let kill_control = Arc::clone(control);
    let kill_disk = disk.to_owned();
    tracker
        .register(
            name,
            TrackedResource::new(ResourceKind::ChildProcess, pid.to_string(), move || async move {
                let mut handle = ProcessHandle::new(pid, None, kill_disk, None);
                kill_control.kill(&mut handle).await.map_err(|e| e.to_string())
            }),
        )
        .await;

    tracker
        .register(
            name,
            TrackedResource::new(
                ResourceKind::PortReservation,
                ports.monitor.to_string(),
                || async { Ok(()) },
            ),
        )
        .await;

    tracker
        .register(
            name,
            TrackedResource::new(
                ResourceKind::RemoteDisplaySession,
                ports.remote_display.to_string(),
                || async { Ok(()) },
            ),
        )
        .await;
}

fn validate_name(name: &str) -> Result<(), OrchestratorError> {
    if name.is_empty() {
        return Err(OrchestratorError::InvalidName {
            name: name.to_owned(),
            reason: "empty".to_owned(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(OrchestratorError::InvalidName {
            name: name.to_owned(),
            reason: "only alphanumerics, '-' and '_' are allowed".to_owned(),
        });
    }
    Ok(())
}

async fn disk_size_mb(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() / (1024 * 1024))
        .unwrap_or(0)
}
