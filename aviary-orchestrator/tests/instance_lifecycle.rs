//! End-to-end lifecycle tests against a fake hypervisor.
//!
//! The process-control seam is replaced with a recorder that grows the
//! disk file on installer-boot launches, so the full create → install →
//! relaunch → list → delete flow runs without QEMU.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use aviary_core::{InstanceStatus, ProgressEventKind, ResourceProfile};
use aviary_executor::{
    BootOrder, DisplayMode, ExecutorError, InstallerConfig, LaunchSpec, ProcessControl,
    ProcessHandle, StopOptions,
};
use aviary_orchestrator::{
    InstanceOrchestrator, LocalImageProvisioner, OrchestratorConfig, OrchestratorError,
};

/// Fake hypervisor. Records every launch; installer-boot launches grow
/// the disk file to the configured size to simulate a completed (or
/// failed) installation.
struct RecordingControl {
    launches: Mutex<Vec<LaunchSpec>>,
    install_grows_disk_to_mb: u64,
    next_pid: AtomicU32,
}

impl RecordingControl {
    fn new(install_grows_disk_to_mb: u64) -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            install_grows_disk_to_mb,
            next_pid: AtomicU32::new(0x3FFF_FF00),
        }
    }

    async fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().await.clone()
    }
}

#[async_trait]
impl ProcessControl for RecordingControl {
    async fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle, ExecutorError> {
        if spec.install_image.is_some() {
            let file = std::fs::File::create(&spec.disk_path)?;
            file.set_len(self.install_grows_disk_to_mb * 1024 * 1024)?;
        }
        self.launches.lock().await.push(spec.clone());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessHandle::new(pid, Some(spec.monitor_addr()), spec.disk_path.clone(), None))
    }

    async fn stop(
        &self,
        _handle: &mut ProcessHandle,
        _options: StopOptions,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn kill(&self, _handle: &mut ProcessHandle) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn is_running(&self, _handle: &ProcessHandle) -> bool {
        false
    }
}

fn fast_installer_config() -> InstallerConfig {
    let mut config = InstallerConfig::default();
    config.settle_delay = Duration::from_millis(5);
    for step in &mut config.steps {
        step.delay = Duration::from_millis(2);
    }
    config.quit_grace = Duration::from_millis(20);
    config.global_timeout = Duration::from_secs(10);
    config
}

struct Fixture {
    _dir: tempfile::TempDir,
    orchestrator: InstanceOrchestrator,
    control: Arc<RecordingControl>,
    config: OrchestratorConfig,
}

async fn fixture(install_grows_disk_to_mb: u64) -> Fixture {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir: {e}"),
    };
    let config = OrchestratorConfig::new(dir.path().to_path_buf());

    let iso = dir.path().join("android.iso");
    if let Err(e) = tokio::fs::write(&iso, b"iso-stub").await {
        panic!("write iso: {e}");
    }

    let control = Arc::new(RecordingControl::new(install_grows_disk_to_mb));
    let orchestrator = match InstanceOrchestrator::with_installer_config(
        config.clone(),
        Arc::clone(&control) as Arc<dyn ProcessControl>,
        Arc::new(LocalImageProvisioner::new(iso)),
        fast_installer_config(),
    )
    .await
    {
        Ok(o) => o,
        Err(e) => panic!("orchestrator init: {e}"),
    };

    Fixture { _dir: dir, orchestrator, control, config }
}

/// Drain the event stream until the instance's terminal event arrives,
/// returning every event seen for it. The receiver must have been
/// subscribed before the operation started.
async fn wait_for_terminal(
    rx: &mut tokio::sync::broadcast::Receiver<aviary_core::ProgressEvent>,
    instance: &str,
) -> Vec<aviary_core::ProgressEvent> {
    let collected = tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) if event.instance_id == instance => {
                    let terminal = matches!(
                        event.kind,
                        ProgressEventKind::ProgressComplete | ProgressEventKind::ProgressCancelled
                    );
                    seen.push(event);
                    if terminal {
                        return seen;
                    }
                }
                Ok(_) => {}
                Err(e) => panic!("event channel closed early: {e}"),
            }
        }
    })
    .await;
    match collected {
        Ok(seen) => seen,
        Err(_) => panic!("operation on '{instance}' must finish within the timeout"),
    }
}

#[tokio::test]
async fn create_on_blank_disk_installs_then_relaunches_from_disk() {
    let f = fixture(700).await;
    let mut rx = f.orchestrator.subscribe();

    if let Err(e) = f.orchestrator.create("alpha", ResourceProfile::Low).await {
        panic!("create: {e}");
    }
    let events = wait_for_terminal(&mut rx, "alpha").await;

    let launches = f.control.launches().await;
    assert_eq!(launches.len(), 2, "install boot then disk relaunch expected");

    let install = &launches[0];
    assert_eq!(install.boot_order, BootOrder::Cdrom, "first boot must come from the installer image");
    assert!(install.install_image.is_some(), "installer boot must attach the source image");
    assert_eq!(install.display, DisplayMode::Headless, "installation runs blind");
    assert!(install.hold_on_halt, "installer must survive the guest's final halt");
    assert_eq!(install.memory_mb, 2048);
    assert_eq!(install.vcpu_count, 2);

    let relaunch = &launches[1];
    assert_eq!(relaunch.boot_order, BootOrder::Disk, "relaunch must boot the installed disk");
    assert!(relaunch.install_image.is_none(), "relaunch must not attach the installer image");
    assert_eq!(
        relaunch.display,
        DisplayMode::RemoteDisplay(1),
        "first instance occupies slot 1"
    );
    assert_eq!(relaunch.monitor_port, 45001, "slot 1 derives monitor port 45001");
    assert_eq!(relaunch.debug_bridge_port, 5555, "slot 1 derives debug-bridge port 5555");

    // Events: a start, at least one update, and a successful completion.
    let kinds: Vec<ProgressEventKind> = events.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&ProgressEventKind::ProgressStart));
    assert!(kinds.contains(&ProgressEventKind::ProgressUpdate));
    assert!(kinds.contains(&ProgressEventKind::ProgressComplete));

    let states = match f.orchestrator.list().await {
        Ok(s) => s,
        Err(e) => panic!("list: {e}"),
    };
    assert_eq!(states.len(), 1);
    let state = &states[0];
    assert_eq!(state.name, "alpha");
    assert_eq!(state.ports.display, 1);
    assert_eq!(state.ports.remote_display, 5901);
    assert_eq!(state.ports.monitor, 45001);
    assert!(state.disk_path.exists(), "the installed disk must survive");
}

#[tokio::test]
async fn failed_installation_removes_the_partial_disk() {
    // 3 MB growth cannot pass verification; the partial disk is deleted.
    let f = fixture(3).await;
    let mut rx = f.orchestrator.subscribe();

    if let Err(e) = f.orchestrator.create("broken", ResourceProfile::Low).await {
        panic!("create: {e}");
    }
    wait_for_terminal(&mut rx, "broken").await;

    let launches = f.control.launches().await;
    assert_eq!(launches.len(), 1, "a failed install must not relaunch from disk");
    assert!(
        !f.config.disk_path("broken").exists(),
        "verification failure must delete the partial disk"
    );

    let states = match f.orchestrator.list().await {
        Ok(s) => s,
        Err(e) => panic!("list: {e}"),
    };
    let state = states.iter().find(|s| s.name == "broken");
    match state {
        Some(s) => assert_eq!(s.status, InstanceStatus::Absent, "no disk means absent"),
        None => panic!("instance directory must still be listed"),
    }
}

#[tokio::test]
async fn disk_with_content_boots_directly() {
    let f = fixture(700).await;

    let disk = f.config.disk_path("beta");
    if let Err(e) = tokio::fs::create_dir_all(f.config.instance_dir("beta")).await {
        panic!("mkdir: {e}");
    }
    if let Err(e) = tokio::fs::write(&disk, vec![0u8; 2 * 1024 * 1024]).await {
        panic!("write disk: {e}");
    }

    if let Err(e) = f.orchestrator.start("beta", ResourceProfile::Medium).await {
        panic!("start: {e}");
    }

    let launches = f.control.launches().await;
    assert_eq!(launches.len(), 1, "an installed disk must skip the installer entirely");
    assert_eq!(launches[0].boot_order, BootOrder::Disk);
    assert!(launches[0].install_image.is_none());
    assert_eq!(launches[0].memory_mb, 4096, "medium profile allocates 4096 MB");
    assert_eq!(launches[0].vcpu_count, 4, "medium profile allocates 4 vCPUs");

    if let Err(e) = f.orchestrator.stop("beta").await {
        panic!("stop: {e}");
    }
}

#[tokio::test]
async fn list_reports_running_for_a_live_process_owning_the_instance_dir() {
    let f = fixture(700).await;

    let dir = f.config.instance_dir("live");
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        panic!("mkdir: {e}");
    }
    let disk = f.config.disk_path("live");
    if let Err(e) = tokio::fs::write(&disk, vec![0u8; 2 * 1024 * 1024]).await {
        panic!("write disk: {e}");
    }

    // Stand-in hypervisor: reconciliation matches any live process whose
    // argv contains the instance directory path, and tail's does.
    let mut child = match tokio::process::Command::new("tail")
        .arg("-f")
        .arg(&disk)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => panic!("spawn stand-in: {e}"),
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let states = match f.orchestrator.list().await {
        Ok(s) => s,
        Err(e) => panic!("list: {e}"),
    };
    let state = match states.iter().find(|s| s.name == "live") {
        Some(s) => s,
        None => panic!("the instance directory must be listed"),
    };
    assert_eq!(
        state.status,
        InstanceStatus::Running,
        "a live owning process must report as running"
    );
    assert_eq!(state.pid, child.id(), "the owner's pid must be surfaced");

    if let Err(e) = child.kill().await {
        panic!("kill stand-in: {e}");
    }
}

#[tokio::test]
async fn start_without_a_disk_is_unknown_instance() {
    let f = fixture(700).await;
    let result = f.orchestrator.start("ghost", ResourceProfile::Low).await;
    assert!(
        matches!(result, Err(OrchestratorError::UnknownInstance { .. })),
        "starting a never-created instance must fail with UnknownInstance"
    );
}

#[tokio::test]
async fn stop_with_nothing_running_is_success() {
    let f = fixture(700).await;
    if let Err(e) = f.orchestrator.stop("idle").await {
        panic!("stop of an idle name must succeed: {e}");
    }
}

#[tokio::test]
async fn delete_removes_directory_and_is_idempotent() {
    let f = fixture(700).await;

    let dir = f.config.instance_dir("gamma");
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        panic!("mkdir: {e}");
    }
    if let Err(e) = tokio::fs::write(f.config.disk_path("gamma"), vec![0u8; 2 * 1024 * 1024]).await
    {
        panic!("write disk: {e}");
    }

    if let Err(e) = f.orchestrator.delete("gamma").await {
        panic!("delete: {e}");
    }
    assert!(!dir.exists(), "delete must remove the instance directory tree");

    if let Err(e) = f.orchestrator.delete("gamma").await {
        panic!("second delete must also succeed: {e}");
    }
}

#[tokio::test]
async fn deleted_slot_is_reused_by_the_next_instance() {
    let f = fixture(700).await;
    let mut rx = f.orchestrator.subscribe();

    if let Err(e) = f.orchestrator.create("one", ResourceProfile::Low).await {
        panic!("create one: {e}");
    }
    wait_for_terminal(&mut rx, "one").await;
    if let Err(e) = f.orchestrator.create("two", ResourceProfile::Low).await {
        panic!("create two: {e}");
    }
    wait_for_terminal(&mut rx, "two").await;

    if let Err(e) = f.orchestrator.delete("one").await {
        panic!("delete one: {e}");
    }
    if let Err(e) = f.orchestrator.create("three", ResourceProfile::Low).await {
        panic!("create three: {e}");
    }
    wait_for_terminal(&mut rx, "three").await;

    let states = match f.orchestrator.list().await {
        Ok(s) => s,
        Err(e) => panic!("list: {e}"),
    };
    let slot_of = |name: &str| {
        states
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.ports.display)
    };
    assert_eq!(slot_of("two"), Some(2), "surviving instances keep their slots");
    assert_eq!(slot_of("three"), Some(1), "the freed slot is reassigned lowest-first");
}

#[tokio::test]
async fn create_fails_when_the_install_source_cannot_be_provisioned() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir: {e}"),
    };
    let config = OrchestratorConfig::new(dir.path().to_path_buf());
    let control = Arc::new(RecordingControl::new(700));
    let orchestrator = match InstanceOrchestrator::with_installer_config(
        config,
        control as Arc<dyn ProcessControl>,
        Arc::new(LocalImageProvisioner::new(PathBuf::from("/nonexistent/android.iso"))),
        fast_installer_config(),
    )
    .await
    {
        Ok(o) => o,
        Err(e) => panic!("orchestrator init: {e}"),
    };

    let result = orchestrator.create("alpha", ResourceProfile::Low).await;
    assert!(
        matches!(result, Err(OrchestratorError::Provisioning(_))),
        "provisioning failure must be fatal to create"
    );
}

#[tokio::test]
async fn invalid_names_are_rejected_before_any_work() {
    let f = fixture(700).await;
    for bad in ["", "../up", "a/b", "name with space"] {
        let result = f.orchestrator.create(bad, ResourceProfile::Low).await;
        assert!(
            matches!(result, Err(OrchestratorError::InvalidName { .. })),
            "'{bad}' must be rejected as an instance name"
        );
    }
    assert!(f.control.launches().await.is_empty(), "no launch may happen for a bad name");
}
