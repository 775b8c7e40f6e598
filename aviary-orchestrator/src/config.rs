//! Orchestrator configuration and filesystem layout.
//!
//! Per-instance layout: `<root>/instances/<name>/disk.img`; installer
//! source images live in the shared `<root>/images/` directory; the
//! slot registry persists as `<root>/slots.json`.

use std::path::PathBuf;
use std::time::Duration;

use aviary_core::PortLayout;

/// Configuration for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root directory owning `instances/`, `images/` and `slots.json`.
    pub root_dir: PathBuf,

    /// Hypervisor binary name or path.
    pub binary: PathBuf,

    /// Disk-image tool used to create fresh qcow2 disks, when present
    /// on PATH. Falls back to an empty file when unavailable.
    pub disk_tool: PathBuf,

    /// Base-port table for slot derivation.
    pub port_layout: PortLayout,

    /// Disks below this size are considered blank and routed to the
    /// unattended installer.
    pub blank_disk_threshold_mb: u64,

    /// Virtual size of freshly created disks, in gigabytes.
    pub fresh_disk_size_gb: u32,

    /// Per-rung timeout for graceful shutdown polling.
    pub stop_timeout: Duration,
}

impl OrchestratorConfig {
    /// Config rooted at the given directory, defaults elsewhere.
    #[must_use]
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            binary: PathBuf::from("qemu-system-x86_64"),
            disk_tool: PathBuf::from("qemu-img"),
            port_layout: PortLayout::default(),
            blank_disk_threshold_mb: 1,
            fresh_disk_size_gb: 8,
            stop_timeout: Duration::from_secs(30),
        }
    }

    /// `<root>/instances`
    #[must_use]
    pub fn instances_dir(&self) -> PathBuf {
        self.root_dir.join("instances")
    }

    /// `<root>/images`
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.root_dir.join("images")
    }

    /// `<root>/instances/<name>`
    #[must_use]
    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_dir().join(name)
    }

    /// `<root>/instances/<name>/disk.img`
    #[must_use]
    pub fn disk_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join("disk.img")
    }

    /// `<root>/slots.json`
    #[must_use]
    pub fn slots_path(&self) -> PathBuf {
        self.root_dir.join("slots.json")
    }
}
