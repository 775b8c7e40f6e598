//! Hypervisor command-line assembly.
//!
//! A [`LaunchSpec`] describes one VM launch declaratively; `to_args`
//! renders the QEMU argv so tests can assert on flag selection without
//! running a hypervisor.

use std::path::PathBuf;

/// Boot device order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOrder {
    /// Boot from the installer CD-ROM image (`-boot d`).
    Cdrom,
    /// Boot from the virtual disk (`-boot c`).
    Disk,
}

impl BootOrder {
    fn flag(self) -> &'static str {
        match self {
            Self::Cdrom => "d",
            Self::Disk => "c",
        }
    }
}

/// Display wiring for the launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// No display at all (installer runs blind).
    Headless,
    /// Remote display on `:slot` for the external relay.
    RemoteDisplay(u16),
}

/// Declarative description of one hypervisor launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Hypervisor binary name or path (resolved against PATH when bare).
    pub binary: PathBuf,

    /// Persistent virtual-disk image.
    pub disk_path: PathBuf,

    /// Installer source image, attached as CD-ROM when present.
    pub install_image: Option<PathBuf>,

    /// Guest memory in megabytes.
    pub memory_mb: u32,

    /// Guest vCPU count.
    pub vcpu_count: u8,

    /// Boot device order.
    pub boot_order: BootOrder,

    /// Display wiring.
    pub display: DisplayMode,

    /// TCP port for the monitor control channel on loopback.
    pub monitor_port: u16,

    /// Host TCP port forwarded to the guest debug bridge (5555).
    pub debug_bridge_port: u16,

    /// Keep the process alive across guest reboot/shutdown requests
    /// (`-no-reboot -no-shutdown`); required during installation so the
    /// process only exits on an explicit `quit`.
    pub hold_on_halt: bool,
}

impl LaunchSpec {
    /// Monitor address for this launch, on loopback.
    #[must_use]
    pub fn monitor_addr(&self) -> String {
        format!("127.0.0.1:{}", self.monitor_port)
    }

    /// Render the QEMU argument vector (without the binary itself).
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_owned(),
            self.memory_mb.to_string(),
            "-smp".to_owned(),
            self.vcpu_count.to_string(),
            "-hda".to_owned(),
            self.disk_path.display().to_string(),
            "-boot".to_owned(),
            self.boot_order.flag().to_owned(),
        ];

        if let Some(iso) = &self.install_image {
            args.push("-cdrom".to_owned());
            args.push(iso.display().to_string());
        }

        match self.display {
            DisplayMode::Headless => {
                args.push("-display".to_owned());
                args.push("none".to_owned());
            }
            DisplayMode::RemoteDisplay(slot) => {
                args.push("-vnc".to_owned());
                args.push(format!(":{slot}"));
            }
        }

        args.push("-monitor".to_owned());
        args.push(format!(
            "telnet:127.0.0.1:{},server,nowait",
            self.monitor_port
        ));

        args.push("-net".to_owned());
        args.push("nic".to_owned());
        args.push("-net".to_owned());
        args.push(format!(
            "user,hostfwd=tcp::{}-:5555",
            self.debug_bridge_port
        ));

        if self.hold_on_halt {
            args.push("-no-reboot".to_owned());
            args.push("-no-shutdown".to_owned());
        }

        args
    }

    /// Build the spawnable command for this launch.
    #[must_use]
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(self.to_args());
        cmd
    }
}
