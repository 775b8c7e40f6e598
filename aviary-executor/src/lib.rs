//! Hypervisor-facing machinery for the aviary orchestration core.
//!
//! Process lifecycle control with pluggable termination strategies, the
//! monitor channel client, the unattended OS installer, per-instance
//! resource tracking, and progress/heartbeat reporting.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod control;
pub mod error;
pub mod installer;
pub mod monitor;
pub mod process;
pub mod qemu;
pub mod reporter;
pub mod scan;
pub mod strategy;
pub mod tracker;

pub use control::ProcessControl;
pub use error::{ChannelError, ExecutorError};
pub use installer::{InstallRequest, InstallStep, InstallerConfig, UnattendedInstaller};
pub use monitor::MonitorClient;
pub use process::{ProcessHandle, ProcessManager, StopOptions};
pub use qemu::{BootOrder, DisplayMode, LaunchSpec};
pub use reporter::ProgressReporter;
pub use strategy::{platform_strategy, TerminationStrategy};
pub use tracker::{CleanupReport, ResourceKind, ResourceTracker, TrackedResource};
