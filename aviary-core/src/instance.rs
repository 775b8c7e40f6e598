//! Instance identity, resource profiles and lifecycle status.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ports::PortMap;

/// Sizing preset for an instance.
///
/// Each profile maps to a fixed `(memory_mb, vcpu_count)` pair; the
/// orchestrator never accepts free-form sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceProfile {
    Low,
    Medium,
    High,
}

impl ResourceProfile {
    /// Memory allocation in megabytes.
    #[must_use]
    pub fn memory_mb(self) -> u32 {
        match self {
            Self::Low => 2048,
            Self::Medium => 4096,
            Self::High => 8192,
        }
    }

    /// Virtual CPU count.
    #[must_use]
    pub fn vcpu_count(self) -> u8 {
        match self {
            Self::Low => 2,
            Self::Medium => 4,
            Self::High => 6,
        }
    }
}

impl FromStr for ResourceProfile {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(CoreError::UnknownProfile { value: s.to_owned() }),
        }
    }
}

impl fmt::Display for ResourceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a named instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Absent,
    Creating,
    Installing,
    Booting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Installing => "installing",
            Self::Booting => "booting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time snapshot of an instance as reported by `list()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    /// Instance name, unique within one orchestrator.
    pub name: String,

    /// Current lifecycle status.
    pub status: InstanceStatus,

    /// Derived port assignment for this instance's slot.
    pub ports: PortMap,

    /// Path to the persistent virtual-disk image.
    pub disk_path: PathBuf,

    /// Live hypervisor PID, when one is associated with this instance.
    pub pid: Option<u32>,
}
