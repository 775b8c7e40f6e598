//! Deterministic slot-based port derivation.
//!
//! Every instance owns a 1-based `slot`; all four of its ports are pure
//! functions of that slot and a base-port table, so a restart of the
//! control process re-derives identical assignments.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// 1-based positional slot owned by one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(u16);

impl Slot {
    /// Highest assignable slot. Keeps `base + slot` within `u16` for the
    /// default base-port table (largest base 45000).
    pub const MAX: u16 = 20_000;

    /// Create a slot, rejecting 0 and anything above [`Slot::MAX`].
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidSlot`] for out-of-range values.
    pub fn new(value: u16) -> Result<Self, CoreError> {
        if value == 0 || value > Self::MAX {
            return Err(CoreError::InvalidSlot { value });
        }
        Ok(Self(value))
    }

    /// The raw slot index.
    #[must_use]
    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base-port table from which per-slot ports are derived.
///
/// Bases must leave `base + Slot::MAX` within `u16`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortLayout {
    /// Base for the remote-display (VNC) TCP port.
    pub remote_display_base: u16,

    /// Base for the hypervisor monitor control port.
    pub monitor_base: u16,

    /// Base for the debug-bridge (ADB) forward port.
    pub debug_bridge_base: u16,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            remote_display_base: 5900,
            monitor_base: 45000,
            debug_bridge_base: 5554,
        }
    }
}

/// The four ports assigned to one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct PortMap {
    /// Display number (`:N` for the remote-display protocol).
    pub display: u16,

    /// Remote-display TCP port.
    pub remote_display: u16,

    /// Monitor control-channel TCP port.
    pub monitor: u16,

    /// Debug-bridge forward TCP port.
    pub debug_bridge: u16,
}

impl PortMap {
    /// Derive the port assignment for a slot.
    ///
    /// `display = slot`, every other port is `base + slot`. Pure and
    /// deterministic: equal inputs always yield equal maps.
    #[must_use]
    pub fn for_slot(slot: Slot, layout: &PortLayout) -> Self {
        let n = slot.get();
        Self {
            display: n,
            remote_display: layout.remote_display_base + n,
            monitor: layout.monitor_base + n,
            debug_bridge: layout.debug_bridge_base + n,
        }
    }

    /// Monitor address as `host:port` on the loopback interface.
    #[must_use]
    pub fn monitor_addr(&self) -> String {
        format!("127.0.0.1:{}", self.monitor)
    }
}
