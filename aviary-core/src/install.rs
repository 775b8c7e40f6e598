//! Outcome record of an unattended installation run.

use serde::{Deserialize, Serialize};

/// Result of one unattended installer run. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct InstallationResult {
    /// Whether the disk-growth verification passed.
    pub success: bool,

    /// Disk image size after the run, in megabytes.
    pub final_disk_size_mb: u64,

    /// Growth over the run (`final - initial`), in megabytes.
    pub size_increase_mb: u64,

    /// Human-readable outcome, including measured sizes on failure.
    pub message: String,
}

impl InstallationResult {
    /// Build a success record.
    #[must_use]
    pub fn succeeded(final_disk_size_mb: u64, size_increase_mb: u64) -> Self {
        Self {
            success: true,
            final_disk_size_mb,
            size_increase_mb,
            message: format!(
                "installation verified: disk is {final_disk_size_mb} MB (+{size_increase_mb} MB)"
            ),
        }
    }

    /// Build a failure record with a diagnostic message.
    #[must_use]
    pub fn failed(final_disk_size_mb: u64, size_increase_mb: u64, message: String) -> Self {
        Self {
            success: false,
            final_disk_size_mb,
            size_increase_mb,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_embeds_sizes_in_message() {
        let r = InstallationResult::succeeded(1200, 700);
        assert!(r.success);
        assert!(r.message.contains("1200"), "message must carry the final size");
        assert!(r.message.contains("700"), "message must carry the growth");
    }

    #[test]
    fn failed_preserves_measurements() {
        let r = InstallationResult::failed(12, 0, "no growth".to_owned());
        assert!(!r.success);
        assert_eq!(r.final_disk_size_mb, 12);
        assert_eq!(r.size_increase_mb, 0);
    }
}
