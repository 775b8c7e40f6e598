//! Process-table inspection.
//!
//! Used to associate live hypervisor processes with instances (matched by
//! a command-line argument substring) and as the existence probe where no
//! signal-based check is available.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// A live process matched by [`processes_matching`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedProcess {
    pub pid: u32,
    pub name: String,
}

/// Return all live processes whose command line contains `needle`.
///
/// The scan refreshes the full process table; callers should treat the
/// result as a snapshot that may already be stale.
#[must_use]
pub fn processes_matching(needle: &str) -> Vec<MatchedProcess> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    system
        .processes()
        .iter()
        .filter(|(_, process)| {
            process
                .cmd()
                .iter()
                .any(|arg| arg.to_string_lossy().contains(needle))
        })
        .map(|(pid, process)| MatchedProcess {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
        })
        .collect()
}

/// Check whether a PID exists in the process table.
#[must_use]
pub fn pid_exists(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system.process(target).is_some()
}
