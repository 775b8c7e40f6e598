//! Error types for the executor crate.

use std::path::PathBuf;

/// Monitor channel failure. Callers treat these as "could not confirm",
/// never as proof that the instance is down.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// TCP connection to the monitor address failed.
    #[error("monitor connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing the command failed mid-stream.
    #[error("monitor write to {addr} failed: {source}")]
    Write {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connect or write phase did not finish within the deadline.
    #[error("monitor command to {addr} timed out after {timeout_ms} ms")]
    Timeout { addr: String, timeout_ms: u64 },
}

/// Errors that can occur during VM lifecycle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// Hypervisor binary not found at the configured path or on PATH.
    #[error("hypervisor binary not found: {path}")]
    BinaryNotFound { path: PathBuf },

    /// A required input file is missing. Fatal, no retry.
    #[error("{what} not found at {path}")]
    Precondition { what: String, path: PathBuf },

    /// Another live hypervisor process already owns the disk image.
    #[error("disk {disk} is already in use by pid {pid}")]
    DiskBusy { disk: PathBuf, pid: u32 },

    /// The hypervisor process failed to spawn.
    #[error("VM spawn failed: {0}")]
    SpawnFailed(String),

    /// Monitor communication failure (inconclusive, not fatal).
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A termination strategy primitive failed.
    #[error("process control failed for pid {pid}: {reason}")]
    ProcessControl { pid: u32, reason: String },

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
