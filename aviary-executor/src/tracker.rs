//! Per-instance resource tracking and best-effort release.
//!
//! Every resource acquired on behalf of an instance (remote-display
//! session, relay socket, debug-bridge connection, temp file, port
//! reservation, child process) registers an async release action here.
//! `release_all` attempts every action, collects failures instead of
//! propagating them, and always clears the instance's set.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Category of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    RemoteDisplaySession,
    RelaySocket,
    DebugBridgeConnection,
    TempFile,
    PortReservation,
    ChildProcess,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemoteDisplaySession => "remote_display_session",
            Self::RelaySocket => "relay_socket",
            Self::DebugBridgeConnection => "debug_bridge_connection",
            Self::TempFile => "temp_file",
            Self::PortReservation => "port_reservation",
            Self::ChildProcess => "child_process",
        };
        write!(f, "{s}")
    }
}

type ReleaseFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type ReleaseFn = Box<dyn FnOnce() -> ReleaseFuture + Send>;

/// One unit of cleanup, keyed `(kind, id)` within its instance.
pub struct TrackedResource {
    pub kind: ResourceKind,
    pub id: String,
    release: ReleaseFn,
}

impl TrackedResource {
    /// Build a resource from an async release closure.
    pub fn new<F, Fut>(kind: ResourceKind, id: impl Into<String>, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            kind,
            id: id.into(),
            release: Box::new(move || Box::pin(release())),
        }
    }
}

impl fmt::Debug for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedResource")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`ResourceTracker::release_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CleanupReport {
    /// `true` only when zero release actions failed.
    pub success: bool,

    /// `(kind, id)` labels of released resources.
    pub released: Vec<String>,

    /// Error messages from failed release actions.
    pub errors: Vec<String>,
}

/// Running observability counters; advisory, not load-bearing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TrackerStats {
    pub total_cleanups: u64,
    pub successful_cleanups: u64,
    pub failed_cleanups: u64,
    pub resources_tracked: u64,
}

#[derive(Default)]
struct TrackerInner {
    by_instance: HashMap<String, HashMap<(ResourceKind, String), TrackedResource>>,
    stats: TrackerStats,
}

/// Registry of cleanup actions for all instances of one orchestrator.
///
/// Owned and dependency-injected by the orchestrator instance; there is
/// deliberately no process-wide singleton so tests can run independent
/// orchestrators side by side.
#[derive(Default)]
pub struct ResourceTracker {
    inner: Mutex<TrackerInner>,
}

impl ResourceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource for an instance.
    ///
    /// Duplicate `(kind, id)` registrations within the same instance are
    /// a no-op, not an error; the original release action is kept.
    pub async fn register(&self, instance: &str, resource: TrackedResource) {
        let mut inner = self.inner.lock().await;
        let set = inner.by_instance.entry(instance.to_owned()).or_default();
        let key = (resource.kind, resource.id.clone());
        if set.contains_key(&key) {
            tracing::debug!(
                instance,
                kind = %resource.kind,
                id = %resource.id,
                "duplicate resource registration ignored"
            );
            return;
        }
        set.insert(key, resource);
        inner.stats.resources_tracked += 1;
    }

    /// `(kind, id)` labels currently tracked for an instance.
    pub async fn list(&self, instance: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .by_instance
            .get(instance)
            .map(|set| {
                let mut labels: Vec<String> =
                    set.values().map(|r| format!("{}/{}", r.kind, r.id)).collect();
                labels.sort();
                labels
            })
            .unwrap_or_default()
    }

    /// Release every resource registered for an instance.
    ///
    /// All release actions are attempted; a failure in one never aborts
    /// the rest. The instance's set is cleared regardless of partial
    /// failure, so a retry of the owning operation starts from a clean
    /// slate.
    pub async fn release_all(&self, instance: &str) -> CleanupReport {
        let resources: Vec<TrackedResource> = {
            let mut inner = self.inner.lock().await;
            inner
                .by_instance
                .remove(instance)
                .map(|set| set.into_values().collect())
                .unwrap_or_default()
        };

        let mut released = Vec::new();
        let mut errors = Vec::new();

        for resource in resources {
            let label = format!("{}/{}", resource.kind, resource.id);
            match (resource.release)().await {
                Ok(()) => {
                    tracing::debug!(instance, resource = %label, "resource released");
                    released.push(label);
                }
                Err(message) => {
                    tracing::warn!(instance, resource = %label, %message, "resource release failed");
                    errors.push(format!("{label}: {message}"));
                }
            }
        }

        let mut inner = self.inner.lock().await;
        inner.stats.total_cleanups += 1;
        if errors.is_empty() {
            inner.stats.successful_cleanups += 1;
        } else {
            inner.stats.failed_cleanups += 1;
        }

        CleanupReport { success: errors.is_empty(), released, errors }
    }

    /// Snapshot of the running counters.
    pub async fn stats(&self) -> TrackerStats {
        self.inner.lock().await.stats
    }
}
