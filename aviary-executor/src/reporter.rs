//! Progress and heartbeat reporting for long-running operations.
//!
//! One reporter owns the active-operation map and a broadcast fan-out of
//! [`ProgressEvent`]s. Each started operation gets a heartbeat task that
//! periodically emits "still running" events so consumers can tell a
//! long operation from a hung one. Cancelling reporting never touches
//! the underlying process; that asymmetry is intentional.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use aviary_core::{ProgressEvent, ProgressEventKind};

/// Default heartbeat period.
const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// Broadcast buffer per subscriber; laggards drop oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct ActiveOperation {
    operation: String,
    metadata: serde_json::Value,
    started: tokio::time::Instant,
    last_percentage: u8,
    heartbeat: tokio::task::JoinHandle<()>,
}

/// Emits structured lifecycle/progress events and periodic heartbeats.
///
/// Cheap to clone via `Arc`; the map and channel are shared.
pub struct ProgressReporter {
    period: Duration,
    events: broadcast::Sender<ProgressEvent>,
    active: Arc<Mutex<HashMap<String, ActiveOperation>>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_PERIOD)
    }
}

impl ProgressReporter {
    /// Create a reporter with the given heartbeat period.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { period, events, active: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Subscribe to the event fan-out.
    ///
    /// Every currently-connected subscriber receives every event; one
    /// slow or dropped subscriber never blocks delivery to the others
    /// (broadcast semantics).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Begin an operation and start its heartbeat.
    ///
    /// Starting a new operation for an instance that already has one
    /// replaces it; the old heartbeat is stopped.
    pub async fn start(&self, instance: &str, operation: &str, metadata: serde_json::Value) {
        let started = tokio::time::Instant::now();

        let heartbeat = {
            let events = self.events.clone();
            let instance = instance.to_owned();
            let operation = operation.to_owned();
            let period = self.period;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(started + period, period);
                loop {
                    ticker.tick().await;
                    let elapsed_ms = started.elapsed().as_millis();
                    let mut event =
                        ProgressEvent::now(ProgressEventKind::Heartbeat, &instance, &operation);
                    event.message = Some(format!("still running, {elapsed_ms} ms elapsed"));
                    let _ = events.send(event);
                }
            })
        };

        let mut active = self.active.lock().await;
        if let Some(previous) = active.insert(
            instance.to_owned(),
            ActiveOperation {
                operation: operation.to_owned(),
                metadata: metadata.clone(),
                started,
                last_percentage: 0,
                heartbeat,
            },
        ) {
            tracing::warn!(instance, previous = %previous.operation, "operation replaced while active");
            previous.heartbeat.abort();
        }
        drop(active);

        let mut event = ProgressEvent::now(ProgressEventKind::ProgressStart, instance, operation);
        event.percentage = Some(0);
        event.metadata = metadata;
        let _ = self.events.send(event);
    }

    /// Emit a stage/percentage update for an active operation.
    ///
    /// Percentages are monotonic within one operation: a lower value
    /// than previously reported is raised to the last one. Calling for
    /// an instance with no active operation logs a warning and does
    /// nothing — it never fails.
    pub async fn update(&self, instance: &str, stage: &str, percentage: u8, message: &str) {
        let mut active = self.active.lock().await;
        let Some(op) = active.get_mut(instance) else {
            tracing::warn!(instance, stage, "progress update for inactive operation ignored");
            return;
        };

        let clamped = percentage.clamp(op.last_percentage, 100);
        op.last_percentage = clamped;

        let mut event =
            ProgressEvent::now(ProgressEventKind::ProgressUpdate, instance, &op.operation);
        event.stage = Some(stage.to_owned());
        event.percentage = Some(clamped);
        event.message = Some(message.to_owned());
        event.metadata = op.metadata.clone();
        drop(active);

        let _ = self.events.send(event);
    }

    /// Finish an operation and stop its heartbeat.
    ///
    /// Safe to call twice; the second call is a no-op.
    pub async fn complete(&self, instance: &str, success: bool, message: &str) {
        self.finish(
            instance,
            ProgressEventKind::ProgressComplete,
            success.then_some(100),
            message,
        )
        .await;
    }

    /// Cancel reporting for an operation.
    ///
    /// Releases bookkeeping and stops the heartbeat only. The underlying
    /// hypervisor process or installer sequence keeps running; stopping
    /// execution requires a separate process-control call.
    pub async fn cancel(&self, instance: &str, reason: &str) {
        self.finish(instance, ProgressEventKind::ProgressCancelled, None, reason).await;
    }

    async fn finish(
        &self,
        instance: &str,
        kind: ProgressEventKind,
        percentage: Option<u8>,
        message: &str,
    ) {
        let removed = self.active.lock().await.remove(instance);
        let Some(op) = removed else {
            tracing::debug!(instance, "finish for inactive operation ignored");
            return;
        };
        // The heartbeat is stopped exactly once: removal above makes any
        // second complete/cancel a no-op before reaching this abort.
        op.heartbeat.abort();

        let elapsed_ms = op.started.elapsed().as_millis();
        let mut event = ProgressEvent::now(kind, instance, &op.operation);
        event.percentage = percentage.or(Some(op.last_percentage));
        event.message = Some(format!("{message} ({elapsed_ms} ms)"));
        event.metadata = op.metadata;
        let _ = self.events.send(event);
    }

    /// Whether an operation is currently active for the instance.
    pub async fn is_active(&self, instance: &str) -> bool {
        self.active.lock().await.contains_key(instance)
    }

    /// Name of the instance's active operation, if any.
    pub async fn active_operation(&self, instance: &str) -> Option<String> {
        self.active.lock().await.get(instance).map(|op| op.operation.clone())
    }
}
