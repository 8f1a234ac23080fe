use crate::model::RemoteFileRecord;
use tokio::sync::broadcast;

/// Signals flowing across the event bus boundary (spec.md §6.6, §9 "Event
/// bus coupling"). Two are consumed by the orchestrator; one is produced.
///
/// Modeled as a `tokio::sync::broadcast` channel of this enum, the same
/// primitive `pairing.rs` uses for its shutdown signal. Subscriptions are
/// torn down implicitly when a receiver is dropped; there is no explicit
/// unsubscribe API, matching the teacher crate's style.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Inbound: the user purchased a subscription. Resets the URL pool's
    /// refill coalescing handle so a new attempt is made (spec.md §4.B).
    SubscriptionPurchased,
    /// Inbound: a local photo was deleted. The scheduler removes any
    /// matching `notStarted` item with `InvalidFile` (spec.md §9).
    LocalPhotoDeleted { local_id: String },
    /// Outbound: a file finished uploading in the foreground process
    /// (spec.md §4.F step 13).
    LocalPhotosUpdated { record: RemoteFileRecord },
}

/// Thin wrapper around a broadcast channel so callers don't need to reason
/// about buffer sizing at every call site.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Best-effort publish: if nobody is listening, the event is dropped,
    /// matching `AppHandle::emit(...).ok()` calls throughout the teacher
    /// crate that never treat "no listener" as an error.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
