//! Component B: the pre-signed URL pool (spec.md §4.B).

use crate::config::Config;
use crate::error::UploadError;
use crate::model::PresignedUrl;
use crate::transport::{Transport, TransportError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

const MAX_REFILL_COUNT: usize = 42;

#[derive(Clone)]
enum RefillOutcome {
    Ok,
    Err(UploadError),
}

/// FIFO cache of single-use pre-signed object PUT URLs, refilled from the
/// catalog's `upload-urls` endpoint with the fetch coalesced across
/// concurrent callers (spec.md §4.B).
pub struct UrlPool {
    transport: Arc<dyn Transport>,
    config: Config,
    queue: Mutex<VecDeque<PresignedUrl>>,
    inflight: Mutex<Option<broadcast::Sender<RefillOutcome>>>,
}

impl UrlPool {
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            transport,
            config,
            queue: Mutex::new(VecDeque::new()),
            inflight: Mutex::new(None),
        }
    }

    /// `take()`: pops a URL, refilling first if empty. `queue_size` is the
    /// current size of the *upload* queue (spec.md §4.B: "Fetched count is
    /// `min(42, 2 × currentQueueSize)`" — it is the upload queue's size,
    /// not this pool's own backlog).
    pub async fn take(&self, queue_size: usize) -> Result<PresignedUrl, UploadError> {
        if let Some(u) = self.pop().await {
            return Ok(u);
        }
        self.refill(queue_size).await?;
        self.pop()
            .await
            .ok_or_else(|| UploadError::Other("no presigned urls available after refill".into()))
    }

    async fn pop(&self) -> Option<PresignedUrl> {
        self.queue.lock().await.pop_front()
    }

    /// `refill(n)`, coalesced: concurrent callers share one in-flight fetch.
    /// The handle is cleared on completion, success or failure
    /// (spec.md §4.B).
    async fn refill(&self, queue_size: usize) -> Result<(), UploadError> {
        let mut existing_rx = None;
        {
            let mut inflight = self.inflight.lock().await;
            match inflight.as_ref() {
                Some(tx) => existing_rx = Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    *inflight = Some(tx);
                }
            }
        }

        if let Some(mut rx) = existing_rx {
            return match rx.recv().await {
                Ok(RefillOutcome::Ok) => Ok(()),
                Ok(RefillOutcome::Err(e)) => Err(e),
                Err(_) => Err(UploadError::Other(
                    "refill coalescing channel closed unexpectedly".into(),
                )),
            };
        }

        // We're the leader: perform the fetch.
        let count = std::cmp::min(MAX_REFILL_COUNT, 2 * queue_size).max(1);
        let fetch_result = self.transport.fetch_presigned_urls(&self.config, count).await;

        let outcome = match fetch_result {
            Ok(urls) => {
                self.queue.lock().await.extend(urls);
                RefillOutcome::Ok
            }
            Err(TransportError::Status { status: 402, .. }) => {
                RefillOutcome::Err(UploadError::NoActiveSubscription)
            }
            Err(TransportError::Status { status: 426, .. }) => {
                RefillOutcome::Err(UploadError::StorageLimitExceeded)
            }
            Err(e) => RefillOutcome::Err(UploadError::Other(e.to_string())),
        };

        let leader_tx = self.inflight.lock().await.take();
        if let Some(tx) = leader_tx {
            let _ = tx.send(outcome.clone());
        }

        match outcome {
            RefillOutcome::Ok => Ok(()),
            RefillOutcome::Err(e) => Err(e),
        }
    }

    /// A subscription-purchased signal resets the coalescing handle so the
    /// next `take()` attempts a fresh fetch rather than (impossibly, since
    /// it would already have resolved) riding along a stale one
    /// (spec.md §4.B, §9 "Event bus coupling").
    pub async fn reset_coalescer(&self) {
        *self.inflight.lock().await = None;
    }
}
