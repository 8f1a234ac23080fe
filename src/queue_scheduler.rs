//! Component G (admission/dispatch) and component I (session bookkeeping),
//! spec.md §4.G.
//!
//! `poll()` is driven entirely from call sites — every `enqueue` and every
//! dispatched worker's completion re-polls — rather than a standalone
//! background task, matching the single-dispatch-per-call contract in
//! spec.md §9. Dispatch itself needs to outlive the call that triggered it,
//! so the scheduler keeps a `Weak` self-reference (built with
//! `Arc::new_cyclic`) to spawn its own continuation.

use crate::collaborators::{CollectionsService, FilesDb, SyncController};
use crate::config::Config;
use crate::error::UploadError;
use crate::lock_store::SqliteLockStore;
use crate::model::{LocalFile, MediaType, ProcessType, RemoteFileRecord, UploadItemStatus};
use crate::upload_worker::Uploader;
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Mutex};

struct Waiter {
    collection_id: i64,
    tx: oneshot::Sender<Result<RemoteFileRecord, UploadError>>,
}

struct QueueEntry {
    file: LocalFile,
    /// The collection the item is actually being uploaded into — the first
    /// caller's choice; later enqueues for the same `localID` become
    /// waiters rather than separate entries (spec.md §4.G `enqueue`).
    collection_id: i64,
    status: UploadItemStatus,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct SchedulerState {
    entries: Vec<QueueEntry>,
    total_in_session: usize,
    in_progress_count: usize,
    video_in_progress_count: usize,
}

pub struct QueueScheduler {
    config: Config,
    worker: Arc<dyn Uploader>,
    sync_controller: Arc<dyn SyncController>,
    collections: Arc<dyn CollectionsService>,
    lock_store: Arc<SqliteLockStore>,
    files_db: Arc<dyn FilesDb>,
    state: Mutex<SchedulerState>,
    self_ref: Weak<QueueScheduler>,
}

impl QueueScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        worker: Arc<dyn Uploader>,
        sync_controller: Arc<dyn SyncController>,
        collections: Arc<dyn CollectionsService>,
        lock_store: Arc<SqliteLockStore>,
        files_db: Arc<dyn FilesDb>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            worker,
            sync_controller,
            collections,
            lock_store,
            files_db,
            state: Mutex::new(SchedulerState::default()),
            self_ref: weak.clone(),
        })
    }

    /// `enqueue(file, collectionID) -> handle` (spec.md §4.G).
    pub async fn enqueue(
        &self,
        file: LocalFile,
        collection_id: i64,
    ) -> oneshot::Receiver<Result<RemoteFileRecord, UploadError>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.total_in_session += 1;

            match state.entries.iter().position(|e| e.file.local_id == file.local_id) {
                Some(idx) => {
                    if state.entries[idx].collection_id == collection_id {
                        // We counted once too many: this is a plain duplicate.
                        state.total_in_session -= 1;
                    }
                    state.entries[idx].waiters.push(Waiter { collection_id, tx });
                }
                None => {
                    state.entries.push(QueueEntry {
                        file,
                        collection_id,
                        status: UploadItemStatus::NotStarted,
                        waiters: vec![Waiter { collection_id, tx }],
                    });
                }
            }
        }
        self.poll().await;
        rx
    }

    /// `clearQueue(reason)` (spec.md §4.G): fulfills and removes every
    /// `notStarted` item; `inProgress`/`inBackground` items are untouched.
    pub async fn clear_queue(&self, reason: UploadError) {
        let mut state = self.state.lock().await;
        state.entries.retain_mut(|e| {
            if e.status == UploadItemStatus::NotStarted {
                for w in e.waiters.drain(..) {
                    let _ = w.tx.send(Err(reason.clone()));
                }
                false
            } else {
                true
            }
        });
        state.total_in_session = 0;
    }

    /// `removeWhere(predicate, reason)` (spec.md §4.G).
    pub async fn remove_where<F>(&self, predicate: F, reason: UploadError)
    where
        F: Fn(&LocalFile) -> bool,
    {
        let mut state = self.state.lock().await;
        let mut removed = 0usize;
        state.entries.retain_mut(|e| {
            if e.status == UploadItemStatus::NotStarted && predicate(&e.file) {
                for w in e.waiters.drain(..) {
                    let _ = w.tx.send(Err(reason.clone()));
                }
                removed += 1;
                false
            } else {
                true
            }
        });
        state.total_in_session = state.total_in_session.saturating_sub(removed);
    }

    pub async fn total_in_session(&self) -> usize {
        self.state.lock().await.total_in_session
    }

    pub async fn in_progress_count(&self) -> usize {
        self.state.lock().await.in_progress_count
    }

    /// `poll()` (spec.md §4.G): idempotent, admits at most one item per
    /// call — the published reference implementation's single-dispatch
    /// behavior, preserved here as the lower bound (spec.md §9).
    pub fn poll<'a>(&'a self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        if self.sync_controller.should_stop() {
            self.clear_queue(UploadError::SyncStopRequested).await;
            return;
        }

        let dispatch = {
            let mut state = self.state.lock().await;

            if state.entries.is_empty() {
                state.total_in_session = 0;
                return;
            }

            if state.in_progress_count >= self.config.global_concurrency_limit {
                return;
            }

            let first_not_started = state
                .entries
                .iter()
                .position(|e| e.status == UploadItemStatus::NotStarted);
            let first_not_started = match first_not_started {
                Some(i) => i,
                None => return,
            };

            let video_saturated = state.entries[first_not_started].file.media_type == MediaType::Video
                && state.video_in_progress_count >= self.config.video_concurrency_limit;

            let chosen = if video_saturated {
                match state.entries.iter().position(|e| {
                    e.status == UploadItemStatus::NotStarted && e.file.media_type != MediaType::Video
                }) {
                    Some(i) => i,
                    None => return,
                }
            } else {
                first_not_started
            };

            state.entries[chosen].status = UploadItemStatus::InProgress;
            state.in_progress_count += 1;
            if state.entries[chosen].file.media_type == MediaType::Video {
                state.video_in_progress_count += 1;
            }

            let queue_size = state.entries.len();
            (
                state.entries[chosen].file.clone(),
                state.entries[chosen].collection_id,
                queue_size,
            )
        };

        let (file, collection_id, queue_size) = dispatch;
        if let Some(scheduler) = self.self_ref.upgrade() {
            tokio::spawn(async move {
                let result = scheduler
                    .worker
                    .try_to_upload(&file, collection_id, false, queue_size)
                    .await;
                scheduler.on_worker_completion(&file.local_id, result).await;
            });
        }
        })
    }

    /// Step 4 of `poll()` (spec.md §4.G): decrement counters, settle the
    /// entry, then re-poll.
    async fn on_worker_completion(&self, local_id: &str, result: Result<RemoteFileRecord, UploadError>) {
        if let Err(e) = &result {
            if e.is_expected() {
                log::warn!("[Upload {}] failed: {}", local_id, e);
            } else {
                log::error!("[Upload {}] failed: {}", local_id, e);
            }
        }

        let settled = {
            let mut state = self.state.lock().await;
            match state.entries.iter().position(|e| e.file.local_id == local_id) {
                Some(idx) => {
                    let is_video = state.entries[idx].file.media_type == MediaType::Video;
                    state.in_progress_count = state.in_progress_count.saturating_sub(1);
                    if is_video {
                        state.video_in_progress_count = state.video_in_progress_count.saturating_sub(1);
                    }

                    match &result {
                        Err(UploadError::LockAlreadyAcquired { .. }) => {
                            state.entries[idx].status = UploadItemStatus::InBackground;
                            None
                        }
                        _ => {
                            let entry = state.entries.remove(idx);
                            Some((entry.waiters, entry.collection_id))
                        }
                    }
                }
                None => None,
            }
        };

        // Session-terminal failures (spec.md §4.B, §4.D, §7) clear every
        // other `notStarted` item with the same reason, not just this one.
        let session_terminal_err = match &result {
            Err(e) if e.is_session_terminal() => Some(e.clone()),
            _ => None,
        };

        if let Some((waiters, entry_collection_id)) = settled {
            self.fulfill_waiters(waiters, entry_collection_id, result).await;
        }

        if let Some(err) = session_terminal_err {
            self.clear_queue(err).await;
        }

        self.poll().await;
    }

    async fn fulfill_waiters(
        &self,
        waiters: Vec<Waiter>,
        entry_collection_id: i64,
        result: Result<RemoteFileRecord, UploadError>,
    ) {
        match result {
            Ok(record) => {
                for w in waiters {
                    if w.collection_id == entry_collection_id {
                        let _ = w.tx.send(Ok(record.clone()));
                    } else {
                        match self.collections.add_to_collection(w.collection_id, &record).await {
                            Ok(_) => {
                                let _ = w.tx.send(Ok(record.clone()));
                            }
                            Err(e) => {
                                let _ = w.tx.send(Err(UploadError::Other(e.to_string())));
                            }
                        }
                    }
                }
            }
            Err(e) => {
                for w in waiters {
                    let _ = w.tx.send(Err(e.clone()));
                }
            }
        }
    }

    /// Component H's per-tick body: for every `inBackground` item, probe
    /// whether the background process still holds its lock; if not, settle
    /// it from the current DB state (spec.md §4.H). Only meaningful in the
    /// foreground process.
    pub async fn reconcile_background_items(&self) {
        let released: Vec<(String, i64, Vec<Waiter>)> = {
            let mut state = self.state.lock().await;
            let mut released = Vec::new();
            let mut i = 0;
            while i < state.entries.len() {
                let still_background = state.entries[i].status == UploadItemStatus::InBackground;
                let still_locked = still_background
                    && self
                        .lock_store
                        .is_locked(&state.entries[i].file.local_id, ProcessType::Background);
                if still_background && !still_locked {
                    let entry = state.entries.remove(i);
                    released.push((entry.file.local_id, entry.collection_id, entry.waiters));
                } else {
                    i += 1;
                }
            }
            released
        };

        for (local_id, entry_collection_id, waiters) in released {
            let outcome = match self.files_db.get_file(&local_id).await {
                Ok(Some(refreshed)) if refreshed.has_valid_remote_id() => Ok(RemoteFileRecord {
                    id: refreshed.uploaded_file_id.unwrap(),
                    updation_time: refreshed.updation_time,
                    owner_id: refreshed.owner_id,
                    collection_id: refreshed.collection_id,
                }),
                Ok(_) => Err(UploadError::SilentlyCancelUploads),
                Err(e) => Err(UploadError::Other(e.to_string())),
            };
            self.fulfill_waiters(waiters, entry_collection_id, outcome).await;
        }
    }
}
