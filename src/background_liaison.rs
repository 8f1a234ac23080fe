//! Component H: reaps queue items the background process picked up
//! (spec.md §4.H). Foreground-only.

use crate::config::Config;
use crate::queue_scheduler::QueueScheduler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Drives [`QueueScheduler::reconcile_background_items`] on a fixed
/// interval, guarding against re-entrant ticks with an atomic flag the same
/// way the teacher crate guards its own periodic sync task from overlapping
/// itself.
pub struct BackgroundLiaison {
    scheduler: Arc<QueueScheduler>,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundLiaison {
    pub fn new(config: &Config, scheduler: Arc<QueueScheduler>) -> Self {
        Self {
            scheduler,
            interval: Duration::from_secs(config.background_liaison_interval_secs),
            running: Arc::new(AtomicBool::new(false)),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts the periodic poll loop. Idempotent: calling `start` while
    /// already running has no effect.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let scheduler = self.scheduler.clone();
        let running = self.running.clone();
        let interval = self.interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
                scheduler.reconcile_background_items().await;
                running.store(false, Ordering::SeqCst);
            }
        }));
    }

    /// Stops the poll loop (spec.md §9 "ensure subscriptions are torn down
    /// at shutdown").
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }
}
