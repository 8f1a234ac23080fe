use thiserror::Error;

/// Classified failure kinds surfaced to callers of the orchestrator.
///
/// Mirrors the error-kind table in the design document: each variant carries
/// exactly the propagation behavior a caller needs to distinguish (session-
/// terminal vs. per-item, retryable vs. not) without inspecting strings.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Connectivity gate rejected a non-forced upload on non-Wi-Fi.
    #[error("Wi-Fi unavailable and mobile-data backup is disabled")]
    WiFiUnavailable,

    /// The Lock Store already has an active record for this `localID`.
    /// Internal signal only: the scheduler turns this into `inBackground`,
    /// it is never surfaced to an enqueuer's result handle.
    #[error("lock already held for {local_id}")]
    LockAlreadyAcquired { local_id: String },

    /// The media extractor rejected the source file. Terminal for the item.
    #[error("invalid file: {0}")]
    InvalidFile(String),

    /// URL refill returned HTTP 402. Session-terminal.
    #[error("no active subscription")]
    NoActiveSubscription,

    /// URL refill or catalog call returned HTTP 426. Session-terminal.
    #[error("storage limit exceeded")]
    StorageLimitExceeded,

    /// Catalog create returned HTTP 413. Terminal for the item, not retried.
    #[error("file too large for current plan")]
    FileTooLargeForPlan,

    /// A cooperative sync stop was observed. Session-terminal for all
    /// `notStarted` items at the moment it is observed.
    #[error("sync stop requested")]
    SyncStopRequested,

    /// The background process released its lock without leaving a remote id
    /// on the record; the background liaison could not confirm completion.
    #[error("upload silently cancelled by background process")]
    SilentlyCancelUploads,

    /// The per-item deadline (default 50 minutes) elapsed.
    #[error("upload timed out")]
    TimeoutException,

    /// Any other transport/server failure, after retries are exhausted.
    #[error("upload failed: {0}")]
    Other(String),
}

impl UploadError {
    /// True for error kinds whose occurrence is a normal, user-visible
    /// outcome rather than a bug — per spec these suppress stack traces in
    /// logs (connectivity, policy, and session-terminal kinds).
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            UploadError::WiFiUnavailable
                | UploadError::NoActiveSubscription
                | UploadError::StorageLimitExceeded
                | UploadError::FileTooLargeForPlan
                | UploadError::SyncStopRequested
                | UploadError::SilentlyCancelUploads
        )
    }

    /// True for the two kinds that clear the entire `notStarted` queue.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            UploadError::NoActiveSubscription | UploadError::StorageLimitExceeded
        )
    }
}

/// Internal error for the Lock Store; distinct from [`UploadError`] because
/// it is consulted by scheduling logic before being folded into one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock already held for {0}")]
    AlreadyAcquired(String),
}
