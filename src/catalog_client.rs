//! Component D: creates or updates a remote file record, classifying server
//! errors per spec.md §4.D.

use crate::config::Config;
use crate::error::UploadError;
use crate::model::{CreateFileRequest, RemoteFileRecord, UpdateFileRequest};
use crate::retry::{retry_with_fixed_backoff, RetryDecision};
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;

pub struct CatalogClient {
    transport: Arc<dyn Transport>,
}

impl CatalogClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// `createFile(req) -> remoteRecord` (spec.md §4.D).
    pub async fn create_file(
        &self,
        config: &Config,
        req: &CreateFileRequest,
        max_attempts: u32,
        backoff_secs: u64,
    ) -> Result<RemoteFileRecord, UploadError> {
        retry_with_fixed_backoff(max_attempts, Duration::from_secs(backoff_secs), |_| async {
            self.transport
                .create_file(config, req)
                .await
                .map_err(classify)
        })
        .await
    }

    /// `updateFile(req) -> remoteRecord` (spec.md §4.D).
    pub async fn update_file(
        &self,
        config: &Config,
        req: &UpdateFileRequest,
        max_attempts: u32,
        backoff_secs: u64,
    ) -> Result<RemoteFileRecord, UploadError> {
        retry_with_fixed_backoff(max_attempts, Duration::from_secs(backoff_secs), |_| async {
            self.transport
                .update_file(config, req)
                .await
                .map_err(classify)
        })
        .await
    }
}

fn classify(e: TransportError) -> RetryDecision<UploadError> {
    match e {
        TransportError::Status { status: 413, .. } => {
            RetryDecision::Terminal(UploadError::FileTooLargeForPlan)
        }
        TransportError::Status { status: 426, .. } => {
            RetryDecision::Terminal(UploadError::StorageLimitExceeded)
        }
        other => RetryDecision::Retryable(UploadError::Other(other.to_string())),
    }
}
