//! Component F: the `tryToUpload` contract (spec.md §4.F).

use crate::catalog_client::CatalogClient;
use crate::collaborators::{CollectionsService, ConnectivityProbe, FilesDb, MediaExtractor, SyncController, SyncTracker};
use crate::collaborators::CryptoProvider;
use crate::config::Config;
use crate::error::UploadError;
use crate::events::{EventBus, OrchestratorEvent};
use crate::lock_store::SqliteLockStore;
use crate::mapping_resolver::MappingResolver;
use crate::model::{
    now_micros, CreateFileRequest, EncryptedMetadata, LocalFile, ObjectUploadInfo, ProcessType,
    RemoteFileRecord, UpdateFileRequest, UPDATION_TIME_SENTINEL,
};
use crate::url_pool::UrlPool;
use crate::blob_putter::BlobPutter;
use async_trait::async_trait;
use base64::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The Queue Scheduler's (component G) view of component F: just the
/// `tryToUpload` contract, so the scheduler can be driven in tests with a
/// lightweight double instead of a fully wired [`UploadWorker`].
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn try_to_upload(
        &self,
        candidate: &LocalFile,
        collection_id: i64,
        forced_upload: bool,
        queue_size: usize,
    ) -> Result<RemoteFileRecord, UploadError>;
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[derive(Default)]
struct CleanupPlan {
    source_is_temporary: bool,
    source_path: Option<PathBuf>,
    encrypted_file_path: Option<PathBuf>,
    thumbnail_path: Option<PathBuf>,
}

pub struct UploadWorker {
    process_type: ProcessType,
    config: Config,
    lock_store: Arc<SqliteLockStore>,
    media_extractor: Arc<dyn MediaExtractor>,
    crypto: Arc<dyn CryptoProvider>,
    files_db: Arc<dyn FilesDb>,
    collections: Arc<dyn CollectionsService>,
    connectivity: Arc<dyn ConnectivityProbe>,
    sync_controller: Arc<dyn SyncController>,
    sync_tracker: Arc<dyn SyncTracker>,
    mapping_resolver: Arc<MappingResolver>,
    url_pool: Arc<UrlPool>,
    blob_putter: Arc<BlobPutter>,
    catalog_client: Arc<CatalogClient>,
    events: EventBus,
}

impl UploadWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process_type: ProcessType,
        config: Config,
        lock_store: Arc<SqliteLockStore>,
        media_extractor: Arc<dyn MediaExtractor>,
        crypto: Arc<dyn CryptoProvider>,
        files_db: Arc<dyn FilesDb>,
        collections: Arc<dyn CollectionsService>,
        connectivity: Arc<dyn ConnectivityProbe>,
        sync_controller: Arc<dyn SyncController>,
        sync_tracker: Arc<dyn SyncTracker>,
        mapping_resolver: Arc<MappingResolver>,
        url_pool: Arc<UrlPool>,
        blob_putter: Arc<BlobPutter>,
        catalog_client: Arc<CatalogClient>,
        events: EventBus,
    ) -> Self {
        Self {
            process_type,
            config,
            lock_store,
            media_extractor,
            crypto,
            files_db,
            collections,
            connectivity,
            sync_controller,
            sync_tracker,
            mapping_resolver,
            url_pool,
            blob_putter,
            catalog_client,
            events,
        }
    }

    async fn try_to_upload_impl(
        &self,
        candidate: &LocalFile,
        collection_id: i64,
        forced_upload: bool,
        queue_size: usize,
    ) -> Result<RemoteFileRecord, UploadError> {
        match tokio::time::timeout(
            Duration::from_secs(self.config.upload_timeout_secs),
            self.try_to_upload_inner(candidate, collection_id, forced_upload, queue_size),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UploadError::TimeoutException),
        }
    }

    async fn try_to_upload_inner(
        &self,
        candidate: &LocalFile,
        collection_id: i64,
        forced_upload: bool,
        queue_size: usize,
    ) -> Result<RemoteFileRecord, UploadError> {
        // 1. Connectivity gate.
        if !forced_upload && !self.connectivity.is_wifi() && !self.config.allow_mobile_data_backup {
            return Err(UploadError::WiFiUnavailable);
        }

        // 2. Already-uploaded shortcut.
        let refreshed = self
            .files_db
            .get_file(&candidate.local_id)
            .await
            .map_err(|e| UploadError::Other(e.to_string()))?
            .unwrap_or_else(|| candidate.clone());

        if refreshed.has_valid_remote_id()
            && refreshed.updation_time != UPDATION_TIME_SENTINEL
            && refreshed.collection_id == Some(collection_id)
        {
            return Ok(RemoteFileRecord {
                id: refreshed.uploaded_file_id.unwrap(),
                updation_time: refreshed.updation_time,
                owner_id: refreshed.owner_id,
                collection_id: refreshed.collection_id,
            });
        }

        // 3. Acquire the lock.
        self.lock_store
            .acquire(&refreshed.local_id, self.process_type, now_micros())
            .map_err(|_| UploadError::LockAlreadyAcquired {
                local_id: refreshed.local_id.clone(),
            })?;

        let mut cleanup = CleanupPlan::default();
        let result = self
            .upload_after_lock(&refreshed, collection_id, queue_size, &mut cleanup)
            .await;
        self.run_cleanup(&refreshed.local_id, cleanup, result.is_ok()).await;
        result
    }

    async fn upload_after_lock(
        &self,
        candidate: &LocalFile,
        collection_id: i64,
        queue_size: usize,
        cleanup: &mut CleanupPlan,
    ) -> Result<RemoteFileRecord, UploadError> {
        // 4. Media extraction.
        let media = match self.media_extractor.get_media_upload_data(candidate).await {
            Ok(m) => m,
            Err(UploadError::InvalidFile(reason)) => {
                self.handle_invalid_file(candidate, &reason).await;
                return Err(UploadError::InvalidFile(reason));
            }
            Err(e) => return Err(e),
        };
        cleanup.source_is_temporary = media.source_is_temporary;
        cleanup.source_path = Some(media.source_file.clone());

        // 5-6. Update vs. new.
        let is_update = candidate.is_update_candidate();
        let reuse_key = if is_update {
            let collection_key = self
                .collections
                .get_collection_key(collection_id)
                .await
                .map_err(|e| UploadError::Other(e.to_string()))?;
            let recovered = self
                .crypto
                .recover_file_key(&candidate.key_fields, &collection_key)
                .map_err(|e| UploadError::Other(e.to_string()))?;
            Some(recovered)
        } else {
            let skip = self
                .mapping_resolver
                .resolve(&media, candidate, collection_id)
                .await
                .map_err(|e| UploadError::Other(e.to_string()))?;
            if skip {
                return Ok(RemoteFileRecord {
                    id: candidate.uploaded_file_id.unwrap_or(crate::model::NO_REMOTE_ID),
                    updation_time: candidate.updation_time,
                    owner_id: candidate.owner_id,
                    collection_id: candidate.collection_id,
                });
            }
            None
        };

        let bg_suffix = if self.process_type == ProcessType::Background {
            "_bg"
        } else {
            ""
        };

        // 7. Encrypt the source file.
        let encrypted_path = self
            .config
            .temp_dir
            .join(format!("{}{}.encrypted", candidate.generated_id, bg_suffix));
        if encrypted_path.exists() {
            tokio::fs::remove_file(&encrypted_path).await.ok();
        }
        let file_attrs = self
            .crypto
            .encrypt_file_stream(&media.source_file, &encrypted_path, reuse_key.as_deref())
            .map_err(|e| UploadError::Other(e.to_string()))?;
        cleanup.encrypted_file_path = Some(encrypted_path.clone());

        // 8. Encrypt the thumbnail.
        let thumbnail_path = self
            .config
            .temp_dir
            .join(format!("{}_thumbnail{}.encrypted", candidate.generated_id, bg_suffix));
        let (thumb_ciphertext, thumb_header) = self
            .crypto
            .encrypt_thumbnail(&media.thumbnail, &file_attrs.key)
            .map_err(|e| UploadError::Other(e.to_string()))?;
        tokio::fs::write(&thumbnail_path, &thumb_ciphertext)
            .await
            .map_err(|e| UploadError::Other(e.to_string()))?;
        cleanup.thumbnail_path = Some(thumbnail_path.clone());

        // 9. PUT thumbnail, then file.
        let thumbnail_url = self.url_pool.take(queue_size).await?;
        let thumbnail_object_key = self
            .blob_putter
            .put(&self.url_pool, queue_size, thumbnail_url, &thumbnail_path, self.config.max_attempts)
            .await?;

        let file_url = self.url_pool.take(queue_size).await?;
        let file_object_key = self
            .blob_putter
            .put(&self.url_pool, queue_size, file_url, &encrypted_path, self.config.max_attempts)
            .await?;

        // 10. Metadata blob.
        let metadata_json = serde_json::to_vec(&media.metadata_for_upload)
            .map_err(|e| UploadError::Other(e.to_string()))?;
        let (metadata_ciphertext, metadata_header) = self
            .crypto
            .encrypt_metadata(&metadata_json, &file_attrs.key)
            .map_err(|e| UploadError::Other(e.to_string()))?;

        let file_size = tokio::fs::metadata(&encrypted_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let thumbnail_size = tokio::fs::metadata(&thumbnail_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let file_info = ObjectUploadInfo {
            object_key: file_object_key,
            decryption_header: b64(&file_attrs.header),
            size: file_size,
        };
        let thumbnail_info = ObjectUploadInfo {
            object_key: thumbnail_object_key,
            decryption_header: b64(&thumb_header),
            size: thumbnail_size,
        };
        let metadata = EncryptedMetadata {
            encrypted_data: b64(&metadata_ciphertext),
            decryption_header: b64(&metadata_header),
        };

        // 11. Sync-stop check.
        if self.sync_controller.should_stop() {
            return Err(UploadError::SyncStopRequested);
        }

        // 12. Create or update.
        let record = if is_update {
            let req = UpdateFileRequest {
                id: candidate
                    .uploaded_file_id
                    .ok_or_else(|| UploadError::Other("update candidate missing remote id".into()))?,
                file: file_info,
                thumbnail: thumbnail_info,
                metadata,
            };
            let record = self
                .catalog_client
                .update_file(&self.config, &req, self.config.max_attempts, self.config.catalog_retry_backoff_secs)
                .await?;
            self.files_db
                .update_uploaded_file_across_collections(record.id, &record)
                .await
                .map_err(|e| UploadError::Other(e.to_string()))?;
            record
        } else {
            let collection_key = self
                .collections
                .get_collection_key(collection_id)
                .await
                .map_err(|e| UploadError::Other(e.to_string()))?;
            let (wrapped_key, wrapped_nonce) = self
                .crypto
                .wrap_key_for_collection(&file_attrs.key, &collection_key)
                .map_err(|e| UploadError::Other(e.to_string()))?;
            let req = CreateFileRequest {
                collection_id,
                encrypted_key: b64(&wrapped_key),
                key_decryption_nonce: b64(&wrapped_nonce),
                file: file_info,
                thumbnail: thumbnail_info,
                metadata,
            };
            let mut record = self
                .catalog_client
                .create_file(&self.config, &req, self.config.max_attempts, self.config.catalog_retry_backoff_secs)
                .await?;

            let mut persisted = candidate.clone();
            persisted.uploaded_file_id = Some(record.id);
            persisted.updation_time = record.updation_time;
            persisted.collection_id = record.collection_id;
            if media.is_deleted {
                // "clear localID on the returned record before persisting".
                persisted.local_id = String::new();
                record.collection_id = persisted.collection_id;
            }
            self.files_db
                .update(&persisted)
                .await
                .map_err(|e| UploadError::Other(e.to_string()))?;
            record
        };

        // 13. Foreground only: emit event.
        if self.process_type == ProcessType::Foreground {
            self.events.publish(OrchestratorEvent::LocalPhotosUpdated {
                record: record.clone(),
            });
        }

        Ok(record)
    }

    async fn handle_invalid_file(&self, candidate: &LocalFile, reason: &str) {
        let fallback_extension = candidate
            .title
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        log::warn!(
            "invalid file local_id={} ext={}: {}",
            candidate.local_id,
            fallback_extension,
            reason
        );
        let _ = self.files_db.mark_invalid(&candidate.local_id).await;
        self.sync_tracker
            .record_invalid_file(&candidate.local_id, &fallback_extension);
    }

    /// Encrypted temp files are cleaned on every exit path; the source file
    /// is only deleted when it was a temporary copy AND the upload
    /// completed (spec.md §4.F step 14, §9 "Resource discipline"). This
    /// crate has no iOS/Android distinction to key off of, so it applies the
    /// stricter of the two platform rules uniformly rather than risk
    /// deleting a still-needed source out from under a failed upload.
    async fn run_cleanup(&self, local_id: &str, plan: CleanupPlan, upload_succeeded: bool) {
        if plan.source_is_temporary && upload_succeeded {
            if let Some(p) = &plan.source_path {
                tokio::fs::remove_file(p).await.ok();
            }
        }
        if let Some(p) = &plan.encrypted_file_path {
            tokio::fs::remove_file(p).await.ok();
        }
        if let Some(p) = &plan.thumbnail_path {
            tokio::fs::remove_file(p).await.ok();
        }
        self.lock_store.release(local_id, self.process_type);
    }
}

#[async_trait]
impl Uploader for UploadWorker {
    async fn try_to_upload(
        &self,
        candidate: &LocalFile,
        collection_id: i64,
        forced_upload: bool,
        queue_size: usize,
    ) -> Result<RemoteFileRecord, UploadError> {
        self.try_to_upload_impl(candidate, collection_id, forced_upload, queue_size)
            .await
    }
}
