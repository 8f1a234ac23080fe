//! Composition root (spec.md §9 "Singletons"): owns every component and
//! collaborator port, wired together behind an explicit `init`/`shutdown`
//! lifecycle rather than ambient global state.

use crate::blob_putter::BlobPutter;
use crate::catalog_client::CatalogClient;
use crate::collaborators::{
    CollectionsService, ConnectivityProbe, CryptoProvider, FilesDb, MediaExtractor,
    SyncController, SyncTracker,
};
use crate::config::Config;
use crate::error::UploadError;
use crate::events::{EventBus, OrchestratorEvent};
use crate::lock_store::SqliteLockStore;
use crate::mapping_resolver::MappingResolver;
use crate::model::{LocalFile, ProcessType, RemoteFileRecord};
use crate::queue_scheduler::QueueScheduler;
use crate::transport::Transport;
use crate::upload_worker::{UploadWorker, Uploader};
use crate::url_pool::UrlPool;
use crate::background_liaison::BackgroundLiaison;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Owns the whole component graph for one process (foreground or
/// background). Construct with [`Orchestrator::init`]; always pair with
/// [`Orchestrator::shutdown`] (spec.md §9 "ensure subscriptions are torn
/// down at shutdown").
pub struct Orchestrator {
    process_type: ProcessType,
    url_pool: Arc<UrlPool>,
    scheduler: Arc<QueueScheduler>,
    liaison: Option<Arc<BackgroundLiaison>>,
    events: EventBus,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wires every component, runs the Lock Store's startup sweep
    /// (spec.md §4.A), and — in the foreground process only — starts the
    /// Background Liaison (spec.md §4.H).
    #[allow(clippy::too_many_arguments)]
    pub async fn init(
        process_type: ProcessType,
        config: Config,
        lock_db_path: &Path,
        transport: Arc<dyn Transport>,
        media_extractor: Arc<dyn MediaExtractor>,
        crypto: Arc<dyn CryptoProvider>,
        files_db: Arc<dyn FilesDb>,
        collections: Arc<dyn CollectionsService>,
        connectivity: Arc<dyn ConnectivityProbe>,
        sync_controller: Arc<dyn SyncController>,
        sync_tracker: Arc<dyn SyncTracker>,
    ) -> anyhow::Result<Arc<Self>> {
        let lock_store = Arc::new(SqliteLockStore::open(lock_db_path)?);
        lock_store.run_startup_sweep(config.lock_expiry_days, config.heartbeat_death_timeout_secs);

        let events = EventBus::new();
        let url_pool = Arc::new(UrlPool::new(transport.clone(), config.clone()));
        let blob_putter = Arc::new(BlobPutter::new(transport.clone()));
        let catalog_client = Arc::new(CatalogClient::new(transport));
        let mapping_resolver = Arc::new(MappingResolver::new(files_db.clone(), collections.clone()));

        let worker: Arc<dyn Uploader> = Arc::new(UploadWorker::new(
            process_type,
            config.clone(),
            lock_store.clone(),
            media_extractor,
            crypto,
            files_db.clone(),
            collections.clone(),
            connectivity,
            sync_controller.clone(),
            sync_tracker,
            mapping_resolver,
            url_pool.clone(),
            blob_putter,
            catalog_client,
            events.clone(),
        ));

        let scheduler = QueueScheduler::new(
            config.clone(),
            worker,
            sync_controller,
            collections,
            lock_store,
            files_db,
        );

        let liaison = if process_type == ProcessType::Foreground {
            let liaison = Arc::new(BackgroundLiaison::new(&config, scheduler.clone()));
            liaison.start().await;
            Some(liaison)
        } else {
            None
        };

        let this = Arc::new(Self {
            process_type,
            url_pool,
            scheduler,
            liaison,
            events,
            event_loop: Mutex::new(None),
        });

        this.spawn_event_loop();
        Ok(this)
    }

    /// Subscribes to the two inbound signals (spec.md §9 "Event bus
    /// coupling"): a purchased subscription resets the URL pool's refill
    /// coalescer; a locally-deleted photo is pulled out of the `notStarted`
    /// queue with *InvalidFile*.
    fn spawn_event_loop(self: &Arc<Self>) {
        let this = self.clone();
        let mut rx = self.events.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(OrchestratorEvent::SubscriptionPurchased) => {
                        this.url_pool.reset_coalescer().await;
                    }
                    Ok(OrchestratorEvent::LocalPhotoDeleted { local_id }) => {
                        this.scheduler
                            .remove_where(
                                |f: &LocalFile| f.local_id == local_id,
                                UploadError::InvalidFile("local photo deleted".into()),
                            )
                            .await;
                    }
                    Ok(OrchestratorEvent::LocalPhotosUpdated { .. }) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        // Best-effort: if init raced a concurrent init/shutdown this would
        // leak a handle rather than panic, matching the teacher's
        // never-panic-on-lifecycle-races posture. In practice `init` owns
        // the only writer.
        if let Ok(mut guard) = self.event_loop.try_lock() {
            *guard = Some(handle);
        }
    }

    /// External entry point: submit `(file, collectionID)` to the Queue
    /// Scheduler (spec.md §4.G `enqueue`).
    pub async fn enqueue(
        &self,
        file: LocalFile,
        collection_id: i64,
    ) -> oneshot::Receiver<Result<RemoteFileRecord, UploadError>> {
        self.scheduler.enqueue(file, collection_id).await
    }

    /// `getCurrentSessionUploadCount()` (spec.md §4.I).
    pub async fn current_session_upload_count(&self) -> usize {
        self.scheduler.total_in_session().await
    }

    /// A clone of the event bus sender/subscriber handle, for the host to
    /// publish inbound signals and subscribe to outbound ones.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn process_type(&self) -> ProcessType {
        self.process_type
    }

    /// Stops the Background Liaison's poll loop and the event subscription
    /// task (spec.md §9).
    pub async fn shutdown(&self) {
        if let Some(liaison) = &self.liaison {
            liaison.stop().await;
        }
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EncryptedKeyFields, FileAttributes, MediaType, MediaUploadData, PresignedUrl};
    use crate::transport::TransportError;
    use async_trait::async_trait;

    struct FakeConnectivity;
    impl ConnectivityProbe for FakeConnectivity {
        fn is_wifi(&self) -> bool {
            true
        }
    }

    struct FakeSyncController;
    impl SyncController for FakeSyncController {
        fn should_stop(&self) -> bool {
            false
        }
    }

    struct FakeSyncTracker;
    impl SyncTracker for FakeSyncTracker {
        fn record_invalid_file(&self, _local_id: &str, _fallback_extension: &str) {}
    }

    struct FakeMediaExtractor;
    #[async_trait]
    impl MediaExtractor for FakeMediaExtractor {
        async fn get_media_upload_data(&self, _file: &LocalFile) -> Result<MediaUploadData, UploadError> {
            Ok(MediaUploadData {
                source_file: std::env::temp_dir().join("orchestrator-test-source.bin"),
                thumbnail: vec![1, 2, 3],
                file_hash: "hash".into(),
                zip_hash: None,
                is_deleted: false,
                metadata_for_upload: serde_json::json!({}),
                source_is_temporary: false,
            })
        }
    }

    struct FakeCrypto;
    impl CryptoProvider for FakeCrypto {
        fn encrypt_file_stream(
            &self,
            _source: &Path,
            dest: &Path,
            _reuse_key: Option<&[u8]>,
        ) -> anyhow::Result<FileAttributes> {
            std::fs::write(dest, b"ciphertext")?;
            Ok(FileAttributes {
                key: vec![1, 2, 3, 4],
                header: vec![9, 9],
            })
        }
        fn encrypt_thumbnail(&self, _data: &[u8], _key: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
            Ok((vec![7, 7], vec![8]))
        }
        fn encrypt_metadata(&self, _json_bytes: &[u8], _key: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
            Ok((vec![5, 5], vec![6]))
        }
        fn wrap_key_for_collection(&self, _file_key: &[u8], _collection_key: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
            Ok((vec![3, 3], vec![4]))
        }
        fn recover_file_key(&self, _wrapped: &EncryptedKeyFields, _collection_key: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1, 1, 1])
        }
    }

    struct FakeFilesDb;
    #[async_trait]
    impl FilesDb for FakeFilesDb {
        async fn get_file(&self, _local_id: &str) -> anyhow::Result<Option<LocalFile>> {
            Ok(None)
        }
        async fn update(&self, _file: &LocalFile) -> anyhow::Result<()> {
            Ok(())
        }
        async fn insert(&self, _file: &LocalFile) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete(&self, _generated_id: i64) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_uploaded_files_with_hashes(
            &self,
            _hashes: &[String],
            _media_type: MediaType,
            _user_id: i64,
        ) -> anyhow::Result<Vec<LocalFile>> {
            Ok(vec![])
        }
        async fn update_uploaded_file_across_collections(
            &self,
            _remote_id: i64,
            _record: &RemoteFileRecord,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_local_file(&self, _local_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn mark_invalid(&self, _local_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FakeCollectionsService;
    #[async_trait]
    impl CollectionsService for FakeCollectionsService {
        async fn get_collection_key(&self, _collection_id: i64) -> anyhow::Result<Vec<u8>> {
            Ok(vec![0, 0, 0])
        }
        async fn add_to_collection(
            &self,
            _collection_id: i64,
            record: &RemoteFileRecord,
        ) -> anyhow::Result<RemoteFileRecord> {
            Ok(record.clone())
        }
        async fn link_local_file_to_existing_uploaded_file_in_another_collection(
            &self,
            _collection_id: i64,
            _local_id: &str,
            _existing: &LocalFile,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FakeTransport;
    #[async_trait]
    impl Transport for FakeTransport {
        async fn fetch_presigned_urls(
            &self,
            _config: &Config,
            count: usize,
        ) -> Result<Vec<PresignedUrl>, TransportError> {
            Ok((0..count)
                .map(|i| PresignedUrl {
                    url: format!("https://example.test/{}", i),
                    object_key: format!("key-{}", i),
                })
                .collect())
        }
        async fn put_blob(&self, _url: &str, _bytes: Vec<u8>) -> Result<(), TransportError> {
            Ok(())
        }
        async fn create_file(
            &self,
            _config: &Config,
            _req: &crate::model::CreateFileRequest,
        ) -> Result<RemoteFileRecord, TransportError> {
            Ok(RemoteFileRecord {
                id: 1,
                updation_time: 1,
                owner_id: 1,
                collection_id: Some(9),
            })
        }
        async fn update_file(
            &self,
            _config: &Config,
            _req: &crate::model::UpdateFileRequest,
        ) -> Result<RemoteFileRecord, TransportError> {
            unimplemented!()
        }
    }

    fn candidate(local_id: &str) -> LocalFile {
        LocalFile {
            local_id: local_id.to_string(),
            generated_id: 1,
            title: Some("a.jpg".into()),
            media_type: MediaType::Image,
            uploaded_file_id: None,
            collection_id: Some(9),
            updation_time: 0,
            owner_id: 1,
            key_fields: EncryptedKeyFields::default(),
        }
    }

    #[tokio::test]
    async fn init_enqueue_and_shutdown_happy_path() {
        std::fs::write(std::env::temp_dir().join("orchestrator-test-source.bin"), b"data").unwrap();
        let lock_db_path = std::env::temp_dir().join(format!("orchestrator-test-{}.db", uuid::Uuid::new_v4()));

        let orchestrator = Orchestrator::init(
            ProcessType::Foreground,
            Config::new("https://api.example.test".into(), "token".into(), 1, std::env::temp_dir()),
            &lock_db_path,
            Arc::new(FakeTransport),
            Arc::new(FakeMediaExtractor),
            Arc::new(FakeCrypto),
            Arc::new(FakeFilesDb),
            Arc::new(FakeCollectionsService),
            Arc::new(FakeConnectivity),
            Arc::new(FakeSyncController),
            Arc::new(FakeSyncTracker),
        )
        .await
        .unwrap();

        let rx = orchestrator.enqueue(candidate("L1"), 9).await;
        let record = rx.await.unwrap().unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(orchestrator.current_session_upload_count().await, 0);

        orchestrator.shutdown().await;
        std::fs::remove_file(lock_db_path).ok();
    }

    #[tokio::test]
    async fn local_photo_deleted_event_removes_matching_not_started_item() {
        let lock_db_path = std::env::temp_dir().join(format!("orchestrator-test-{}.db", uuid::Uuid::new_v4()));

        // A zero-capacity dispatcher keeps every enqueued item `notStarted`
        // forever, so the deletion event has something to remove.
        let mut config = Config::new("https://api.example.test".into(), "token".into(), 1, std::env::temp_dir());
        config.global_concurrency_limit = 0;

        let orchestrator = Orchestrator::init(
            ProcessType::Background,
            config,
            &lock_db_path,
            Arc::new(FakeTransport),
            Arc::new(FakeMediaExtractor),
            Arc::new(FakeCrypto),
            Arc::new(FakeFilesDb),
            Arc::new(FakeCollectionsService),
            Arc::new(FakeConnectivity),
            Arc::new(FakeSyncController),
            Arc::new(FakeSyncTracker),
        )
        .await
        .unwrap();

        let rx = orchestrator.enqueue(candidate("L1"), 9).await;
        orchestrator
            .events()
            .publish(OrchestratorEvent::LocalPhotoDeleted {
                local_id: "L1".into(),
            });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, UploadError::InvalidFile(_)));

        orchestrator.shutdown().await;
        std::fs::remove_file(lock_db_path).ok();
    }
}
