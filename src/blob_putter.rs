//! Component C: streams an encrypted blob to a pre-signed URL
//! (spec.md §4.C).

use crate::error::UploadError;
use crate::model::PresignedUrl;
use crate::transport::{Transport, TransportError};
use crate::url_pool::UrlPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub struct BlobPutter {
    transport: Arc<dyn Transport>,
}

impl BlobPutter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// `put(url, localPath) -> objectKey`. `presigned` is the first URL to
    /// try; on a non-content-length failure a fresh one is drawn from
    /// `url_pool` for each subsequent attempt, since the previous one may
    /// have expired (spec.md §4.C).
    pub async fn put(
        &self,
        url_pool: &UrlPool,
        queue_size: usize,
        mut presigned: PresignedUrl,
        local_path: &Path,
        max_attempts: u32,
    ) -> Result<String, UploadError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let bytes = tokio::fs::read(local_path)
                .await
                .map_err(|e| UploadError::Other(e.to_string()))?;
            let len = bytes.len() as u64;

            match self.transport.put_blob(&presigned.url, bytes).await {
                Ok(()) => {
                    let elapsed_ms = started.elapsed().as_millis().max(1) as f64;
                    log::info!(
                        "blob put succeeded: {} bytes in {:.0} ms ({:.2} bytes/ms)",
                        len,
                        elapsed_ms,
                        len as f64 / elapsed_ms
                    );
                    return Ok(presigned.object_key.clone());
                }
                Err(TransportError::ContentLengthMismatch) if attempt == 1 => {
                    // Retry once on the same URL; the next loop iteration
                    // re-reads the file, picking up its current length.
                    continue;
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        return Err(classify(e));
                    }
                    presigned = url_pool.take(queue_size).await?;
                }
            }
        }
    }
}

fn classify(e: TransportError) -> UploadError {
    UploadError::Other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{CreateFileRequest, RemoteFileRecord, UpdateFileRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    enum Scripted {
        Ok,
        ContentLengthMismatch,
        ServerError,
    }

    struct FakeTransport {
        put_calls: AtomicUsize,
        script: AsyncMutex<Vec<Scripted>>,
        fetch_calls: AtomicUsize,
    }

    impl FakeTransport {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                put_calls: AtomicUsize::new(0),
                script: AsyncMutex::new(script),
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn fetch_presigned_urls(
            &self,
            _config: &Config,
            count: usize,
        ) -> Result<Vec<PresignedUrl>, TransportError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..count)
                .map(|i| PresignedUrl {
                    url: format!("https://example.test/refill-{}", i),
                    object_key: format!("refill-key-{}", i),
                })
                .collect())
        }

        async fn put_blob(&self, _url: &str, _bytes: Vec<u8>) -> Result<(), TransportError> {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().await;
            if script.is_empty() {
                return Ok(());
            }
            match script.remove(0) {
                Scripted::Ok => Ok(()),
                Scripted::ContentLengthMismatch => Err(TransportError::ContentLengthMismatch),
                Scripted::ServerError => Err(TransportError::Status {
                    status: 500,
                    body: "boom".into(),
                }),
            }
        }

        async fn create_file(
            &self,
            _config: &Config,
            _req: &CreateFileRequest,
        ) -> Result<RemoteFileRecord, TransportError> {
            unimplemented!()
        }

        async fn update_file(
            &self,
            _config: &Config,
            _req: &UpdateFileRequest,
        ) -> Result<RemoteFileRecord, TransportError> {
            unimplemented!()
        }
    }

    fn test_config() -> Config {
        Config::new(
            "https://api.example.test".into(),
            "token".into(),
            1,
            std::env::temp_dir(),
        )
    }

    async fn scratch_file(contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "blob-putter-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let transport = Arc::new(FakeTransport::new(vec![Scripted::Ok]));
        let pool = UrlPool::new(transport.clone(), test_config());
        let putter = BlobPutter::new(transport.clone());
        let path = scratch_file(b"hello").await;

        let key = putter
            .put(
                &pool,
                1,
                PresignedUrl {
                    url: "https://example.test/first".into(),
                    object_key: "first-key".into(),
                },
                &path,
                4,
            )
            .await
            .unwrap();

        assert_eq!(key, "first-key");
        assert_eq!(transport.put_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.fetch_calls.load(Ordering::SeqCst), 0);
        tokio::fs::remove_file(path).await.ok();
    }

    // Content-length mismatch on the first attempt is retried once, on the
    // same URL, without consulting the URL pool.
    #[tokio::test]
    async fn content_length_mismatch_on_first_attempt_retries_same_url() {
        let transport = Arc::new(FakeTransport::new(vec![
            Scripted::ContentLengthMismatch,
            Scripted::Ok,
        ]));
        let pool = UrlPool::new(transport.clone(), test_config());
        let putter = BlobPutter::new(transport.clone());
        let path = scratch_file(b"hello").await;

        let key = putter
            .put(
                &pool,
                1,
                PresignedUrl {
                    url: "https://example.test/first".into(),
                    object_key: "first-key".into(),
                },
                &path,
                4,
            )
            .await
            .unwrap();

        assert_eq!(key, "first-key");
        assert_eq!(transport.put_calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.fetch_calls.load(Ordering::SeqCst), 0);
        tokio::fs::remove_file(path).await.ok();
    }

    // A non-content-length failure draws a fresh URL from the pool for the
    // next attempt.
    #[tokio::test]
    async fn generic_failure_fetches_fresh_url_for_retry() {
        let transport = Arc::new(FakeTransport::new(vec![Scripted::ServerError, Scripted::Ok]));
        let pool = UrlPool::new(transport.clone(), test_config());
        let putter = BlobPutter::new(transport.clone());
        let path = scratch_file(b"hello").await;

        let key = putter
            .put(
                &pool,
                1,
                PresignedUrl {
                    url: "https://example.test/first".into(),
                    object_key: "first-key".into(),
                },
                &path,
                4,
            )
            .await
            .unwrap();

        assert_eq!(key, "refill-key-0");
        assert_eq!(transport.fetch_calls.load(Ordering::SeqCst), 1);
        tokio::fs::remove_file(path).await.ok();
    }

    #[tokio::test]
    async fn exhausting_max_attempts_propagates_error() {
        let transport = Arc::new(FakeTransport::new(vec![
            Scripted::ServerError,
            Scripted::ServerError,
            Scripted::ServerError,
        ]));
        let pool = UrlPool::new(transport.clone(), test_config());
        let putter = BlobPutter::new(transport.clone());
        let path = scratch_file(b"hello").await;

        let err = putter
            .put(
                &pool,
                1,
                PresignedUrl {
                    url: "https://example.test/first".into(),
                    object_key: "first-key".into(),
                },
                &path,
                3,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Other(_)));
        assert_eq!(transport.put_calls.load(Ordering::SeqCst), 3);
        tokio::fs::remove_file(path).await.ok();
    }
}
