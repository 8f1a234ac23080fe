//! Trait ("port") definitions for every collaborator spec.md §1 and §6.6
//! declares out of scope: the media extractor, the cryptographic
//! primitives, the local files database, the collections service, the
//! connectivity probe, and the cooperative sync-stop signal.
//!
//! The orchestrator depends only on these traits; a host wires in concrete
//! adapters. Test code wires in hand-written fakes (spec.md §2.5 / SPEC_FULL
//! §2.5), the same substitution idiom `dropbox-dropbox-sdk-rust`'s test
//! suite uses for its `HttpClient` trait.

use crate::error::UploadError;
use crate::model::{EncryptedKeyFields, LocalFile, MediaType, MediaUploadData, RemoteFileRecord};
use async_trait::async_trait;

/// Produces hash/thumbnail/metadata for a candidate local file
/// (spec.md §6.6).
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn get_media_upload_data(&self, file: &LocalFile) -> Result<MediaUploadData, UploadError>;
}

/// The cryptographic primitives spec.md explicitly excludes from this
/// crate's scope (§1): secret-stream file encryption, AEAD-style chunk
/// encryption, and symmetric key wrapping/unwrapping.
pub trait CryptoProvider: Send + Sync {
    /// Encrypts `source` with a secret-stream primitive, writing ciphertext
    /// to `dest`. If `reuse_key` is `Some`, that key is used (update path);
    /// otherwise a fresh key is generated (spec.md §4.F step 7).
    fn encrypt_file_stream(
        &self,
        source: &std::path::Path,
        dest: &std::path::Path,
        reuse_key: Option<&[u8]>,
    ) -> anyhow::Result<crate::model::FileAttributes>;

    /// AEAD-style encryption of the thumbnail under `key`
    /// (spec.md §4.F step 8). Returns `(ciphertext, header)`.
    fn encrypt_thumbnail(&self, data: &[u8], key: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)>;

    /// AEAD-style encryption of the metadata blob under `key`
    /// (spec.md §4.F step 10). Returns `(ciphertext, header)`.
    fn encrypt_metadata(&self, json_bytes: &[u8], key: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)>;

    /// Wraps a file key under the destination collection's key
    /// (spec.md §4.F step 12). Returns `(ciphertext, nonce)`, both expected
    /// to be base64-encoded by the caller before transmission.
    fn wrap_key_for_collection(
        &self,
        file_key: &[u8],
        collection_key: &[u8],
    ) -> anyhow::Result<(Vec<u8>, Vec<u8>)>;

    /// Recovers the original file key from the wrapped key already stored
    /// on a record (spec.md §4.F step 6, update path).
    fn recover_file_key(
        &self,
        wrapped: &EncryptedKeyFields,
        collection_key: &[u8],
    ) -> anyhow::Result<Vec<u8>>;
}

/// The local catalog of known local/remote files (spec.md §6.6).
#[async_trait]
pub trait FilesDb: Send + Sync {
    async fn get_file(&self, local_id: &str) -> anyhow::Result<Option<LocalFile>>;
    async fn update(&self, file: &LocalFile) -> anyhow::Result<()>;
    async fn insert(&self, file: &LocalFile) -> anyhow::Result<()>;
    async fn delete(&self, generated_id: i64) -> anyhow::Result<()>;
    async fn get_uploaded_files_with_hashes(
        &self,
        hashes: &[String],
        media_type: MediaType,
        user_id: i64,
    ) -> anyhow::Result<Vec<LocalFile>>;
    async fn update_uploaded_file_across_collections(
        &self,
        remote_id: i64,
        record: &RemoteFileRecord,
    ) -> anyhow::Result<()>;
    async fn delete_local_file(&self, local_id: &str) -> anyhow::Result<()>;
    /// Marks a local file invalid (spec.md §4.F "Invalid-file handler").
    async fn mark_invalid(&self, local_id: &str) -> anyhow::Result<()>;
}

/// Server-side album grouping (spec.md §6.6).
#[async_trait]
pub trait CollectionsService: Send + Sync {
    async fn get_collection_key(&self, collection_id: i64) -> anyhow::Result<Vec<u8>>;
    async fn add_to_collection(
        &self,
        collection_id: i64,
        record: &RemoteFileRecord,
    ) -> anyhow::Result<RemoteFileRecord>;
    async fn link_local_file_to_existing_uploaded_file_in_another_collection(
        &self,
        collection_id: i64,
        local_id: &str,
        existing: &LocalFile,
    ) -> anyhow::Result<()>;
}

/// Live network-reachability probe (spec.md §6.6).
pub trait ConnectivityProbe: Send + Sync {
    fn is_wifi(&self) -> bool;
}

/// Cooperative cancellation signal from the external sync service
/// (spec.md §5 "Cancellation / stop").
pub trait SyncController: Send + Sync {
    fn should_stop(&self) -> bool;
}

/// Records invalid files for later surfacing in sync diagnostics
/// (spec.md §4.F "Invalid-file handler").
pub trait SyncTracker: Send + Sync {
    fn record_invalid_file(&self, local_id: &str, fallback_extension: &str);
}
