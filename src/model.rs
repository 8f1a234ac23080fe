use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel `updationTime` marking a remote file whose content must be
/// re-uploaded (spec.md glossary: `updationTime = -1`).
pub const UPDATION_TIME_SENTINEL: i64 = -1;

/// Sentinel remote id meaning "not yet uploaded".
pub const NO_REMOTE_ID: i64 = -1;

/// Which of the two cooperating processes a given orchestrator instance is.
/// Threaded through the Lock Store so ownership of an advisory lock can be
/// checked and released per-process (spec.md §3, §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessType {
    Foreground,
    Background,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Foreground => "foreground",
            ProcessType::Background => "background",
        }
    }
}

/// `file.type` in spec.md's data model. Extends the teacher crate's
/// `MediaType` with `LivePhoto`, which the spec's hash-matching rules
/// require (zipHash only applies to live photos).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Video,
    LivePhoto,
}

/// Current lifecycle position of a queue entry (spec.md §3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadItemStatus {
    NotStarted,
    InProgress,
    InBackground,
    Completed,
}

/// Wrapped symmetric key material for a file, as persisted on a local file
/// record. Decrypting/producing these is delegated to the crypto port; this
/// crate only shuttles the opaque bytes around.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptedKeyFields {
    pub encrypted_key: Option<String>,
    pub key_decryption_nonce: Option<String>,
}

/// A local file record as known to the (external) local files database.
/// Fields are exactly those the spec's worker contract reads or writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalFile {
    pub local_id: String,
    pub generated_id: i64,
    pub title: Option<String>,
    pub media_type: MediaType,
    pub uploaded_file_id: Option<i64>,
    pub collection_id: Option<i64>,
    pub updation_time: i64,
    pub owner_id: i64,
    pub key_fields: EncryptedKeyFields,
}

impl LocalFile {
    /// True once this file has a non-sentinel remote id (spec.md glossary).
    pub fn has_valid_remote_id(&self) -> bool {
        matches!(self.uploaded_file_id, Some(id) if id != NO_REMOTE_ID)
    }

    /// spec.md §4.F step 5: a candidate is an *update* iff it already has a
    /// remote id AND its updationTime is the re-upload sentinel.
    pub fn is_update_candidate(&self) -> bool {
        self.has_valid_remote_id() && self.updation_time == UPDATION_TIME_SENTINEL
    }
}

/// Output of the (external) media extractor, spec.md §6.6.
#[derive(Debug, Clone)]
pub struct MediaUploadData {
    pub source_file: std::path::PathBuf,
    pub thumbnail: Vec<u8>,
    pub file_hash: String,
    pub zip_hash: Option<String>,
    pub is_deleted: bool,
    /// Arbitrary metadata blob uploaded alongside the file (spec.md §4.F
    /// step 10): JSON-encoded and AEAD-sealed under the file key.
    pub metadata_for_upload: serde_json::Value,
    /// Whether `source_file` is a temporary copy that must be deleted once
    /// consumed (spec.md §4.F step 14).
    pub source_is_temporary: bool,
}

/// Key material produced when encrypting a file for the first time, or
/// recovered by decrypting an existing wrapped key for an update
/// (spec.md §4.F steps 6-7).
#[derive(Debug, Clone)]
pub struct FileAttributes {
    pub key: Vec<u8>,
    pub header: Vec<u8>,
}

/// A single-use pre-signed object-store PUT URL (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
    pub object_key: String,
}

/// Per-object upload metadata embedded in create/update file requests
/// (spec.md §6.3/§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectUploadInfo {
    pub object_key: String,
    pub decryption_header: String,
    pub size: u64,
}

/// Body of `POST {endpoint}/files` (spec.md §6.3).
#[derive(Debug, Clone, Serialize)]
pub struct CreateFileRequest {
    pub collection_id: i64,
    pub encrypted_key: String,
    pub key_decryption_nonce: String,
    pub file: ObjectUploadInfo,
    pub thumbnail: ObjectUploadInfo,
    pub metadata: EncryptedMetadata,
}

/// Body of `PUT {endpoint}/files/update` (spec.md §6.4).
#[derive(Debug, Clone, Serialize)]
pub struct UpdateFileRequest {
    pub id: i64,
    pub file: ObjectUploadInfo,
    pub thumbnail: ObjectUploadInfo,
    pub metadata: EncryptedMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMetadata {
    pub encrypted_data: String,
    pub decryption_header: String,
}

/// Response shape of the catalog's create/update endpoints (spec.md §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFileRecord {
    pub id: i64,
    pub updation_time: i64,
    pub owner_id: i64,
    pub collection_id: Option<i64>,
}

/// Current wall-clock time in microseconds, the unit the Lock Store and
/// heartbeat persist in (spec.md §3, §6.5).
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
