use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Flat, host-supplied configuration, injected at composition time.
///
/// Mirrors `vault::VaultConfig` in shape: a plain `Clone`able struct with no
/// internal validation or file I/O of its own — reading/writing it to disk
/// is the host's concern, not this crate's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub endpoint: String,
    pub auth_token: String,
    pub user_id: i64,
    pub temp_dir: PathBuf,
    /// If false, uploads are refused on non-Wi-Fi unless forced
    /// (spec.md §4.F step 1).
    pub allow_mobile_data_backup: bool,

    /// Global in-progress concurrency limit (spec.md §3, default 4).
    #[serde(default = "default_global_limit")]
    pub global_concurrency_limit: usize,
    /// Video-only in-progress concurrency limit (spec.md §3, default 2).
    #[serde(default = "default_video_limit")]
    pub video_concurrency_limit: usize,
    /// Lock staleness window in days (spec.md §3, default 1).
    #[serde(default = "default_lock_expiry_days")]
    pub lock_expiry_days: f64,
    /// Background heartbeat death timeout in seconds (spec.md §3, default 5).
    #[serde(default = "default_heartbeat_death_secs")]
    pub heartbeat_death_timeout_secs: u64,
    /// Background liaison poll interval in seconds (spec.md §4.H, default 2).
    #[serde(default = "default_liaison_interval_secs")]
    pub background_liaison_interval_secs: u64,
    /// Per-item hard deadline in seconds (spec.md §4.F, default 50 minutes).
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Maximum attempts for blob PUT and catalog create/update
    /// (spec.md §4.C/§4.D, default 4).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed backoff between catalog retry attempts, in seconds
    /// (spec.md §4.D, default 3).
    #[serde(default = "default_catalog_backoff_secs")]
    pub catalog_retry_backoff_secs: u64,
}

fn default_global_limit() -> usize {
    4
}
fn default_video_limit() -> usize {
    2
}
fn default_lock_expiry_days() -> f64 {
    1.0
}
fn default_heartbeat_death_secs() -> u64 {
    5
}
fn default_liaison_interval_secs() -> u64 {
    2
}
fn default_upload_timeout_secs() -> u64 {
    50 * 60
}
fn default_max_attempts() -> u32 {
    4
}
fn default_catalog_backoff_secs() -> u64 {
    3
}

impl Config {
    /// Convenience constructor using every default tunable from spec.md §3.
    pub fn new(endpoint: String, auth_token: String, user_id: i64, temp_dir: PathBuf) -> Self {
        Self {
            endpoint,
            auth_token,
            user_id,
            temp_dir,
            allow_mobile_data_backup: false,
            global_concurrency_limit: default_global_limit(),
            video_concurrency_limit: default_video_limit(),
            lock_expiry_days: default_lock_expiry_days(),
            heartbeat_death_timeout_secs: default_heartbeat_death_secs(),
            background_liaison_interval_secs: default_liaison_interval_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            max_attempts: default_max_attempts(),
            catalog_retry_backoff_secs: default_catalog_backoff_secs(),
        }
    }
}
