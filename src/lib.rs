//! Concurrency-aware upload orchestrator core for an end-to-end encrypted
//! photo/file backup engine: admission queue, cross-process lock manager,
//! retry/failure classification, and content-hash dedupe. Everything else
//! (media extraction, cryptography, the local catalog, collections, the
//! network client, connectivity) is an injected collaborator trait.

pub mod background_liaison;
pub mod blob_putter;
pub mod catalog_client;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod lock_store;
pub mod mapping_resolver;
pub mod model;
pub mod orchestrator;
pub mod queue_scheduler;
pub mod retry;
pub mod transport;
pub mod upload_worker;
pub mod url_pool;

pub use config::Config;
pub use error::UploadError;
pub use events::{EventBus, OrchestratorEvent};
pub use model::{LocalFile, ProcessType, RemoteFileRecord};
pub use orchestrator::Orchestrator;
