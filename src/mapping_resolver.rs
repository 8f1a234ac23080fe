//! Component E: decides whether a candidate upload is actually a duplicate
//! of content already uploaded elsewhere (spec.md §4.E).

use crate::collaborators::{CollectionsService, FilesDb};
use crate::model::{LocalFile, MediaType, MediaUploadData};
use std::sync::Arc;

pub struct MappingResolver {
    files_db: Arc<dyn FilesDb>,
    collections: Arc<dyn CollectionsService>,
}

impl MappingResolver {
    pub fn new(files_db: Arc<dyn FilesDb>, collections: Arc<dyn CollectionsService>) -> Self {
        Self {
            files_db,
            collections,
        }
    }

    /// Returns `true` when the candidate was resolved against existing
    /// content and the caller should skip a fresh upload; `false` means
    /// proceed normally (spec.md §4.E).
    pub async fn resolve(
        &self,
        media: &MediaUploadData,
        candidate: &LocalFile,
        target_collection_id: i64,
    ) -> anyhow::Result<bool> {
        if candidate.has_valid_remote_id() {
            return Ok(false);
        }

        let mut hashes = vec![media.file_hash.clone()];
        if candidate.media_type == MediaType::LivePhoto {
            if let Some(zip_hash) = &media.zip_hash {
                hashes.push(zip_hash.clone());
            }
        }

        let matches = self
            .files_db
            .get_uploaded_files_with_hashes(&hashes, candidate.media_type, candidate.owner_id)
            .await?;

        if matches.is_empty() {
            return Ok(false);
        }

        for existing in &matches {
            let same_collection = existing.collection_id == Some(target_collection_id);

            if same_collection && existing.local_id == candidate.local_id {
                // Case A: already the same record, just stale locally.
                self.files_db.delete_local_file(&candidate.local_id).await?;
                return Ok(true);
            }

            if same_collection && existing.local_id.is_empty() {
                // Case B: an orphaned remote record in the right collection.
                let mut stamped = existing.clone();
                stamped.local_id = candidate.local_id.clone();
                self.files_db.update(&stamped).await?;
                self.files_db.delete_local_file(&candidate.local_id).await?;
                return Ok(true);
            }

            if !same_collection {
                // Case C/D: the content already exists, just elsewhere.
                self.collections
                    .link_local_file_to_existing_uploaded_file_in_another_collection(
                        target_collection_id,
                        &candidate.local_id,
                        existing,
                    )
                    .await?;
                return Ok(true);
            }
        }

        // Case E: same collection, but every match belongs to a different,
        // non-null localID. Treated as a likely device-side duplicate.
        Ok(false)
    }
}
