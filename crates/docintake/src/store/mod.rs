//! Persistence contracts used by the pipeline, with a filesystem object
//! store and a SQLite document store.

pub mod migrations;
pub mod object;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{Classification, Document, DocumentStatus};

pub use object::FileObjectStore;
pub use sqlite::SqliteDocumentStore;

/// Blob storage addressed by `(bucket, key)`. Writes are atomic per key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Document metadata storage. Each status change is a single atomic write
/// that only succeeds from an allowed predecessor state.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, document: &Document) -> Result<(), StoreError>;

    /// Moves `id` to `status`, storing `classification` when the new state
    /// carries one. Returns the updated record.
    ///
    /// Fails with [`StoreError::InvalidTransition`] when the stored state
    /// may not move to `status`, and [`StoreError::NotFound`] when no such
    /// document exists.
    async fn update_status_and_classification(
        &self,
        id: &str,
        status: DocumentStatus,
        classification: Option<&Classification>,
    ) -> Result<Document, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Up to `n` documents, oldest upload first.
    async fn find_oldest(&self, n: usize) -> Result<Vec<Document>, StoreError>;

    async fn sum_file_sizes(&self) -> Result<u64, StoreError>;

    /// Returns whether a row was removed; deleting a missing id is not an error.
    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError>;

    /// Distinct categories of PROCESSED documents, excluding sentinels.
    async fn known_categories(&self) -> Result<Vec<String>, StoreError>;

    /// PROCESSING documents whose last update is older than `cutoff`.
    async fn find_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError>;
}
