//! Fails documents left in PROCESSING by a crashed or killed ingestion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::{Classification, DocumentStatus};
use crate::store::{DocumentStore, ObjectStore};

pub const ABANDONED_MESSAGE: &str = "processing abandoned";
const RECONCILE_STEP: &str = "reconcile";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Documents moved to FAILED.
    pub failed: Vec<String>,
    /// Documents that finished on their own before they could be failed.
    pub raced: Vec<String>,
}

pub struct Reconciler {
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
}

impl Reconciler {
    pub fn new(objects: Arc<dyn ObjectStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { objects, documents }
    }

    /// Marks every document that has sat in PROCESSING for longer than
    /// `max_age` as FAILED and removes its object.
    pub async fn reconcile_stale(&self, max_age: Duration) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();
        let cutoff = match chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        {
            Some(cutoff) => cutoff,
            None => return Ok(report),
        };

        let stale = self.documents.find_stale_processing(cutoff).await?;
        if stale.is_empty() {
            debug!("No stale PROCESSING documents");
            return Ok(report);
        }

        let classification = Classification::failure(RECONCILE_STEP, ABANDONED_MESSAGE);
        for document in stale {
            match self
                .documents
                .update_status_and_classification(
                    &document.id,
                    DocumentStatus::Failed,
                    Some(&classification),
                )
                .await
            {
                Ok(_) => {}
                Err(StoreError::InvalidTransition { .. }) | Err(StoreError::NotFound(_)) => {
                    debug!(document_id = %document.id, "Document left PROCESSING concurrently");
                    report.raced.push(document.id);
                    continue;
                }
                Err(e) => {
                    warn!(document_id = %document.id, "Failed to reconcile document: {}", e);
                    continue;
                }
            }

            if let Err(e) = self
                .objects
                .delete(&document.bucket_name, &document.storage_key)
                .await
            {
                warn!(document_id = %document.id, "Rollback of stored object failed: {}", e);
            }
            report.failed.push(document.id);
        }

        info!(
            failed = report.failed.len(),
            "Stale PROCESSING documents reconciled"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, Upload};
    use crate::store::{FileObjectStore, SqliteDocumentStore};

    #[tokio::test]
    async fn test_reconcile_marks_stale_processing_failed() {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(FileObjectStore::new(dir.path()));
        let documents = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());

        let upload = Upload::pdf("stuck.pdf", "tester", b"%PDF-1.5".to_vec());
        let stuck = Document::new_uploaded(&upload, "documents");
        objects
            .put("documents", &stuck.storage_key, &upload.bytes, "application/pdf")
            .await
            .unwrap();
        documents.insert(&stuck).await.unwrap();
        documents
            .update_status_and_classification(&stuck.id, DocumentStatus::Processing, None)
            .await
            .unwrap();

        let reconciler = Reconciler::new(objects.clone(), documents.clone());

        // Not stale yet
        let report = reconciler
            .reconcile_stale(Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(report.failed.is_empty());

        let report = reconciler.reconcile_stale(Duration::ZERO).await.unwrap();
        assert_eq!(report.failed, vec![stuck.id.clone()]);

        let stored = documents.find_by_id(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        let classification = stored.classification.unwrap();
        assert_eq!(
            classification.attributes.get("error").and_then(|v| v.as_str()),
            Some(ABANDONED_MESSAGE)
        );
        assert!(objects.get("documents", &stuck.storage_key).await.is_err());

        // Second run finds nothing
        let report = reconciler.reconcile_stale(Duration::ZERO).await.unwrap();
        assert!(report.failed.is_empty());
    }
}
