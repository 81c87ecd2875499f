//! Oldest-first eviction that keeps stored bytes under a ceiling.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::CapacityConfig;
use crate::error::StoreError;
use crate::model::Document;
use crate::store::{DocumentStore, ObjectStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPolicy {
    pub ceiling_bytes: u64,
    /// Bytes to free once the ceiling is crossed.
    pub eviction_target_bytes: u64,
    /// Documents fetched per lookup.
    pub batch_size: usize,
}

impl CapacityPolicy {
    pub fn from_config(config: &CapacityConfig) -> Self {
        Self {
            ceiling_bytes: config.ceiling_bytes,
            eviction_target_bytes: config.eviction_target_bytes,
            batch_size: config.batch_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub total_before: u64,
    pub over_ceiling: bool,
    pub bytes_freed: u64,
    /// Evicted document ids, oldest first.
    pub evicted: Vec<String>,
    /// Documents whose eviction failed; left in place.
    pub skipped: Vec<String>,
}

impl SweepReport {
    /// Whether the target was reached, or nothing needed freeing.
    pub fn goal_met(&self, policy: &CapacityPolicy) -> bool {
        !self.over_ceiling || self.bytes_freed >= policy.eviction_target_bytes
    }
}

pub struct CapacityManager {
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    policy: CapacityPolicy,
    sweep_lock: Mutex<()>,
}

impl CapacityManager {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        policy: CapacityPolicy,
    ) -> Self {
        Self {
            objects,
            documents,
            policy,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Runs one sweep. Concurrent callers queue up; by the time a queued
    /// sweep runs the store is usually back under the ceiling and it
    /// returns without evicting.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let _guard = self.sweep_lock.lock().await;
        self.sweep_locked()
            .instrument(info_span!("capacity_sweep"))
            .await
    }

    async fn sweep_locked(&self) -> Result<SweepReport, StoreError> {
        let policy = self.policy;
        let total = self.documents.sum_file_sizes().await?;
        let mut report = SweepReport {
            total_before: total,
            over_ceiling: total > policy.ceiling_bytes,
            ..Default::default()
        };

        if !report.over_ceiling {
            debug!(total, ceiling = policy.ceiling_bytes, "Storage under ceiling");
            return Ok(report);
        }

        info!(
            total,
            ceiling = policy.ceiling_bytes,
            target = policy.eviction_target_bytes,
            "Storage above ceiling, evicting oldest documents"
        );

        let mut skipped: HashSet<String> = HashSet::new();
        'sweep: while report.bytes_freed < policy.eviction_target_bytes {
            // Over-fetch by the skipped count so each round has fresh candidates
            let batch = self
                .documents
                .find_oldest(policy.batch_size + skipped.len())
                .await?;
            let candidates: Vec<Document> = batch
                .into_iter()
                .filter(|d| !skipped.contains(&d.id))
                .collect();
            if candidates.is_empty() {
                break;
            }

            for document in candidates {
                if report.bytes_freed >= policy.eviction_target_bytes {
                    break 'sweep;
                }
                match self.evict(&document).await {
                    Ok(true) => {
                        report.bytes_freed += document.file_size;
                        report.evicted.push(document.id);
                    }
                    Ok(false) => {
                        debug!(document_id = %document.id, "Document already removed");
                    }
                    Err(e) => {
                        warn!(document_id = %document.id, "Eviction failed, skipping: {}", e);
                        skipped.insert(document.id.clone());
                        report.skipped.push(document.id);
                    }
                }
            }
        }

        info!(
            evicted = report.evicted.len(),
            skipped = report.skipped.len(),
            bytes_freed = report.bytes_freed,
            "Capacity sweep finished"
        );
        Ok(report)
    }

    /// Object first: a record whose object is gone can be retried, an
    /// object without a record would be invisible to later sweeps.
    ///
    /// Returns `false` when the record was already gone.
    async fn evict(&self, document: &Document) -> Result<bool, StoreError> {
        self.objects
            .delete(&document.bucket_name, &document.storage_key)
            .await?;
        self.documents.delete_by_id(&document.id).await
    }
}

/// Cheap handle that asks the scheduler for a sweep.
///
/// Requests coalesce: while one is pending, further ones are dropped.
#[derive(Clone, Debug)]
pub struct EvictionTrigger {
    tx: mpsc::Sender<()>,
}

/// Receiving side of [`EvictionTrigger`], owned by the scheduler.
#[derive(Debug)]
pub struct EvictionRequests {
    rx: mpsc::Receiver<()>,
}

impl EvictionTrigger {
    pub fn channel() -> (Self, EvictionRequests) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, EvictionRequests { rx })
    }

    /// Never blocks and never fails the caller.
    pub fn trigger(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Eviction scheduler is not running; request dropped");
            }
        }
    }
}

impl EvictionRequests {
    /// `None` once every trigger has been dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
