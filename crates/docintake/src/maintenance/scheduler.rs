//! Background task driving the reconciler and the capacity sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::capacity::{CapacityManager, EvictionRequests, SweepReport};
use super::reconciler::{ReconcileReport, Reconciler};

/// Results of one full maintenance pass.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub reconcile: Option<ReconcileReport>,
    pub sweep: Option<SweepReport>,
}

pub struct MaintenanceScheduler {
    capacity: Arc<CapacityManager>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
    stale_after: Duration,
}

/// Stops the scheduler when asked, or when dropped.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
    }
}

impl MaintenanceScheduler {
    pub fn new(
        capacity: Arc<CapacityManager>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            capacity,
            reconciler,
            interval,
            stale_after,
        }
    }

    /// Reconciles stale documents, then sweeps. Failures are logged and
    /// leave the matching report field empty.
    pub async fn run_once(&self) -> MaintenanceReport {
        let reconcile = match self.reconciler.reconcile_stale(self.stale_after).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Reconciliation failed: {}", e);
                None
            }
        };
        MaintenanceReport {
            reconcile,
            sweep: self.sweep().await,
        }
    }

    async fn sweep(&self) -> Option<SweepReport> {
        match self.capacity.sweep().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Capacity sweep failed: {}", e);
                None
            }
        }
    }

    /// Spawns the loop: a full pass on every interval tick, a sweep on
    /// every eviction request.
    pub fn start(self, mut requests: EvictionRequests) -> MaintenanceHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await; // skip immediate first tick

            let mut triggers_open = true;
            info!(interval_secs = self.interval.as_secs(), "Maintenance scheduler started");

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // Sender dropped counts as shutdown too
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = timer.tick() => {
                        self.run_once().await;
                    }
                    request = requests.recv(), if triggers_open => match request {
                        Some(()) => {
                            debug!("Eviction requested");
                            self.sweep().await;
                        }
                        None => triggers_open = false,
                    },
                }
            }

            info!("Maintenance scheduler stopped");
        });

        MaintenanceHandle { shutdown, join }
    }
}
