//! Background upkeep: capacity-bounded eviction and the stale-PROCESSING
//! reconciler, both driven by [`MaintenanceScheduler`].

pub mod capacity;
pub mod reconciler;
pub mod scheduler;

pub use capacity::{CapacityManager, CapacityPolicy, EvictionRequests, EvictionTrigger, SweepReport};
pub use reconciler::{ReconcileReport, Reconciler};
pub use scheduler::{MaintenanceHandle, MaintenanceReport, MaintenanceScheduler};
