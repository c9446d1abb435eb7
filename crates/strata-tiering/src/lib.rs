//! # Strata Tiering
//!
//! Automatic storage tiering for snapshot copies: organization-scoped
//! transition rules, a fixed tier cost model, cold-restore warming with
//! bounded access windows, and per-organization cost reports, all driven by
//! the [`TieringScheduler`]'s cadenced jobs.

pub mod cold_restore;
pub mod costs;
pub mod reports;
pub mod rules;
pub mod scheduler;

pub use cold_restore::ColdRestoreManager;
pub use costs::{
    estimated_monthly_savings, monthly_storage_cost, retrieval_cost, warming_duration,
};
pub use reports::{CostReporter, TierCostLine, TierCostReport};
pub use rules::{TieringEngine, TieringRunSummary};
pub use scheduler::{TieringScheduler, TieringSchedulerConfig};
