//! # Strata Core
//!
//! Domain model and store contracts for the Strata backup control plane.
//!
//! This crate carries everything the orchestration layers agree on:
//!
//! - `model`: schedules, repositories, backup rows, checkpoints, replication
//!   status, verification and DR records, storage tiers, and queue items
//! - `store`: the async store traits the control plane runs against, plus an
//!   in-memory implementation used by tests and single-process deployments
//! - `notify`: the outbound notification contract
//! - `error`: the shared error kinds
//!
//! The control plane never talks to storage backends directly; the external
//! backup engine owns the repositories, and this crate only describes them.

pub mod error;
pub mod model;
pub mod notify;
pub mod store;

pub use error::{CoreError, Result};
pub use model::*;
pub use notify::{
    BackupNotification, NoopNotifier, Notifier, TestRestoreNotification, VerificationNotification,
};
pub use store::{
    AgentStore, BackupStore, CheckpointStore, DrStore, MemoryStore, QueueStore, ReplicationStore,
    RepositoryStore, ScheduleStore, StatsStore, Store, TierStore, VerificationStore,
};
