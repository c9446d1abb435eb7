//! # Strata Schedulers
//!
//! The orchestration substrate of the Strata backup control plane: the set
//! of cooperating schedulers and state managers that decide when work runs,
//! where it runs, how failure and interruption are handled, and how
//! progress and results are persisted.
//!
//! - `backup`: cron-driven backup execution with gating, retry/failover
//!   across repository bindings, replication, retention, and resume
//! - `checkpoint`: throttled progress persistence and checkpoint lifecycle
//! - `queue`: the per-agent priority queue with preemption
//! - `verification` / `restore_test`: repository checks and sampled restore
//!   tests with consecutive-failure notification
//! - `drtest`: scheduled disaster-recovery drills
//! - `stats`: the daily storage statistics collector
//! - `mount_manager`: lease-bounded FUSE snapshot mounts
//! - `cron_set` / `scripts` / `secrets`: the shared cron reconcile idiom,
//!   pre/post script runner, and injected secret resolution
//!
//! Every scheduler follows the same shape: `start`/`stop`, a refresh loop
//! that reconciles cron entries against the store, and per-firing tasks
//! whose failures are captured into rows, never raised past the loop.

pub mod backup;
pub mod checkpoint;
pub mod cron_set;
pub mod drtest;
pub mod mount_manager;
pub mod queue;
pub mod scripts;
pub mod secrets;
pub mod stats;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing;

pub use backup::{
    BackupScheduler, BackupSchedulerConfig, BackupSchedulerStatistics, ResumeInfo,
};
pub use checkpoint::{CheckpointConfig, CheckpointManager};
pub use cron_set::{CronSet, ReconcileOutcome};
pub use drtest::{DrTestScheduler, DrTestSchedulerConfig};
pub use mount_manager::{MountLease, MountManager, MountManagerConfig};
pub use queue::BackupQueueManager;
pub use restore_test::TestRestoreRunner;
pub use scripts::{run_script, ScriptOutcome};
pub use secrets::{DecryptFn, PasswordFn, RepositoryCredentials};
pub use stats::{StatsCollector, StatsCollectorConfig};
pub use verification::{VerificationScheduler, VerificationSchedulerConfig};
