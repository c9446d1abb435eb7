//! Domain model for the Strata control plane.

pub mod agent;
pub mod backup;
pub mod checkpoint;
pub mod drtest;
pub mod queue;
pub mod replication;
pub mod repository;
pub mod schedule;
pub mod stats;
pub mod tiering;
pub mod verification;

pub use agent::{Agent, AgentMount, MountStatus, Organization};
pub use backup::{BackupRecord, BackupStatus};
pub use checkpoint::{BackupCheckpoint, CheckpointState};
pub use drtest::{DrRunbook, DrTestResult, DrTestSchedule};
pub use queue::{BackupQueueItem, QueueItemStatus};
pub use replication::{ReplicationState, ReplicationStatus};
pub use repository::{Repository, RepositoryKind};
pub use schedule::{
    BackupPriority, BackupSchedule, CompressionMode, MountUnavailableAction, RepositoryBinding,
    RetentionPolicy, ScriptSpec, TimeWindow,
};
pub use stats::StorageStats;
pub use tiering::{
    ColdRestoreRequest, ColdRestoreStatus, RestorePriority, SnapshotTierState, StorageTier,
    TierRule, TierTransition, TransitionStatus,
};
pub use verification::{
    TestRestoreResult, TestRestoreSettings, VerificationKind, VerificationRecord,
    VerificationSchedule, VerificationStatus,
};
