//! Store contracts the control plane requires.
//!
//! The store owns all persisted rows. Every method is async and cancel-safe:
//! callers cancel by dropping the future. Writers must assume concurrent
//! writers and never rely on read-then-write atomicity beyond what the
//! individual method provides (`get_or_create_replication` is the one
//! compound operation, and it is atomic per pair).
//!
//! Implementations must preserve original insertion order for schedule
//! bindings and stable ordering for queue queries; the backup scheduler's
//! priority tie-breaks depend on it.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Agent, BackupCheckpoint, BackupQueueItem, BackupRecord, BackupSchedule, ColdRestoreRequest,
    ColdRestoreStatus, DrRunbook, DrTestResult, DrTestSchedule, Organization, ReplicationStatus,
    Repository, SnapshotTierState, StorageStats, TierRule, TierTransition, VerificationKind,
    VerificationRecord, VerificationSchedule,
};

/// Backup schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn list_enabled_schedules(&self) -> Result<Vec<BackupSchedule>>;
    async fn get_schedule(&self, id: Uuid) -> Result<Option<BackupSchedule>>;
    async fn upsert_schedule(&self, schedule: &BackupSchedule) -> Result<()>;
}

/// Repository descriptors.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>>;
    async fn list_repositories_for_org(&self, org_id: Uuid) -> Result<Vec<Repository>>;
    async fn upsert_repository(&self, repository: &Repository) -> Result<()>;
}

/// Agents and their organizations.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>>;
    async fn upsert_agent(&self, agent: &Agent) -> Result<()>;
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>>;
    async fn list_organizations(&self) -> Result<Vec<Organization>>;
    async fn upsert_organization(&self, org: &Organization) -> Result<()>;
}

/// Backup execution rows.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn insert_backup(&self, backup: &BackupRecord) -> Result<()>;
    async fn update_backup(&self, backup: &BackupRecord) -> Result<()>;
    async fn get_backup(&self, id: Uuid) -> Result<Option<BackupRecord>>;
    async fn list_backups_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<BackupRecord>>;
    /// Rows not yet completed for one agent, oldest first.
    async fn list_incomplete_backups(&self, agent_id: Uuid) -> Result<Vec<BackupRecord>>;
}

/// Backup checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn insert_checkpoint(&self, checkpoint: &BackupCheckpoint) -> Result<()>;
    async fn update_checkpoint(&self, checkpoint: &BackupCheckpoint) -> Result<()>;
    async fn get_checkpoint(&self, id: Uuid) -> Result<Option<BackupCheckpoint>>;
    /// The schedule's single non-terminal checkpoint, if any.
    async fn find_active_for_schedule(&self, schedule_id: Uuid)
        -> Result<Option<BackupCheckpoint>>;
    async fn list_non_terminal_checkpoints(&self) -> Result<Vec<BackupCheckpoint>>;
}

/// Replication status rows, keyed by (schedule, source, target).
#[async_trait]
pub trait ReplicationStore: Send + Sync {
    /// Fetch the pair's row, creating an idle one when absent.
    async fn get_or_create_replication(
        &self,
        schedule_id: Uuid,
        source_repository_id: Uuid,
        target_repository_id: Uuid,
    ) -> Result<ReplicationStatus>;
    async fn update_replication(&self, status: &ReplicationStatus) -> Result<()>;
    async fn list_replication_for_schedule(
        &self,
        schedule_id: Uuid,
    ) -> Result<Vec<ReplicationStatus>>;
}

/// Verification schedules, runs, and the consecutive-failure counters.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn list_enabled_verification_schedules(&self) -> Result<Vec<VerificationSchedule>>;
    async fn get_verification_schedule(&self, id: Uuid) -> Result<Option<VerificationSchedule>>;
    async fn upsert_verification_schedule(&self, schedule: &VerificationSchedule) -> Result<()>;
    async fn insert_verification(&self, record: &VerificationRecord) -> Result<()>;
    async fn update_verification(&self, record: &VerificationRecord) -> Result<()>;
    async fn consecutive_failures(
        &self,
        repository_id: Uuid,
        kind: VerificationKind,
    ) -> Result<u32>;
    async fn set_consecutive_failures(
        &self,
        repository_id: Uuid,
        kind: VerificationKind,
        count: u32,
    ) -> Result<()>;
}

/// DR runbooks, schedules, and results.
#[async_trait]
pub trait DrStore: Send + Sync {
    async fn list_enabled_dr_schedules(&self) -> Result<Vec<DrTestSchedule>>;
    async fn upsert_dr_schedule(&self, schedule: &DrTestSchedule) -> Result<()>;
    async fn get_runbook(&self, id: Uuid) -> Result<Option<DrRunbook>>;
    async fn upsert_runbook(&self, runbook: &DrRunbook) -> Result<()>;
    async fn insert_dr_result(&self, result: &DrTestResult) -> Result<()>;
    async fn list_dr_results(&self, runbook_id: Uuid) -> Result<Vec<DrTestResult>>;
}

/// Storage statistics samples.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn insert_storage_stats(&self, stats: &StorageStats) -> Result<()>;
    async fn latest_storage_stats(&self, repository_id: Uuid) -> Result<Option<StorageStats>>;
}

/// Tier states, rules, transitions, and cold-restore requests.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Enabled rules across all organizations, ascending priority.
    async fn list_enabled_tier_rules(&self) -> Result<Vec<TierRule>>;
    async fn upsert_tier_rule(&self, rule: &TierRule) -> Result<()>;
    async fn insert_tier_state(&self, state: &SnapshotTierState) -> Result<()>;
    async fn update_tier_state(&self, state: &SnapshotTierState) -> Result<()>;
    async fn get_tier_state(&self, id: Uuid) -> Result<Option<SnapshotTierState>>;
    async fn list_tier_states(&self) -> Result<Vec<SnapshotTierState>>;
    /// All copies of one snapshot across repositories.
    async fn tier_states_for_snapshot(&self, snapshot_id: &str)
        -> Result<Vec<SnapshotTierState>>;
    async fn insert_tier_transition(&self, transition: &TierTransition) -> Result<()>;
    async fn update_tier_transition(&self, transition: &TierTransition) -> Result<()>;
    async fn list_tier_transitions(&self) -> Result<Vec<TierTransition>>;
    async fn insert_cold_restore(&self, request: &ColdRestoreRequest) -> Result<()>;
    async fn update_cold_restore(&self, request: &ColdRestoreRequest) -> Result<()>;
    async fn list_cold_restores(
        &self,
        status: Option<ColdRestoreStatus>,
    ) -> Result<Vec<ColdRestoreRequest>>;
}

/// Per-agent backup queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue_backup(&self, item: &BackupQueueItem) -> Result<()>;
    async fn get_queue_item(&self, id: Uuid) -> Result<Option<BackupQueueItem>>;
    async fn update_queue_item(&self, item: &BackupQueueItem) -> Result<()>;
    /// Oldest queued item of the numerically lowest priority for the agent
    /// (priority ASC, queued_at ASC).
    async fn next_pending(&self, agent_id: Uuid) -> Result<Option<BackupQueueItem>>;
    /// The agent's single running item, if any.
    async fn running_for_agent(&self, agent_id: Uuid) -> Result<Option<BackupQueueItem>>;
}

/// The full store surface the control plane runs against.
pub trait Store:
    ScheduleStore
    + RepositoryStore
    + AgentStore
    + BackupStore
    + CheckpointStore
    + ReplicationStore
    + VerificationStore
    + DrStore
    + StatsStore
    + TierStore
    + QueueStore
{
}

impl<T> Store for T where
    T: ScheduleStore
        + RepositoryStore
        + AgentStore
        + BackupStore
        + CheckpointStore
        + ReplicationStore
        + VerificationStore
        + DrStore
        + StatsStore
        + TierStore
        + QueueStore
{
}
