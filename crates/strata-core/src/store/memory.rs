//! In-memory store, used by tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{
    Agent, BackupCheckpoint, BackupQueueItem, BackupRecord, BackupSchedule, BackupStatus,
    ColdRestoreRequest, ColdRestoreStatus, DrRunbook, DrTestResult, DrTestSchedule, Organization,
    QueueItemStatus, ReplicationStatus, Repository, SnapshotTierState, StorageStats, TierRule,
    TierTransition, VerificationKind, VerificationRecord, VerificationSchedule,
};
use crate::store::{
    AgentStore, BackupStore, CheckpointStore, DrStore, QueueStore, ReplicationStore,
    RepositoryStore, ScheduleStore, StatsStore, TierStore, VerificationStore,
};

/// Hash-map backed store. Row vectors keep insertion order where the
/// contracts require stable ordering (backups, queue items, tier states).
#[derive(Default)]
pub struct MemoryStore {
    schedules: RwLock<HashMap<Uuid, BackupSchedule>>,
    repositories: RwLock<HashMap<Uuid, Repository>>,
    agents: RwLock<HashMap<Uuid, Agent>>,
    organizations: RwLock<HashMap<Uuid, Organization>>,
    backups: RwLock<Vec<BackupRecord>>,
    checkpoints: RwLock<HashMap<Uuid, BackupCheckpoint>>,
    replication: RwLock<Vec<ReplicationStatus>>,
    verification_schedules: RwLock<HashMap<Uuid, VerificationSchedule>>,
    verifications: RwLock<Vec<VerificationRecord>>,
    failure_counters: RwLock<HashMap<(Uuid, VerificationKind), u32>>,
    dr_schedules: RwLock<HashMap<Uuid, DrTestSchedule>>,
    runbooks: RwLock<HashMap<Uuid, DrRunbook>>,
    dr_results: RwLock<Vec<DrTestResult>>,
    storage_stats: RwLock<Vec<StorageStats>>,
    tier_rules: RwLock<HashMap<Uuid, TierRule>>,
    tier_states: RwLock<Vec<SnapshotTierState>>,
    tier_transitions: RwLock<Vec<TierTransition>>,
    cold_restores: RwLock<Vec<ColdRestoreRequest>>,
    queue: RwLock<Vec<BackupQueueItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn list_enabled_schedules(&self) -> Result<Vec<BackupSchedule>> {
        let schedules = self.schedules.read().await;
        Ok(schedules.values().filter(|s| s.enabled).cloned().collect())
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<BackupSchedule>> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn upsert_schedule(&self, schedule: &BackupSchedule) -> Result<()> {
        self.schedules
            .write()
            .await
            .insert(schedule.id, schedule.clone());
        Ok(())
    }
}

#[async_trait]
impl RepositoryStore for MemoryStore {
    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>> {
        Ok(self.repositories.read().await.get(&id).cloned())
    }

    async fn list_repositories_for_org(&self, org_id: Uuid) -> Result<Vec<Repository>> {
        let repositories = self.repositories.read().await;
        Ok(repositories
            .values()
            .filter(|r| r.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn upsert_repository(&self, repository: &Repository) -> Result<()> {
        self.repositories
            .write()
            .await
            .insert(repository.id, repository.clone());
        Ok(())
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        self.agents.write().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        Ok(self.organizations.read().await.get(&id).cloned())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        Ok(self.organizations.read().await.values().cloned().collect())
    }

    async fn upsert_organization(&self, org: &Organization) -> Result<()> {
        self.organizations
            .write()
            .await
            .insert(org.id, org.clone());
        Ok(())
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn insert_backup(&self, backup: &BackupRecord) -> Result<()> {
        self.backups.write().await.push(backup.clone());
        Ok(())
    }

    async fn update_backup(&self, backup: &BackupRecord) -> Result<()> {
        let mut backups = self.backups.write().await;
        let row = backups
            .iter_mut()
            .find(|b| b.id == backup.id)
            .ok_or_else(|| CoreError::NotFound(format!("backup {}", backup.id)))?;
        *row = backup.clone();
        Ok(())
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        Ok(self
            .backups
            .read()
            .await
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    async fn list_backups_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<BackupRecord>> {
        Ok(self
            .backups
            .read()
            .await
            .iter()
            .filter(|b| b.schedule_id == schedule_id)
            .cloned()
            .collect())
    }

    async fn list_incomplete_backups(&self, agent_id: Uuid) -> Result<Vec<BackupRecord>> {
        Ok(self
            .backups
            .read()
            .await
            .iter()
            .filter(|b| b.agent_id == agent_id && b.status != BackupStatus::Completed)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn insert_checkpoint(&self, checkpoint: &BackupCheckpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn update_checkpoint(&self, checkpoint: &BackupCheckpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        if !checkpoints.contains_key(&checkpoint.id) {
            return Err(CoreError::NotFound(format!("checkpoint {}", checkpoint.id)));
        }
        checkpoints.insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn get_checkpoint(&self, id: Uuid) -> Result<Option<BackupCheckpoint>> {
        Ok(self.checkpoints.read().await.get(&id).cloned())
    }

    async fn find_active_for_schedule(
        &self,
        schedule_id: Uuid,
    ) -> Result<Option<BackupCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .find(|c| c.schedule_id == schedule_id && !c.state.is_terminal())
            .cloned())
    }

    async fn list_non_terminal_checkpoints(&self) -> Result<Vec<BackupCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| !c.state.is_terminal())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReplicationStore for MemoryStore {
    async fn get_or_create_replication(
        &self,
        schedule_id: Uuid,
        source_repository_id: Uuid,
        target_repository_id: Uuid,
    ) -> Result<ReplicationStatus> {
        let mut rows = self.replication.write().await;
        if let Some(row) = rows.iter().find(|r| {
            r.schedule_id == schedule_id
                && r.source_repository_id == source_repository_id
                && r.target_repository_id == target_repository_id
        }) {
            return Ok(row.clone());
        }
        let row = ReplicationStatus::new(schedule_id, source_repository_id, target_repository_id);
        rows.push(row.clone());
        Ok(row)
    }

    async fn update_replication(&self, status: &ReplicationStatus) -> Result<()> {
        let mut rows = self.replication.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == status.id)
            .ok_or_else(|| CoreError::NotFound(format!("replication status {}", status.id)))?;
        *row = status.clone();
        Ok(())
    }

    async fn list_replication_for_schedule(
        &self,
        schedule_id: Uuid,
    ) -> Result<Vec<ReplicationStatus>> {
        Ok(self
            .replication
            .read()
            .await
            .iter()
            .filter(|r| r.schedule_id == schedule_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VerificationStore for MemoryStore {
    async fn list_enabled_verification_schedules(&self) -> Result<Vec<VerificationSchedule>> {
        Ok(self
            .verification_schedules
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn get_verification_schedule(&self, id: Uuid) -> Result<Option<VerificationSchedule>> {
        Ok(self.verification_schedules.read().await.get(&id).cloned())
    }

    async fn upsert_verification_schedule(&self, schedule: &VerificationSchedule) -> Result<()> {
        self.verification_schedules
            .write()
            .await
            .insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn insert_verification(&self, record: &VerificationRecord) -> Result<()> {
        self.verifications.write().await.push(record.clone());
        Ok(())
    }

    async fn update_verification(&self, record: &VerificationRecord) -> Result<()> {
        let mut rows = self.verifications.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| CoreError::NotFound(format!("verification {}", record.id)))?;
        *row = record.clone();
        Ok(())
    }

    async fn consecutive_failures(
        &self,
        repository_id: Uuid,
        kind: VerificationKind,
    ) -> Result<u32> {
        Ok(self
            .failure_counters
            .read()
            .await
            .get(&(repository_id, kind))
            .copied()
            .unwrap_or(0))
    }

    async fn set_consecutive_failures(
        &self,
        repository_id: Uuid,
        kind: VerificationKind,
        count: u32,
    ) -> Result<()> {
        self.failure_counters
            .write()
            .await
            .insert((repository_id, kind), count);
        Ok(())
    }
}

#[async_trait]
impl DrStore for MemoryStore {
    async fn list_enabled_dr_schedules(&self) -> Result<Vec<DrTestSchedule>> {
        Ok(self
            .dr_schedules
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn upsert_dr_schedule(&self, schedule: &DrTestSchedule) -> Result<()> {
        self.dr_schedules
            .write()
            .await
            .insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_runbook(&self, id: Uuid) -> Result<Option<DrRunbook>> {
        Ok(self.runbooks.read().await.get(&id).cloned())
    }

    async fn upsert_runbook(&self, runbook: &DrRunbook) -> Result<()> {
        self.runbooks
            .write()
            .await
            .insert(runbook.id, runbook.clone());
        Ok(())
    }

    async fn insert_dr_result(&self, result: &DrTestResult) -> Result<()> {
        self.dr_results.write().await.push(result.clone());
        Ok(())
    }

    async fn list_dr_results(&self, runbook_id: Uuid) -> Result<Vec<DrTestResult>> {
        Ok(self
            .dr_results
            .read()
            .await
            .iter()
            .filter(|r| r.runbook_id == runbook_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn insert_storage_stats(&self, stats: &StorageStats) -> Result<()> {
        self.storage_stats.write().await.push(stats.clone());
        Ok(())
    }

    async fn latest_storage_stats(&self, repository_id: Uuid) -> Result<Option<StorageStats>> {
        Ok(self
            .storage_stats
            .read()
            .await
            .iter()
            .filter(|s| s.repository_id == repository_id)
            .max_by_key(|s| s.collected_at)
            .cloned())
    }
}

#[async_trait]
impl TierStore for MemoryStore {
    async fn list_enabled_tier_rules(&self) -> Result<Vec<TierRule>> {
        let mut rules: Vec<TierRule> = self
            .tier_rules
            .read()
            .await
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.priority);
        Ok(rules)
    }

    async fn upsert_tier_rule(&self, rule: &TierRule) -> Result<()> {
        self.tier_rules.write().await.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn insert_tier_state(&self, state: &SnapshotTierState) -> Result<()> {
        self.tier_states.write().await.push(state.clone());
        Ok(())
    }

    async fn update_tier_state(&self, state: &SnapshotTierState) -> Result<()> {
        let mut states = self.tier_states.write().await;
        let row = states
            .iter_mut()
            .find(|s| s.id == state.id)
            .ok_or_else(|| CoreError::NotFound(format!("tier state {}", state.id)))?;
        *row = state.clone();
        Ok(())
    }

    async fn get_tier_state(&self, id: Uuid) -> Result<Option<SnapshotTierState>> {
        Ok(self
            .tier_states
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn list_tier_states(&self) -> Result<Vec<SnapshotTierState>> {
        Ok(self.tier_states.read().await.clone())
    }

    async fn tier_states_for_snapshot(
        &self,
        snapshot_id: &str,
    ) -> Result<Vec<SnapshotTierState>> {
        Ok(self
            .tier_states
            .read()
            .await
            .iter()
            .filter(|s| s.snapshot_id == snapshot_id)
            .cloned()
            .collect())
    }

    async fn insert_tier_transition(&self, transition: &TierTransition) -> Result<()> {
        self.tier_transitions.write().await.push(transition.clone());
        Ok(())
    }

    async fn update_tier_transition(&self, transition: &TierTransition) -> Result<()> {
        let mut transitions = self.tier_transitions.write().await;
        let row = transitions
            .iter_mut()
            .find(|t| t.id == transition.id)
            .ok_or_else(|| CoreError::NotFound(format!("tier transition {}", transition.id)))?;
        *row = transition.clone();
        Ok(())
    }

    async fn list_tier_transitions(&self) -> Result<Vec<TierTransition>> {
        Ok(self.tier_transitions.read().await.clone())
    }

    async fn insert_cold_restore(&self, request: &ColdRestoreRequest) -> Result<()> {
        self.cold_restores.write().await.push(request.clone());
        Ok(())
    }

    async fn update_cold_restore(&self, request: &ColdRestoreRequest) -> Result<()> {
        let mut requests = self.cold_restores.write().await;
        let row = requests
            .iter_mut()
            .find(|r| r.id == request.id)
            .ok_or_else(|| CoreError::NotFound(format!("cold restore {}", request.id)))?;
        *row = request.clone();
        Ok(())
    }

    async fn list_cold_restores(
        &self,
        status: Option<ColdRestoreStatus>,
    ) -> Result<Vec<ColdRestoreRequest>> {
        Ok(self
            .cold_restores
            .read()
            .await
            .iter()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue_backup(&self, item: &BackupQueueItem) -> Result<()> {
        self.queue.write().await.push(item.clone());
        Ok(())
    }

    async fn get_queue_item(&self, id: Uuid) -> Result<Option<BackupQueueItem>> {
        Ok(self
            .queue
            .read()
            .await
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn update_queue_item(&self, item: &BackupQueueItem) -> Result<()> {
        let mut queue = self.queue.write().await;
        let row = queue
            .iter_mut()
            .find(|i| i.id == item.id)
            .ok_or_else(|| CoreError::NotFound(format!("queue item {}", item.id)))?;
        *row = item.clone();
        Ok(())
    }

    async fn next_pending(&self, agent_id: Uuid) -> Result<Option<BackupQueueItem>> {
        Ok(self
            .queue
            .read()
            .await
            .iter()
            .filter(|i| i.agent_id == agent_id && i.status == QueueItemStatus::Queued)
            .min_by_key(|i| (i.priority, i.queued_at))
            .cloned())
    }

    async fn running_for_agent(&self, agent_id: Uuid) -> Result<Option<BackupQueueItem>> {
        Ok(self
            .queue
            .read()
            .await
            .iter()
            .find(|i| i.agent_id == agent_id && i.status == QueueItemStatus::Running)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackupPriority;

    #[tokio::test]
    async fn queue_orders_by_priority_then_age() {
        let store = MemoryStore::new();
        let agent = Uuid::new_v4();

        let low = BackupQueueItem::new(Uuid::new_v4(), agent, BackupPriority::Low);
        let first_medium = BackupQueueItem::new(Uuid::new_v4(), agent, BackupPriority::Medium);
        let mut second_medium = BackupQueueItem::new(Uuid::new_v4(), agent, BackupPriority::Medium);
        second_medium.queued_at = first_medium.queued_at + chrono::Duration::seconds(1);

        store.enqueue_backup(&low).await.unwrap();
        store.enqueue_backup(&second_medium).await.unwrap();
        store.enqueue_backup(&first_medium).await.unwrap();

        let next = store.next_pending(agent).await.unwrap().unwrap();
        assert_eq!(next.id, first_medium.id);
    }

    #[tokio::test]
    async fn replication_get_or_create_is_idempotent() {
        let store = MemoryStore::new();
        let (schedule, source, target) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let first = store
            .get_or_create_replication(schedule, source, target)
            .await
            .unwrap();
        let second = store
            .get_or_create_replication(schedule, source, target)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let rows = store
            .list_replication_for_schedule(schedule)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn active_checkpoint_lookup_skips_terminal() {
        let store = MemoryStore::new();
        let schedule = Uuid::new_v4();

        let mut done = BackupCheckpoint::start(
            schedule,
            Uuid::new_v4(),
            Uuid::new_v4(),
            chrono::Duration::days(7),
        );
        done.state = crate::model::CheckpointState::Completed;
        store.insert_checkpoint(&done).await.unwrap();
        assert!(store
            .find_active_for_schedule(schedule)
            .await
            .unwrap()
            .is_none());

        let active = BackupCheckpoint::start(
            schedule,
            Uuid::new_v4(),
            Uuid::new_v4(),
            chrono::Duration::days(7),
        );
        store.insert_checkpoint(&active).await.unwrap();
        let found = store
            .find_active_for_schedule(schedule)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, active.id);
    }

    #[tokio::test]
    async fn update_missing_backup_is_not_found() {
        let store = MemoryStore::new();
        let record = BackupRecord::start(Uuid::new_v4(), Uuid::new_v4(), None);
        let err = store.update_backup(&record).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
