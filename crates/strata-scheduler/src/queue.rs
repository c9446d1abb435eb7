//! Per-agent backup queue with preemption.
//!
//! One running slot per agent; admission order is priority ascending
//! (high = 1 first), then queue age. A running preemptible item yields to a
//! strictly higher-priority arrival.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use strata_core::error::{CoreError, Result};
use strata_core::model::{BackupPriority, BackupQueueItem, BackupSchedule, QueueItemStatus};
use strata_core::store::QueueStore;

/// Store-backed queue manager.
pub struct BackupQueueManager {
    store: Arc<dyn QueueStore>,
}

impl BackupQueueManager {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Enqueue a backup for a schedule at the schedule's priority class.
    pub async fn enqueue(&self, schedule: &BackupSchedule) -> Result<BackupQueueItem> {
        let item = BackupQueueItem::new(schedule.id, schedule.agent_id, schedule.priority);
        self.store.enqueue_backup(&item).await?;
        info!(
            item = %item.id,
            schedule = %schedule.id,
            priority = schedule.priority.label(),
            "backup enqueued"
        );
        Ok(item)
    }

    /// The item the agent should run next: priority ASC, queued_at ASC.
    pub async fn get_next_pending(&self, agent_id: Uuid) -> Result<Option<BackupQueueItem>> {
        self.store.next_pending(agent_id).await
    }

    /// The agent's currently running item, if any.
    pub async fn running(&self, agent_id: Uuid) -> Result<Option<BackupQueueItem>> {
        self.store.running_for_agent(agent_id).await
    }

    /// Move an item into its agent's running slot.
    pub async fn start_backup(&self, item: &mut BackupQueueItem) -> Result<()> {
        item.status = QueueItemStatus::Running;
        item.started_at = Some(Utc::now());
        self.store.update_queue_item(item).await
    }

    /// Mark a running item completed.
    pub async fn complete_backup(&self, item: &mut BackupQueueItem) -> Result<()> {
        item.status = QueueItemStatus::Completed;
        item.completed_at = Some(Utc::now());
        self.store.update_queue_item(item).await
    }

    /// Mark a running item failed.
    pub async fn fail_backup(&self, item: &mut BackupQueueItem) -> Result<()> {
        item.status = QueueItemStatus::Failed;
        item.completed_at = Some(Utc::now());
        self.store.update_queue_item(item).await
    }

    /// Whether a new arrival may preempt the running item.
    pub fn can_preempt(
        new_priority: BackupPriority,
        running_priority: BackupPriority,
        running_preemptible: bool,
    ) -> bool {
        running_preemptible && new_priority < running_priority
    }

    /// Preempt the running item in favor of `new`. The execution subsystem
    /// is expected to cancel the in-flight engine invocation.
    pub async fn preempt_backup(
        &self,
        running: &mut BackupQueueItem,
        new: &BackupQueueItem,
    ) -> Result<()> {
        if running.status != QueueItemStatus::Running {
            return Err(CoreError::Store(format!(
                "queue item {} is not running",
                running.id
            )));
        }
        running.status = QueueItemStatus::Preempted;
        running.preempted_by = Some(new.id);
        running.completed_at = Some(Utc::now());
        self.store.update_queue_item(running).await?;
        info!(preempted = %running.id, by = %new.id, "backup preempted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use strata_core::store::MemoryStore;

    fn schedule_with_priority(agent: Uuid, priority: BackupPriority) -> BackupSchedule {
        let mut schedule = BackupSchedule::new(agent, "s", vec![PathBuf::from("/data")]);
        schedule.priority = priority;
        schedule
    }

    #[tokio::test]
    async fn next_pending_prefers_high_priority() {
        let store = Arc::new(MemoryStore::new());
        let queue = BackupQueueManager::new(store);
        let agent = Uuid::new_v4();

        queue
            .enqueue(&schedule_with_priority(agent, BackupPriority::Low))
            .await
            .unwrap();
        let high = queue
            .enqueue(&schedule_with_priority(agent, BackupPriority::High))
            .await
            .unwrap();

        let next = queue.get_next_pending(agent).await.unwrap().unwrap();
        assert_eq!(next.id, high.id);
    }

    #[tokio::test]
    async fn start_sets_running_slot() {
        let store = Arc::new(MemoryStore::new());
        let queue = BackupQueueManager::new(store);
        let agent = Uuid::new_v4();

        let mut item = queue
            .enqueue(&schedule_with_priority(agent, BackupPriority::Medium))
            .await
            .unwrap();
        queue.start_backup(&mut item).await.unwrap();

        let running = queue.running(agent).await.unwrap().unwrap();
        assert_eq!(running.id, item.id);
        assert!(running.started_at.is_some());
        // No longer pending.
        assert!(queue.get_next_pending(agent).await.unwrap().is_none());
    }

    #[test]
    fn preemption_rule() {
        use BackupPriority::*;
        assert!(BackupQueueManager::can_preempt(High, Medium, true));
        assert!(!BackupQueueManager::can_preempt(High, Medium, false));
        assert!(!BackupQueueManager::can_preempt(Medium, Medium, true));
        assert!(!BackupQueueManager::can_preempt(Low, Medium, true));
    }

    #[tokio::test]
    async fn preempt_marks_item_and_links_winner() {
        let store = Arc::new(MemoryStore::new());
        let queue = BackupQueueManager::new(store.clone());
        let agent = Uuid::new_v4();

        let mut running = queue
            .enqueue(&schedule_with_priority(agent, BackupPriority::Medium))
            .await
            .unwrap();
        queue.start_backup(&mut running).await.unwrap();

        let new = queue
            .enqueue(&schedule_with_priority(agent, BackupPriority::High))
            .await
            .unwrap();

        assert!(BackupQueueManager::can_preempt(
            new.priority,
            running.priority,
            true
        ));
        queue.preempt_backup(&mut running, &new).await.unwrap();

        let row = store.get_queue_item(running.id).await.unwrap().unwrap();
        assert_eq!(row.status, QueueItemStatus::Preempted);
        assert_eq!(row.preempted_by, Some(new.id));
        // The running slot is free again.
        assert!(queue.running(agent).await.unwrap().is_none());
    }
}
