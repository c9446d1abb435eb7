//! Per-agent backup queue items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schedule::BackupPriority;

/// Queue item lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueItemStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Preempted,
}

/// An enqueued backup for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupQueueItem {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub agent_id: Uuid,
    pub priority: BackupPriority,
    pub status: QueueItemStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Item that preempted this one, when status is `Preempted`.
    pub preempted_by: Option<Uuid>,
}

impl BackupQueueItem {
    pub fn new(schedule_id: Uuid, agent_id: Uuid, priority: BackupPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            agent_id,
            priority,
            status: QueueItemStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            preempted_by: None,
        }
    }
}
