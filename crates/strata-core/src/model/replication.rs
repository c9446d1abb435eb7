//! Snapshot replication state between a schedule's repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of one (schedule, source, target) replication pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationState {
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// Replication status row, created lazily on first replication.
///
/// Writes are last-writer-wins; at most one execution replicates a given
/// pair at a time under the single-active-leader assumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub source_repository_id: Uuid,
    pub target_repository_id: Uuid,
    pub state: ReplicationState,
    pub last_snapshot_id: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReplicationStatus {
    pub fn new(schedule_id: Uuid, source: Uuid, target: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            source_repository_id: source,
            target_repository_id: target,
            state: ReplicationState::Idle,
            last_snapshot_id: None,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    /// Mark the pair as syncing.
    pub fn begin_sync(&mut self) {
        self.state = ReplicationState::Syncing;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    /// Record a successful copy of `snapshot_id`.
    pub fn mark_synced(&mut self, snapshot_id: impl Into<String>) {
        self.state = ReplicationState::Synced;
        self.last_snapshot_id = Some(snapshot_id.into());
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    /// Record a failed copy.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = ReplicationState::Failed;
        self.error_message = Some(reason.into());
        self.updated_at = Utc::now();
    }
}
