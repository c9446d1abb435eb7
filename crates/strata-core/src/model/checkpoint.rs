//! In-flight progress checkpoints for resumable backups.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Checkpoint lifecycle state.
///
/// `Active -> {Completed | Interrupted | Canceled | Expired}` and
/// `Interrupted -> {Completed | Canceled | Expired}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointState {
    Active,
    Interrupted,
    Completed,
    Canceled,
    Expired,
}

impl CheckpointState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointState::Completed | CheckpointState::Canceled | CheckpointState::Expired
        )
    }
}

/// Persisted progress of one schedule's in-flight backup.
///
/// At most one non-terminal checkpoint exists per schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCheckpoint {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub agent_id: Uuid,
    pub repository_id: Uuid,
    /// The backup row currently feeding this checkpoint, if any.
    pub current_backup_id: Option<Uuid>,
    pub state: CheckpointState,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub total_files: Option<u64>,
    pub total_bytes: Option<u64>,
    pub last_path: Option<PathBuf>,
    pub resume_count: u32,
    pub error_message: Option<String>,
}

impl BackupCheckpoint {
    /// Create an active checkpoint expiring `expiration` from now.
    pub fn start(
        schedule_id: Uuid,
        agent_id: Uuid,
        repository_id: Uuid,
        expiration: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            agent_id,
            repository_id,
            current_backup_id: None,
            state: CheckpointState::Active,
            created_at: now,
            last_updated_at: now,
            expires_at: now + expiration,
            files_processed: 0,
            bytes_processed: 0,
            total_files: None,
            total_bytes: None,
            last_path: None,
            resume_count: 0,
            error_message: None,
        }
    }

    /// Resumable iff interrupted, not expired, and under the resume budget.
    pub fn is_resumable(&self, max_resume_attempts: u32, now: DateTime<Utc>) -> bool {
        self.state == CheckpointState::Interrupted
            && now < self.expires_at
            && self.resume_count < max_resume_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> BackupCheckpoint {
        BackupCheckpoint::start(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Duration::days(7),
        )
    }

    #[test]
    fn terminal_states() {
        assert!(!CheckpointState::Active.is_terminal());
        assert!(!CheckpointState::Interrupted.is_terminal());
        assert!(CheckpointState::Completed.is_terminal());
        assert!(CheckpointState::Canceled.is_terminal());
        assert!(CheckpointState::Expired.is_terminal());
    }

    #[test]
    fn resumable_requires_interrupted() {
        let now = Utc::now();
        let mut cp = checkpoint();
        assert!(!cp.is_resumable(5, now));

        cp.state = CheckpointState::Interrupted;
        assert!(cp.is_resumable(5, now));

        cp.resume_count = 5;
        assert!(!cp.is_resumable(5, now));

        cp.resume_count = 0;
        assert!(!cp.is_resumable(5, cp.expires_at + Duration::seconds(1)));
    }
}
