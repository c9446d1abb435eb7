//! Backup execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Terminal and in-flight states of a backup row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    Running,
    Completed,
    Failed,
}

/// One backup attempt against one repository.
///
/// A record always reaches a terminal state: `Completed` with a snapshot id
/// or `Failed` with an error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub agent_id: Uuid,
    pub repository_id: Option<Uuid>,
    pub status: BackupStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub snapshot_id: Option<String>,
    pub size_bytes: Option<u64>,
    pub files_new: Option<u64>,
    pub files_changed: Option<u64>,
    /// Snapshots removed/kept by retention after this backup.
    pub retention_removed: Option<u64>,
    pub retention_kept: Option<u64>,
    pub pre_script_output: Option<String>,
    pub post_script_output: Option<String>,
    /// Files excluded by the large-file pre-scan.
    pub excluded_large_files: Vec<PathBuf>,
    pub error_message: Option<String>,
    /// Set when this backup resumes an interrupted one.
    pub resumed_from_backup_id: Option<Uuid>,
    pub from_checkpoint_id: Option<Uuid>,
}

impl BackupRecord {
    /// Create a running record for one attempt.
    pub fn start(schedule_id: Uuid, agent_id: Uuid, repository_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            agent_id,
            repository_id,
            status: BackupStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            snapshot_id: None,
            size_bytes: None,
            files_new: None,
            files_changed: None,
            retention_removed: None,
            retention_kept: None,
            pre_script_output: None,
            post_script_output: None,
            excluded_large_files: Vec::new(),
            error_message: None,
            resumed_from_backup_id: None,
            from_checkpoint_id: None,
        }
    }

    /// Mark completed with the resulting snapshot and counters.
    pub fn complete(
        &mut self,
        snapshot_id: impl Into<String>,
        size_bytes: u64,
        files_new: u64,
        files_changed: u64,
    ) {
        self.status = BackupStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.snapshot_id = Some(snapshot_id.into());
        self.size_bytes = Some(size_bytes);
        self.files_new = Some(files_new);
        self.files_changed = Some(files_changed);
    }

    /// Mark failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = BackupStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(reason.into());
    }
}
