//! Notification dispatch contract.
//!
//! Dispatch itself (mail, webhooks, chat) is an external collaborator; the
//! control plane only builds payloads and hands them over.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload for a finished (successful or failed) backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupNotification {
    pub org_id: Uuid,
    pub schedule_id: Uuid,
    pub schedule_name: String,
    pub agent_id: Uuid,
    pub hostname: String,
    pub snapshot_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error_message: Option<String>,
    pub size_bytes: Option<u64>,
    pub files_new: Option<u64>,
    pub files_changed: Option<u64>,
}

/// Payload for a verification that crossed its failure threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationNotification {
    pub repository_id: Uuid,
    pub repository_name: String,
    pub verification_id: Uuid,
    pub consecutive_failures: u32,
    pub error_message: Option<String>,
}

/// Payload for a failed restore test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRestoreNotification {
    pub repository_id: Uuid,
    pub snapshot_id: String,
    pub verification_errors: Vec<String>,
}

/// Outbound notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn backup_completed(&self, notification: BackupNotification);
    async fn verification_failed(&self, notification: VerificationNotification);
    async fn test_restore_failed(&self, notification: TestRestoreNotification);
}

/// Notifier that drops everything. Default when no dispatcher is wired up.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn backup_completed(&self, _notification: BackupNotification) {}
    async fn verification_failed(&self, _notification: VerificationNotification) {}
    async fn test_restore_failed(&self, _notification: TestRestoreNotification) {}
}
