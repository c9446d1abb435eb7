//! Repository verification and restore testing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// What a verification run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationKind {
    /// Structural repository check.
    Check,
    /// Structural check plus reading a subset of pack data.
    CheckReadData,
    /// Restore a sample of files and verify contents.
    TestRestore,
}

/// Outcome of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Running,
    Passed,
    Failed,
}

/// A cron-driven verification setting for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSchedule {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub kind: VerificationKind,
    pub cron_expression: String,
    pub enabled: bool,
    /// Subset percentage for read-data checks.
    pub read_data_subset_percent: Option<u8>,
    /// Notify after this many consecutive failures.
    pub notify_after_failures: u32,
}

impl VerificationSchedule {
    pub fn new(repository_id: Uuid, kind: VerificationKind, cron: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository_id,
            kind,
            cron_expression: cron.into(),
            enabled: true,
            read_data_subset_percent: None,
            notify_after_failures: 1,
        }
    }
}

/// One verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub kind: VerificationKind,
    pub status: VerificationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors_found: u64,
    pub read_data_subset_percent: Option<u8>,
    pub files_restored: u64,
    pub files_verified: u64,
    pub bytes_restored: u64,
    pub error_message: Option<String>,
}

impl VerificationRecord {
    pub fn start(repository_id: Uuid, kind: VerificationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository_id,
            kind,
            status: VerificationStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            errors_found: 0,
            read_data_subset_percent: None,
            files_restored: 0,
            files_verified: 0,
            bytes_restored: 0,
            error_message: None,
        }
    }

    pub fn pass(&mut self) {
        self.status = VerificationStatus::Passed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = VerificationStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(reason.into());
    }
}

/// Settings for sampled restore tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRestoreSettings {
    /// Percentage of regular files to sample, (0, 100].
    pub sample_percentage: f64,
    /// Restores land in fresh directories under this root.
    pub temp_dir: PathBuf,
}

impl TestRestoreSettings {
    /// Fallback used when the configured percentage is out of range.
    pub const DEFAULT_SAMPLE_PERCENTAGE: f64 = 10.0;

    /// The configured percentage, or the fallback when out of (0, 100].
    pub fn effective_sample_percentage(&self) -> f64 {
        if self.sample_percentage <= 0.0 || self.sample_percentage > 100.0 {
            Self::DEFAULT_SAMPLE_PERCENTAGE
        } else {
            self.sample_percentage
        }
    }
}

impl Default for TestRestoreSettings {
    fn default() -> Self {
        Self {
            sample_percentage: Self::DEFAULT_SAMPLE_PERCENTAGE,
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Outcome of one sampled restore test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRestoreResult {
    pub snapshot_id: String,
    pub files_restored: u64,
    pub files_verified: u64,
    pub bytes_restored: u64,
    /// SHA-256 hex digests of verified files.
    pub verified_checksums: Vec<String>,
    pub verification_errors: Vec<String>,
}
