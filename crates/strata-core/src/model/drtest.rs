//! Disaster-recovery runbooks and scheduled DR tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A disaster-recovery runbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrRunbook {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    /// Backup schedule whose snapshots the runbook restores from.
    pub backup_schedule_id: Option<Uuid>,
    /// Ordered human/automated steps.
    pub steps: Vec<String>,
}

impl DrRunbook {
    pub fn new(org_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.into(),
            backup_schedule_id: None,
            steps: Vec::new(),
        }
    }
}

/// Cron-driven DR test for one runbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrTestSchedule {
    pub id: Uuid,
    pub runbook_id: Uuid,
    pub cron_expression: String,
    pub enabled: bool,
}

/// Outcome of one DR test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrTestResult {
    pub id: Uuid,
    pub runbook_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    /// Whether the restore-side verification passed.
    pub restore_verified: bool,
    pub details: Option<String>,
}

impl DrTestResult {
    pub fn start(runbook_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            runbook_id,
            started_at: Utc::now(),
            completed_at: None,
            success: false,
            restore_verified: false,
            details: None,
        }
    }
}
