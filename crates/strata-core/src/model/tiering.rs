//! Storage tiers, tiering rules, and cold-restore requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage class of a snapshot copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
    Archive,
}

impl StorageTier {
    /// Monthly storage cost in $/GB.
    pub fn monthly_cost_per_gb(&self) -> f64 {
        match self {
            StorageTier::Hot => 0.023,
            StorageTier::Warm => 0.0125,
            StorageTier::Cold => 0.004,
            StorageTier::Archive => 0.00099,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StorageTier::Hot => "hot",
            StorageTier::Warm => "warm",
            StorageTier::Cold => "cold",
            StorageTier::Archive => "archive",
        }
    }
}

/// Current tier of one snapshot copy in one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTierState {
    pub id: Uuid,
    pub snapshot_id: String,
    pub repository_id: Uuid,
    pub tier: StorageTier,
    pub size_bytes: u64,
    pub tiered_at: DateTime<Utc>,
}

impl SnapshotTierState {
    /// Whole days since the snapshot entered its current tier.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.tiered_at).num_days()
    }
}

/// A tier transition rule for an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRule {
    pub id: Uuid,
    pub org_id: Uuid,
    pub from_tier: StorageTier,
    pub to_tier: StorageTier,
    /// Snapshots older than this in `from_tier` are candidates.
    pub age_threshold_days: i64,
    /// Never transition below this many copies across repositories.
    pub min_copies: u32,
    /// Restrict the rule to one repository.
    pub repository_id: Option<Uuid>,
    pub enabled: bool,
    pub priority: i32,
}

/// Lifecycle of a tier transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One snapshot-copy tier move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTransition {
    pub id: Uuid,
    pub tier_state_id: Uuid,
    pub from_tier: StorageTier,
    pub to_tier: StorageTier,
    pub rule_id: Option<Uuid>,
    pub status: TransitionStatus,
    pub estimated_monthly_savings: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Retrieval priority for cold restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestorePriority {
    Standard,
    Expedited,
}

/// Lifecycle of a cold-restore request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColdRestoreStatus {
    Pending,
    Warming,
    Ready,
    Expired,
}

/// A request to warm a snapshot out of cold/archive storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdRestoreRequest {
    pub id: Uuid,
    pub snapshot_id: String,
    pub repository_id: Uuid,
    pub tier: StorageTier,
    pub priority: RestorePriority,
    pub status: ColdRestoreStatus,
    pub requested_at: DateTime<Utc>,
    pub estimated_ready_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    /// Set when the request becomes ready; access lapses afterwards.
    pub expires_at: Option<DateTime<Utc>>,
    pub retrieval_cost: f64,
}
