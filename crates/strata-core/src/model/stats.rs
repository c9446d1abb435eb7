//! Repository storage statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A storage statistics sample for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub org_id: Uuid,
    /// Deduplicated on-disk size.
    pub raw_data_bytes: u64,
    /// Logical size of all snapshot contents.
    pub restore_size_bytes: u64,
    pub dedup_ratio: f64,
    pub space_saved_bytes: u64,
    pub snapshot_count: u64,
    pub collected_at: DateTime<Utc>,
}

impl StorageStats {
    /// Derive a sample from raw/restore sizes.
    ///
    /// `dedup_ratio = restore / raw` (0 when raw is 0) and
    /// `space_saved = restore - raw`, floored at 0.
    pub fn derive(
        repository_id: Uuid,
        org_id: Uuid,
        raw_data_bytes: u64,
        restore_size_bytes: u64,
        snapshot_count: u64,
    ) -> Self {
        let dedup_ratio = if raw_data_bytes > 0 {
            restore_size_bytes as f64 / raw_data_bytes as f64
        } else {
            0.0
        };
        Self {
            id: Uuid::new_v4(),
            repository_id,
            org_id,
            raw_data_bytes,
            restore_size_bytes,
            dedup_ratio,
            space_saved_bytes: restore_size_bytes.saturating_sub(raw_data_bytes),
            snapshot_count,
            collected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_ratio_and_savings() {
        let stats = StorageStats::derive(Uuid::new_v4(), Uuid::new_v4(), 100, 400, 12);
        assert_eq!(stats.dedup_ratio, 4.0);
        assert_eq!(stats.space_saved_bytes, 300);
        assert_eq!(stats.snapshot_count, 12);
    }

    #[test]
    fn zero_raw_size() {
        let stats = StorageStats::derive(Uuid::new_v4(), Uuid::new_v4(), 0, 0, 0);
        assert_eq!(stats.dedup_ratio, 0.0);
        assert_eq!(stats.space_saved_bytes, 0);
    }

    #[test]
    fn savings_floor_at_zero() {
        let stats = StorageStats::derive(Uuid::new_v4(), Uuid::new_v4(), 500, 400, 1);
        assert_eq!(stats.space_saved_bytes, 0);
    }
}
