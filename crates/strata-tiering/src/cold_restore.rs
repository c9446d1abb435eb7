//! Cold-restore requests: warming simulation and access expiry.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use strata_core::error::{CoreError, Result};
use strata_core::model::{
    ColdRestoreRequest, ColdRestoreStatus, RestorePriority, StorageTier,
};
use strata_core::store::Store;

use crate::costs::{retrieval_cost, warming_duration};

/// How long a warmed snapshot stays accessible.
const READY_ACCESS_HOURS: i64 = 24;

/// Manages the cold-restore request lifecycle:
/// pending -> warming -> ready -> expired.
pub struct ColdRestoreManager {
    store: Arc<dyn Store>,
}

impl ColdRestoreManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// File a request to warm a snapshot copy out of cold or archive.
    pub async fn request(
        &self,
        snapshot_id: &str,
        repository_id: Uuid,
        priority: RestorePriority,
    ) -> Result<ColdRestoreRequest> {
        let state = self
            .store
            .tier_states_for_snapshot(snapshot_id)
            .await?
            .into_iter()
            .find(|s| s.repository_id == repository_id)
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "tier state for snapshot {snapshot_id} in repository {repository_id}"
                ))
            })?;

        if matches!(state.tier, StorageTier::Hot | StorageTier::Warm) {
            return Err(CoreError::ConfigInvalid(format!(
                "snapshot {snapshot_id} is in the {} tier and directly accessible",
                state.tier.label()
            )));
        }

        let now = Utc::now();
        let warming = warming_duration(state.tier, priority);
        let request = ColdRestoreRequest {
            id: Uuid::new_v4(),
            snapshot_id: snapshot_id.to_string(),
            repository_id,
            tier: state.tier,
            priority,
            status: ColdRestoreStatus::Pending,
            requested_at: now,
            estimated_ready_at: now
                + ChronoDuration::from_std(warming).unwrap_or_else(|_| ChronoDuration::hours(5)),
            ready_at: None,
            expires_at: None,
            retrieval_cost: retrieval_cost(state.size_bytes, state.tier, priority),
        };
        self.store.insert_cold_restore(&request).await?;
        info!(
            request = %request.id,
            snapshot = snapshot_id,
            tier = state.tier.label(),
            eta = %request.estimated_ready_at,
            "cold restore requested"
        );
        Ok(request)
    }

    /// Advance requests: pending ones start warming, warming ones whose ETA
    /// passed become ready with a bounded access window.
    pub async fn progress_requests(&self) -> Result<u64> {
        let now = Utc::now();
        let mut advanced = 0;

        for mut request in self
            .store
            .list_cold_restores(Some(ColdRestoreStatus::Pending))
            .await?
        {
            request.status = ColdRestoreStatus::Warming;
            if let Err(e) = self.store.update_cold_restore(&request).await {
                warn!(request = %request.id, error = %e, "failed to start warming");
                continue;
            }
            advanced += 1;
        }

        for mut request in self
            .store
            .list_cold_restores(Some(ColdRestoreStatus::Warming))
            .await?
        {
            if request.estimated_ready_at > now {
                continue;
            }
            request.status = ColdRestoreStatus::Ready;
            request.ready_at = Some(now);
            request.expires_at = Some(now + ChronoDuration::hours(READY_ACCESS_HOURS));
            if let Err(e) = self.store.update_cold_restore(&request).await {
                warn!(request = %request.id, error = %e, "failed to mark ready");
                continue;
            }
            info!(request = %request.id, snapshot = %request.snapshot_id, "cold restore ready");
            advanced += 1;
        }

        Ok(advanced)
    }

    /// Expire ready requests whose access window lapsed.
    pub async fn expire_requests(&self) -> Result<u64> {
        let now = Utc::now();
        let mut expired = 0;
        for mut request in self
            .store
            .list_cold_restores(Some(ColdRestoreStatus::Ready))
            .await?
        {
            let lapsed = request.expires_at.is_some_and(|at| at <= now);
            if !lapsed {
                continue;
            }
            request.status = ColdRestoreStatus::Expired;
            if let Err(e) = self.store.update_cold_restore(&request).await {
                warn!(request = %request.id, error = %e, "failed to expire request");
                continue;
            }
            expired += 1;
        }
        if expired > 0 {
            info!(expired, "cold-restore access windows expired");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::model::SnapshotTierState;
    use strata_core::store::TierStore;
    use strata_core::MemoryStore;

    async fn store_with_state(tier: StorageTier) -> (Arc<MemoryStore>, SnapshotTierState) {
        let store = Arc::new(MemoryStore::new());
        let state = SnapshotTierState {
            id: Uuid::new_v4(),
            snapshot_id: "snap-1".to_string(),
            repository_id: Uuid::new_v4(),
            tier,
            size_bytes: 50 * 1024 * 1024 * 1024,
            tiered_at: Utc::now(),
        };
        store.insert_tier_state(&state).await.unwrap();
        (store, state)
    }

    #[tokio::test]
    async fn expedited_archive_request_eta_and_cost() {
        let (store, state) = store_with_state(StorageTier::Archive).await;
        let manager = ColdRestoreManager::new(store);

        let request = manager
            .request("snap-1", state.repository_id, RestorePriority::Expedited)
            .await
            .unwrap();

        let eta = request.estimated_ready_at - request.requested_at;
        assert_eq!(eta.num_hours(), 3);
        assert!(request.retrieval_cost > 0.0);
        assert_eq!(request.status, ColdRestoreStatus::Pending);
    }

    #[tokio::test]
    async fn warm_tier_request_is_rejected() {
        let (store, state) = store_with_state(StorageTier::Warm).await;
        let manager = ColdRestoreManager::new(store);
        let err = manager
            .request("snap-1", state.repository_id, RestorePriority::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn lifecycle_pending_warming_ready_expired() {
        let (store, state) = store_with_state(StorageTier::Cold).await;
        let manager = ColdRestoreManager::new(store.clone());

        let request = manager
            .request("snap-1", state.repository_id, RestorePriority::Standard)
            .await
            .unwrap();

        // First pass starts warming.
        manager.progress_requests().await.unwrap();
        let rows = store
            .list_cold_restores(Some(ColdRestoreStatus::Warming))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        // Force the ETA into the past; the next pass readies it.
        let mut row = rows.into_iter().next().unwrap();
        row.estimated_ready_at = Utc::now() - ChronoDuration::minutes(1);
        store.update_cold_restore(&row).await.unwrap();
        manager.progress_requests().await.unwrap();

        let ready = store
            .list_cold_restores(Some(ColdRestoreStatus::Ready))
            .await
            .unwrap();
        assert_eq!(ready.len(), 1);
        let window = ready[0].expires_at.unwrap() - ready[0].ready_at.unwrap();
        assert_eq!(window.num_hours(), 24);

        // Not yet expired.
        assert_eq!(manager.expire_requests().await.unwrap(), 0);

        // Lapse the window.
        let mut row = ready.into_iter().next().unwrap();
        row.expires_at = Some(Utc::now() - ChronoDuration::minutes(1));
        store.update_cold_restore(&row).await.unwrap();
        assert_eq!(manager.expire_requests().await.unwrap(), 1);

        let expired = store
            .list_cold_restores(Some(ColdRestoreStatus::Expired))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, request.id);
    }
}
