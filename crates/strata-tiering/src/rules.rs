//! Tier rule evaluation and snapshot-tier transitions.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use strata_core::error::Result;
use strata_core::model::{SnapshotTierState, TierRule, TierTransition, TransitionStatus};
use strata_core::store::Store;
use uuid::Uuid;

use crate::costs::estimated_monthly_savings;

/// Outcome of one rule-processing pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct TieringRunSummary {
    pub rules_processed: usize,
    pub transitions_completed: u64,
    pub transitions_failed: u64,
    pub estimated_monthly_savings: f64,
}

/// Applies tier rules to snapshot-tier state.
pub struct TieringEngine {
    store: Arc<dyn Store>,
}

impl TieringEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Process every enabled rule in ascending priority order.
    pub async fn process_rules(&self) -> Result<TieringRunSummary> {
        let rules = self.store.list_enabled_tier_rules().await?;
        let mut summary = TieringRunSummary::default();
        for rule in &rules {
            summary.rules_processed += 1;
            if let Err(e) = self.process_rule(rule, &mut summary).await {
                warn!(rule = %rule.id, error = %e, "tier rule processing failed");
            }
        }
        if summary.transitions_completed > 0 {
            info!(
                transitions = summary.transitions_completed,
                savings = summary.estimated_monthly_savings,
                "tiering pass complete"
            );
        }
        Ok(summary)
    }

    /// Apply one rule: select snapshots in `from_tier` older than the age
    /// threshold, honoring the repository filter and the copy floor.
    pub async fn process_rule(
        &self,
        rule: &TierRule,
        summary: &mut TieringRunSummary,
    ) -> Result<()> {
        let now = Utc::now();
        let states = self.store.list_tier_states().await?;

        for state in states {
            if state.tier != rule.from_tier {
                continue;
            }
            if let Some(repository_id) = rule.repository_id {
                if state.repository_id != repository_id {
                    continue;
                }
            }
            if state.age_days(now) < rule.age_threshold_days {
                continue;
            }
            if !self.rule_owns_state(rule, &state).await? {
                continue;
            }
            let copies = self
                .store
                .tier_states_for_snapshot(&state.snapshot_id)
                .await?
                .len() as u32;
            if copies < rule.min_copies {
                debug!(
                    snapshot = %state.snapshot_id,
                    copies,
                    min_copies = rule.min_copies,
                    "below copy floor; not transitioning"
                );
                continue;
            }

            match self.transition(&state, rule).await {
                Ok(transition) => {
                    summary.transitions_completed += 1;
                    summary.estimated_monthly_savings += transition.estimated_monthly_savings;
                }
                Err(e) => {
                    summary.transitions_failed += 1;
                    warn!(
                        snapshot = %state.snapshot_id,
                        error = %e,
                        "tier transition failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Rules are organization-scoped; the snapshot copy must live in one of
    /// the organization's repositories.
    async fn rule_owns_state(&self, rule: &TierRule, state: &SnapshotTierState) -> Result<bool> {
        let repository = self.store.get_repository(state.repository_id).await?;
        Ok(repository.is_some_and(|r| r.org_id == rule.org_id))
    }

    /// Drive one transition row through pending -> in-progress -> terminal,
    /// moving the tier state on success.
    async fn transition(
        &self,
        state: &SnapshotTierState,
        rule: &TierRule,
    ) -> Result<TierTransition> {
        let now = Utc::now();
        let mut transition = TierTransition {
            id: Uuid::new_v4(),
            tier_state_id: state.id,
            from_tier: rule.from_tier,
            to_tier: rule.to_tier,
            rule_id: Some(rule.id),
            status: TransitionStatus::Pending,
            estimated_monthly_savings: estimated_monthly_savings(
                state.size_bytes,
                rule.from_tier,
                rule.to_tier,
            ),
            created_at: now,
            completed_at: None,
            error_message: None,
        };
        self.store.insert_tier_transition(&transition).await?;

        transition.status = TransitionStatus::InProgress;
        self.store.update_tier_transition(&transition).await?;

        let mut moved = state.clone();
        moved.tier = rule.to_tier;
        moved.tiered_at = now;
        match self.store.update_tier_state(&moved).await {
            Ok(()) => {
                transition.status = TransitionStatus::Completed;
                transition.completed_at = Some(Utc::now());
                self.store.update_tier_transition(&transition).await?;
                debug!(
                    snapshot = %state.snapshot_id,
                    from = rule.from_tier.label(),
                    to = rule.to_tier.label(),
                    "snapshot tier transitioned"
                );
                Ok(transition)
            }
            Err(e) => {
                transition.status = TransitionStatus::Failed;
                transition.error_message = Some(e.to_string());
                self.store.update_tier_transition(&transition).await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use strata_core::model::{Organization, Repository, RepositoryKind, StorageTier};
    use strata_core::store::{AgentStore, RepositoryStore, TierStore};
    use strata_core::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: TieringEngine,
        org: Organization,
        repository: Repository,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let org = Organization::new("acme");
        store.upsert_organization(&org).await.unwrap();
        let repository = Repository::new(org.id, "primary", RepositoryKind::Local);
        store.upsert_repository(&repository).await.unwrap();
        let engine = TieringEngine::new(store.clone());
        Fixture {
            store,
            engine,
            org,
            repository,
        }
    }

    fn rule(f: &Fixture, from: StorageTier, to: StorageTier, age_days: i64) -> TierRule {
        TierRule {
            id: Uuid::new_v4(),
            org_id: f.org.id,
            from_tier: from,
            to_tier: to,
            age_threshold_days: age_days,
            min_copies: 1,
            repository_id: None,
            enabled: true,
            priority: 10,
        }
    }

    async fn tier_state(
        f: &Fixture,
        snapshot: &str,
        tier: StorageTier,
        age_days: i64,
    ) -> SnapshotTierState {
        let state = SnapshotTierState {
            id: Uuid::new_v4(),
            snapshot_id: snapshot.to_string(),
            repository_id: f.repository.id,
            tier,
            size_bytes: 10 * 1024 * 1024 * 1024,
            tiered_at: Utc::now() - Duration::days(age_days),
        };
        f.store.insert_tier_state(&state).await.unwrap();
        state
    }

    #[tokio::test]
    async fn old_snapshots_transition_young_ones_stay() {
        let f = fixture().await;
        f.store
            .upsert_tier_rule(&rule(&f, StorageTier::Hot, StorageTier::Cold, 30))
            .await
            .unwrap();
        let old = tier_state(&f, "snap-old", StorageTier::Hot, 45).await;
        let young = tier_state(&f, "snap-young", StorageTier::Hot, 5).await;

        let summary = f.engine.process_rules().await.unwrap();
        assert_eq!(summary.transitions_completed, 1);
        assert!(summary.estimated_monthly_savings > 0.0);

        let moved = f.store.get_tier_state(old.id).await.unwrap().unwrap();
        assert_eq!(moved.tier, StorageTier::Cold);
        let kept = f.store.get_tier_state(young.id).await.unwrap().unwrap();
        assert_eq!(kept.tier, StorageTier::Hot);

        let transitions = f.store.list_tier_transitions().await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].status, TransitionStatus::Completed);
        assert_eq!(transitions[0].rule_id, Some(f.store.list_enabled_tier_rules().await.unwrap()[0].id));
    }

    #[tokio::test]
    async fn copy_floor_blocks_transition() {
        let f = fixture().await;
        let mut r = rule(&f, StorageTier::Hot, StorageTier::Cold, 30);
        r.min_copies = 2;
        f.store.upsert_tier_rule(&r).await.unwrap();
        tier_state(&f, "snap-single", StorageTier::Hot, 45).await;

        let summary = f.engine.process_rules().await.unwrap();
        assert_eq!(summary.transitions_completed, 0);
        assert!(f.store.list_tier_transitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repository_filter_restricts_rule() {
        let f = fixture().await;
        let other_repo = Repository::new(f.org.id, "other", RepositoryKind::Local);
        f.store.upsert_repository(&other_repo).await.unwrap();

        let mut r = rule(&f, StorageTier::Hot, StorageTier::Cold, 30);
        r.repository_id = Some(other_repo.id);
        f.store.upsert_tier_rule(&r).await.unwrap();
        tier_state(&f, "snap-elsewhere", StorageTier::Hot, 45).await;

        let summary = f.engine.process_rules().await.unwrap();
        assert_eq!(summary.transitions_completed, 0);
    }

    #[tokio::test]
    async fn foreign_org_snapshots_are_untouched() {
        let f = fixture().await;
        let mut r = rule(&f, StorageTier::Hot, StorageTier::Cold, 30);
        r.org_id = Uuid::new_v4();
        f.store.upsert_tier_rule(&r).await.unwrap();
        tier_state(&f, "snap-ours", StorageTier::Hot, 45).await;

        let summary = f.engine.process_rules().await.unwrap();
        assert_eq!(summary.transitions_completed, 0);
    }

    #[tokio::test]
    async fn fresh_transition_does_not_cascade_in_one_pass() {
        let f = fixture().await;
        f.store
            .upsert_tier_rule(&rule(&f, StorageTier::Hot, StorageTier::Cold, 30))
            .await
            .unwrap();
        let mut archive_rule = rule(&f, StorageTier::Cold, StorageTier::Archive, 60);
        archive_rule.priority = 20;
        f.store.upsert_tier_rule(&archive_rule).await.unwrap();

        let state = tier_state(&f, "snap", StorageTier::Hot, 90).await;

        let summary = f.engine.process_rules().await.unwrap();
        // Hot -> cold fires; the cold -> archive rule sees age zero.
        assert_eq!(summary.transitions_completed, 1);
        let moved = f.store.get_tier_state(state.id).await.unwrap().unwrap();
        assert_eq!(moved.tier, StorageTier::Cold);
    }
}
