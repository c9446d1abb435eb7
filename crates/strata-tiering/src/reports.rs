//! Per-organization storage cost reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use strata_core::error::Result;
use strata_core::model::StorageTier;
use strata_core::store::Store;

use crate::costs::{estimated_monthly_savings, monthly_storage_cost};

/// Cost aggregate for one tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierCostLine {
    pub tier: StorageTier,
    pub snapshot_copies: u64,
    pub size_bytes: u64,
    pub monthly_cost: f64,
}

/// One organization's storage cost picture.
#[derive(Debug, Clone, Serialize)]
pub struct TierCostReport {
    pub org_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub total_size_bytes: u64,
    pub total_monthly_cost: f64,
    pub by_tier: Vec<TierCostLine>,
    /// What the organization's enabled rules would save if applied today.
    pub potential_monthly_savings: f64,
}

/// Builds cost reports from tier state and rules.
pub struct CostReporter {
    store: Arc<dyn Store>,
}

impl CostReporter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Generate a report per organization.
    pub async fn generate_all(&self) -> Result<Vec<TierCostReport>> {
        let mut reports = Vec::new();
        for org in self.store.list_organizations().await? {
            let report = self.generate_for_org(org.id).await?;
            info!(
                org = %org.id,
                monthly_cost = report.total_monthly_cost,
                potential_savings = report.potential_monthly_savings,
                "cost report generated"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Aggregate one organization's tier states and rule opportunities.
    pub async fn generate_for_org(&self, org_id: Uuid) -> Result<TierCostReport> {
        let now = Utc::now();
        let repositories: HashMap<Uuid, ()> = self
            .store
            .list_repositories_for_org(org_id)
            .await?
            .into_iter()
            .map(|r| (r.id, ()))
            .collect();

        let states: Vec<_> = self
            .store
            .list_tier_states()
            .await?
            .into_iter()
            .filter(|s| repositories.contains_key(&s.repository_id))
            .collect();

        let mut by_tier: HashMap<StorageTier, TierCostLine> = HashMap::new();
        for state in &states {
            let line = by_tier.entry(state.tier).or_insert(TierCostLine {
                tier: state.tier,
                snapshot_copies: 0,
                size_bytes: 0,
                monthly_cost: 0.0,
            });
            line.snapshot_copies += 1;
            line.size_bytes += state.size_bytes;
            line.monthly_cost += monthly_storage_cost(state.size_bytes, state.tier);
        }

        let mut potential = 0.0;
        for rule in self.store.list_enabled_tier_rules().await? {
            if rule.org_id != org_id {
                continue;
            }
            for state in &states {
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
                potential +=
                    estimated_monthly_savings(state.size_bytes, rule.from_tier, rule.to_tier);
            }
        }

        let mut by_tier: Vec<TierCostLine> = by_tier.into_values().collect();
        by_tier.sort_by(|a, b| {
            b.tier
                .monthly_cost_per_gb()
                .partial_cmp(&a.tier.monthly_cost_per_gb())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(TierCostReport {
            org_id,
            generated_at: now,
            total_size_bytes: states.iter().map(|s| s.size_bytes).sum(),
            total_monthly_cost: by_tier.iter().map(|line| line.monthly_cost).sum(),
            by_tier,
            potential_monthly_savings: potential,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use strata_core::model::{
        Organization, Repository, RepositoryKind, SnapshotTierState, TierRule,
    };
    use strata_core::store::{AgentStore, RepositoryStore, TierStore};
    use strata_core::MemoryStore;

    const GB: u64 = 1024 * 1024 * 1024;

    #[tokio::test]
    async fn aggregates_costs_and_rule_opportunities() {
        let store = Arc::new(MemoryStore::new());
        let org = Organization::new("acme");
        store.upsert_organization(&org).await.unwrap();
        let repository = Repository::new(org.id, "primary", RepositoryKind::Local);
        store.upsert_repository(&repository).await.unwrap();

        for (snapshot, tier, age_days) in [
            ("snap-a", StorageTier::Hot, 40),
            ("snap-b", StorageTier::Hot, 5),
            ("snap-c", StorageTier::Cold, 100),
        ] {
            store
                .insert_tier_state(&SnapshotTierState {
                    id: Uuid::new_v4(),
                    snapshot_id: snapshot.to_string(),
                    repository_id: repository.id,
                    tier,
                    size_bytes: 100 * GB,
                    tiered_at: Utc::now() - Duration::days(age_days),
                })
                .await
                .unwrap();
        }

        store
            .upsert_tier_rule(&TierRule {
                id: Uuid::new_v4(),
                org_id: org.id,
                from_tier: StorageTier::Hot,
                to_tier: StorageTier::Cold,
                age_threshold_days: 30,
                min_copies: 1,
                repository_id: None,
                enabled: true,
                priority: 10,
            })
            .await
            .unwrap();

        let reporter = CostReporter::new(store);
        let report = reporter.generate_for_org(org.id).await.unwrap();

        assert_eq!(report.total_size_bytes, 300 * GB);
        // 200 GB hot + 100 GB cold.
        let expected = 200.0 * 0.023 + 100.0 * 0.004;
        assert!((report.total_monthly_cost - expected).abs() < 1e-6);

        // Only snap-a is old enough for the rule.
        let expected_savings = 100.0 * (0.023 - 0.004);
        assert!((report.potential_monthly_savings - expected_savings).abs() < 1e-6);

        assert_eq!(report.by_tier.len(), 2);
        // Most expensive tier first.
        assert_eq!(report.by_tier[0].tier, StorageTier::Hot);
        assert_eq!(report.by_tier[0].snapshot_copies, 2);
    }

    #[tokio::test]
    async fn foreign_repositories_are_excluded() {
        let store = Arc::new(MemoryStore::new());
        let org = Organization::new("acme");
        store.upsert_organization(&org).await.unwrap();

        let foreign_repo = Repository::new(Uuid::new_v4(), "other", RepositoryKind::Local);
        store.upsert_repository(&foreign_repo).await.unwrap();
        store
            .insert_tier_state(&SnapshotTierState {
                id: Uuid::new_v4(),
                snapshot_id: "snap-x".to_string(),
                repository_id: foreign_repo.id,
                tier: StorageTier::Hot,
                size_bytes: GB,
                tiered_at: Utc::now(),
            })
            .await
            .unwrap();

        let reporter = CostReporter::new(store);
        let report = reporter.generate_for_org(org.id).await.unwrap();
        assert_eq!(report.total_size_bytes, 0);
        assert!(report.by_tier.is_empty());
    }
}
