//! Daily storage statistics collector.
//!
//! For every organization and repository, samples the engine's raw-data and
//! restore-size stats and derives dedup ratio and space saved.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use strata_core::error::{CoreError, Result};
use strata_core::model::{Organization, Repository, StorageStats};
use strata_core::store::Store;
use strata_engine::client::Engine;
use strata_engine::StatsMode;

use crate::secrets::{DecryptFn, PasswordFn, RepositoryCredentials};

/// Stats collector tunables.
#[derive(Debug, Clone)]
pub struct StatsCollectorConfig {
    /// When the daily collection fires.
    pub cron_expression: String,
}

impl Default for StatsCollectorConfig {
    fn default() -> Self {
        Self {
            // Daily at 01:30 UTC, after the usual backup window.
            cron_expression: "0 30 1 * * *".to_string(),
        }
    }
}

/// Collects per-repository storage statistics on a daily cron.
pub struct StatsCollector {
    store: Arc<dyn Store>,
    engine: Arc<dyn Engine>,
    credentials: RepositoryCredentials,
    config: StatsCollectorConfig,
    running: Arc<RwLock<bool>>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl StatsCollector {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn Engine>,
        config: StatsCollectorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            credentials: RepositoryCredentials::new(),
            config,
            running: Arc::new(RwLock::new(false)),
            run_loop: Mutex::new(None),
        }
    }

    pub fn with_decrypt_fn(mut self, decrypt: DecryptFn) -> Self {
        self.credentials = self.credentials.with_decrypt_fn(decrypt);
        self
    }

    pub fn with_password_fn(mut self, password: PasswordFn) -> Self {
        self.credentials = self.credentials.with_password_fn(password);
        self
    }

    /// Start the daily loop. Fails when the collector already runs or the
    /// configured cron expression does not parse.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let schedule = Schedule::from_str(&self.config.cron_expression)
            .map_err(|e| CoreError::InvalidCron(e.to_string()))?;
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(CoreError::AlreadyRunning("stats collector".to_string()));
            }
            *running = true;
        }

        let collector = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut next_fire: Option<DateTime<Utc>> = schedule.after(&Utc::now()).next();
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if !*collector.running.read().await {
                    break;
                }
                let now = Utc::now();
                if let Some(fire) = next_fire {
                    if fire <= now {
                        next_fire = schedule.after(&now).next();
                        if let Err(e) = collector.collect_all().await {
                            warn!(error = %e, "stats collection pass failed");
                        }
                    }
                }
            }
        });
        *self.run_loop.lock().await = Some(handle);
        info!("stats collector started");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.run_loop.lock().await.take() {
            handle.abort();
        }
        info!("stats collector stopped");
    }

    /// One full pass over every organization's repositories. Per-repository
    /// failures are logged and skipped.
    pub async fn collect_all(&self) -> Result<()> {
        let organizations = self.store.list_organizations().await?;
        for org in organizations {
            let repositories = self.store.list_repositories_for_org(org.id).await?;
            for repository in repositories {
                if let Err(e) = self.collect_repository(&org, &repository).await {
                    warn!(
                        repository = %repository.id,
                        error = %e,
                        "storage stats collection failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn collect_repository(
        &self,
        org: &Organization,
        repository: &Repository,
    ) -> Result<()> {
        let cfg = self.credentials.resolve(repository)?;
        let raw = self.engine.stats(&cfg, StatsMode::RawData).await?;
        let restore = self.engine.stats(&cfg, StatsMode::RestoreSize).await?;

        let stats = StorageStats::derive(
            repository.id,
            org.id,
            raw.total_size,
            restore.total_size,
            raw.snapshots_count.max(restore.snapshots_count),
        );
        info!(
            repository = %repository.id,
            raw = stats.raw_data_bytes,
            restore = stats.restore_size_bytes,
            dedup_ratio = stats.dedup_ratio,
            "storage stats collected"
        );
        self.store.insert_storage_stats(&stats).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use strata_core::model::RepositoryKind;
    use strata_core::store::{AgentStore, RepositoryStore, StatsStore};
    use strata_core::MemoryStore;
    use strata_engine::StatsSummary;

    #[tokio::test]
    async fn collects_and_derives_for_each_repository() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(FakeEngine::new());

        let org = Organization::new("acme");
        store.upsert_organization(&org).await.unwrap();
        let mut repository = Repository::new(org.id, "primary", RepositoryKind::Local);
        repository.encrypted_config =
            serde_json::to_vec(&serde_json::json!({ "path": "/srv/primary" })).unwrap();
        store.upsert_repository(&repository).await.unwrap();

        engine.push_stats_result(Ok(StatsSummary {
            total_size: 100,
            total_file_count: 10,
            snapshots_count: 4,
        }));
        engine.push_stats_result(Ok(StatsSummary {
            total_size: 400,
            total_file_count: 10,
            snapshots_count: 4,
        }));

        let collector = StatsCollector::new(
            store.clone(),
            engine,
            StatsCollectorConfig::default(),
        )
        .with_decrypt_fn(Arc::new(|r: &Repository| {
            serde_json::from_slice(&r.encrypted_config).map_err(CoreError::from)
        }))
        .with_password_fn(Arc::new(|_| Ok("pw".to_string())));

        collector.collect_all().await.unwrap();

        let stats = store
            .latest_storage_stats(repository.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.raw_data_bytes, 100);
        assert_eq!(stats.restore_size_bytes, 400);
        assert_eq!(stats.dedup_ratio, 4.0);
        assert_eq!(stats.space_saved_bytes, 300);
        assert_eq!(stats.snapshot_count, 4);
    }

    #[tokio::test]
    async fn unresolvable_repository_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(FakeEngine::new());

        let org = Organization::new("acme");
        store.upsert_organization(&org).await.unwrap();
        let repository = Repository::new(org.id, "broken", RepositoryKind::Local);
        store.upsert_repository(&repository).await.unwrap();

        // No credential functions injected: the pass logs and moves on.
        let collector =
            StatsCollector::new(store.clone(), engine, StatsCollectorConfig::default());
        collector.collect_all().await.unwrap();
        assert!(store
            .latest_storage_stats(repository.id)
            .await
            .unwrap()
            .is_none());
    }
}
