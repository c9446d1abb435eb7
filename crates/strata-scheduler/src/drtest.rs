//! Disaster-recovery test scheduler.
//!
//! A DR test exercises a runbook's restore side against the linked backup
//! schedule's primary repository. The minimal verification is an engine
//! stats call over the latest snapshot, proving the repository answers and
//! the snapshot is listable.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use strata_core::error::{CoreError, Result};
use strata_core::model::{DrRunbook, DrTestResult, DrTestSchedule};
use strata_core::store::Store;
use strata_engine::client::Engine;
use strata_engine::StatsMode;

use crate::cron_set::CronSet;
use crate::secrets::{DecryptFn, PasswordFn, RepositoryCredentials};

/// DR-test scheduler tunables.
#[derive(Debug, Clone)]
pub struct DrTestSchedulerConfig {
    pub refresh_interval: Duration,
}

impl Default for DrTestSchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Drives scheduled DR tests.
pub struct DrTestScheduler {
    store: Arc<dyn Store>,
    engine: Arc<dyn Engine>,
    credentials: RepositoryCredentials,
    config: DrTestSchedulerConfig,
    cron: Mutex<CronSet>,
    running: Arc<RwLock<bool>>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DrTestScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn Engine>,
        config: DrTestSchedulerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            credentials: RepositoryCredentials::new(),
            config,
            cron: Mutex::new(CronSet::new()),
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

    /// Start the cron loop. Fails when the scheduler already runs.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(CoreError::AlreadyRunning("dr-test scheduler".to_string()));
            }
            *running = true;
        }
        self.reload().await?;

        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_refresh = tokio::time::Instant::now();
            loop {
                tick.tick().await;
                if !*scheduler.running.read().await {
                    break;
                }
                if last_refresh.elapsed() >= scheduler.config.refresh_interval {
                    if let Err(e) = scheduler.reload().await {
                        warn!(error = %e, "dr-test reload failed");
                    }
                    last_refresh = tokio::time::Instant::now();
                }
                let due = scheduler.cron.lock().await.due(Utc::now());
                for setting_id in due {
                    let scheduler = Arc::clone(&scheduler);
                    tokio::spawn(async move {
                        if let Err(e) = scheduler.trigger(setting_id).await {
                            error!(%setting_id, error = %e, "dr test failed");
                        }
                    });
                }
            }
        });
        *self.run_loop.lock().await = Some(handle);
        info!("dr-test scheduler started");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.run_loop.lock().await.take() {
            handle.abort();
        }
        info!("dr-test scheduler stopped");
    }

    /// Reconcile cron entries against enabled DR-test settings.
    pub async fn reload(&self) -> Result<()> {
        let settings = self.store.list_enabled_dr_schedules().await?;
        let desired: Vec<(Uuid, String)> = settings
            .iter()
            .map(|s| (s.id, s.cron_expression.clone()))
            .collect();
        self.cron.lock().await.reconcile(&desired, Utc::now());
        Ok(())
    }

    /// Run one DR test immediately.
    pub async fn trigger(&self, setting_id: Uuid) -> Result<()> {
        let settings = self.store.list_enabled_dr_schedules().await?;
        let setting = settings
            .into_iter()
            .find(|s| s.id == setting_id)
            .ok_or_else(|| CoreError::NotFound(format!("dr-test schedule {setting_id}")))?;
        self.execute(&setting).await
    }

    async fn execute(&self, setting: &DrTestSchedule) -> Result<()> {
        let runbook = self
            .store
            .get_runbook(setting.runbook_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("runbook {}", setting.runbook_id)))?;

        let mut result = DrTestResult::start(runbook.id);
        match self.verify_restore(&runbook).await {
            Ok(detail) => {
                result.success = true;
                result.restore_verified = true;
                result.details = Some(detail);
                info!(runbook = %runbook.id, "dr test passed");
            }
            Err(reason) => {
                result.success = false;
                result.restore_verified = false;
                result.details = Some(reason.clone());
                warn!(runbook = %runbook.id, %reason, "dr test failed");
            }
        }
        result.completed_at = Some(Utc::now());
        self.store.insert_dr_result(&result).await
    }

    /// Restore-side verification: reach the linked schedule's primary
    /// repository and stat its latest snapshot.
    async fn verify_restore(&self, runbook: &DrRunbook) -> std::result::Result<String, String> {
        let schedule_id = runbook
            .backup_schedule_id
            .ok_or_else(|| "runbook has no linked backup schedule".to_string())?;
        let schedule = self
            .store
            .get_schedule(schedule_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("backup schedule {schedule_id} not found"))?;
        let binding = schedule
            .primary_binding()
            .ok_or_else(|| "schedule has no enabled repository bindings".to_string())?;
        let repository = self
            .store
            .get_repository(binding.repository_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("repository {} not found", binding.repository_id))?;
        let cfg = self
            .credentials
            .resolve(&repository)
            .map_err(|e| e.to_string())?;

        let snapshots = self
            .engine
            .snapshots(&cfg)
            .await
            .map_err(|e| e.to_string())?;
        let latest = snapshots
            .into_iter()
            .max_by_key(|s| s.time)
            .ok_or_else(|| "repository has no snapshots".to_string())?;

        let stats = self
            .engine
            .stats(&cfg, StatsMode::RestoreSize)
            .await
            .map_err(|e| e.to_string())?;

        Ok(format!(
            "verified snapshot {} ({} files, {} bytes restorable)",
            latest.id, stats.total_file_count, stats.total_size
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use std::path::PathBuf;
    use strata_core::model::{
        BackupSchedule, Repository, RepositoryBinding, RepositoryKind,
    };
    use strata_core::store::{DrStore, RepositoryStore, ScheduleStore};
    use strata_core::MemoryStore;
    use strata_engine::{EngineError, SnapshotInfo, StatsSummary};

    async fn fixture_with_runbook(
        linked: bool,
    ) -> (Arc<MemoryStore>, Arc<FakeEngine>, DrTestScheduler, DrTestSchedule) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(FakeEngine::new());
        let org_id = Uuid::new_v4();

        let mut repository = Repository::new(org_id, "primary", RepositoryKind::Local);
        repository.encrypted_config =
            serde_json::to_vec(&serde_json::json!({ "path": "/srv/primary" })).unwrap();
        store.upsert_repository(&repository).await.unwrap();

        let mut schedule =
            BackupSchedule::new(Uuid::new_v4(), "docs", vec![PathBuf::from("/data")]);
        schedule.bindings = vec![RepositoryBinding {
            repository_id: repository.id,
            priority: 10,
            enabled: true,
        }];
        store.upsert_schedule(&schedule).await.unwrap();

        let mut runbook = DrRunbook::new(org_id, "restore drill");
        if linked {
            runbook.backup_schedule_id = Some(schedule.id);
        }
        store.upsert_runbook(&runbook).await.unwrap();

        let setting = DrTestSchedule {
            id: Uuid::new_v4(),
            runbook_id: runbook.id,
            cron_expression: "0 0 4 * * Sun".to_string(),
            enabled: true,
        };
        store.upsert_dr_schedule(&setting).await.unwrap();

        let scheduler = DrTestScheduler::new(
            store.clone(),
            engine.clone(),
            DrTestSchedulerConfig::default(),
        )
        .with_decrypt_fn(Arc::new(|r: &Repository| {
            serde_json::from_slice(&r.encrypted_config).map_err(CoreError::from)
        }))
        .with_password_fn(Arc::new(|_| Ok("pw".to_string())));

        (store, engine, scheduler, setting)
    }

    fn seed_snapshot(engine: &FakeEngine) {
        engine.set_snapshots(vec![SnapshotInfo {
            id: "snap-9".to_string(),
            time: Utc::now(),
            paths: vec![],
            tags: vec![],
            hostname: "h".to_string(),
        }]);
        engine.push_stats_result(Ok(StatsSummary {
            total_size: 4096,
            total_file_count: 12,
            snapshots_count: 1,
        }));
    }

    #[tokio::test]
    async fn dr_test_verifies_latest_snapshot() {
        let (store, engine, scheduler, setting) = fixture_with_runbook(true).await;
        seed_snapshot(&engine);

        scheduler.trigger(setting.id).await.unwrap();

        // The result row records a verified restore.
        let results = store.list_dr_results(setting.runbook_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert!(results[0].restore_verified);
        assert!(results[0].details.as_deref().unwrap().contains("snap-9"));
    }

    #[tokio::test]
    async fn unlinked_runbook_fails_the_test() {
        let (store, _engine, scheduler, setting) = fixture_with_runbook(false).await;
        scheduler.trigger(setting.id).await.unwrap();

        let results = store.list_dr_results(setting.runbook_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0]
            .details
            .as_deref()
            .unwrap()
            .contains("no linked backup schedule"));
    }

    #[tokio::test]
    async fn unreachable_repository_fails_the_test() {
        let (store, engine, scheduler, setting) = fixture_with_runbook(true).await;
        engine.set_snapshots(vec![SnapshotInfo {
            id: "snap-9".to_string(),
            time: Utc::now(),
            paths: vec![],
            tags: vec![],
            hostname: "h".to_string(),
        }]);
        engine.push_stats_result(Err(EngineError::TransportError(
            "connection refused".to_string(),
        )));

        scheduler.trigger(setting.id).await.unwrap();

        let results = store.list_dr_results(setting.runbook_id).await.unwrap();
        assert!(!results[0].success);
    }
}
