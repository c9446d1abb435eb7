//! Repository verification scheduler: structural checks, read-data checks,
//! and sampled restore tests, with consecutive-failure notification.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use strata_core::error::{CoreError, Result};
use strata_core::model::{
    TestRestoreSettings, VerificationKind, VerificationRecord, VerificationSchedule,
};
use strata_core::notify::{Notifier, TestRestoreNotification, VerificationNotification};
use strata_core::store::Store;
use strata_engine::client::Engine;

use crate::cron_set::CronSet;
use crate::restore_test::TestRestoreRunner;
use crate::secrets::{DecryptFn, PasswordFn, RepositoryCredentials};

/// Verification scheduler tunables.
#[derive(Debug, Clone)]
pub struct VerificationSchedulerConfig {
    pub refresh_interval: Duration,
    pub test_restore: TestRestoreSettings,
}

impl Default for VerificationSchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            test_restore: TestRestoreSettings::default(),
        }
    }
}

/// Drives per-repository verification settings on cron.
pub struct VerificationScheduler {
    store: Arc<dyn Store>,
    engine: Arc<dyn Engine>,
    notifier: Arc<dyn Notifier>,
    credentials: RepositoryCredentials,
    config: VerificationSchedulerConfig,
    cron: Mutex<CronSet>,
    running: Arc<RwLock<bool>>,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl VerificationScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn Engine>,
        notifier: Arc<dyn Notifier>,
        config: VerificationSchedulerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            notifier,
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
                return Err(CoreError::AlreadyRunning(
                    "verification scheduler".to_string(),
                ));
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
                        warn!(error = %e, "verification reload failed");
                    }
                    last_refresh = tokio::time::Instant::now();
                }
                let due = scheduler.cron.lock().await.due(Utc::now());
                for setting_id in due {
                    let scheduler = Arc::clone(&scheduler);
                    tokio::spawn(async move {
                        if let Err(e) = scheduler.trigger(setting_id).await {
                            error!(%setting_id, error = %e, "verification run failed");
                        }
                    });
                }
            }
        });
        *self.run_loop.lock().await = Some(handle);
        info!("verification scheduler started");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.run_loop.lock().await.take() {
            handle.abort();
        }
        info!("verification scheduler stopped");
    }

    /// Reconcile cron entries against enabled verification settings.
    pub async fn reload(&self) -> Result<()> {
        let settings = self.store.list_enabled_verification_schedules().await?;
        let desired: Vec<(Uuid, String)> = settings
            .iter()
            .map(|s| (s.id, s.cron_expression.clone()))
            .collect();
        self.cron.lock().await.reconcile(&desired, Utc::now());
        Ok(())
    }

    /// Run one verification setting immediately.
    pub async fn trigger(&self, setting_id: Uuid) -> Result<()> {
        let setting = self
            .store
            .get_verification_schedule(setting_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("verification schedule {setting_id}")))?;
        self.execute(&setting).await
    }

    async fn execute(&self, setting: &VerificationSchedule) -> Result<()> {
        let mut record = VerificationRecord::start(setting.repository_id, setting.kind);
        record.read_data_subset_percent = setting.read_data_subset_percent;
        self.store.insert_verification(&record).await?;

        let outcome = self.run_body(setting, &mut record).await;

        match outcome {
            Ok(()) => {
                record.pass();
                self.store.update_verification(&record).await?;
                self.store
                    .set_consecutive_failures(setting.repository_id, setting.kind, 0)
                    .await?;
                info!(
                    repository = %setting.repository_id,
                    kind = ?setting.kind,
                    "verification passed"
                );
            }
            Err(reason) => {
                record.fail(&reason);
                self.store.update_verification(&record).await?;
                let failures = self
                    .store
                    .consecutive_failures(setting.repository_id, setting.kind)
                    .await?
                    + 1;
                self.store
                    .set_consecutive_failures(setting.repository_id, setting.kind, failures)
                    .await?;
                warn!(
                    repository = %setting.repository_id,
                    kind = ?setting.kind,
                    failures,
                    %reason,
                    "verification failed"
                );
                if failures >= setting.notify_after_failures {
                    let repository_name = self
                        .store
                        .get_repository(setting.repository_id)
                        .await?
                        .map(|r| r.name)
                        .unwrap_or_default();
                    self.notifier
                        .verification_failed(VerificationNotification {
                            repository_id: setting.repository_id,
                            repository_name,
                            verification_id: record.id,
                            consecutive_failures: failures,
                            error_message: record.error_message.clone(),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    /// The kind-specific verification body. `Err` carries the failure reason.
    async fn run_body(
        &self,
        setting: &VerificationSchedule,
        record: &mut VerificationRecord,
    ) -> std::result::Result<(), String> {
        let repository = self
            .store
            .get_repository(setting.repository_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("repository {} not found", setting.repository_id))?;
        let cfg = self
            .credentials
            .resolve(&repository)
            .map_err(|e| e.to_string())?;

        match setting.kind {
            VerificationKind::Check => {
                let report = self
                    .engine
                    .check(&cfg, false, None)
                    .await
                    .map_err(|e| e.to_string())?;
                record.errors_found = report.errors_found;
                if report.errors_found > 0 {
                    return Err(format!("check found {} errors", report.errors_found));
                }
                Ok(())
            }
            VerificationKind::CheckReadData => {
                let report = self
                    .engine
                    .check(&cfg, true, setting.read_data_subset_percent)
                    .await
                    .map_err(|e| e.to_string())?;
                record.errors_found = report.errors_found;
                if report.errors_found > 0 {
                    return Err(format!("read-data check found {} errors", report.errors_found));
                }
                Ok(())
            }
            VerificationKind::TestRestore => {
                let runner = TestRestoreRunner::new(
                    Arc::clone(&self.engine),
                    self.config.test_restore.clone(),
                );
                let result = runner.run(&cfg).await.map_err(|e| e.to_string())?;
                record.files_restored = result.files_restored;
                record.files_verified = result.files_verified;
                record.bytes_restored = result.bytes_restored;
                record.errors_found = result.verification_errors.len() as u64;
                if !result.verification_errors.is_empty() {
                    self.notifier
                        .test_restore_failed(TestRestoreNotification {
                            repository_id: setting.repository_id,
                            snapshot_id: result.snapshot_id.clone(),
                            verification_errors: result.verification_errors.clone(),
                        })
                        .await;
                    return Err(format!(
                        "restore test failed for {} of {} files",
                        result.verification_errors.len(),
                        result.files_restored
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CapturingNotifier, FakeEngine};
    use std::sync::Arc;
    use strata_core::model::{Repository, RepositoryKind};
    use strata_core::store::{RepositoryStore, VerificationStore};
    use strata_core::MemoryStore;
    use strata_engine::{CheckReport, EngineError};

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: Arc<FakeEngine>,
        notifier: Arc<CapturingNotifier>,
        scheduler: VerificationScheduler,
        repository: Repository,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(FakeEngine::new());
        let notifier = Arc::new(CapturingNotifier::new());

        let mut repository =
            Repository::new(Uuid::new_v4(), "primary", RepositoryKind::Local);
        repository.encrypted_config =
            serde_json::to_vec(&serde_json::json!({ "path": "/srv/primary" })).unwrap();
        store.upsert_repository(&repository).await.unwrap();

        let scheduler = VerificationScheduler::new(
            store.clone(),
            engine.clone(),
            notifier.clone(),
            VerificationSchedulerConfig::default(),
        )
        .with_decrypt_fn(Arc::new(|r: &Repository| {
            serde_json::from_slice(&r.encrypted_config).map_err(CoreError::from)
        }))
        .with_password_fn(Arc::new(|_| Ok("pw".to_string())));

        Fixture {
            store,
            engine,
            notifier,
            scheduler,
            repository,
        }
    }

    async fn setting(f: &Fixture, kind: VerificationKind) -> VerificationSchedule {
        let setting = VerificationSchedule::new(f.repository.id, kind, "0 0 3 * * *");
        f.store
            .upsert_verification_schedule(&setting)
            .await
            .unwrap();
        setting
    }

    #[tokio::test]
    async fn passing_check_resets_failure_counter() {
        let f = fixture().await;
        let setting = setting(&f, VerificationKind::Check).await;
        f.store
            .set_consecutive_failures(f.repository.id, VerificationKind::Check, 2)
            .await
            .unwrap();

        f.scheduler.trigger(setting.id).await.unwrap();

        assert_eq!(
            f.store
                .consecutive_failures(f.repository.id, VerificationKind::Check)
                .await
                .unwrap(),
            0
        );
        assert!(f.notifier.verifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_check_notifies_at_threshold() {
        let f = fixture().await;
        let mut setting = setting(&f, VerificationKind::Check).await;
        setting.notify_after_failures = 2;
        f.store
            .upsert_verification_schedule(&setting)
            .await
            .unwrap();

        // First failure: under the threshold, counted but silent.
        f.engine.push_check_result(Ok(CheckReport {
            errors_found: 3,
            output: "error: bad pack".to_string(),
        }));
        f.scheduler.trigger(setting.id).await.unwrap();
        assert!(f.notifier.verifications.lock().unwrap().is_empty());

        // Second consecutive failure crosses the threshold.
        f.engine.push_check_result(Err(EngineError::Corrupted(
            "ciphertext verification failed".to_string(),
        )));
        f.scheduler.trigger(setting.id).await.unwrap();

        let notifications = f.notifier.verifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].consecutive_failures, 2);
    }

    #[tokio::test]
    async fn check_records_errors_found() {
        let f = fixture().await;
        let setting = setting(&f, VerificationKind::Check).await;
        f.engine.push_check_result(Ok(CheckReport {
            errors_found: 2,
            output: String::new(),
        }));

        f.scheduler.trigger(setting.id).await.unwrap();

        // Failure counter advanced.
        assert_eq!(
            f.store
                .consecutive_failures(f.repository.id, VerificationKind::Check)
                .await
                .unwrap(),
            1
        );
        // Default threshold of 1 notifies immediately.
        assert_eq!(f.notifier.verifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_kind_runs_sampled_restore() {
        let f = fixture().await;
        let setting = setting(&f, VerificationKind::TestRestore).await;
        f.engine.set_snapshots(vec![strata_engine::SnapshotInfo {
            id: "snap-1".to_string(),
            time: Utc::now(),
            paths: vec![],
            tags: vec![],
            hostname: "h".to_string(),
        }]);
        f.engine.set_listing(vec![strata_engine::SnapshotFile {
            path: std::path::PathBuf::from("/data/a.txt"),
            size: 5,
            is_dir: false,
        }]);
        f.engine
            .restore_files
            .lock()
            .unwrap()
            .insert(std::path::PathBuf::from("/data/a.txt"), b"alpha".to_vec());

        f.scheduler.trigger(setting.id).await.unwrap();

        // Verification passed: no failure notifications of either kind.
        assert!(f.notifier.verifications.lock().unwrap().is_empty());
        assert!(f.notifier.test_restores.lock().unwrap().is_empty());
        let failures = f
            .store
            .consecutive_failures(f.repository.id, VerificationKind::TestRestore)
            .await
            .unwrap();
        assert_eq!(failures, 0);
    }
}
