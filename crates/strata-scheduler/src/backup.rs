//! The backup scheduler: cron firing, gating, retry/failover across
//! repository bindings, replication, retention, and resumable progress.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use strata_core::error::{CoreError, Result};
use strata_core::model::{
    Agent, BackupCheckpoint, BackupRecord, BackupSchedule, BackupStatus, MountUnavailableAction,
    RepositoryBinding,
};
use strata_core::notify::{BackupNotification, Notifier};
use strata_core::store::Store;
use strata_engine::client::{BackupOptions, Engine, ProgressSink};
use strata_engine::mounts::MountChecker;
use strata_engine::scan::scan_large_files;
use strata_engine::{EngineConfig, EngineProgress};

use crate::checkpoint::CheckpointManager;
use crate::cron_set::CronSet;
use crate::scripts::run_script;
use crate::secrets::{DecryptFn, PasswordFn, RepositoryCredentials};

/// Backup scheduler tunables.
#[derive(Debug, Clone)]
pub struct BackupSchedulerConfig {
    /// Cadence of store reloads into the cron set.
    pub refresh_interval: Duration,
    /// Engine backup tries per repository binding.
    pub max_retries: u32,
    /// Pause between tries.
    pub retry_delay: Duration,
}

impl Default for BackupSchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Execution counters since scheduler start.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BackupSchedulerStatistics {
    pub fired: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub active: usize,
}

/// Resume eligibility report for one checkpoint.
#[derive(Debug, Clone)]
pub struct ResumeInfo {
    pub checkpoint: BackupCheckpoint,
    pub resumable: bool,
    pub attempts_remaining: u32,
}

#[derive(Default)]
struct Counters {
    fired: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    active: AtomicUsize,
}

struct CompletedAttempt {
    record: BackupRecord,
    engine_config: EngineConfig,
    repository_id: Uuid,
}

struct AttemptFailure {
    record: Option<BackupRecord>,
    retryable: bool,
}

/// Drives periodic backup schedules.
pub struct BackupScheduler {
    store: Arc<dyn Store>,
    engine: Arc<dyn Engine>,
    checkpoints: Arc<CheckpointManager>,
    notifier: Arc<dyn Notifier>,
    mount_checker: MountChecker,
    config: BackupSchedulerConfig,
    credentials: RepositoryCredentials,
    cron: Mutex<CronSet>,
    running: Arc<RwLock<bool>>,
    counters: Counters,
    run_loop: Mutex<Option<JoinHandle<()>>>,
}

impl BackupScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn Engine>,
        checkpoints: Arc<CheckpointManager>,
        notifier: Arc<dyn Notifier>,
        config: BackupSchedulerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            checkpoints,
            notifier,
            mount_checker: MountChecker::default(),
            config,
            credentials: RepositoryCredentials::new(),
            cron: Mutex::new(CronSet::new()),
            running: Arc::new(RwLock::new(false)),
            counters: Counters::default(),
            run_loop: Mutex::new(None),
        }
    }

    /// Inject the repository config decryption function.
    pub fn with_decrypt_fn(mut self, decrypt: DecryptFn) -> Self {
        self.credentials = self.credentials.with_decrypt_fn(decrypt);
        self
    }

    /// Inject the repository password function.
    pub fn with_password_fn(mut self, password: PasswordFn) -> Self {
        self.credentials = self.credentials.with_password_fn(password);
        self
    }

    pub fn with_mount_checker(mut self, checker: MountChecker) -> Self {
        self.mount_checker = checker;
        self
    }

    /// Start the cron loop. Fails when the scheduler already runs.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(CoreError::AlreadyRunning("backup scheduler".to_string()));
            }
            *running = true;
        }
        self.reload().await?;
        self.checkpoints.clone().start().await;

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
                        warn!(error = %e, "schedule reload failed");
                    }
                    last_refresh = tokio::time::Instant::now();
                }
                let due = scheduler.cron.lock().await.due(Utc::now());
                for schedule_id in due {
                    let scheduler = Arc::clone(&scheduler);
                    tokio::spawn(async move {
                        scheduler.run_schedule(schedule_id).await;
                    });
                }
            }
        });
        *self.run_loop.lock().await = Some(handle);
        info!("backup scheduler started");
        Ok(())
    }

    /// Stop the cron loop; in-flight executions run to completion.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.run_loop.lock().await.take() {
            handle.abort();
        }
        self.checkpoints.stop().await;
        info!("backup scheduler stopped");
    }

    /// Reconcile cron entries against the store's enabled schedules.
    pub async fn reload(&self) -> Result<()> {
        let schedules = self.store.list_enabled_schedules().await?;
        let desired: Vec<(Uuid, String)> = schedules
            .iter()
            .map(|s| (s.id, s.cron_expression.clone()))
            .collect();
        let outcome = self.cron.lock().await.reconcile(&desired, Utc::now());
        if !outcome.is_noop() {
            info!(
                added = outcome.added,
                updated = outcome.updated,
                removed = outcome.removed,
                "backup schedules reloaded"
            );
        }
        Ok(())
    }

    /// Fire a schedule immediately.
    pub async fn trigger(&self, schedule_id: Uuid) -> Result<()> {
        let schedule = self
            .store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("schedule {schedule_id}")))?;
        self.execute(&schedule).await;
        Ok(())
    }

    /// Number of executions currently in flight.
    pub fn active_count(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Execution counters since start.
    pub fn statistics(&self) -> BackupSchedulerStatistics {
        BackupSchedulerStatistics {
            fired: self.counters.fired.load(Ordering::SeqCst),
            succeeded: self.counters.succeeded.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
        }
    }

    /// The next instant the schedule's time window allows a run.
    pub async fn next_allowed_run(&self, schedule_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let schedule = self
            .store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("schedule {schedule_id}")))?;
        Ok(schedule.next_allowed_at(Utc::now()))
    }

    /// Backups not yet completed for an agent.
    pub async fn incomplete_backups(&self, agent_id: Uuid) -> Result<Vec<BackupRecord>> {
        self.store.list_incomplete_backups(agent_id).await
    }

    /// Resume eligibility for a checkpoint.
    pub async fn resume_info(&self, checkpoint_id: Uuid) -> Result<ResumeInfo> {
        let checkpoint = self
            .store
            .get_checkpoint(checkpoint_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("checkpoint {checkpoint_id}")))?;
        let max = self.checkpoints.config().max_resume_attempts;
        Ok(ResumeInfo {
            resumable: checkpoint.is_resumable(max, Utc::now()),
            attempts_remaining: max.saturating_sub(checkpoint.resume_count),
            checkpoint,
        })
    }

    /// Cancel a checkpoint.
    pub async fn cancel_checkpoint(&self, checkpoint_id: Uuid) -> Result<()> {
        self.checkpoints.cancel_checkpoint(checkpoint_id).await
    }

    /// Resume an interrupted backup from its checkpoint. Returns the new
    /// backup row; its status reflects the outcome.
    pub async fn resume(&self, checkpoint_id: Uuid) -> Result<BackupRecord> {
        let mut checkpoint = self
            .store
            .get_checkpoint(checkpoint_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("checkpoint {checkpoint_id}")))?;
        let max = self.checkpoints.config().max_resume_attempts;
        if !checkpoint.is_resumable(max, Utc::now()) {
            return Err(CoreError::NotResumable(format!(
                "checkpoint {checkpoint_id} (state {:?}, resume_count {})",
                checkpoint.state, checkpoint.resume_count
            )));
        }
        let schedule = self
            .store
            .get_schedule(checkpoint.schedule_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("schedule {}", checkpoint.schedule_id)))?;
        let agent = self
            .store
            .get_agent(schedule.agent_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("agent {}", schedule.agent_id)))?;
        let binding = schedule
            .enabled_bindings()
            .into_iter()
            .find(|b| b.repository_id == checkpoint.repository_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "enabled binding for repository {}",
                    checkpoint.repository_id
                ))
            })?;

        self.checkpoints.prepare_resume(&mut checkpoint).await?;
        info!(
            checkpoint = %checkpoint.id,
            schedule = %schedule.id,
            resume_count = checkpoint.resume_count,
            "resuming interrupted backup"
        );

        let record = match self
            .attempt_backup(&schedule, &agent, &binding, None, Some(&checkpoint))
            .await
        {
            Ok(attempt) => {
                self.notify_backup(&schedule, &agent, &attempt.record).await;
                attempt.record
            }
            Err(failure) => {
                let record = failure
                    .record
                    .ok_or_else(|| CoreError::Store("resume attempt left no record".to_string()))?;
                self.notify_backup(&schedule, &agent, &record).await;
                record
            }
        };
        Ok(record)
    }

    async fn run_schedule(&self, schedule_id: Uuid) {
        match self.store.get_schedule(schedule_id).await {
            Ok(Some(schedule)) => self.execute(&schedule).await,
            Ok(None) => warn!(%schedule_id, "fired schedule no longer exists"),
            Err(e) => error!(%schedule_id, error = %e, "failed to load fired schedule"),
        }
    }

    /// One full execution of a schedule: gates, failover, replication.
    /// Failures land in backup rows and logs; nothing propagates out.
    pub async fn execute(&self, schedule: &BackupSchedule) {
        self.counters.fired.fetch_add(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        let result = self.execute_inner(schedule).await;
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = result {
            error!(schedule = %schedule.id, error = %e, "schedule execution aborted");
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn execute_inner(&self, schedule: &BackupSchedule) -> Result<()> {
        let now = Utc::now();

        // Gate: allowed time window. No backup row is created here.
        if !schedule.can_run_at(now) {
            info!(
                schedule = %schedule.id,
                next_allowed = ?schedule.next_allowed_at(now),
                "outside allowed time window; skipping run"
            );
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let agent = self
            .store
            .get_agent(schedule.agent_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("agent {}", schedule.agent_id)))?;

        // Gate: organization maintenance.
        if let Some(org) = self.store.get_organization(agent.org_id).await? {
            if org.maintenance_active(now) {
                info!(schedule = %schedule.id, org = %org.id, "maintenance active; skipping run");
                self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        }

        // Configuration error: nothing to back up.
        if schedule.paths.is_empty() {
            warn!(schedule = %schedule.id, "schedule has no paths configured");
            let mut record = BackupRecord::start(
                schedule.id,
                agent.id,
                schedule.primary_binding().map(|b| b.repository_id),
            );
            record.fail("schedule has no paths configured");
            self.store.insert_backup(&record).await?;
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        // Gate: network mounts under the schedule paths.
        let checks = self
            .mount_checker
            .validate_schedule_paths(schedule, &agent.mounts)
            .await;
        if let Some(bad) = checks.iter().find(|c| !c.is_reachable()) {
            match schedule.on_mount_unavailable {
                MountUnavailableAction::Skip => {
                    info!(
                        schedule = %schedule.id,
                        path = %bad.path.display(),
                        status = ?bad.status,
                        "network mount unreachable; skipping run"
                    );
                    self.counters.skipped.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                MountUnavailableAction::Fail => {
                    let mut record = BackupRecord::start(
                        schedule.id,
                        agent.id,
                        schedule.primary_binding().map(|b| b.repository_id),
                    );
                    let mount = bad.mount_point.as_deref().unwrap_or(&bad.path);
                    let status = bad
                        .status
                        .map(|s| format!("{s:?}").to_lowercase())
                        .unwrap_or_else(|| "unknown".to_string());
                    record.fail(format!(
                        "network mount unavailable: {} ({status})",
                        mount.display()
                    ));
                    self.store.insert_backup(&record).await?;
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }

        // Pre-backup script.
        let mut pre_script_output = None;
        if let Some(script) = &schedule.pre_script {
            let outcome = run_script(script).await;
            pre_script_output = Some(outcome.combined_output());
            if !outcome.success && script.fail_on_error {
                warn!(schedule = %schedule.id, reason = %outcome.failure_reason(), "pre-backup script failed");
                let mut record = BackupRecord::start(
                    schedule.id,
                    agent.id,
                    schedule.primary_binding().map(|b| b.repository_id),
                );
                record.pre_script_output = pre_script_output.clone();
                record.fail(format!("pre-backup script failed: {}", outcome.failure_reason()));
                self.store.insert_backup(&record).await?;
                self.run_post_failure_script(schedule, &mut record).await;
                self.notify_backup(schedule, &agent, &record).await;
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        }

        // Repository iteration: ascending priority, stable ties, bounded
        // retries per binding, stop on first success.
        let bindings: Vec<RepositoryBinding> = schedule
            .enabled_bindings()
            .into_iter()
            .cloned()
            .collect();
        if bindings.is_empty() {
            warn!(schedule = %schedule.id, "schedule has no enabled repository bindings");
            let mut record = BackupRecord::start(schedule.id, agent.id, None);
            record.fail("schedule has no enabled repository bindings");
            self.store.insert_backup(&record).await?;
            self.counters.failed.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let mut success: Option<CompletedAttempt> = None;
        let mut last_failed: Option<BackupRecord> = None;

        'bindings: for binding in &bindings {
            for attempt in 1..=self.config.max_retries {
                if attempt > 1 {
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                match self
                    .attempt_backup(schedule, &agent, binding, pre_script_output.as_deref(), None)
                    .await
                {
                    Ok(attempt) => {
                        success = Some(attempt);
                        break 'bindings;
                    }
                    Err(failure) => {
                        if failure.record.is_some() {
                            last_failed = failure.record;
                        }
                        debug!(
                            schedule = %schedule.id,
                            repository = %binding.repository_id,
                            attempt,
                            retryable = failure.retryable,
                            "backup attempt failed"
                        );
                        if !failure.retryable {
                            continue 'bindings;
                        }
                    }
                }
            }
        }

        match success {
            Some(mut attempt) => {
                self.counters.succeeded.fetch_add(1, Ordering::SeqCst);

                // Retention on the repository that took the backup.
                if let Some(retention) = &schedule.retention {
                    if !retention.is_empty() {
                        match self
                            .engine
                            .forget_and_prune(&attempt.engine_config, retention)
                            .await
                        {
                            Ok(prune) => {
                                attempt.record.retention_removed = Some(prune.removed);
                                attempt.record.retention_kept = Some(prune.kept);
                                if let Err(e) = self.store.update_backup(&attempt.record).await {
                                    warn!(error = %e, "failed to persist retention counts");
                                }
                            }
                            Err(e) => {
                                warn!(schedule = %schedule.id, error = %e, "retention prune failed")
                            }
                        }
                    }
                }

                self.notify_backup(schedule, &agent, &attempt.record).await;

                let snapshot_id = attempt.record.snapshot_id.clone().unwrap_or_default();
                self.replicate(
                    schedule,
                    attempt.repository_id,
                    &attempt.engine_config,
                    &snapshot_id,
                )
                .await;
            }
            None => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                if let Some(mut record) = last_failed {
                    self.run_post_failure_script(schedule, &mut record).await;
                    self.notify_backup(schedule, &agent, &record).await;
                }
            }
        }
        Ok(())
    }

    /// One try against one binding: row, config, scan, engine, terminal state.
    async fn attempt_backup(
        &self,
        schedule: &BackupSchedule,
        agent: &Agent,
        binding: &RepositoryBinding,
        pre_script_output: Option<&str>,
        resume: Option<&BackupCheckpoint>,
    ) -> std::result::Result<CompletedAttempt, AttemptFailure> {
        let mut record = BackupRecord::start(schedule.id, agent.id, Some(binding.repository_id));
        record.pre_script_output = pre_script_output.map(str::to_string);
        if let Some(checkpoint) = resume {
            record.resumed_from_backup_id = checkpoint.current_backup_id;
            record.from_checkpoint_id = Some(checkpoint.id);
        }
        if let Err(e) = self.store.insert_backup(&record).await {
            error!(schedule = %schedule.id, error = %e, "failed to insert backup row");
            return Err(AttemptFailure {
                record: None,
                retryable: false,
            });
        }

        let repository = match self.store.get_repository(binding.repository_id).await {
            Ok(Some(repository)) => repository,
            Ok(None) => {
                return Err(self
                    .fail_attempt(
                        record,
                        format!("repository {} not found", binding.repository_id),
                        false,
                    )
                    .await);
            }
            Err(e) => {
                return Err(self.fail_attempt(record, e.to_string(), false).await);
            }
        };

        let engine_config = match self.credentials.resolve(&repository) {
            Ok(config) => config,
            Err(e) => {
                return Err(self.fail_attempt(record, e.to_string(), false).await);
            }
        };

        // Large-file pre-scan, persisted on the row before the engine runs.
        if let Some(max_mb) = schedule.max_file_size_mb {
            if max_mb > 0 {
                let paths = schedule.paths.clone();
                let excludes = schedule.excludes.clone();
                let scan = tokio::task::spawn_blocking(move || {
                    scan_large_files(&paths, &excludes, max_mb)
                })
                .await
                .unwrap_or_default();
                if !scan.is_empty() {
                    debug!(
                        schedule = %schedule.id,
                        count = scan.len(),
                        "large files excluded from backup"
                    );
                }
                record.excluded_large_files = scan.into_iter().map(|f| f.path).collect();
                if let Err(e) = self.store.update_backup(&record).await {
                    warn!(error = %e, "failed to persist large-file scan");
                }
            }
        }

        // Checkpoint bookkeeping for this try.
        let checkpoint = match resume {
            Some(checkpoint) => {
                let mut checkpoint = checkpoint.clone();
                match self.checkpoints.attach_backup(&mut checkpoint, record.id).await {
                    Ok(()) => Some(checkpoint),
                    Err(e) => {
                        warn!(error = %e, "failed to attach resumed checkpoint");
                        None
                    }
                }
            }
            None => {
                match self
                    .checkpoints
                    .start_checkpoint(schedule.id, agent.id, binding.repository_id)
                    .await
                {
                    Ok(mut checkpoint) => {
                        match self.checkpoints.attach_backup(&mut checkpoint, record.id).await {
                            Ok(()) => Some(checkpoint),
                            Err(e) => {
                                warn!(error = %e, "failed to attach checkpoint");
                                None
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to start checkpoint");
                        None
                    }
                }
            }
        };

        let progress = checkpoint
            .is_some()
            .then(|| self.progress_sink_for(record.id));

        let mut tags = vec![
            format!("schedule:{}", schedule.id),
            format!("agent:{}", agent.id),
        ];
        if resume.is_some() {
            tags.push("resumed".to_string());
        }
        let options = BackupOptions {
            bandwidth_limit_kbps: schedule.bandwidth_limit_kbps,
            compression: schedule.compression,
            exclude_larger_than_mb: schedule.max_file_size_mb,
        };

        match self
            .engine
            .backup(
                &engine_config,
                &schedule.paths,
                &schedule.excludes,
                &tags,
                &options,
                progress,
            )
            .await
        {
            Ok(summary) => {
                record.complete(
                    &summary.snapshot_id,
                    summary.total_bytes_processed,
                    summary.files_new,
                    summary.files_changed,
                );
                if let Some(script) = &schedule.post_success_script {
                    let outcome = run_script(script).await;
                    record.post_script_output = Some(outcome.combined_output());
                }
                if let Err(e) = self.store.update_backup(&record).await {
                    warn!(error = %e, "failed to persist completed backup row");
                }
                if let Err(e) = self.checkpoints.complete_backup(record.id).await {
                    warn!(error = %e, "failed to complete checkpoint");
                }
                info!(
                    schedule = %schedule.id,
                    repository = %binding.repository_id,
                    snapshot = %summary.snapshot_id,
                    "backup completed"
                );
                Ok(CompletedAttempt {
                    record,
                    engine_config,
                    repository_id: binding.repository_id,
                })
            }
            Err(e) => {
                let retryable = e.is_retryable();
                Err(self.fail_attempt(record, e.to_string(), retryable).await)
            }
        }
    }

    async fn fail_attempt(
        &self,
        mut record: BackupRecord,
        message: String,
        retryable: bool,
    ) -> AttemptFailure {
        warn!(backup = %record.id, %message, "backup attempt failed");
        record.fail(&message);
        if let Err(e) = self.store.update_backup(&record).await {
            error!(error = %e, "failed to persist failed backup row");
        }
        if let Err(e) = self.checkpoints.interrupt_backup(record.id, &message).await {
            warn!(error = %e, "failed to interrupt checkpoint");
        }
        AttemptFailure {
            record: Some(record),
            retryable,
        }
    }

    /// Replicate the fresh snapshot to every other enabled binding.
    /// Failures are isolated per target and never fail the backup.
    async fn replicate(
        &self,
        schedule: &BackupSchedule,
        source_repository_id: Uuid,
        source_config: &EngineConfig,
        snapshot_id: &str,
    ) {
        for binding in schedule.enabled_bindings() {
            if binding.repository_id == source_repository_id {
                continue;
            }
            let mut status = match self
                .store
                .get_or_create_replication(
                    schedule.id,
                    source_repository_id,
                    binding.repository_id,
                )
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    warn!(error = %e, "failed to load replication status");
                    continue;
                }
            };

            status.begin_sync();
            if let Err(e) = self.store.update_replication(&status).await {
                warn!(error = %e, "failed to persist replication status");
            }

            let target_config = match self.store.get_repository(binding.repository_id).await {
                Ok(Some(repository)) => self.credentials.resolve(&repository),
                Ok(None) => Err(CoreError::NotFound(format!(
                    "repository {}",
                    binding.repository_id
                ))),
                Err(e) => Err(e),
            };

            match target_config {
                Ok(target_config) => {
                    match self
                        .engine
                        .copy_snapshot(source_config, &target_config, snapshot_id)
                        .await
                    {
                        Ok(()) => {
                            status.mark_synced(snapshot_id);
                            info!(
                                schedule = %schedule.id,
                                target = %binding.repository_id,
                                snapshot = snapshot_id,
                                "replication synced"
                            );
                        }
                        Err(e) => {
                            warn!(
                                schedule = %schedule.id,
                                target = %binding.repository_id,
                                error = %e,
                                "replication failed"
                            );
                            status.mark_failed(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(target = %binding.repository_id, error = %e, "replication target unresolvable");
                    status.mark_failed(e.to_string());
                }
            }

            if let Err(e) = self.store.update_replication(&status).await {
                warn!(error = %e, "failed to persist replication status");
            }
        }
    }

    /// Bridge engine progress messages into the checkpoint manager.
    fn progress_sink_for(&self, backup_id: Uuid) -> ProgressSink {
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineProgress>();
        let checkpoints = Arc::clone(&self.checkpoints);
        tokio::spawn(async move {
            let mut totals_recorded = false;
            while let Some(update) = rx.recv().await {
                if !totals_recorded {
                    if let (Some(files), Some(bytes)) = (update.total_files, update.total_bytes) {
                        if let Err(e) = checkpoints.set_totals(backup_id, files, bytes).await {
                            warn!(error = %e, "failed to record backup totals");
                        }
                        totals_recorded = true;
                    }
                }
                if let Err(e) = checkpoints
                    .update_progress(
                        backup_id,
                        update.files_done,
                        update.bytes_done,
                        update.current_path,
                    )
                    .await
                {
                    warn!(error = %e, "failed to record backup progress");
                }
            }
        });
        Arc::new(move |update| {
            let _ = tx.send(update);
        })
    }

    async fn run_post_failure_script(&self, schedule: &BackupSchedule, record: &mut BackupRecord) {
        let Some(script) = &schedule.post_failure_script else {
            return;
        };
        let outcome = run_script(script).await;
        let output = outcome.combined_output();
        record.post_script_output = Some(match record.post_script_output.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{output}"),
            _ => output,
        });
        if let Err(e) = self.store.update_backup(record).await {
            warn!(error = %e, "failed to persist post-failure script output");
        }
    }

    async fn notify_backup(&self, schedule: &BackupSchedule, agent: &Agent, record: &BackupRecord) {
        let notification = BackupNotification {
            org_id: agent.org_id,
            schedule_id: schedule.id,
            schedule_name: schedule.name.clone(),
            agent_id: agent.id,
            hostname: agent.hostname.clone(),
            snapshot_id: record.snapshot_id.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
            success: record.status == BackupStatus::Completed,
            error_message: record.error_message.clone(),
            size_bytes: record.size_bytes,
            files_new: record.files_new,
            files_changed: record.files_changed,
        };
        self.notifier.backup_completed(notification).await;
    }
}
