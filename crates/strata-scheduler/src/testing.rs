//! Test doubles shared by the scheduler test modules.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::process::Child;

use strata_core::model::RetentionPolicy;
use strata_core::notify::{
    BackupNotification, Notifier, TestRestoreNotification, VerificationNotification,
};
use strata_engine::client::{BackupOptions, Engine, ProgressSink, RestoreOptions};
use strata_engine::{
    BackupSummary, CheckReport, DiffReport, EngineConfig, EngineError, EngineProgress,
    EngineResult, PruneSummary, SnapshotFile, SnapshotInfo, StatsMode, StatsSummary,
};

#[derive(Debug, Clone)]
pub(crate) struct BackupCall {
    pub repo_uri: String,
    pub paths: Vec<PathBuf>,
    pub excludes: Vec<String>,
    pub tags: Vec<String>,
    pub options: BackupOptions,
}

#[derive(Debug, Clone)]
pub(crate) struct CopyCall {
    pub source_uri: String,
    pub target_uri: String,
    pub snapshot_id: String,
}

/// Scripted engine: queued results are popped per call; an empty queue
/// yields a default success.
#[derive(Default)]
pub(crate) struct FakeEngine {
    backup_results: Mutex<VecDeque<EngineResult<BackupSummary>>>,
    pub backup_calls: Mutex<Vec<BackupCall>>,
    pub copy_calls: Mutex<Vec<CopyCall>>,
    copy_results: Mutex<VecDeque<EngineResult<()>>>,
    check_results: Mutex<VecDeque<EngineResult<CheckReport>>>,
    stats_results: Mutex<VecDeque<EngineResult<StatsSummary>>>,
    snapshots_result: Mutex<Vec<SnapshotInfo>>,
    listing_result: Mutex<Vec<SnapshotFile>>,
    /// Snapshot contents materialized by `restore`, keyed by absolute path.
    pub restore_files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    progress_script: Mutex<Vec<EngineProgress>>,
    backup_seq: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_backup_result(&self, result: EngineResult<BackupSummary>) {
        self.backup_results.lock().unwrap().push_back(result);
    }

    pub fn fail_next_backups(&self, count: usize) {
        for _ in 0..count {
            self.push_backup_result(Err(EngineError::TransportError(
                "connection refused".to_string(),
            )));
        }
    }

    pub fn push_copy_result(&self, result: EngineResult<()>) {
        self.copy_results.lock().unwrap().push_back(result);
    }

    pub fn push_check_result(&self, result: EngineResult<CheckReport>) {
        self.check_results.lock().unwrap().push_back(result);
    }

    pub fn push_stats_result(&self, result: EngineResult<StatsSummary>) {
        self.stats_results.lock().unwrap().push_back(result);
    }

    pub fn set_snapshots(&self, snapshots: Vec<SnapshotInfo>) {
        *self.snapshots_result.lock().unwrap() = snapshots;
    }

    pub fn set_listing(&self, files: Vec<SnapshotFile>) {
        *self.listing_result.lock().unwrap() = files;
    }

    pub fn set_progress_script(&self, updates: Vec<EngineProgress>) {
        *self.progress_script.lock().unwrap() = updates;
    }

    pub fn backup_call_count(&self) -> usize {
        self.backup_calls.lock().unwrap().len()
    }

    fn default_summary(&self) -> BackupSummary {
        let n = self.backup_seq.fetch_add(1, Ordering::SeqCst);
        BackupSummary {
            snapshot_id: format!("snap-{n}"),
            files_new: 5,
            files_changed: 2,
            files_unmodified: 3,
            data_added: 1024,
            total_files_processed: 10,
            total_bytes_processed: 4096,
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn backup(
        &self,
        cfg: &EngineConfig,
        paths: &[PathBuf],
        excludes: &[String],
        tags: &[String],
        options: &BackupOptions,
        progress: Option<ProgressSink>,
    ) -> EngineResult<BackupSummary> {
        self.backup_calls.lock().unwrap().push(BackupCall {
            repo_uri: cfg.repository_uri.clone(),
            paths: paths.to_vec(),
            excludes: excludes.to_vec(),
            tags: tags.to_vec(),
            options: options.clone(),
        });
        if let Some(sink) = progress {
            for update in self.progress_script.lock().unwrap().iter().cloned() {
                sink(update);
            }
        }
        match self.backup_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.default_summary()),
        }
    }

    async fn snapshots(&self, _cfg: &EngineConfig) -> EngineResult<Vec<SnapshotInfo>> {
        Ok(self.snapshots_result.lock().unwrap().clone())
    }

    async fn restore(
        &self,
        _cfg: &EngineConfig,
        _snapshot_id: &str,
        options: &RestoreOptions,
    ) -> EngineResult<()> {
        let files = self.restore_files.lock().unwrap().clone();
        for (path, contents) in files {
            if !options.includes.is_empty() && !options.includes.contains(&path) {
                continue;
            }
            let relative = path.strip_prefix("/").unwrap_or(&path);
            let target = options.target.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(EngineError::Spawn)?;
            }
            std::fs::write(&target, &contents).map_err(EngineError::Spawn)?;
        }
        Ok(())
    }

    async fn check(
        &self,
        _cfg: &EngineConfig,
        _read_data: bool,
        _subset_percent: Option<u8>,
    ) -> EngineResult<CheckReport> {
        match self.check_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(CheckReport::default()),
        }
    }

    async fn stats(&self, _cfg: &EngineConfig, _mode: StatsMode) -> EngineResult<StatsSummary> {
        match self.stats_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(StatsSummary::default()),
        }
    }

    async fn forget_and_prune(
        &self,
        _cfg: &EngineConfig,
        _retention: &RetentionPolicy,
    ) -> EngineResult<PruneSummary> {
        Ok(PruneSummary { removed: 2, kept: 5 })
    }

    async fn copy_snapshot(
        &self,
        source: &EngineConfig,
        target: &EngineConfig,
        snapshot_id: &str,
    ) -> EngineResult<()> {
        self.copy_calls.lock().unwrap().push(CopyCall {
            source_uri: source.repository_uri.clone(),
            target_uri: target.repository_uri.clone(),
            snapshot_id: snapshot_id.to_string(),
        });
        match self.copy_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn diff(
        &self,
        _cfg: &EngineConfig,
        _from_snapshot: &str,
        _to_snapshot: &str,
    ) -> EngineResult<DiffReport> {
        Ok(DiffReport::default())
    }

    async fn list_files(
        &self,
        _cfg: &EngineConfig,
        _snapshot_id: &str,
        _path: Option<&Path>,
    ) -> EngineResult<Vec<SnapshotFile>> {
        Ok(self.listing_result.lock().unwrap().clone())
    }

    async fn spawn_mount(
        &self,
        _cfg: &EngineConfig,
        _snapshot_id: &str,
        _mount_path: &Path,
    ) -> EngineResult<Child> {
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("300").kill_on_drop(true);
        Ok(cmd.spawn()?)
    }
}

/// Notifier that records every payload.
#[derive(Default)]
pub(crate) struct CapturingNotifier {
    pub backups: Mutex<Vec<BackupNotification>>,
    pub verifications: Mutex<Vec<VerificationNotification>>,
    pub test_restores: Mutex<Vec<TestRestoreNotification>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn backup_completed(&self, notification: BackupNotification) {
        self.backups.lock().unwrap().push(notification);
    }

    async fn verification_failed(&self, notification: VerificationNotification) {
        self.verifications.lock().unwrap().push(notification);
    }

    async fn test_restore_failed(&self, notification: TestRestoreNotification) {
        self.test_restores.lock().unwrap().push(notification);
    }
}
