//! Child-process driver for the external backup engine.
//!
//! Every operation spawns `<binary> <verb> --repo <uri> [flags...]` with
//! `RESTIC_PASSWORD` plus the backend's environment. Output is consumed
//! through the parsers in [`crate::output`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use strata_core::model::{CompressionMode, RetentionPolicy};

use crate::backend::EngineConfig;
use crate::diff::{parse_diff, DiffReport};
use crate::error::{EngineError, EngineResult};
use crate::output::{
    parse_backup_output, parse_check, parse_forget, parse_listing, parse_progress_line,
    parse_snapshots, parse_stats, parse_summary_line, BackupSummary, CheckReport, EngineProgress,
    PruneSummary, SnapshotFile, SnapshotInfo, StatsMode, StatsSummary,
};

/// Callback fed with in-flight backup progress messages.
pub type ProgressSink = Arc<dyn Fn(EngineProgress) + Send + Sync>;

/// Per-run backup options derived from the schedule.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub bandwidth_limit_kbps: Option<u32>,
    pub compression: Option<CompressionMode>,
    /// Forwarded to the engine's own size filter; `<= 0` disables it.
    pub exclude_larger_than_mb: Option<i64>,
}

/// Options for restoring a snapshot.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub target: PathBuf,
    /// Restrict the restore to these paths inside the snapshot.
    pub includes: Vec<PathBuf>,
}

/// The engine operations the control plane drives.
///
/// Implemented by [`EngineClient`] for the real child process; tests swap in
/// scripted fakes.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn backup(
        &self,
        cfg: &EngineConfig,
        paths: &[PathBuf],
        excludes: &[String],
        tags: &[String],
        options: &BackupOptions,
        progress: Option<ProgressSink>,
    ) -> EngineResult<BackupSummary>;

    async fn snapshots(&self, cfg: &EngineConfig) -> EngineResult<Vec<SnapshotInfo>>;

    async fn restore(
        &self,
        cfg: &EngineConfig,
        snapshot_id: &str,
        options: &RestoreOptions,
    ) -> EngineResult<()>;

    async fn check(
        &self,
        cfg: &EngineConfig,
        read_data: bool,
        subset_percent: Option<u8>,
    ) -> EngineResult<CheckReport>;

    async fn stats(&self, cfg: &EngineConfig, mode: StatsMode) -> EngineResult<StatsSummary>;

    async fn forget_and_prune(
        &self,
        cfg: &EngineConfig,
        retention: &RetentionPolicy,
    ) -> EngineResult<PruneSummary>;

    async fn copy_snapshot(
        &self,
        source: &EngineConfig,
        target: &EngineConfig,
        snapshot_id: &str,
    ) -> EngineResult<()>;

    async fn diff(
        &self,
        cfg: &EngineConfig,
        from_snapshot: &str,
        to_snapshot: &str,
    ) -> EngineResult<DiffReport>;

    async fn list_files(
        &self,
        cfg: &EngineConfig,
        snapshot_id: &str,
        path: Option<&Path>,
    ) -> EngineResult<Vec<SnapshotFile>>;

    /// Spawn a long-lived FUSE mount child. The caller owns the process.
    async fn spawn_mount(
        &self,
        cfg: &EngineConfig,
        snapshot_id: &str,
        mount_path: &Path,
    ) -> EngineResult<Child>;
}

/// Engine adapter backed by the real binary.
#[derive(Debug, Clone)]
pub struct EngineClient {
    binary: PathBuf,
}

impl EngineClient {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, verb: &str, cfg: &EngineConfig) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(verb).arg("--repo").arg(&cfg.repository_uri);
        cmd.env("RESTIC_PASSWORD", &cfg.password);
        for (key, value) in &cfg.environment {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run to completion; non-zero exit maps through the error classifier.
    async fn run(&self, mut cmd: Command, verb: &str) -> EngineResult<(String, String)> {
        debug!(verb, "invoking engine");
        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            let err = EngineError::classify(output.status.code(), &stderr);
            warn!(verb, error = %err, "engine invocation failed");
            return Err(err);
        }
        Ok((stdout, stderr))
    }
}

#[async_trait]
impl Engine for EngineClient {
    async fn backup(
        &self,
        cfg: &EngineConfig,
        paths: &[PathBuf],
        excludes: &[String],
        tags: &[String],
        options: &BackupOptions,
        progress: Option<ProgressSink>,
    ) -> EngineResult<BackupSummary> {
        let mut cmd = self.command("backup", cfg);
        cmd.arg("--json");
        for path in paths {
            cmd.arg(path);
        }
        for exclude in excludes {
            cmd.arg("--exclude").arg(exclude);
        }
        for tag in tags {
            cmd.arg("--tag").arg(tag);
        }
        if let Some(kbps) = options.bandwidth_limit_kbps {
            cmd.arg("--limit-upload").arg(kbps.to_string());
        }
        if let Some(compression) = options.compression {
            cmd.arg("--compression").arg(compression.as_flag());
        }
        if let Some(mb) = options.exclude_larger_than_mb {
            if mb > 0 {
                cmd.arg("--exclude-larger-than").arg(format!("{mb}M"));
            }
        }

        debug!(paths = paths.len(), "invoking engine backup");
        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Generic("engine stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Generic("engine stderr not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut summary = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(update) = parse_progress_line(&line) {
                if let Some(sink) = &progress {
                    sink(update);
                }
            } else if let Some(parsed) = parse_summary_line(&line) {
                summary = Some(parsed);
            }
        }

        let status = child.wait().await?;
        let stderr_text = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(EngineError::classify(status.code(), &stderr_text));
        }
        summary.ok_or_else(|| {
            EngineError::OutputParse("backup output carried no summary".to_string())
        })
    }

    async fn snapshots(&self, cfg: &EngineConfig) -> EngineResult<Vec<SnapshotInfo>> {
        let mut cmd = self.command("snapshots", cfg);
        cmd.arg("--json");
        let (stdout, _) = self.run(cmd, "snapshots").await?;
        parse_snapshots(&stdout)
    }

    async fn restore(
        &self,
        cfg: &EngineConfig,
        snapshot_id: &str,
        options: &RestoreOptions,
    ) -> EngineResult<()> {
        let mut cmd = self.command("restore", cfg);
        cmd.arg(snapshot_id).arg("--target").arg(&options.target);
        for include in &options.includes {
            cmd.arg("--include").arg(include);
        }
        self.run(cmd, "restore").await?;
        Ok(())
    }

    async fn check(
        &self,
        cfg: &EngineConfig,
        read_data: bool,
        subset_percent: Option<u8>,
    ) -> EngineResult<CheckReport> {
        let mut cmd = self.command("check", cfg);
        match (read_data, subset_percent) {
            (true, Some(percent)) => {
                cmd.arg(format!("--read-data-subset={percent}%"));
            }
            (true, None) => {
                cmd.arg("--read-data");
            }
            _ => {}
        }

        debug!("invoking engine check");
        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            return Ok(parse_check(&stdout, &stderr));
        }

        // A failed check still completed when the repository itself answered;
        // only reachability-class failures surface as errors.
        let err = EngineError::classify(output.status.code(), &stderr);
        match err {
            EngineError::TransportError(_)
            | EngineError::AuthFailed(_)
            | EngineError::RepositoryLocked(_) => Err(err),
            _ => {
                let mut report = parse_check(&stdout, &stderr);
                report.errors_found = report.errors_found.max(1);
                Ok(report)
            }
        }
    }

    async fn stats(&self, cfg: &EngineConfig, mode: StatsMode) -> EngineResult<StatsSummary> {
        let mut cmd = self.command("stats", cfg);
        cmd.arg("--json").arg(format!("--mode={}", mode.as_flag()));
        let (stdout, _) = self.run(cmd, "stats").await?;
        parse_stats(&stdout)
    }

    async fn forget_and_prune(
        &self,
        cfg: &EngineConfig,
        retention: &RetentionPolicy,
    ) -> EngineResult<PruneSummary> {
        if retention.is_empty() {
            debug!("retention policy has no keep rules; skipping prune");
            return Ok(PruneSummary::default());
        }
        let mut cmd = self.command("forget", cfg);
        cmd.arg("--json").arg("--prune");
        let keeps = [
            ("--keep-last", retention.keep_last),
            ("--keep-daily", retention.keep_daily),
            ("--keep-weekly", retention.keep_weekly),
            ("--keep-monthly", retention.keep_monthly),
            ("--keep-yearly", retention.keep_yearly),
        ];
        for (flag, value) in keeps {
            if let Some(value) = value {
                cmd.arg(flag).arg(value.to_string());
            }
        }
        let (stdout, _) = self.run(cmd, "forget").await?;
        parse_forget(&stdout)
    }

    async fn copy_snapshot(
        &self,
        source: &EngineConfig,
        target: &EngineConfig,
        snapshot_id: &str,
    ) -> EngineResult<()> {
        // The copy destination is the primary --repo; the source repository
        // rides along as --from-repo with its own password variable.
        let mut cmd = self.command("copy", target);
        cmd.arg(snapshot_id)
            .arg("--from-repo")
            .arg(&source.repository_uri);
        cmd.env("RESTIC_FROM_PASSWORD", &source.password);
        for (key, value) in &source.environment {
            cmd.env(key, value);
        }
        self.run(cmd, "copy").await?;
        Ok(())
    }

    async fn diff(
        &self,
        cfg: &EngineConfig,
        from_snapshot: &str,
        to_snapshot: &str,
    ) -> EngineResult<DiffReport> {
        let mut cmd = self.command("diff", cfg);
        cmd.arg("--json").arg(from_snapshot).arg(to_snapshot);
        let (stdout, _) = self.run(cmd, "diff").await?;
        Ok(parse_diff(&stdout))
    }

    async fn list_files(
        &self,
        cfg: &EngineConfig,
        snapshot_id: &str,
        path: Option<&Path>,
    ) -> EngineResult<Vec<SnapshotFile>> {
        let mut cmd = self.command("ls", cfg);
        cmd.arg("--json").arg(snapshot_id);
        if let Some(path) = path {
            cmd.arg(path);
        }
        let (stdout, _) = self.run(cmd, "ls").await?;
        parse_listing(&stdout)
    }

    async fn spawn_mount(
        &self,
        cfg: &EngineConfig,
        snapshot_id: &str,
        mount_path: &Path,
    ) -> EngineResult<Child> {
        let mut cmd = self.command("mount", cfg);
        cmd.arg("--snapshot").arg(snapshot_id).arg(mount_path);
        cmd.kill_on_drop(true);
        debug!(snapshot_id, path = %mount_path.display(), "spawning engine mount");
        Ok(cmd.spawn()?)
    }
}
