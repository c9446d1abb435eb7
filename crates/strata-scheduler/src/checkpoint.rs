//! Checkpoint manager: throttled progress persistence and lifecycle.
//!
//! Tracks one in-memory record per running backup, keyed by backup id, each
//! behind its own lock so progress updates for different backups never
//! serialize on each other. The tracked map never holds a checkpoint in a
//! terminal state.

use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use strata_core::error::{CoreError, Result};
use strata_core::model::{BackupCheckpoint, CheckpointState};
use strata_core::store::CheckpointStore;

/// Tunables for checkpoint persistence and cleanup.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Minimum spacing between progress persists per backup.
    pub save_interval: Duration,
    /// Checkpoint lifetime from creation.
    pub expiration: chrono::Duration,
    /// Cadence of the expiration sweep.
    pub cleanup_interval: Duration,
    /// Resume budget per checkpoint.
    pub max_resume_attempts: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            save_interval: Duration::from_secs(30),
            expiration: chrono::Duration::days(7),
            cleanup_interval: Duration::from_secs(3600),
            max_resume_attempts: 5,
        }
    }
}

struct TrackedBackup {
    checkpoint: BackupCheckpoint,
    last_save: Instant,
}

/// Manages in-flight backup progress and checkpoint lifecycles.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    config: CheckpointConfig,
    tracked: DashMap<Uuid, Arc<Mutex<TrackedBackup>>>,
    cleanup: RwLock<Option<JoinHandle<()>>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, config: CheckpointConfig) -> Self {
        Self {
            store,
            config,
            tracked: DashMap::new(),
            cleanup: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Create and persist an active checkpoint for a schedule.
    ///
    /// Any previous non-terminal checkpoint for the schedule is canceled
    /// first, keeping the one-non-terminal-per-schedule invariant.
    pub async fn start_checkpoint(
        &self,
        schedule_id: Uuid,
        agent_id: Uuid,
        repository_id: Uuid,
    ) -> Result<BackupCheckpoint> {
        if let Some(mut previous) = self.store.find_active_for_schedule(schedule_id).await? {
            debug!(checkpoint = %previous.id, %schedule_id, "superseding previous checkpoint");
            previous.state = CheckpointState::Canceled;
            previous.last_updated_at = Utc::now();
            self.store.update_checkpoint(&previous).await?;
        }

        let checkpoint =
            BackupCheckpoint::start(schedule_id, agent_id, repository_id, self.config.expiration);
        self.store.insert_checkpoint(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Bind a checkpoint to the backup row feeding it, persist, and begin
    /// in-memory tracking. Used both for fresh runs and resumes (a resumed
    /// checkpoint returns to `Active` while the new backup is in flight).
    pub async fn attach_backup(
        &self,
        checkpoint: &mut BackupCheckpoint,
        backup_id: Uuid,
    ) -> Result<()> {
        checkpoint.current_backup_id = Some(backup_id);
        checkpoint.state = CheckpointState::Active;
        checkpoint.last_updated_at = Utc::now();
        self.store.update_checkpoint(checkpoint).await?;
        self.track_backup(backup_id, checkpoint.clone());
        Ok(())
    }

    /// Install a checkpoint for in-memory progress tracking under a backup id.
    pub fn track_backup(&self, backup_id: Uuid, checkpoint: BackupCheckpoint) {
        self.tracked.insert(
            backup_id,
            Arc::new(Mutex::new(TrackedBackup {
                checkpoint,
                last_save: Instant::now(),
            })),
        );
    }

    /// Number of backups currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    fn tracked_entry(&self, backup_id: Uuid) -> Option<Arc<Mutex<TrackedBackup>>> {
        self.tracked.get(&backup_id).map(|e| e.value().clone())
    }

    /// Record progress for a tracked backup. Persists only when the save
    /// interval has elapsed; returns whether a persist happened.
    pub async fn update_progress(
        &self,
        backup_id: Uuid,
        files_processed: u64,
        bytes_processed: u64,
        last_path: Option<PathBuf>,
    ) -> Result<bool> {
        let Some(entry) = self.tracked_entry(backup_id) else {
            return Ok(false);
        };
        let mut tracked = entry.lock().await;
        if tracked.checkpoint.state.is_terminal() {
            return Ok(false);
        }

        tracked.checkpoint.files_processed = files_processed;
        tracked.checkpoint.bytes_processed = bytes_processed;
        if last_path.is_some() {
            tracked.checkpoint.last_path = last_path;
        }
        tracked.checkpoint.last_updated_at = Utc::now();

        if tracked.last_save.elapsed() < self.config.save_interval {
            return Ok(false);
        }
        self.store.update_checkpoint(&tracked.checkpoint).await?;
        tracked.last_save = Instant::now();
        Ok(true)
    }

    /// Record expected totals; persists unconditionally.
    pub async fn set_totals(
        &self,
        backup_id: Uuid,
        total_files: u64,
        total_bytes: u64,
    ) -> Result<()> {
        let Some(entry) = self.tracked_entry(backup_id) else {
            return Ok(());
        };
        let mut tracked = entry.lock().await;
        if tracked.checkpoint.state.is_terminal() {
            return Ok(());
        }
        tracked.checkpoint.total_files = Some(total_files);
        tracked.checkpoint.total_bytes = Some(total_bytes);
        tracked.checkpoint.last_updated_at = Utc::now();
        self.store.update_checkpoint(&tracked.checkpoint).await?;
        tracked.last_save = Instant::now();
        Ok(())
    }

    /// Finish a tracked backup: evict and mark its checkpoint completed.
    pub async fn complete_backup(&self, backup_id: Uuid) -> Result<()> {
        let Some(entry) = self.tracked_entry(backup_id) else {
            return Ok(());
        };
        let mut tracked = entry.lock().await;
        self.tracked.remove(&backup_id);
        tracked.checkpoint.state = CheckpointState::Completed;
        tracked.checkpoint.last_updated_at = Utc::now();
        self.store.update_checkpoint(&tracked.checkpoint).await?;
        debug!(%backup_id, checkpoint = %tracked.checkpoint.id, "checkpoint completed");
        Ok(())
    }

    /// Interrupt a tracked backup: evict and mark its checkpoint interrupted
    /// with the failure message. Not an error when the backup is untracked.
    pub async fn interrupt_backup(&self, backup_id: Uuid, message: &str) -> Result<()> {
        let Some(entry) = self.tracked_entry(backup_id) else {
            return Ok(());
        };
        let mut tracked = entry.lock().await;
        self.tracked.remove(&backup_id);
        tracked.checkpoint.state = CheckpointState::Interrupted;
        tracked.checkpoint.error_message = Some(message.to_string());
        tracked.checkpoint.last_updated_at = Utc::now();
        self.store.update_checkpoint(&tracked.checkpoint).await?;
        info!(%backup_id, checkpoint = %tracked.checkpoint.id, "checkpoint interrupted");
        Ok(())
    }

    /// Cancel a checkpoint by id, evicting any tracked backup feeding it.
    pub async fn cancel_checkpoint(&self, checkpoint_id: Uuid) -> Result<()> {
        let mut checkpoint = self
            .store
            .get_checkpoint(checkpoint_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("checkpoint {checkpoint_id}")))?;

        let entries: Vec<(Uuid, Arc<Mutex<TrackedBackup>>)> = self
            .tracked
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        for (backup_id, entry) in entries {
            let tracked = entry.lock().await;
            if tracked.checkpoint.id == checkpoint_id {
                self.tracked.remove(&backup_id);
            }
        }

        checkpoint.state = CheckpointState::Canceled;
        checkpoint.last_updated_at = Utc::now();
        self.store.update_checkpoint(&checkpoint).await?;
        info!(checkpoint = %checkpoint_id, "checkpoint canceled");
        Ok(())
    }

    /// Consume one resume attempt and persist. Callers check resumability
    /// first via [`BackupCheckpoint::is_resumable`].
    pub async fn prepare_resume(&self, checkpoint: &mut BackupCheckpoint) -> Result<()> {
        checkpoint.resume_count += 1;
        checkpoint.last_updated_at = Utc::now();
        self.store.update_checkpoint(checkpoint).await?;
        Ok(())
    }

    /// The schedule's resumable checkpoint, if one exists.
    pub async fn get_resumable_for_schedule(
        &self,
        schedule_id: Uuid,
    ) -> Result<Option<BackupCheckpoint>> {
        let candidate = self.store.find_active_for_schedule(schedule_id).await?;
        Ok(candidate
            .filter(|c| c.is_resumable(self.config.max_resume_attempts, Utc::now())))
    }

    /// Mark every non-terminal checkpoint past its deadline as expired.
    pub async fn expire_overdue(&self) -> Result<u64> {
        let now = Utc::now();
        let mut expired = 0;
        for mut checkpoint in self.store.list_non_terminal_checkpoints().await? {
            if checkpoint.expires_at <= now {
                checkpoint.state = CheckpointState::Expired;
                checkpoint.last_updated_at = now;
                if let Err(e) = self.store.update_checkpoint(&checkpoint).await {
                    warn!(checkpoint = %checkpoint.id, error = %e, "failed to expire checkpoint");
                    continue;
                }
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "expired overdue checkpoints");
        }
        Ok(expired)
    }

    /// Start the background expiration sweep.
    pub async fn start(self: Arc<Self>) {
        let mut slot = self.cleanup.write().await;
        if slot.is_some() {
            return;
        }
        let manager = Arc::clone(&self);
        *slot = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.config.cleanup_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(e) = manager.expire_overdue().await {
                    warn!(error = %e, "checkpoint cleanup pass failed");
                }
            }
        }));
    }

    /// Stop the sweep and persist every tracked record once, best-effort.
    pub async fn stop(&self) {
        if let Some(handle) = self.cleanup.write().await.take() {
            handle.abort();
        }
        let entries: Vec<Arc<Mutex<TrackedBackup>>> = self
            .tracked
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for entry in entries {
            let tracked = entry.lock().await;
            if tracked.checkpoint.state.is_terminal() {
                continue;
            }
            if let Err(e) = self.store.update_checkpoint(&tracked.checkpoint).await {
                warn!(checkpoint = %tracked.checkpoint.id, error = %e, "final checkpoint persist failed");
            }
        }
    }
}
