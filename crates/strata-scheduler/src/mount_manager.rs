//! Lease-bounded FUSE snapshot mounts.
//!
//! Each lease owns an engine mount child process under `base_path/<id>`.
//! A wait task reaps the lease when the child exits; an expiry task
//! auto-unmounts when the lease lapses. `unmount` is serialized per lease
//! and idempotent: the second call reports `NotFound`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use strata_core::error::{CoreError, Result};
use strata_engine::client::Engine;
use strata_engine::EngineConfig;

/// Mount manager tunables.
#[derive(Debug, Clone)]
pub struct MountManagerConfig {
    /// Lease directories are created under this root.
    pub base_path: PathBuf,
    /// Lease lifetime when the caller names none.
    pub default_timeout: Duration,
}

impl Default for MountManagerConfig {
    fn default() -> Self {
        Self {
            base_path: std::env::temp_dir().join("strata-mounts"),
            default_timeout: Duration::from_secs(3600),
        }
    }
}

/// A live snapshot mount.
#[derive(Debug, Clone, Serialize)]
pub struct MountLease {
    pub id: Uuid,
    pub snapshot_id: String,
    pub mount_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct LeaseState {
    lease: MountLease,
    kill: Option<oneshot::Sender<()>>,
    unmounted: bool,
}

type LeaseMap = Arc<RwLock<HashMap<Uuid, Arc<Mutex<LeaseState>>>>>;

/// Manages snapshot mounts with auto-expiring leases.
pub struct MountManager {
    engine: Arc<dyn Engine>,
    config: MountManagerConfig,
    leases: LeaseMap,
}

impl MountManager {
    pub fn new(engine: Arc<dyn Engine>, config: MountManagerConfig) -> Self {
        Self {
            engine,
            config,
            leases: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mount a snapshot and lease it for `timeout` (default when `None`).
    pub async fn mount(
        &self,
        cfg: &EngineConfig,
        snapshot_id: &str,
        timeout: Option<Duration>,
    ) -> Result<MountLease> {
        let id = Uuid::new_v4();
        let mount_path = self.config.base_path.join(id.to_string());
        tokio::fs::create_dir_all(&mount_path).await?;

        let mut child = self
            .engine
            .spawn_mount(cfg, snapshot_id, &mount_path)
            .await
            .map_err(CoreError::from)?;

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let now = Utc::now();
        let lease = MountLease {
            id,
            snapshot_id: snapshot_id.to_string(),
            mount_path: mount_path.clone(),
            started_at: now,
            expires_at: now
                + chrono::Duration::from_std(timeout)
                    .unwrap_or_else(|_| chrono::Duration::hours(1)),
        };

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let state = Arc::new(Mutex::new(LeaseState {
            lease: lease.clone(),
            kill: Some(kill_tx),
            unmounted: false,
        }));
        self.leases.write().await.insert(id, state);

        // Wait task: owns the child, reaps the lease on exit or kill.
        let leases = Arc::clone(&self.leases);
        let reap_path = mount_path.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = child.wait() => {}
                _ = kill_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            leases.write().await.remove(&id);
            let _ = tokio::fs::remove_dir_all(&reap_path).await;
            debug!(lease = %id, "mount child exited; lease reaped");
        });

        // Expiry task: re-reads expires_at each pass so extend() holds.
        let leases = Arc::clone(&self.leases);
        tokio::spawn(async move {
            loop {
                let Some(state) = leases.read().await.get(&id).cloned() else {
                    return;
                };
                let expires_at = state.lock().await.lease.expires_at;
                let now = Utc::now();
                if expires_at <= now {
                    if let Err(e) = Self::unmount_in(&leases, id).await {
                        debug!(lease = %id, error = %e, "auto-unmount raced lease teardown");
                    } else {
                        info!(lease = %id, "lease expired; auto-unmounted");
                    }
                    return;
                }
                let wait = (expires_at - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(wait).await;
            }
        });

        info!(
            lease = %id,
            snapshot = snapshot_id,
            path = %mount_path.display(),
            "snapshot mounted"
        );
        Ok(lease)
    }

    /// Unmount a lease. The second call for the same lease reports
    /// `NotFound`; the end state is the same.
    pub async fn unmount(&self, id: Uuid) -> Result<()> {
        Self::unmount_in(&self.leases, id).await
    }

    async fn unmount_in(leases: &LeaseMap, id: Uuid) -> Result<()> {
        let Some(state) = leases.read().await.get(&id).cloned() else {
            return Err(CoreError::NotFound(format!("mount lease {id}")));
        };
        let mut state = state.lock().await;
        if state.unmounted {
            return Err(CoreError::NotFound(format!("mount lease {id}")));
        }
        state.unmounted = true;

        graceful_unmount(&state.lease.mount_path).await;
        if let Some(kill) = state.kill.take() {
            let _ = kill.send(());
        }
        info!(lease = %id, "lease unmounted");
        Ok(())
    }

    /// Push a lease's expiry out by `extra`.
    pub async fn extend(&self, id: Uuid, extra: Duration) -> Result<DateTime<Utc>> {
        let Some(state) = self.leases.read().await.get(&id).cloned() else {
            return Err(CoreError::NotFound(format!("mount lease {id}")));
        };
        let mut state = state.lock().await;
        if state.unmounted {
            return Err(CoreError::NotFound(format!("mount lease {id}")));
        }
        state.lease.expires_at += chrono::Duration::from_std(extra)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        Ok(state.lease.expires_at)
    }

    /// Unmount every live lease.
    pub async fn unmount_all(&self) {
        let ids: Vec<Uuid> = self.leases.read().await.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.unmount(id).await {
                debug!(lease = %id, error = %e, "lease already gone during unmount_all");
            }
        }
    }

    /// Snapshot of the live leases.
    pub async fn active_leases(&self) -> Vec<MountLease> {
        let leases = self.leases.read().await;
        let mut out = Vec::with_capacity(leases.len());
        for state in leases.values() {
            out.push(state.lock().await.lease.clone());
        }
        out
    }

    /// Delete directories under `base_path` whose name parses as a lease id
    /// no longer tracked. Returns how many were removed.
    pub async fn cleanup(&self) -> Result<u64> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.config.base_path).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        let live = self.leases.read().await;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| Uuid::parse_str(n).ok()) else {
                continue;
            };
            if live.contains_key(&id) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %entry.path().display(), "removed orphaned mount dir");
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to remove orphaned mount dir")
                }
            }
        }
        Ok(removed)
    }
}

/// Try the platform's graceful unmount paths; the child kill that follows
/// is the backstop.
async fn graceful_unmount(path: &Path) {
    let fusermount = tokio::process::Command::new("fusermount")
        .arg("-u")
        .arg(path)
        .output()
        .await;
    if matches!(&fusermount, Ok(output) if output.status.success()) {
        return;
    }
    let umount = tokio::process::Command::new("umount").arg(path).output().await;
    if let Err(e) = umount {
        debug!(path = %path.display(), error = %e, "graceful unmount unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    fn engine_config() -> EngineConfig {
        EngineConfig {
            repository_uri: "/srv/repo".to_string(),
            password: "pw".to_string(),
            environment: Vec::new(),
        }
    }

    fn manager(base: &Path) -> MountManager {
        MountManager::new(
            Arc::new(FakeEngine::new()),
            MountManagerConfig {
                base_path: base.to_path_buf(),
                default_timeout: Duration::from_secs(3600),
            },
        )
    }

    async fn wait_until_gone(manager: &MountManager, id: Uuid) {
        for _ in 0..100 {
            if manager.leases.read().await.get(&id).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("lease {id} never reaped");
    }

    #[tokio::test]
    async fn mount_then_unmount_reaps_lease_and_directory() {
        let base = tempfile::tempdir().unwrap();
        let manager = manager(base.path());

        let lease = manager
            .mount(&engine_config(), "snap-1", None)
            .await
            .unwrap();
        assert!(lease.mount_path.exists());
        assert_eq!(manager.active_leases().await.len(), 1);

        manager.unmount(lease.id).await.unwrap();
        wait_until_gone(&manager, lease.id).await;
        assert!(!lease.mount_path.exists());

        // Second unmount: same end state, reported as NotFound.
        let err = manager.unmount(lease.id).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn lease_expires_and_auto_unmounts() {
        let base = tempfile::tempdir().unwrap();
        let manager = manager(base.path());

        let lease = manager
            .mount(&engine_config(), "snap-1", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        wait_until_gone(&manager, lease.id).await;
        assert!(!lease.mount_path.exists());
    }

    #[tokio::test]
    async fn extend_pushes_expiry_out() {
        let base = tempfile::tempdir().unwrap();
        let manager = manager(base.path());

        let lease = manager
            .mount(&engine_config(), "snap-1", None)
            .await
            .unwrap();
        let extended = manager
            .extend(lease.id, Duration::from_secs(600))
            .await
            .unwrap();
        assert!(extended > lease.expires_at);
        manager.unmount(lease.id).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_removes_untracked_lease_directories() {
        let base = tempfile::tempdir().unwrap();
        let manager = manager(base.path());

        // An orphan from a previous process, plus an unrelated directory.
        let orphan = base.path().join(Uuid::new_v4().to_string());
        let unrelated = base.path().join("not-a-lease");
        tokio::fs::create_dir_all(&orphan).await.unwrap();
        tokio::fs::create_dir_all(&unrelated).await.unwrap();

        let live = manager
            .mount(&engine_config(), "snap-1", None)
            .await
            .unwrap();

        let removed = manager.cleanup().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!orphan.exists());
        assert!(unrelated.exists());
        assert!(live.mount_path.exists());

        manager.unmount(live.id).await.unwrap();
    }
}
