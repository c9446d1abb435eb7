//! Network mount detection and health classification.
//!
//! Agents report the network mounts under their schedule paths; before a
//! backup commits to running, the parent mount of every path is probed and
//! classified as connected, stale (answers but hangs), or disconnected.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use strata_core::model::{AgentMount, BackupSchedule, MountStatus};

/// Filesystem types treated as network mounts.
const NETWORK_FS_TYPES: &[&str] = &[
    "nfs",
    "nfs4",
    "cifs",
    "smbfs",
    "smb3",
    "sshfs",
    "fuse.sshfs",
    "glusterfs",
    "ceph",
    "9p",
];

/// Whether a filesystem type counts as a network mount.
pub fn is_network_fs(fs_type: &str) -> bool {
    NETWORK_FS_TYPES.contains(&fs_type)
}

/// Parse a Linux mount table (`/proc/mounts` format), keeping network mounts.
pub fn parse_mount_table(content: &str) -> Vec<AgentMount> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let remote = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            if !is_network_fs(fs_type) {
                return None;
            }
            Some(AgentMount {
                // Octal escapes (\040 for space) appear in /proc/mounts.
                mount_point: PathBuf::from(unescape_mount_path(mount_point)),
                remote: remote.to_string(),
                fs_type: fs_type.to_string(),
                status: MountStatus::Connected,
            })
        })
        .collect()
}

/// Parse BSD/macOS `mount` output, keeping network mounts.
///
/// Lines look like `//user@server/share on /Volumes/share (smbfs, nodev)`.
pub fn parse_bsd_mount_output(content: &str) -> Vec<AgentMount> {
    content
        .lines()
        .filter_map(|line| {
            let (remote, rest) = line.split_once(" on ")?;
            let (mount_point, options) = rest.split_once(" (")?;
            let fs_type = options
                .trim_end_matches(')')
                .split(',')
                .next()?
                .trim();
            if !is_network_fs(fs_type) {
                return None;
            }
            Some(AgentMount {
                mount_point: PathBuf::from(mount_point),
                remote: remote.to_string(),
                fs_type: fs_type.to_string(),
                status: MountStatus::Connected,
            })
        })
        .collect()
}

fn unescape_mount_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let digits: String = chars.clone().take(3).collect();
            if digits.len() == 3 {
                if let Ok(code) = u8::from_str_radix(&digits, 8) {
                    out.push(code as char);
                    chars.nth(2);
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Per-path verdict from schedule validation.
#[derive(Debug, Clone)]
pub struct PathCheck {
    pub path: PathBuf,
    /// Parent network mount, when the path sits on one.
    pub mount_point: Option<PathBuf>,
    pub status: Option<MountStatus>,
}

impl PathCheck {
    /// Reachable means local, or on a connected network mount.
    pub fn is_reachable(&self) -> bool {
        match self.status {
            Some(status) => status.is_reachable(),
            None => true,
        }
    }
}

/// Probes mount health with a bounded hang budget.
#[derive(Debug, Clone)]
pub struct MountChecker {
    probe_timeout: Duration,
}

impl Default for MountChecker {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl MountChecker {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Enumerate this host's network mounts from the OS mount table.
    pub async fn list_network_mounts(&self) -> std::io::Result<Vec<AgentMount>> {
        #[cfg(target_os = "linux")]
        {
            let content = tokio::fs::read_to_string("/proc/mounts").await?;
            Ok(parse_mount_table(&content))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let output = tokio::process::Command::new("mount").output().await?;
            Ok(parse_bsd_mount_output(&String::from_utf8_lossy(
                &output.stdout,
            )))
        }
    }

    /// Probe a mount point: a directory read that hangs past the budget is
    /// `Stale`, an error is `Disconnected`.
    pub async fn probe_status(&self, mount_point: &Path) -> MountStatus {
        let path = mount_point.to_path_buf();
        let probe = tokio::task::spawn_blocking(move || std::fs::read_dir(&path).map(|_| ()));
        match tokio::time::timeout(self.probe_timeout, probe).await {
            Err(_) => MountStatus::Stale,
            Ok(Ok(Ok(()))) => MountStatus::Connected,
            Ok(_) => MountStatus::Disconnected,
        }
    }

    /// Refresh a reported mount's status in place.
    pub async fn refresh(&self, mount: &mut AgentMount) {
        let status = self.probe_status(&mount.mount_point).await;
        if status != mount.status {
            debug!(
                mount = %mount.mount_point.display(),
                ?status,
                "network mount status changed"
            );
        }
        mount.status = status;
    }

    /// Check every schedule path against the agent's reported mounts,
    /// re-probing the parent mount of each path that has one.
    pub async fn validate_schedule_paths(
        &self,
        schedule: &BackupSchedule,
        mounts: &[AgentMount],
    ) -> Vec<PathCheck> {
        let mut checks = Vec::with_capacity(schedule.paths.len());
        for path in &schedule.paths {
            match find_parent_mount(path, mounts) {
                Some(mount) => {
                    let status = self.probe_status(&mount.mount_point).await;
                    checks.push(PathCheck {
                        path: path.clone(),
                        mount_point: Some(mount.mount_point.clone()),
                        status: Some(status),
                    });
                }
                None => checks.push(PathCheck {
                    path: path.clone(),
                    mount_point: None,
                    status: None,
                }),
            }
        }
        checks
    }
}

/// The deepest reported mount containing `path`, if any.
pub fn find_parent_mount<'a>(path: &Path, mounts: &'a [AgentMount]) -> Option<&'a AgentMount> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.as_os_str().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_MOUNTS: &str = "\
/dev/sda1 / ext4 rw,relatime 0 0
tmpfs /tmp tmpfs rw 0 0
server:/export /nfs nfs4 rw,relatime,vers=4.2 0 0
//fileserver/share /mnt/share cifs rw,relatime 0 0
server:/other /mnt/with\\040space nfs rw 0 0
";

    #[test]
    fn proc_mounts_keeps_network_filesystems() {
        let mounts = parse_mount_table(PROC_MOUNTS);
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[0].mount_point, PathBuf::from("/nfs"));
        assert_eq!(mounts[0].fs_type, "nfs4");
        assert_eq!(mounts[1].remote, "//fileserver/share");
        assert_eq!(mounts[2].mount_point, PathBuf::from("/mnt/with space"));
    }

    #[test]
    fn bsd_mount_output() {
        let output = "\
/dev/disk1s1 on / (apfs, local, journaled)
//backup@nas._smb._tcp.local/archive on /Volumes/archive (smbfs, nodev, nosuid)
";
        let mounts = parse_bsd_mount_output(output);
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_point, PathBuf::from("/Volumes/archive"));
        assert_eq!(mounts[0].fs_type, "smbfs");
    }

    #[test]
    fn parent_mount_prefers_deepest() {
        let mounts = vec![
            AgentMount {
                mount_point: PathBuf::from("/nfs"),
                remote: "server:/export".to_string(),
                fs_type: "nfs".to_string(),
                status: MountStatus::Connected,
            },
            AgentMount {
                mount_point: PathBuf::from("/nfs/projects"),
                remote: "server:/projects".to_string(),
                fs_type: "nfs".to_string(),
                status: MountStatus::Connected,
            },
        ];
        let found = find_parent_mount(Path::new("/nfs/projects/a/b"), &mounts).unwrap();
        assert_eq!(found.mount_point, PathBuf::from("/nfs/projects"));

        assert!(find_parent_mount(Path::new("/var/data"), &mounts).is_none());
    }

    #[tokio::test]
    async fn probe_local_directory_is_connected() {
        let dir = tempfile::tempdir().unwrap();
        let checker = MountChecker::default();
        assert_eq!(
            checker.probe_status(dir.path()).await,
            MountStatus::Connected
        );
    }

    #[tokio::test]
    async fn probe_missing_directory_is_disconnected() {
        let checker = MountChecker::default();
        assert_eq!(
            checker.probe_status(Path::new("/definitely/not/here")).await,
            MountStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn local_paths_validate_as_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let schedule = BackupSchedule::new(
            uuid::Uuid::new_v4(),
            "local",
            vec![dir.path().to_path_buf()],
        );
        let checker = MountChecker::default();
        let checks = checker.validate_schedule_paths(&schedule, &[]).await;
        assert_eq!(checks.len(), 1);
        assert!(checks[0].is_reachable());
        assert!(checks[0].mount_point.is_none());
    }
}
