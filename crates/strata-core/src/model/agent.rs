//! Organizations and the agents that report into them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A tenant organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Maintenance window end; scheduling is suppressed while this is in the future.
    pub maintenance_until: Option<DateTime<Utc>>,
}

impl Organization {
    /// Create a new organization with no maintenance window.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            maintenance_until: None,
        }
    }

    /// Whether maintenance is active at `now`.
    pub fn maintenance_active(&self, now: DateTime<Utc>) -> bool {
        self.maintenance_until.is_some_and(|until| now < until)
    }
}

/// Reachability of a network mount as last observed on the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountStatus {
    Connected,
    Stale,
    Disconnected,
}

impl MountStatus {
    /// Whether paths under this mount can be read.
    pub fn is_reachable(&self) -> bool {
        matches!(self, MountStatus::Connected)
    }
}

/// A network mount reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMount {
    /// Local mount point.
    pub mount_point: PathBuf,
    /// Remote source (e.g. `server:/export`).
    pub remote: String,
    /// Filesystem type (nfs, cifs, sshfs, ...).
    pub fs_type: String,
    pub status: MountStatus,
}

/// A backup agent running on a protected host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub hostname: String,
    /// Network mounts last reported by the agent.
    pub mounts: Vec<AgentMount>,
}

impl Agent {
    /// Create a new agent for an organization.
    pub fn new(org_id: Uuid, hostname: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            hostname: hostname.into(),
            mounts: Vec::new(),
        }
    }
}
