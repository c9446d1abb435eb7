//! Backup schedules and their repository bindings.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Behavior when a schedule path sits on an unreachable network mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountUnavailableAction {
    /// Skip the firing without creating a backup record.
    Skip,
    /// Create a backup record against the primary repository and fail it.
    Fail,
}

/// Execution priority class. Lower numeric value means higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackupPriority {
    High,
    Medium,
    Low,
}

impl BackupPriority {
    /// Numeric class value (high=1, medium=2, low=3).
    pub fn value(&self) -> u8 {
        match self {
            BackupPriority::High => 1,
            BackupPriority::Medium => 2,
            BackupPriority::Low => 3,
        }
    }

    /// Parse a priority label; unknown labels fall back to medium.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "high" => BackupPriority::High,
            "low" => BackupPriority::Low,
            _ => BackupPriority::Medium,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackupPriority::High => "high",
            BackupPriority::Medium => "medium",
            BackupPriority::Low => "low",
        }
    }
}

impl Default for BackupPriority {
    fn default() -> Self {
        BackupPriority::Medium
    }
}

/// Compression mode forwarded to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionMode {
    Auto,
    Max,
    Off,
}

impl CompressionMode {
    /// Engine flag value.
    pub fn as_flag(&self) -> &'static str {
        match self {
            CompressionMode::Auto => "auto",
            CompressionMode::Max => "max",
            CompressionMode::Off => "off",
        }
    }
}

/// Snapshot retention forwarded to the engine's forget/prune.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep_last: Option<u32>,
    pub keep_daily: Option<u32>,
    pub keep_weekly: Option<u32>,
    pub keep_monthly: Option<u32>,
    pub keep_yearly: Option<u32>,
}

impl RetentionPolicy {
    /// Whether no keep rule is set at all.
    pub fn is_empty(&self) -> bool {
        self.keep_last.is_none()
            && self.keep_daily.is_none()
            && self.keep_weekly.is_none()
            && self.keep_monthly.is_none()
            && self.keep_yearly.is_none()
    }
}

/// A pre- or post-backup script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSpec {
    /// Shell command, run via `sh -c`.
    pub command: String,
    /// Per-script timeout.
    pub timeout_secs: u64,
    /// For pre-scripts: abort the execution when the script fails.
    pub fail_on_error: bool,
}

impl ScriptSpec {
    /// Create a script spec with the default 5 minute timeout.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout_secs: 300,
            fail_on_error: false,
        }
    }
}

/// Allowed execution window in UTC, with optional excluded hours.
///
/// `start == end` means the window spans the whole day. A window with
/// `start > end` wraps past midnight (e.g. 22:00-06:00).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start, `HH:MM`.
    pub start: String,
    /// Window end, `HH:MM`, exclusive.
    pub end: String,
    /// Hours (0-23) during which execution is suppressed even inside the window.
    pub excluded_hours: Vec<u8>,
}

impl TimeWindow {
    /// Whether `now` falls inside the window and outside excluded hours.
    pub fn allows(&self, now: DateTime<Utc>) -> bool {
        if self.excluded_hours.contains(&(now.hour() as u8)) {
            return false;
        }
        let (Some(start), Some(end)) = (parse_hhmm(&self.start), parse_hhmm(&self.end)) else {
            // Malformed window: treat as always-open rather than silently never firing.
            return true;
        };
        let minute = now.hour() * 60 + now.minute();
        if start == end {
            true
        } else if start < end {
            minute >= start && minute < end
        } else {
            minute >= start || minute < end
        }
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// A (schedule, repository, priority) binding.
///
/// At most one binding exists per repository on a schedule. The store
/// preserves insertion order so equal priorities break ties stably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryBinding {
    pub repository_id: Uuid,
    /// Lower value wins; the lowest enabled binding is the primary.
    pub priority: i32,
    pub enabled: bool,
}

/// A cron-driven specification of what to back up, from which agent,
/// to which ordered repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub name: String,
    pub paths: Vec<PathBuf>,
    pub excludes: Vec<String>,
    /// Seconds-precision cron expression.
    pub cron_expression: String,
    pub enabled: bool,
    pub retention: Option<RetentionPolicy>,
    pub time_window: Option<TimeWindow>,
    pub on_mount_unavailable: MountUnavailableAction,
    pub bindings: Vec<RepositoryBinding>,
    pub bandwidth_limit_kbps: Option<u32>,
    pub compression: Option<CompressionMode>,
    /// Files above this size are pre-scanned and excluded; <= 0 disables the scan.
    pub max_file_size_mb: Option<i64>,
    pub priority: BackupPriority,
    pub preemptible: bool,
    pub pre_script: Option<ScriptSpec>,
    pub post_success_script: Option<ScriptSpec>,
    pub post_failure_script: Option<ScriptSpec>,
}

impl BackupSchedule {
    /// Every hour on the hour.
    pub const CRON_HOURLY: &'static str = "0 0 * * * *";
    /// Every day at midnight.
    pub const CRON_DAILY: &'static str = "0 0 0 * * *";
    /// Sundays at midnight.
    pub const CRON_WEEKLY: &'static str = "0 0 0 * * Sun";
    /// First of the month at midnight.
    pub const CRON_MONTHLY: &'static str = "0 0 0 1 * *";

    /// Create a daily schedule with a single path and no bindings.
    pub fn new(agent_id: Uuid, name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            name: name.into(),
            paths,
            excludes: Vec::new(),
            cron_expression: Self::CRON_DAILY.to_string(),
            enabled: true,
            retention: None,
            time_window: None,
            on_mount_unavailable: MountUnavailableAction::Skip,
            bindings: Vec::new(),
            bandwidth_limit_kbps: None,
            compression: None,
            max_file_size_mb: None,
            priority: BackupPriority::Medium,
            preemptible: true,
            pre_script: None,
            post_success_script: None,
            post_failure_script: None,
        }
    }

    /// Enabled bindings in ascending priority order, stable on ties.
    pub fn enabled_bindings(&self) -> Vec<&RepositoryBinding> {
        let mut bindings: Vec<&RepositoryBinding> =
            self.bindings.iter().filter(|b| b.enabled).collect();
        bindings.sort_by_key(|b| b.priority);
        bindings
    }

    /// The lowest-priority-value enabled binding, ties broken by stored order.
    pub fn primary_binding(&self) -> Option<&RepositoryBinding> {
        self.enabled_bindings().into_iter().next()
    }

    /// Whether the schedule may run at `now` per its time window.
    pub fn can_run_at(&self, now: DateTime<Utc>) -> bool {
        match &self.time_window {
            Some(window) => window.allows(now),
            None => true,
        }
    }

    /// The next instant at or after `now` the window allows, scanning up
    /// to 48 hours at minute granularity. `None` when the window never opens.
    pub fn next_allowed_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.can_run_at(now) {
            return Some(now);
        }
        let mut candidate = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        for _ in 0..(48 * 60) {
            candidate += Duration::minutes(1);
            if self.can_run_at(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}
