//! Parsers for the engine's JSON output streams.
//!
//! The engine emits JSON-per-line messages on stdout when invoked with
//! `--json`. Each parser here is pure and takes the raw text, so the
//! process-driving layer stays thin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Summary of a completed backup run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSummary {
    pub snapshot_id: String,
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    /// Bytes added to the repository by this run.
    pub data_added: u64,
    pub total_files_processed: u64,
    pub total_bytes_processed: u64,
}

/// An in-flight progress message from a backup run.
#[derive(Debug, Clone, Default)]
pub struct EngineProgress {
    pub files_done: u64,
    pub bytes_done: u64,
    pub total_files: Option<u64>,
    pub total_bytes: Option<u64>,
    pub current_path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct RawMessage {
    message_type: String,
    #[serde(default)]
    snapshot_id: Option<String>,
    #[serde(default)]
    files_new: Option<u64>,
    #[serde(default)]
    files_changed: Option<u64>,
    #[serde(default)]
    files_unmodified: Option<u64>,
    #[serde(default)]
    data_added: Option<u64>,
    #[serde(default)]
    total_files_processed: Option<u64>,
    #[serde(default)]
    total_bytes_processed: Option<u64>,
    #[serde(default)]
    files_done: Option<u64>,
    #[serde(default)]
    bytes_done: Option<u64>,
    #[serde(default)]
    total_files: Option<u64>,
    #[serde(default)]
    total_bytes: Option<u64>,
    #[serde(default)]
    current_files: Option<Vec<String>>,
}

/// Parse a single backup output line into a progress message, if it is one.
pub fn parse_progress_line(line: &str) -> Option<EngineProgress> {
    let raw: RawMessage = serde_json::from_str(line).ok()?;
    if raw.message_type != "status" {
        return None;
    }
    Some(EngineProgress {
        files_done: raw.files_done.unwrap_or(0),
        bytes_done: raw.bytes_done.unwrap_or(0),
        total_files: raw.total_files,
        total_bytes: raw.total_bytes,
        current_path: raw
            .current_files
            .and_then(|files| files.into_iter().next_back())
            .map(PathBuf::from),
    })
}

/// Parse a single backup output line into the final summary, if it is one.
pub fn parse_summary_line(line: &str) -> Option<BackupSummary> {
    let raw: RawMessage = serde_json::from_str(line).ok()?;
    if raw.message_type != "summary" {
        return None;
    }
    Some(BackupSummary {
        snapshot_id: raw.snapshot_id.unwrap_or_default(),
        files_new: raw.files_new.unwrap_or(0),
        files_changed: raw.files_changed.unwrap_or(0),
        files_unmodified: raw.files_unmodified.unwrap_or(0),
        data_added: raw.data_added.unwrap_or(0),
        total_files_processed: raw.total_files_processed.unwrap_or(0),
        total_bytes_processed: raw.total_bytes_processed.unwrap_or(0),
    })
}

/// Extract the summary from a full backup stdout transcript.
pub fn parse_backup_output(stdout: &str) -> EngineResult<BackupSummary> {
    stdout
        .lines()
        .rev()
        .find_map(parse_summary_line)
        .ok_or_else(|| EngineError::OutputParse("backup output carried no summary".to_string()))
}

/// One snapshot as listed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub hostname: String,
}

/// Parse `snapshots --json` output (a JSON array).
pub fn parse_snapshots(stdout: &str) -> EngineResult<Vec<SnapshotInfo>> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| EngineError::OutputParse(format!("snapshots: {e}")))
}

/// Repository statistics mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsMode {
    /// Deduplicated on-disk size.
    RawData,
    /// Logical restore size.
    RestoreSize,
}

impl StatsMode {
    pub fn as_flag(&self) -> &'static str {
        match self {
            StatsMode::RawData => "raw-data",
            StatsMode::RestoreSize => "restore-size",
        }
    }
}

/// Output of `stats --json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSummary {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub total_file_count: u64,
    #[serde(default)]
    pub snapshots_count: u64,
}

/// Parse `stats --json` output.
pub fn parse_stats(stdout: &str) -> EngineResult<StatsSummary> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| EngineError::OutputParse(format!("stats: {e}")))
}

/// Result of a retention forget-and-prune pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PruneSummary {
    pub removed: u64,
    pub kept: u64,
}

#[derive(Deserialize)]
struct ForgetGroup {
    #[serde(default)]
    keep: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    remove: Option<Vec<serde_json::Value>>,
}

/// Parse `forget --json` output (array of per-group keep/remove lists).
pub fn parse_forget(stdout: &str) -> EngineResult<PruneSummary> {
    let groups: Vec<ForgetGroup> = serde_json::from_str(stdout.trim())
        .map_err(|e| EngineError::OutputParse(format!("forget: {e}")))?;
    let mut summary = PruneSummary::default();
    for group in groups {
        summary.kept += group.keep.map(|k| k.len() as u64).unwrap_or(0);
        summary.removed += group.remove.map(|r| r.len() as u64).unwrap_or(0);
    }
    Ok(summary)
}

/// One entry of a snapshot's file listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(default)]
    struct_type: Option<String>,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    size: Option<u64>,
}

/// Parse `ls --json` output (JSON-per-line: one snapshot header, then nodes).
pub fn parse_listing(stdout: &str) -> EngineResult<Vec<SnapshotFile>> {
    let mut files = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let node: RawNode = match serde_json::from_str(line) {
            Ok(node) => node,
            Err(e) => {
                return Err(EngineError::OutputParse(format!("ls line: {e}")));
            }
        };
        // The snapshot header line carries struct_type=snapshot; skip it.
        if node.struct_type.as_deref() == Some("snapshot") {
            continue;
        }
        let Some(path) = node.path else { continue };
        let node_type = node.node_type.as_deref().unwrap_or("");
        files.push(SnapshotFile {
            path,
            size: node.size.unwrap_or(0),
            is_dir: node_type == "dir",
        });
    }
    Ok(files)
}

/// Outcome of a repository check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckReport {
    pub errors_found: u64,
    /// Raw engine output kept for operator inspection.
    pub output: String,
}

/// Derive a check report from the engine transcript.
pub fn parse_check(stdout: &str, stderr: &str) -> CheckReport {
    let errors_found = stdout
        .lines()
        .chain(stderr.lines())
        .filter(|line| {
            let lowered = line.to_ascii_lowercase();
            lowered.starts_with("error:") || lowered.contains("error for tree")
        })
        .count() as u64;
    let mut output = stdout.trim().to_string();
    if !stderr.trim().is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(stderr.trim());
    }
    CheckReport {
        errors_found,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_summary_from_transcript() {
        let stdout = concat!(
            "{\"message_type\":\"status\",\"files_done\":3,\"bytes_done\":1024,\"total_files\":10,\"current_files\":[\"/data/a\"]}\n",
            "{\"message_type\":\"status\",\"files_done\":9,\"bytes_done\":9000}\n",
            "{\"message_type\":\"summary\",\"snapshot_id\":\"ab12\",\"files_new\":5,\"files_changed\":2,\"files_unmodified\":3,\"data_added\":4096,\"total_files_processed\":10,\"total_bytes_processed\":10000}\n",
        );
        let summary = parse_backup_output(stdout).unwrap();
        assert_eq!(summary.snapshot_id, "ab12");
        assert_eq!(summary.files_new, 5);
        assert_eq!(summary.files_changed, 2);
        assert_eq!(summary.total_bytes_processed, 10000);
    }

    #[test]
    fn missing_summary_is_parse_error() {
        let err = parse_backup_output("{\"message_type\":\"status\",\"files_done\":1}\n").unwrap_err();
        assert!(matches!(err, EngineError::OutputParse(_)));
    }

    #[test]
    fn progress_lines() {
        let progress = parse_progress_line(
            "{\"message_type\":\"status\",\"files_done\":3,\"bytes_done\":77,\"current_files\":[\"/a\",\"/b\"]}",
        )
        .unwrap();
        assert_eq!(progress.files_done, 3);
        assert_eq!(progress.bytes_done, 77);
        assert_eq!(progress.current_path, Some(PathBuf::from("/b")));

        assert!(parse_progress_line("{\"message_type\":\"summary\"}").is_none());
        assert!(parse_progress_line("not json").is_none());
    }

    #[test]
    fn snapshots_listing() {
        let stdout = r#"[
            {"id": "aaa", "time": "2025-05-01T12:00:00Z", "paths": ["/data"], "tags": ["schedule:x"], "hostname": "web1"},
            {"id": "bbb", "time": "2025-05-02T12:00:00Z"}
        ]"#;
        let snapshots = parse_snapshots(stdout).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].id, "aaa");
        assert_eq!(snapshots[1].tags.len(), 0);
    }

    #[test]
    fn forget_groups() {
        let stdout = r#"[
            {"keep": [{"id": "a"}, {"id": "b"}], "remove": [{"id": "c"}]},
            {"keep": [{"id": "d"}], "remove": null}
        ]"#;
        let summary = parse_forget(stdout).unwrap();
        assert_eq!(summary.kept, 3);
        assert_eq!(summary.removed, 1);
    }

    #[test]
    fn ls_skips_header_and_flags_dirs() {
        let stdout = concat!(
            "{\"struct_type\":\"snapshot\",\"id\":\"ab\"}\n",
            "{\"type\":\"dir\",\"path\":\"/data\",\"size\":0}\n",
            "{\"type\":\"file\",\"path\":\"/data/a.txt\",\"size\":42}\n",
        );
        let files = parse_listing(stdout).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].is_dir);
        assert!(!files[1].is_dir);
        assert_eq!(files[1].size, 42);
    }

    #[test]
    fn check_counts_errors() {
        let report = parse_check("checked 12 packs\nerror: pack x damaged", "");
        assert_eq!(report.errors_found, 1);

        let clean = parse_check("no errors were found", "");
        assert_eq!(clean.errors_found, 0);
    }
}
