//! Parser for the engine's snapshot diff output.
//!
//! Preferred form is JSON-per-line with `message_type` of `change` or
//! `statistics`; plain-text output from older engines is handled as a
//! fallback.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of change between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    MetadataChanged,
    TypeChanged,
    Unknown,
}

impl ChangeKind {
    /// Map the engine's one-character modifier.
    pub fn from_modifier(modifier: &str) -> Self {
        match modifier {
            "+" => ChangeKind::Added,
            "-" => ChangeKind::Removed,
            "M" | "C" => ChangeKind::Modified,
            "T" => ChangeKind::MetadataChanged,
            "U" => ChangeKind::TypeChanged,
            _ => ChangeKind::Unknown,
        }
    }
}

/// One changed path between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub is_dir: bool,
}

/// Aggregate statistics of a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
}

/// A parsed snapshot diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffReport {
    pub changes: Vec<DiffChange>,
    pub stats: DiffStats,
}

#[derive(Deserialize)]
struct RawDiffLine {
    message_type: String,
    #[serde(default)]
    source_path: Option<PathBuf>,
    #[serde(default)]
    target_path: Option<PathBuf>,
    #[serde(default)]
    modifier: Option<String>,
    #[serde(default)]
    added_files: Option<u64>,
    #[serde(default)]
    removed_files: Option<u64>,
    #[serde(default)]
    changed_files: Option<u64>,
}

/// Parse diff output, JSON-per-line first with text fallback per line.
pub fn parse_diff(output: &str) -> DiffReport {
    let mut report = DiffReport::default();
    let mut statistics_seen = false;

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Ok(raw) = serde_json::from_str::<RawDiffLine>(line) {
            match raw.message_type.as_str() {
                "change" => {
                    let path = raw
                        .target_path
                        .or(raw.source_path)
                        .unwrap_or_default();
                    let modifier = raw.modifier.unwrap_or_default();
                    let kind = ChangeKind::from_modifier(&modifier);
                    count_change(&mut report.stats, kind, statistics_seen);
                    report.changes.push(DiffChange {
                        is_dir: path.to_string_lossy().ends_with('/'),
                        path,
                        kind,
                    });
                }
                "statistics" => {
                    // A statistics line overrides whatever was counted.
                    statistics_seen = true;
                    report.stats = DiffStats {
                        added: raw.added_files.unwrap_or(0),
                        removed: raw.removed_files.unwrap_or(0),
                        modified: raw.changed_files.unwrap_or(0),
                    };
                }
                _ => {}
            }
            continue;
        }

        if let Some(change) = parse_text_line(line) {
            count_change(&mut report.stats, change.kind, statistics_seen);
            report.changes.push(change);
        }
    }

    report
}

fn count_change(stats: &mut DiffStats, kind: ChangeKind, statistics_seen: bool) {
    if statistics_seen {
        return;
    }
    match kind {
        ChangeKind::Added => stats.added += 1,
        ChangeKind::Removed => stats.removed += 1,
        ChangeKind::Modified => stats.modified += 1,
        _ => {}
    }
}

/// Text-mode fallback: leading `+`/`-`/`M`, whitespace, then the path.
/// A trailing `/` marks a directory.
fn parse_text_line(line: &str) -> Option<DiffChange> {
    let modifier = match line.chars().next()? {
        '+' => "+",
        '-' => "-",
        'M' => "M",
        _ => return None,
    };
    let rest = line[1..].trim_start();
    if rest.is_empty() || rest.len() == line[1..].len() {
        // No whitespace after the modifier: not a diff line.
        return None;
    }
    Some(DiffChange {
        path: PathBuf::from(rest),
        kind: ChangeKind::from_modifier(modifier),
        is_dir: rest.ends_with('/'),
    })
}
