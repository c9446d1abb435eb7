//! Pre-backup scan for files above a schedule's size cap.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file found above the configured size threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Walk the schedule's paths and list files at or above `max_file_size_mb`,
/// honoring the schedule's exclude patterns. A threshold of zero or below
/// disables the scan. Unreadable entries are skipped, not fatal.
pub fn scan_large_files(
    paths: &[PathBuf],
    excludes: &[String],
    max_file_size_mb: i64,
) -> Vec<LargeFile> {
    if max_file_size_mb <= 0 {
        return Vec::new();
    }
    let threshold = (max_file_size_mb as u64) * 1024 * 1024;

    let mut found = Vec::new();
    for root in paths {
        walk(root, excludes, threshold, &mut found);
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

fn walk(path: &Path, excludes: &[String], threshold: u64, found: &mut Vec<LargeFile>) {
    if is_excluded(path, excludes) {
        return;
    }
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable entry");
            return;
        }
    };

    if metadata.is_file() {
        if metadata.len() >= threshold {
            found.push(LargeFile {
                path: path.to_path_buf(),
                size_bytes: metadata.len(),
            });
        }
        return;
    }
    if !metadata.is_dir() {
        // Symlinks and special files never count against the size cap.
        return;
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        walk(&entry.path(), excludes, threshold, found);
    }
}

/// Exclude semantics: absolute patterns are path prefixes, `*.ext` patterns
/// match by extension, bare patterns match any path component.
fn is_excluded(path: &Path, excludes: &[String]) -> bool {
    excludes.iter().any(|pattern| {
        if let Some(stripped) = pattern.strip_prefix("*.") {
            return path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy() == stripped);
        }
        if pattern.starts_with('/') {
            return path.starts_with(pattern);
        }
        path.components()
            .any(|c| c.as_os_str().to_string_lossy() == pattern.as_str())
    })
}
