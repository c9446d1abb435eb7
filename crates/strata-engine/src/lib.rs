//! # Strata Engine Adapter
//!
//! Drives the external content-addressed backup engine as a child process
//! and keeps everything OS-shaped in one place:
//!
//! - `backend`: the closed set of repository backends, URI and environment
//!   construction, and `EngineConfig`
//! - `client`: the [`Engine`] trait and the process-backed [`EngineClient`]
//! - `output` / `diff`: parsers for the engine's JSON and text output
//! - `error`: engine stderr classification into retryable/terminal kinds
//! - `mounts`: network mount detection and health probing
//! - `scan`: the large-file pre-scan
//!
//! The adapter never interprets repository contents; it shells out, parses,
//! and maps errors.

pub mod backend;
pub mod client;
pub mod diff;
pub mod error;
pub mod mounts;
pub mod scan;

mod output;

pub use backend::{EngineConfig, RepositoryBackend, DEFAULT_S3_ENDPOINT, DEFAULT_SFTP_PORT};
pub use client::{BackupOptions, Engine, EngineClient, ProgressSink, RestoreOptions};
pub use diff::{ChangeKind, DiffChange, DiffReport, DiffStats};
pub use error::{EngineError, EngineResult};
pub use mounts::{find_parent_mount, is_network_fs, MountChecker, PathCheck};
pub use output::{
    BackupSummary, CheckReport, EngineProgress, PruneSummary, SnapshotFile, SnapshotInfo,
    StatsMode, StatsSummary,
};
pub use scan::{scan_large_files, LargeFile};
