//! Error types shared across the Strata control plane.

use thiserror::Error;

/// Main error type for control-plane operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A required injected function (decrypt, password lookup) is absent.
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    /// Repository configuration could not be decrypted or parsed.
    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    /// The repository could not be reached or authenticated against.
    #[error("Repository unavailable: {0}")]
    RepoUnavailable(String),

    /// The requested snapshot does not exist in the repository.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// A schedule path sits on a network mount that is not reachable.
    #[error("network mount unavailable: {0}")]
    MountUnavailable(String),

    /// A pre/post script failed or timed out.
    #[error("Script failed: {0}")]
    ScriptFailed(String),

    /// The backup engine invocation failed.
    #[error("Engine failed: {0}")]
    EngineFailed(String),

    /// Entity lookup miss.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lifecycle violation: the component is already running.
    #[error("Already running: {0}")]
    AlreadyRunning(String),

    /// The checkpoint is not in a resumable state.
    #[error("Checkpoint not resumable: {0}")]
    NotResumable(String),

    /// Store-level failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid cron expression on a schedule or setting.
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for control-plane operations.
pub type Result<T> = std::result::Result<T, CoreError>;
