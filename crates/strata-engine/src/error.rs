//! Engine error kinds mapped from child-process output.

use thiserror::Error;

/// Errors surfaced by engine invocations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Repository locked: {0}")]
    RepositoryLocked(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Repository data corrupted: {0}")]
    Corrupted(String),

    #[error("Engine failed: {0}")]
    Generic(String),

    #[error("Failed to run engine: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Failed to parse engine output: {0}")]
    OutputParse(String),
}

impl EngineError {
    /// Map engine stderr to a distinguishable kind.
    pub fn classify(exit_code: Option<i32>, stderr: &str) -> Self {
        let lowered = stderr.to_ascii_lowercase();
        let message = summarize(stderr, exit_code);

        const NOT_FOUND: &[&str] = &["no matching id found", "snapshot not found"];
        const LOCKED: &[&str] = &["repository is already locked", "unable to create lock"];
        const AUTH: &[&str] = &[
            "wrong password",
            "no key found",
            "authentication failed",
            "access denied",
            "invalidaccesskeyid",
            "signaturedoesnotmatch",
            "permission denied",
            "401",
            "403",
        ];
        const TRANSPORT: &[&str] = &[
            "connection refused",
            "connection reset",
            "i/o timeout",
            "dial tcp",
            "network is unreachable",
            "no such host",
            "temporarily unavailable",
            "timeout",
        ];
        const CORRUPTED: &[&str] = &[
            "hash mismatch",
            "corrupt",
            "invalid data returned",
            "ciphertext verification failed",
        ];

        let matches = |patterns: &[&str]| patterns.iter().any(|p| lowered.contains(p));

        if matches(NOT_FOUND) {
            EngineError::SnapshotNotFound(message)
        } else if matches(LOCKED) {
            EngineError::RepositoryLocked(message)
        } else if matches(AUTH) {
            EngineError::AuthFailed(message)
        } else if matches(TRANSPORT) {
            EngineError::TransportError(message)
        } else if matches(CORRUPTED) {
            EngineError::Corrupted(message)
        } else {
            EngineError::Generic(message)
        }
    }

    /// Whether a retry against the same repository can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransportError(_) | EngineError::Generic(_)
        )
    }
}

/// Keep the tail of stderr; engine output can run to megabytes.
fn summarize(stderr: &str, exit_code: Option<i32>) -> String {
    let trimmed = stderr.trim();
    let tail: String = if trimmed.len() > 512 {
        let start = trimmed.len() - 512;
        // Avoid splitting a UTF-8 sequence.
        let start = (start..trimmed.len())
            .find(|i| trimmed.is_char_boundary(*i))
            .unwrap_or(start);
        format!("...{}", &trimmed[start..])
    } else {
        trimmed.to_string()
    };
    match exit_code {
        Some(code) if tail.is_empty() => format!("engine exited with code {code}"),
        Some(code) => format!("exit code {code}: {tail}"),
        None => {
            if tail.is_empty() {
                "engine terminated by signal".to_string()
            } else {
                tail
            }
        }
    }
}

impl From<EngineError> for strata_core::CoreError {
    fn from(err: EngineError) -> Self {
        use strata_core::CoreError;
        match err {
            EngineError::SnapshotNotFound(m) => CoreError::SnapshotNotFound(m),
            EngineError::AuthFailed(m) | EngineError::TransportError(m) => {
                CoreError::RepoUnavailable(m)
            }
            other => CoreError::EngineFailed(other.to_string()),
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
