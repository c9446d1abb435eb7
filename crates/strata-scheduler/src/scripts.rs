//! Pre/post backup script execution with per-script timeouts.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use strata_core::model::ScriptSpec;

/// Captured result of one script run. Never an error; callers decide what a
/// failure means (`fail_on_error`).
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
}

impl ScriptOutcome {
    /// Stdout and stderr merged for persistence on the backup row.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.stderr.trim_end());
        }
        if self.timed_out {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("(script timed out)");
        }
        out
    }

    /// A one-line failure description.
    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            "script timed out".to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("script exited with code {code}"),
                None => "script terminated by signal".to_string(),
            }
        }
    }
}

/// Run a script through `sh -c` with its configured timeout.
pub async fn run_script(spec: &ScriptSpec) -> ScriptOutcome {
    debug!(command = %spec.command, "running script");
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&spec.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(command = %spec.command, error = %e, "failed to spawn script");
            return ScriptOutcome {
                stderr: format!("failed to spawn: {e}"),
                success: false,
                ..ScriptOutcome::default()
            };
        }
    };

    let timeout = Duration::from_secs(spec.timeout_secs.max(1));
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => ScriptOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            success: output.status.success(),
            timed_out: false,
        },
        Ok(Err(e)) => ScriptOutcome {
            stderr: format!("script wait failed: {e}"),
            success: false,
            ..ScriptOutcome::default()
        },
        Err(_) => {
            warn!(command = %spec.command, timeout_secs = spec.timeout_secs, "script timed out");
            ScriptOutcome {
                timed_out: true,
                success: false,
                ..ScriptOutcome::default()
            }
        }
    }
}
