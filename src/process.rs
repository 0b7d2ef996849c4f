//! # Subprocess Execution
//!
//! Thin async wrapper around `tokio::process::Command` used by the Docker and
//! k3d/kubectl backends. Output is captured in full; callers decide what a
//! non-zero exit means.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("`{command}` timed out after {timeout_seconds}s")]
    Timeout {
        command: String,
        timeout_seconds: u64,
    },
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// stdout followed by stderr, the way a terminal would have shown them
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Best single-line description of a failure
    pub fn failure_message(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let last = text.lines().rev().find(|l| !l.trim().is_empty());
        match (last, self.exit_code) {
            (Some(line), _) => line.trim().to_string(),
            (None, Some(code)) => format!("exited with status {code}"),
            (None, None) => "terminated by signal".to_string(),
        }
    }
}

/// Run `program args...` to completion.
///
/// `limit` of `None` waits indefinitely; image builds are never interrupted
/// once started.
pub async fn run_command(
    program: &str,
    args: &[String],
    workdir: Option<&Path>,
    limit: Option<Duration>,
) -> Result<CommandOutput, ProcessError> {
    let command_line = format!("{program} {}", args.join(" "));
    debug!(command = %command_line, "Running command");

    let started = Instant::now();
    let mut command = tokio::process::Command::new(program);
    command.kill_on_drop(true);
    command.args(args);
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let output = match limit {
        Some(limit) => timeout(limit, command.output())
            .await
            .map_err(|_| ProcessError::Timeout {
                command: command_line.clone(),
                timeout_seconds: limit.as_secs(),
            })?,
        None => command.output().await,
    }
    .map_err(|e| ProcessError::Spawn {
        command: command_line.clone(),
        message: e.to_string(),
    })?;

    let result = CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: started.elapsed().as_millis() as u64,
    };

    debug!(
        command = %command_line,
        success = result.success,
        exit_code = ?result.exit_code,
        duration_ms = result.duration_ms,
        "Command finished"
    );

    Ok(result)
}

/// Owned argument list from string literals
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_prefers_stderr_last_line() {
        let output = CommandOutput {
            success: false,
            exit_code: Some(1),
            stdout: "building...\n".to_string(),
            stderr: "warning: x\nerror: no such image\n\n".to_string(),
            duration_ms: 5,
        };
        assert_eq!(output.failure_message(), "error: no such image");
    }

    #[test]
    fn test_failure_message_falls_back_to_exit_code() {
        let output = CommandOutput {
            success: false,
            exit_code: Some(137),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        };
        assert_eq!(output.failure_message(), "exited with status 137");
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            success: true,
            exit_code: Some(0),
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
            duration_ms: 0,
        };
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_captures_output() {
        let output = run_command("sh", &args(["-c", "echo hello; echo oops >&2; exit 3"]), None, None)
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_times_out() {
        let result = run_command(
            "sh",
            &args(["-c", "sleep 5"]),
            None,
            Some(Duration::from_millis(100)),
        )
        .await;
        assert!(matches!(result, Err(ProcessError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_command_missing_binary() {
        let result = run_command("definitely-not-a-real-binary-eci", &[], None, None).await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }
}
