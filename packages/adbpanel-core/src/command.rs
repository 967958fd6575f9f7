//! External process helpers shared by the resolver and the device bridge.

use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Captured result of an external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stdout followed by trimmed stderr, one newline apart.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (_, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{}\n{}", out, err),
        }
    }
}

/// Why a process produced no output at all.
#[derive(Debug, Error)]
pub enum RunFailure {
    /// The program could not be started (missing binary, permissions)
    #[error("{0:#}")]
    Launch(anyhow::Error),

    /// The program ran past its timeout and was killed
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

/// Run `program args...` on the async runtime and capture its output.
///
/// With a timeout the child is killed once it elapses. Without one the
/// call waits for the process to exit on its own.
pub async fn run_with_timeout<S: AsRef<str>>(
    program: &str,
    args: &[S],
    timeout: Option<Duration>,
) -> std::result::Result<CommandOutput, RunFailure> {
    let mut std_cmd = hidden_command(program);
    std_cmd
        .args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut cmd = tokio::process::Command::from(std_cmd);
    cmd.kill_on_drop(true);

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, spawn_output(&mut cmd, program)).await {
            Ok(result) => result.map_err(RunFailure::Launch)?,
            Err(_) => return Err(RunFailure::TimedOut(limit)),
        },
        None => spawn_output(&mut cmd, program)
            .await
            .map_err(RunFailure::Launch)?,
    };

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

async fn spawn_output(
    cmd: &mut tokio::process::Command,
    program: &str,
) -> Result<std::process::Output> {
    cmd.output()
        .await
        .with_context(|| format!("Failed to execute {}", program))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let both = CommandOutput {
            code: Some(0),
            stdout: "connected to 192.168.1.42:5555\n".to_string(),
            stderr: "  warning  ".to_string(),
        };
        assert_eq!(both.combined(), "connected to 192.168.1.42:5555\nwarning");

        let only_err = CommandOutput {
            code: Some(1),
            stdout: "   ".to_string(),
            stderr: "error: no devices/emulators found\n".to_string(),
        };
        assert_eq!(only_err.combined(), "error: no devices/emulators found");
        assert!(!only_err.success());
    }

    #[test]
    fn test_run_failure_messages() {
        let timed_out = RunFailure::TimedOut(Duration::from_millis(200));
        assert_eq!(timed_out.to_string(), "timed out after 200ms");

        let launch = RunFailure::Launch(
            anyhow::anyhow!("No such file or directory").context("Failed to execute ipscan"),
        );
        assert_eq!(
            launch.to_string(),
            "Failed to execute ipscan: No such file or directory"
        );
        let _: &dyn std::error::Error = &launch;
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let result =
            run_with_timeout("adbpanel-definitely-missing-binary", &["--help"], None).await;
        assert!(matches!(result, Err(RunFailure::Launch(_))));
    }
}
