//! Child-process supervision shared by the backends and the provisioner.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::domain::error::ExecError;

/// Exit code reported when the wall-clock timeout expires.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Captured outcome of a supervised child process.
#[derive(Debug)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[must_use]
pub fn timeout_message(timeout: Duration) -> String {
    format!("Execution timed out after {} seconds", timeout.as_secs())
}

/// Run a command to completion under a wall-clock bound.
///
/// On expiry the wait is abandoned and the child is killed (`kill_on_drop`);
/// the outcome reports exit code [`TIMEOUT_EXIT_CODE`] with a distinguished
/// stderr message and no captured output. Dropping the returned future
/// mid-flight (host cancellation) kills the child the same way.
///
/// # Errors
///
/// Returns [`ExecError::Spawn`] if the binary cannot be started.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> Result<CommandOutcome, ExecError> {
    let tool = cmd
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|source| ExecError::Spawn { tool, source })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(waited) => {
            let output = waited?;
            Ok(CommandOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            })
        }
        Err(_) => Ok(CommandOutcome {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: timeout_message(timeout),
            timed_out: true,
        }),
    }
}
