//! Subprocess plumbing shared by the Go and external-runtime paths.
//!
//! Everything that launches a child goes through [`command`] so the
//! platform-conditional window attributes live in exactly one place.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Captured output of a finished child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Child exit code; 1 when the child died without one.
    pub exit_code: i32,
    pub success: bool,
}

/// Failure modes of [`run`].
#[derive(Debug)]
pub enum CommandError {
    /// The deadline elapsed and the child was killed.
    TimedOut,
    /// The child could not be spawned or awaited.
    Io(std::io::Error),
}

/// Builds a command with the platform-appropriate process attributes.
/// On Windows the child is created without a console window.
pub fn command(program: &str) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Runs `cmd` to completion under `deadline`, feeding `input` to its stdin
/// when non-empty. The child is killed when the deadline fires; it never
/// outlives this call.
pub async fn run(
    mut cmd: Command,
    dir: Option<&Path>,
    input: &str,
    deadline: Duration,
) -> Result<CommandOutput, CommandError> {
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(if input.is_empty() {
        Stdio::null()
    } else {
        Stdio::piped()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(CommandError::Io)?;

    if !input.is_empty() {
        if let Some(mut stdin) = child.stdin.take() {
            let text = input.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(text.as_bytes()).await;
            });
        }
    }

    let stdout_task = child.stdout.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });
    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    let status = match tokio::time::timeout(deadline, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => return Err(CommandError::Io(err)),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(CommandError::TimedOut);
        }
    };

    Ok(CommandOutput {
        stdout: drain(stdout_task).await,
        stderr: drain(stderr_task).await,
        exit_code: status.code().unwrap_or(1),
        success: status.success(),
    })
}

/// Runs a short probe command with no deadline, capturing its output.
pub async fn output(program: &str, args: &[&str]) -> std::io::Result<std::process::Output> {
    let mut cmd = command(program);
    cmd.args(args).stdin(Stdio::null());
    cmd.output().await
}

async fn drain(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(task) => match task.await {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}
