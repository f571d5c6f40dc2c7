//! Helpers for running external tools (terraform, helm)

use std::process::{Output, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

use crate::{Error, Result};

/// Render a command line for error messages and logs
pub fn describe(cmd: &Command) -> String {
    let std = cmd.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().to_string()];
    parts.extend(std.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

/// Run a command to completion and return its raw output.
///
/// Only spawn failures are errors; a non-zero exit status is left to the caller.
pub async fn raw_output(cmd: &mut Command) -> Result<Output> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::command_failed(describe(cmd), format!("failed to spawn: {}", e)))?;
    Ok(output)
}

/// Run a command and return stdout, failing with stderr on a non-zero exit
pub async fn output(cmd: &mut Command) -> Result<String> {
    let out = raw_output(cmd).await?;
    if !out.status.success() {
        return Err(Error::command_failed(
            describe(cmd),
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

/// Run a command, logging each stdout line as it arrives.
///
/// Stderr is collected and becomes the error message on a non-zero exit.
pub async fn stream(cmd: &mut Command) -> Result<()> {
    let command = describe(cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::command_failed(&command, format!("failed to spawn: {}", e)))?;

    // Drain stderr concurrently so a chatty tool can't block on a full pipe
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            info!("    {}", line);
        }
    }

    let status = child.wait().await?;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        let message = if stderr.trim().is_empty() {
            format!("exited with {}", status)
        } else {
            stderr.trim().to_string()
        };
        return Err(Error::command_failed(command, message));
    }

    Ok(())
}
