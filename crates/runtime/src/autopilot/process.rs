// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed JSON framing over a child process's stdio, and the
//! parent/child message shapes of spec.md §4.7. Grounded on the teacher's
//! `pty/nbio.rs` (non-blocking read/write helpers around a raw fd) and
//! `driver/process.rs` (`is_process_alive` liveness check via `signal::kill`
//! with no signal).

use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{Result, RuntimeError};

/// A message sent from the parent (runtime) to a board's autopilot child.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentMessage {
    Init { context: Value, board_context: Value },
    Update { chunk: String, key: Option<String>, value: Option<Value> },
}

/// A message received from the autopilot child.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    InitConfirmed,
    #[serde(other)]
    Unknown,
}

/// A running autopilot child process: length-prefixed JSON frames over
/// piped stdio, SIGTERM-able by pid.
pub struct AutopilotProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl AutopilotProcess {
    /// Spawn `command` (e.g. a JS runtime invoking the board's autopilot
    /// source file) with piped stdio.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| RuntimeError::SupervisorError("empty autopilot command".into()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::SupervisorError(format!("spawn failed: {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| RuntimeError::SupervisorError("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| RuntimeError::SupervisorError("no stdout".into()))?;
        Ok(Self { child, stdin, stdout: BufReader::new(stdout) })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send one length-prefixed JSON frame.
    pub async fn send(&mut self, message: &ParentMessage) -> Result<()> {
        let body = serde_json::to_vec(message).map_err(|e| RuntimeError::SupervisorError(e.to_string()))?;
        let len = u32::try_from(body.len()).map_err(|_| RuntimeError::SupervisorError("frame too large".into()))?;
        self.stdin
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| RuntimeError::SupervisorError(e.to_string()))?;
        self.stdin.write_all(&body).await.map_err(|e| RuntimeError::SupervisorError(e.to_string()))?;
        self.stdin.flush().await.map_err(|e| RuntimeError::SupervisorError(e.to_string()))
    }

    /// Read one length-prefixed JSON frame, or `None` on EOF.
    pub async fn recv(&mut self) -> Result<Option<ChildMessage>> {
        let mut len_buf = [0u8; 4];
        match self.stdout.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(RuntimeError::SupervisorError(e.to_string())),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        self.stdout.read_exact(&mut body).await.map_err(|e| RuntimeError::SupervisorError(e.to_string()))?;
        serde_json::from_slice(&body).map(Some).map_err(|e| RuntimeError::SupervisorError(e.to_string()))
    }

    /// Send SIGTERM. Best-effort; the kernel reaps on drop via `kill_on_drop`.
    pub fn terminate(&self) {
        if let Some(pid) = self.pid() {
            if let Ok(raw) = i32::try_from(pid) {
                let _ = signal::kill(Pid::from_raw(raw), Signal::SIGTERM);
            }
        }
    }

    /// Wait for the child to exit, returning its exit code if available.
    pub async fn wait(&mut self) -> Option<i32> {
        self.child.wait().await.ok().and_then(|status| status.code())
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
