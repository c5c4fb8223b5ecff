// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawns, watches, and restarts one child process per board with an
//! `autopilotSource`, forwarding state/action updates with
//! buffer-until-ready semantics (spec.md §4.7).
//!
//! Grounded on the teacher's `driver/mod.rs` (one task owns a state machine
//! and drains a command channel alongside process events via `select!`),
//! `driver/process.rs` (pid liveness polling), and `driver/grace.rs` (the
//! SIGTERM-then-wait shutdown shape, here a single grace sleep instead of a
//! log-quiescence timer since autopilot children have no PTY to watch).

pub mod process;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::runner::AutopilotNotifier;
use process::{AutopilotProcess, ChildMessage, ParentMessage};

/// Lifecycle state of a single board's autopilot worker (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutopilotState {
    Absent,
    Booting,
    Ready,
    Stopping,
}

/// How to spawn a board's autopilot child: the concrete interpreter
/// invocation plus the source file the supervisor watches for changes.
#[derive(Debug, Clone)]
pub struct AutopilotSpawnSpec {
    pub board_id: String,
    pub source_path: PathBuf,
    pub command: Vec<String>,
}

enum WorkerCommand {
    Update { chunk: String, key: Option<String>, value: Option<Value> },
    SourceChanged,
    Shutdown,
}

/// Supervises every board's autopilot worker task. Implements
/// [`AutopilotNotifier`] so the [`crate::runner::ActionRunner`] can forward
/// state changes without knowing about process lifecycles.
pub struct AutopilotSupervisor {
    senders: Mutex<HashMap<String, mpsc::Sender<WorkerCommand>>>,
    stop_grace: Duration,
    debounce: Duration,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl AutopilotSupervisor {
    pub fn new(stop_grace: Duration, debounce: Duration, poll_interval: Duration, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self { senders: Mutex::new(HashMap::new()), stop_grace, debounce, poll_interval, shutdown })
    }

    /// Start supervising `spec`'s board. Replaces any existing worker for
    /// the same board id.
    pub fn start_board(self: &Arc<Self>, spec: AutopilotSpawnSpec) {
        let (tx, rx) = mpsc::channel(64);
        let worker = Worker {
            spec,
            state: AutopilotState::Absent,
            process: None,
            buffer: VecDeque::new(),
            stop_grace: self.stop_grace,
            poll_interval: self.poll_interval,
            commands: rx,
            shutdown: self.shutdown.child_token(),
        };
        let board_id = worker.spec.board_id.clone();
        self.senders.lock().insert(board_id, tx);
        tokio::spawn(worker.run());
    }

    /// Stop a board's autopilot worker, if one is running.
    pub fn stop_board(&self, board_id: &str) {
        if let Some(tx) = self.senders.lock().remove(board_id) {
            let _ = tx.try_send(WorkerCommand::Shutdown);
        }
    }

    /// Notify the supervisor that `board_id`'s autopilot source file
    /// changed. Debouncing happens in the caller (the file watcher); this
    /// just forwards the restart command.
    pub fn source_changed(&self, board_id: &str) {
        if let Some(tx) = self.senders.lock().get(board_id).cloned() {
            let _ = tx.try_send(WorkerCommand::SourceChanged);
        }
    }

    /// Spawn a debounced file watcher over every board's autopilot source
    /// path (spec.md §4.7 "debounce window for change bursts is 1000ms").
    pub fn spawn_watcher(self: &Arc<Self>, paths: Vec<(String, PathBuf)>) -> anyhow::Result<()> {
        use notify::{RecursiveMode, Watcher};

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })?;
        let mut by_path = HashMap::new();
        for (board_id, path) in paths {
            watcher.watch(&path, RecursiveMode::NonRecursive)?;
            by_path.insert(path, board_id);
        }

        let supervisor = Arc::clone(self);
        let debounce = self.debounce;
        let shutdown = self.shutdown.child_token();
        // The watcher must outlive the task; leaking it here is deliberate,
        // matching the teacher's long-lived-background-handle pattern for
        // supervisors that run for the process lifetime.
        std::mem::forget(watcher);
        tokio::spawn(async move {
            let mut pending: HashMap<String, tokio::time::Instant> = HashMap::new();
            let mut ticker = tokio::time::interval(Duration::from_millis(50));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = raw_rx.recv() => {
                        let Some(event) = event else { break };
                        for path in event.paths {
                            if let Some(board_id) = by_path.get(&path) {
                                pending.insert(board_id.clone(), tokio::time::Instant::now() + debounce);
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        let now = tokio::time::Instant::now();
                        let ready: Vec<String> = pending
                            .iter()
                            .filter(|(_, fire_at)| **fire_at <= now)
                            .map(|(board_id, _)| board_id.clone())
                            .collect();
                        for board_id in ready {
                            pending.remove(&board_id);
                            supervisor.source_changed(&board_id);
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

impl AutopilotNotifier for AutopilotSupervisor {
    fn notify_state_update(&self, board_id: &str, card_name: &str, value: &Value) {
        if let Some(tx) = self.senders.lock().get(board_id).cloned() {
            let _ = tx.try_send(WorkerCommand::Update {
                chunk: "states".to_owned(),
                key: Some(card_name.to_owned()),
                value: Some(value.clone()),
            });
        }
    }
}

struct Worker {
    spec: AutopilotSpawnSpec,
    state: AutopilotState,
    process: Option<AutopilotProcess>,
    buffer: VecDeque<ParentMessage>,
    stop_grace: Duration,
    poll_interval: Duration,
    commands: mpsc::Receiver<WorkerCommand>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        self.start().await;
        loop {
            if self.shutdown.is_cancelled() {
                self.stop().await;
                break;
            }
            let has_process = self.process.is_some();
            if has_process {
                let mut poll = tokio::time::interval(self.poll_interval);
                tokio::select! {
                    _ = self.shutdown.cancelled() => { self.stop().await; break; }
                    cmd = self.commands.recv() => {
                        if !self.handle_command(cmd).await { break; }
                    }
                    frame = recv_frame(&mut self.process) => {
                        self.handle_frame(frame).await;
                    }
                    _ = poll.tick() => {
                        if !self.child_alive() {
                            tracing::warn!(board = %self.spec.board_id, "autopilot child exited");
                            self.process = None;
                            self.state = AutopilotState::Absent;
                        }
                    }
                }
            } else {
                let cmd = self.commands.recv().await;
                if !self.handle_command(cmd).await {
                    break;
                }
            }
        }
    }

    fn child_alive(&mut self) -> bool {
        match &self.process {
            Some(p) => p.pid().is_some(),
            None => false,
        }
    }

    async fn handle_command(&mut self, cmd: Option<WorkerCommand>) -> bool {
        match cmd {
            Some(WorkerCommand::Update { chunk, key, value }) => {
                let message = ParentMessage::Update { chunk, key, value };
                if self.state == AutopilotState::Ready {
                    if let Some(proc) = &mut self.process {
                        let _ = proc.send(&message).await;
                    }
                } else {
                    self.buffer.push_back(message);
                }
                true
            }
            Some(WorkerCommand::SourceChanged) => {
                self.restart().await;
                true
            }
            Some(WorkerCommand::Shutdown) | None => {
                self.stop().await;
                false
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<ChildMessage>) {
        match frame {
            Some(ChildMessage::InitConfirmed) => {
                self.state = AutopilotState::Ready;
                tracing::debug!(board = %self.spec.board_id, "autopilot ready");
                while let Some(message) = self.buffer.pop_front() {
                    if let Some(proc) = &mut self.process {
                        let _ = proc.send(&message).await;
                    }
                }
            }
            Some(ChildMessage::Unknown) => {}
            None => {
                tracing::warn!(board = %self.spec.board_id, "autopilot child closed its output");
                self.process = None;
                self.state = AutopilotState::Absent;
            }
        }
    }

    async fn start(&mut self) {
        match AutopilotProcess::spawn(&self.spec.command) {
            Ok(mut proc) => {
                let init = ParentMessage::Init {
                    context: serde_json::json!({ "boardId": self.spec.board_id }),
                    board_context: Value::Null,
                };
                if proc.send(&init).await.is_ok() {
                    self.process = Some(proc);
                    self.state = AutopilotState::Booting;
                } else {
                    tracing::warn!(board = %self.spec.board_id, "failed to send init to autopilot child");
                    self.state = AutopilotState::Absent;
                }
            }
            Err(e) => {
                tracing::warn!(board = %self.spec.board_id, error = %e, "autopilot spawn failed");
                self.state = AutopilotState::Absent;
            }
        }
    }

    async fn stop(&mut self) {
        self.state = AutopilotState::Stopping;
        if let Some(proc) = &mut self.process {
            proc.terminate();
            tokio::time::sleep(self.stop_grace).await;
            let _ = proc.wait().await;
        }
        self.process = None;
        self.state = AutopilotState::Absent;
    }

    async fn restart(&mut self) {
        self.stop().await;
        self.start().await;
    }
}

async fn recv_frame(process: &mut Option<AutopilotProcess>) -> Option<ChildMessage> {
    match process {
        Some(p) => p.recv().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
