// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bundles the store, context registry, action runner, autopilot
//! supervisor, and board store into one explicit value threaded by the
//! caller (design note §9: "no module-level statics; callers own a
//! `Runtime` and pass it explicitly").

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::autopilot::AutopilotSupervisor;
use crate::board_store::BoardStore;
use crate::config::RuntimeConfig;
use crate::events::{EventSink, NullSink};
use crate::runner::{ActionRunner, NullCollaborators};
use crate::state::{ContextRegistry, StateStore};

/// Everything needed to serve board actions: the in-memory state store, the
/// ephemeral-context registry, the action runner, the per-board autopilot
/// supervisor, and the durable board store. Owns the background sweeper and
/// file-watcher tasks via `shutdown`.
pub struct Runtime {
    pub store: Arc<StateStore>,
    pub contexts: Arc<ContextRegistry>,
    pub runner: Arc<ActionRunner>,
    pub autopilot: Arc<AutopilotSupervisor>,
    pub boards: Arc<BoardStore>,
    pub shutdown: CancellationToken,
}

impl Runtime {
    /// Build a runtime from `config`, using `sink` for action events. KV
    /// persistence and reload-hint delivery are external-collaborator
    /// concerns (spec.md §1 Non-goals); callers that need them should wrap
    /// [`NullCollaborators`] or supply their own before going to production.
    pub fn new(config: &RuntimeConfig, sink: Arc<dyn EventSink>) -> Self {
        let shutdown = CancellationToken::new();
        let store = Arc::new(StateStore::new());
        let contexts = Arc::new(ContextRegistry::new(Arc::clone(&store), config.context_ttl()));
        contexts.clone().spawn_sweeper(config.context_sweep_interval(), shutdown.child_token());

        let boards = Arc::new(BoardStore::new(&config.boards_dir));
        if let Err(e) = boards.migrate_legacy_layout() {
            tracing::warn!(error = %e, "legacy board migration failed");
        }

        let autopilot = AutopilotSupervisor::new(
            config.autopilot_stop_grace(),
            config.autopilot_debounce(),
            config.autopilot_poll_interval(),
            shutdown.child_token(),
        );

        let collaborators = Arc::new(NullCollaborators);
        let runner = Arc::new(ActionRunner::new(
            Arc::clone(&store),
            Arc::clone(&contexts),
            sink,
            Arc::clone(&boards) as Arc<dyn crate::runner::BoardProvider>,
            Arc::clone(&collaborators) as Arc<dyn crate::runner::KvStore>,
            Arc::clone(&collaborators) as Arc<dyn crate::runner::ReloadHint>,
            Arc::clone(&autopilot) as Arc<dyn crate::runner::AutopilotNotifier>,
            config.link_timeout(),
            config.history_retention_days,
        ));
        runner.spawn_history_sweeper(config.history_sweep_interval(), shutdown.child_token());

        Self { store, contexts, runner, autopilot, boards, shutdown }
    }

    /// Build a runtime with every event dropped, useful for CLI tools that
    /// only need board-store or compiler access.
    pub fn with_null_sink(config: &RuntimeConfig) -> Self {
        Self::new(config, Arc::new(NullSink))
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
