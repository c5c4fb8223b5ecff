// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-lived ephemeral contexts that shadow board state per request
//! (spec.md §4.2). Grounded on the teacher's periodic-sweep shape in
//! `crates/mux/src/credential/refresh.rs` (interval loop with backoff) and
//! its `CancellationToken`-driven shutdown used throughout `crates/cli`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{Card, StateMode};
use crate::state::store::{epoch_ms, Key, SetOptions, StateStore};

const CONTEXTS_CHUNK: &str = "states";
const CONTEXTS_GROUP: &str = "contexts";
const BOARDS_CHUNK: &str = "states";
const BOARDS_GROUP: &str = "boards";
const META_BOARD_ID: &str = "_boardId";
const META_CREATED_AT: &str = "_createdAt";

/// Created/reads/writes/garbage-collects ephemeral contexts over a shared
/// [`StateStore`].
pub struct ContextRegistry {
    store: Arc<StateStore>,
    ttl: Duration,
}

impl ContextRegistry {
    pub fn new(store: Arc<StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Create a fresh 128-bit context id scoped to `board_id`.
    pub fn create_context(&self, board_id: &str) -> String {
        let context_id = Uuid::new_v4().to_string();
        self.store.set(
            Key::new(CONTEXTS_CHUNK, CONTEXTS_GROUP, &context_id, META_BOARD_ID),
            Value::String(board_id.to_owned()),
            SetOptions::default(),
        );
        self.store.set(
            Key::new(CONTEXTS_CHUNK, CONTEXTS_GROUP, &context_id, META_CREATED_AT),
            Value::Number(epoch_ms().into()),
            SetOptions::default(),
        );
        context_id
    }

    pub fn set_context_state(&self, context_id: &str, card_name: &str, value: Value) {
        self.store.set(
            Key::new(CONTEXTS_CHUNK, CONTEXTS_GROUP, context_id, card_name),
            value,
            SetOptions::default(),
        );
    }

    pub fn get_context_state(&self, context_id: &str, card_name: &str) -> Option<Value> {
        self.store.get(&Key::new(CONTEXTS_CHUNK, CONTEXTS_GROUP, context_id, card_name))
    }

    /// Resolve a card's state: context first (if `context_id` is given and
    /// has an override), else base board state.
    pub fn get_card_state(&self, board_id: &str, card_name: &str, context_id: Option<&str>) -> Option<Value> {
        if let Some(cid) = context_id {
            if let Some(v) = self.get_context_state(cid, card_name) {
                return Some(v);
            }
        }
        self.store.get(&Key::new(BOARDS_CHUNK, BOARDS_GROUP, board_id, card_name))
    }

    /// Write a card's state, routed to the context if one is present, else
    /// to base board state.
    pub fn set_card_state(&self, board_id: &str, card_name: &str, value: Value, context_id: Option<&str>) {
        match context_id {
            Some(cid) => self.set_context_state(cid, card_name, value),
            None => self.store.set(
                Key::new(BOARDS_CHUNK, BOARDS_GROUP, board_id, card_name),
                value,
                SetOptions { emit_event: true },
            ),
        }
    }

    /// Clear every entry under a context's tag. Idempotent.
    pub fn cleanup_context(&self, context_id: &str) {
        let names: Vec<String> =
            self.store.get_by_tag(CONTEXTS_CHUNK, CONTEXTS_GROUP, context_id).into_keys().collect();
        for name in names {
            self.store.remove(&Key::new(CONTEXTS_CHUNK, CONTEXTS_GROUP, context_id, &name));
        }
    }

    /// Sweep contexts older than `self.ttl`, returning the count removed.
    pub fn sweep_expired(&self) -> usize {
        let now = epoch_ms();
        let ttl_ms = self.ttl.as_millis() as u64;
        let by_tag = self.store.get_by_group(CONTEXTS_CHUNK, CONTEXTS_GROUP);
        let mut swept = 0usize;
        for (context_id, entries) in by_tag {
            let created_at = entries.get(META_CREATED_AT).and_then(|v| v.as_u64()).unwrap_or(0);
            if now.saturating_sub(created_at) >= ttl_ms {
                self.cleanup_context(&context_id);
                swept += 1;
            }
        }
        swept
    }

    /// `ephemeral` if the card declares it explicitly, `non-ephemeral` if it
    /// declares that explicitly, else inherit `board.ephemeral`
    /// (spec.md §4.2).
    pub fn resolve_state_mode(card: &Card, board_ephemeral: bool) -> ResolvedStateMode {
        match card.state_mode {
            StateMode::Ephemeral => ResolvedStateMode::Ephemeral,
            StateMode::NonEphemeral => ResolvedStateMode::NonEphemeral,
            StateMode::Default if board_ephemeral => ResolvedStateMode::Ephemeral,
            StateMode::Default => ResolvedStateMode::NonEphemeral,
        }
    }

    /// Spawn the periodic sweeper task. Runs until `shutdown` is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = self.sweep_expired();
                        if swept > 0 {
                            tracing::debug!(swept, "ephemeral context sweep");
                        }
                    }
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedStateMode {
    Ephemeral,
    NonEphemeral,
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
