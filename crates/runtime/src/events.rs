// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque event sink (spec.md §6). The runtime publishes envelopes; the
//! collaborator (HTTP/MQTT bridge, out of scope here) decides what to do
//! with them. Shape grounded on the teacher's `MuxEvent`
//! (`crates/mux/src/state.rs`): a tagged enum-free envelope struct plus a
//! trait so tests can install a recording sink.

use serde::Serialize;
use serde_json::Value;

/// An event envelope published to the injected sink (spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub path: String,
    pub from: String,
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn path_for(board_id: &str, card_name: &str, suffix: &str) -> String {
        format!("actions/boards/{board_id}/{card_name}/{suffix}")
    }

    pub fn approval_path(board_id: &str, card_name: &str, approval_id: &str) -> String {
        format!("actions/approval/{board_id}/{card_name}/{approval_id}")
    }
}

/// Collaborator-provided event sink. The runtime never inspects delivery
/// semantics beyond "fire and forget, opaque payload" (spec.md §1).
pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: EventEnvelope);
}

/// An `EventSink` that drops everything. Useful as a default/test double.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _envelope: EventEnvelope) {}
}

/// An `EventSink` that records every envelope, useful in tests that assert
/// on exact event sequences (spec.md §8 scenario S1: "exactly one `run` and
/// one `done` event fired").
#[derive(Default)]
pub struct RecordingSink {
    pub events: parking_lot::Mutex<Vec<EventEnvelope>>,
}

impl EventSink for RecordingSink {
    fn publish(&self, envelope: EventEnvelope) {
        self.events.lock().push(envelope);
    }
}

impl RecordingSink {
    pub fn paths(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.path.clone()).collect()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
