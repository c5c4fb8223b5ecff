// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre/post link execution (spec.md §4.6): a card's `links` name other
//! action cards to invoke before or after its own body runs. Link failures
//! never fail the parent invocation; each link gets its own bounded time
//! budget. Grounded on the teacher's `crates/mux/src/upstream/bridge.rs`
//! fan-out-to-many-clients shape, here fanned out to named link invocations
//! instead of websocket clients.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{ActionRunner, StackFrame};
use crate::model::{Card, LinkType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Pre,
    Post,
}

impl From<LinkPhase> for LinkType {
    fn from(phase: LinkPhase) -> Self {
        match phase {
            LinkPhase::Pre => LinkType::Pre,
            LinkPhase::Post => LinkType::Post,
        }
    }
}

/// Run every link of `card` matching `phase`, concurrently, each bounded by
/// `timeout`. A link that errors or times out is logged and otherwise
/// ignored; it never propagates to the parent invocation (spec.md §4.6).
pub(super) async fn run_links(
    runner: &Arc<ActionRunner>,
    card: &Card,
    board_id: &str,
    stack_trace: &[StackFrame],
    phase: LinkPhase,
    timeout: Duration,
) {
    let wanted: LinkType = phase.into();
    let mut joins = Vec::new();
    for link in &card.links {
        if link.kind != wanted {
            continue;
        }
        let runner = Arc::clone(runner);
        let board_id = board_id.to_owned();
        let link_name = link.name.clone();
        let stack = stack_trace.to_vec();
        joins.push(tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                timeout,
                runner.run_action_with_stack(&board_id, &link_name, Value::Null, stack),
            )
            .await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(board = %board_id, link = %link_name, error = %e, "link invocation failed"),
                Err(_) => tracing::warn!(board = %board_id, link = %link_name, "link invocation timed out"),
            }
        }));
    }
    for join in joins {
        let _ = join.await;
    }
}

#[cfg(test)]
#[path = "links_tests.rs"]
mod tests;
