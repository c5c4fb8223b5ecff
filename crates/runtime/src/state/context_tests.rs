// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use super::*;
use crate::model::{Card, CardType, StateMode};

fn registry(ttl: Duration) -> ContextRegistry {
    ContextRegistry::new(Arc::new(StateStore::new()), ttl)
}

fn action_card(mode: StateMode) -> Card {
    Card {
        name: "write".into(),
        card_type: CardType::Action,
        rules_code: String::new(),
        html: None,
        config_params: Default::default(),
        links: vec![],
        presets: Default::default(),
        return_type: None,
        fallback_value: None,
        enable_return_custom_fallback: false,
        response_key: None,
        persist_value: false,
        keep_history: false,
        history_retention_days: None,
        state_mode: mode,
        chain_terminator: false,
        request_approval: false,
        approval_message: None,
        always_report_value: false,
        suppress_reload: false,
    }
}

#[test]
fn create_context_records_metadata() {
    let reg = registry(Duration::from_secs(3600));
    let cid = reg.create_context("sensors");
    assert!(reg.get_context_state(&cid, "_boardId").is_none()); // reserved name lives under meta keys, not card state
    assert_eq!(
        reg.store.get(&Key::new("states", "contexts", &cid, "_boardId")),
        Some(json!("sensors"))
    );
}

#[test]
fn context_state_shadows_base_state() {
    let reg = registry(Duration::from_secs(3600));
    reg.set_card_state("b", "write", json!(1), None);
    let cid = reg.create_context("b");
    reg.set_card_state("b", "write", json!(2), Some(&cid));

    assert_eq!(reg.get_card_state("b", "write", Some(&cid)), Some(json!(2)));
    // Base state is untouched by a context-scoped write.
    assert_eq!(reg.get_card_state("b", "write", None), Some(json!(1)));
}

#[test]
fn get_card_state_falls_through_to_base_when_context_has_no_override() {
    let reg = registry(Duration::from_secs(3600));
    reg.set_card_state("b", "write", json!(1), None);
    let cid = reg.create_context("b");
    assert_eq!(reg.get_card_state("b", "write", Some(&cid)), Some(json!(1)));
}

#[test]
fn cleanup_context_removes_all_entries_idempotently() {
    let reg = registry(Duration::from_secs(3600));
    let cid = reg.create_context("b");
    reg.set_context_state(&cid, "write", json!(2));
    reg.cleanup_context(&cid);
    assert_eq!(reg.get_context_state(&cid, "write"), None);
    // A second cleanup of the same (now-empty) context does nothing and does not panic.
    reg.cleanup_context(&cid);
}

#[test]
fn after_cleanup_reads_return_only_base_state() {
    let reg = registry(Duration::from_secs(3600));
    reg.set_card_state("b", "write", json!("base"), None);
    let cid = reg.create_context("b");
    reg.set_card_state("b", "write", json!("shadowed"), Some(&cid));
    reg.cleanup_context(&cid);

    assert_eq!(reg.get_card_state("b", "write", Some(&cid)), Some(json!("base")));
}

#[test]
fn sweep_expired_removes_only_stale_contexts() {
    let reg = registry(Duration::from_millis(0));
    let cid = reg.create_context("b");
    let swept = reg.sweep_expired();
    assert_eq!(swept, 1);
    assert_eq!(reg.get_context_state(&cid, "_createdAt"), None);
}

#[test]
fn sweep_expired_keeps_fresh_contexts() {
    let reg = registry(Duration::from_secs(3600));
    reg.create_context("b");
    assert_eq!(reg.sweep_expired(), 0);
}

#[test]
fn resolve_state_mode_explicit_ephemeral_wins() {
    let card = action_card(StateMode::Ephemeral);
    assert_eq!(ContextRegistry::resolve_state_mode(&card, false), ResolvedStateMode::Ephemeral);
}

#[test]
fn resolve_state_mode_explicit_non_ephemeral_wins_even_if_board_ephemeral() {
    let card = action_card(StateMode::NonEphemeral);
    assert_eq!(ContextRegistry::resolve_state_mode(&card, true), ResolvedStateMode::NonEphemeral);
}

#[test]
fn resolve_state_mode_default_inherits_board() {
    let card = action_card(StateMode::Default);
    assert_eq!(ContextRegistry::resolve_state_mode(&card, true), ResolvedStateMode::Ephemeral);
    assert_eq!(ContextRegistry::resolve_state_mode(&card, false), ResolvedStateMode::NonEphemeral);
}

// `#[serial]` because this drives the real tokio timer wheel on a fixed
// wall-clock interval; running it alongside other timer-sensitive tests in
// the same process can make the tick arrive late enough to flake.
#[serial_test::serial]
#[tokio::test]
async fn spawn_sweeper_removes_expired_contexts_on_its_own_schedule() {
    let reg = Arc::new(registry(Duration::from_millis(10)));
    let cid = reg.create_context("b");
    let shutdown = tokio_util::sync::CancellationToken::new();
    let handle = Arc::clone(&reg).spawn_sweeper(Duration::from_millis(20), shutdown.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    let _ = handle.await;

    assert_eq!(reg.get_context_state(&cid, "_createdAt"), None);
}
