// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use serde_json::json;

#[test]
fn set_then_get_round_trips() {
    let store = StateStore::new();
    let key = Key::new("states", "boards", "sensors", "tick");
    store.set(key.clone(), json!(42), SetOptions::default());
    assert_eq!(store.get(&key), Some(json!(42)));
}

#[test]
fn get_missing_key_returns_none() {
    let store = StateStore::new();
    assert_eq!(store.get(&Key::new("states", "boards", "sensors", "nope")), None);
}

#[test]
fn remove_clears_the_entry() {
    let store = StateStore::new();
    let key = Key::new("states", "boards", "sensors", "tick");
    store.set(key.clone(), json!(1), SetOptions::default());
    store.remove(&key);
    assert_eq!(store.get(&key), None);
}

#[test]
fn get_by_tag_scopes_to_chunk_group_tag() {
    let store = StateStore::new();
    store.set(Key::new("states", "boards", "sensors", "a"), json!(1), SetOptions::default());
    store.set(Key::new("states", "boards", "sensors", "b"), json!(2), SetOptions::default());
    store.set(Key::new("states", "boards", "other", "c"), json!(3), SetOptions::default());

    let scoped = store.get_by_tag("states", "boards", "sensors");
    assert_eq!(scoped.len(), 2);
    assert_eq!(scoped["a"], json!(1));
    assert_eq!(scoped["b"], json!(2));
}

#[test]
fn get_by_group_nests_by_tag() {
    let store = StateStore::new();
    store.set(Key::new("states", "boards", "sensors", "a"), json!(1), SetOptions::default());
    store.set(Key::new("states", "boards", "lights", "b"), json!(2), SetOptions::default());

    let grouped = store.get_by_group("states", "boards");
    assert_eq!(grouped["sensors"]["a"], json!(1));
    assert_eq!(grouped["lights"]["b"], json!(2));
}

#[test]
fn get_state_tree_nests_all_four_levels() {
    let store = StateStore::new();
    store.set(Key::new("states", "boards", "sensors", "tick"), json!(42), SetOptions::default());

    let tree = store.get_state_tree(None);
    assert_eq!(tree["states"]["boards"]["sensors"]["tick"], json!(42));
}

#[test]
fn get_state_tree_scoped_to_chunk_excludes_others() {
    let store = StateStore::new();
    store.set(Key::new("states", "boards", "sensors", "tick"), json!(42), SetOptions::default());
    store.set(Key::new("approvals", "boards", "sensors", "deploy"), json!({}), SetOptions::default());

    let tree = store.get_state_tree(Some("states"));
    assert!(tree.get("approvals").is_none());
    assert_eq!(tree["states"]["boards"]["sensors"]["tick"], json!(42));
}

#[test]
fn subscribers_fire_synchronously_on_matching_write() {
    let store = StateStore::new();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    store.subscribe(
        Selector { tag: Some("sensors".to_owned()), ..Default::default() },
        move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        },
    );

    store.set(
        Key::new("states", "boards", "sensors", "tick"),
        json!(1),
        SetOptions { emit_event: true },
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Non-matching tag does not fire the handler.
    store.set(
        Key::new("states", "boards", "lights", "tick"),
        json!(1),
        SetOptions { emit_event: true },
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn set_without_emit_event_suppresses_notification() {
    let store = StateStore::new();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    store.subscribe(Selector::default(), move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });

    store.set(Key::new("states", "boards", "sensors", "tick"), json!(1), SetOptions { emit_event: false });
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn unsubscribe_stops_future_notifications() {
    let store = StateStore::new();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let id = store.subscribe(Selector::default(), move |_| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    store.unsubscribe(id);

    store.set(Key::new("states", "boards", "sensors", "tick"), json!(1), SetOptions { emit_event: true });
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn serialized_eq_matches_spec_semantics() {
    assert!(serialized_eq(&json!({"a": 1}), &json!({"a": 1})));
    assert!(!serialized_eq(&json!({"a": 1}), &json!({"a": 2})));
}
