// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide, in-memory hierarchical key/value store (spec.md §4.1).
//!
//! Grounded on the teacher's `crates/mux/src/state.rs` `MuxState`/`Aggregator`
//! pair: a `RwLock`-guarded map plus a `broadcast` channel fanning change
//! notifications out to subscribers. Here the map is keyed on the
//! four-level `(chunk, group, tag, name)` address from spec.md instead of a
//! single session id, and the broadcast channel is replaced with a plain
//! callback registry so that "subscribers are invoked synchronously after
//! the write completes" (spec.md §4.1) holds without requiring subscribers
//! to be `Send`/`'static` broadcast consumers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Four-level address into the store: `(chunk, group, tag, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub chunk: String,
    pub group: String,
    pub tag: String,
    pub name: String,
}

impl Key {
    pub fn new(
        chunk: impl Into<String>,
        group: impl Into<String>,
        tag: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self { chunk: chunk.into(), group: group.into(), tag: tag.into(), name: name.into() }
    }
}

/// A change notification delivered to subscribers after a write completes.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub key: Key,
    pub value: Value,
}

/// Selector a subscriber registers interest against. `None` fields are
/// wildcards, matching the "wildcard any channel" described in spec.md §4.1.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub chunk: Option<String>,
    pub group: Option<String>,
    pub tag: Option<String>,
    pub name: Option<String>,
}

impl Selector {
    pub fn matches(&self, key: &Key) -> bool {
        self.chunk.as_deref().is_none_or(|v| v == key.chunk)
            && self.group.as_deref().is_none_or(|v| v == key.group)
            && self.tag.as_deref().is_none_or(|v| v == key.tag)
            && self.name.as_deref().is_none_or(|v| v == key.name)
    }
}

type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscription {
    id: u64,
    selector: Selector,
    handler: Handler,
}

/// Options for [`StateStore::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub emit_event: bool,
}

#[derive(Default)]
struct Inner {
    data: HashMap<Key, Value>,
    subscriptions: Vec<Subscription>,
    next_sub_id: u64,
}

/// The process-wide hierarchical state store.
pub struct StateStore {
    inner: RwLock<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        self.inner.read().data.get(key).cloned()
    }

    /// Write `value` at `key`. Triggers a synchronous change notification to
    /// matching subscribers unless the caller opts out via `options`. Equal
    /// values (by serialized comparison) still reach subscribers here; callers
    /// that want change-suppression semantics (spec.md §4.5 step 12 / §8
    /// property 5) perform that comparison themselves before calling `set`.
    pub fn set(&self, key: Key, value: Value, options: SetOptions) {
        let handlers: Vec<Handler> = {
            let mut inner = self.inner.write();
            inner.data.insert(key.clone(), value.clone());
            if options.emit_event {
                inner
                    .subscriptions
                    .iter()
                    .filter(|s| s.selector.matches(&key))
                    .map(|s| s.handler.clone())
                    .collect()
            } else {
                Vec::new()
            }
        };
        let event = ChangeEvent { key, value };
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn remove(&self, key: &Key) {
        self.inner.write().data.remove(key);
    }

    /// All `(name, value)` pairs at `(chunk, group, tag)`.
    pub fn get_by_tag(&self, chunk: &str, group: &str, tag: &str) -> HashMap<String, Value> {
        self.inner
            .read()
            .data
            .iter()
            .filter(|(k, _)| k.chunk == chunk && k.group == group && k.tag == tag)
            .map(|(k, v)| (k.name.clone(), v.clone()))
            .collect()
    }

    /// All entries at `(chunk, group)`, nested by tag then name.
    pub fn get_by_group(&self, chunk: &str, group: &str) -> HashMap<String, HashMap<String, Value>> {
        let mut out: HashMap<String, HashMap<String, Value>> = HashMap::new();
        for (k, v) in self.inner.read().data.iter() {
            if k.chunk == chunk && k.group == group {
                out.entry(k.tag.clone()).or_default().insert(k.name.clone(), v.clone());
            }
        }
        out
    }

    /// Deep snapshot of the store, optionally scoped to one chunk, as a
    /// nested `chunk -> group -> tag -> name -> value` map. A fresh clone
    /// is built on every call, matching spec.md's "deep clone on read".
    pub fn get_state_tree(&self, chunk: Option<&str>) -> Value {
        let mut tree: HashMap<String, HashMap<String, HashMap<String, HashMap<String, Value>>>> = HashMap::new();
        for (k, v) in self.inner.read().data.iter() {
            if let Some(c) = chunk {
                if k.chunk != c {
                    continue;
                }
            }
            tree.entry(k.chunk.clone())
                .or_default()
                .entry(k.group.clone())
                .or_default()
                .entry(k.tag.clone())
                .or_default()
                .insert(k.name.clone(), v.clone());
        }
        serde_json::to_value(tree).unwrap_or(Value::Null)
    }

    /// Register a handler invoked synchronously whenever a matching key is
    /// written with `emit_event = true`. Returns an id usable with
    /// [`StateStore::unsubscribe`].
    pub fn subscribe(&self, selector: Selector, handler: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> u64 {
        let mut inner = self.inner.write();
        let id = inner.next_sub_id;
        inner.next_sub_id += 1;
        inner.subscriptions.push(Subscription { id, selector, handler: Arc::new(handler) });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.write().subscriptions.retain(|s| s.id != id);
    }
}

/// Byte-equality of two JSON values by serialized comparison, the basis for
/// change suppression (spec.md §4.1 invariant, §8 property 5).
pub fn serialized_eq(a: &Value, b: &Value) -> bool {
    a == b
}

/// Current epoch milliseconds, used for context/approval/execution timestamps.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
