// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The central orchestrator (spec.md §4.5): validates inputs, gates
//! approvals, enforces recursion/cycle detection, constructs the call
//! frame, invokes the compiled card, publishes results, writes history,
//! triggers chained links, emits lifecycle events.
//!
//! Grounded on the teacher's `crates/cli/src/driver/mod.rs` state-machine
//! shape (an explicit enum driving lifecycle) and `crates/mux/src/upstream/
//! bridge.rs`'s pattern of a long-lived `Arc<Self>` object whose methods are
//! invoked re-entrantly.

pub mod links;

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::compiler::{CardCompiler, CardEnv, ExecuteActionRequest, Invoker};
use crate::error::{Result, RuntimeError};
use crate::events::{EventEnvelope, EventSink};
use crate::model::{split_aliased_name, Board, Card};
use crate::params::ParamResolver;
use crate::state::context::ContextRegistry;
use crate::state::store::{epoch_ms, serialized_eq, Key, SetOptions, StateStore};

/// Lifecycle status of an [`ActionInvocation`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Offered,
    Done,
    Error,
    Cancelled,
}

/// `(cardName, boardId, contextId)` — the unit of recursion-detection
/// equality (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub card_name: String,
    pub board_id: String,
    pub context_id: Option<String>,
}

/// An in-flight invocation (not persisted). Torn down on terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub execution_id: String,
    pub board_id: String,
    pub card_name: String,
    pub aliased_name: Option<String>,
    pub params: Value,
    pub stack_trace: Vec<StackFrame>,
    pub context_id: Option<String>,
    pub started_at: u64,
    pub status: ExecutionStatus,
}

/// A single append to a card's history (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub board_id: String,
    pub card_key: String,
    pub card_name: String,
    pub value: Value,
    pub timestamp: u64,
    /// Retention window in effect when this entry was written (the card's
    /// own `historyRetentionDays` or the runner-wide default), carried on
    /// the entry so the sweep doesn't need to re-resolve the owning card.
    pub retention_days: u32,
}

/// The outcome of a successful `run_action` call.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Value(Value),
    Offered { approval_id: String },
}

/// Supplies board definitions (spec.md §6: BoardStore is a collaborator
/// contract from the runner's point of view).
#[async_trait::async_trait]
pub trait BoardProvider: Send + Sync {
    async fn get_board(&self, board_id: &str) -> Result<Board>;
}

/// Blocking read/write KV contract backing `persistValue` (spec.md §1, §6).
pub trait KvStore: Send + Sync {
    fn write(&self, board_id: &str, card_name: &str, json_text: &str) -> Result<()>;
}

/// Collaborator call triggered after a real (non-suppressed) base-state
/// write, unless the card sets `suppressReload` (spec.md §4.5 step 12).
pub trait ReloadHint: Send + Sync {
    fn board_reload_hint(&self, board_id: &str);
}

/// Forwards state/action updates to the per-board autopilot worker
/// (spec.md §4.7); implemented by [`crate::autopilot::AutopilotSupervisor`].
pub trait AutopilotNotifier: Send + Sync {
    fn notify_state_update(&self, board_id: &str, card_name: &str, value: &Value);
}

/// A no-op `KvStore`/`ReloadHint`/`AutopilotNotifier`, useful in tests and
/// for boards with no collaborators wired up.
pub struct NullCollaborators;

impl KvStore for NullCollaborators {
    fn write(&self, _board_id: &str, _card_name: &str, _json_text: &str) -> Result<()> {
        Ok(())
    }
}

impl ReloadHint for NullCollaborators {
    fn board_reload_hint(&self, _board_id: &str) {}
}

impl AutopilotNotifier for NullCollaborators {
    fn notify_state_update(&self, _board_id: &str, _card_name: &str, _value: &Value) {}
}

const HISTORY_CHUNK: &str = "history";
const HISTORY_GROUP: &str = "boards";
const APPROVALS_CHUNK: &str = "approvals";
const APPROVALS_GROUP: &str = "boards";

/// The central action-invocation orchestrator.
pub struct ActionRunner {
    pub store: Arc<StateStore>,
    pub contexts: Arc<ContextRegistry>,
    pub compiler: CardCompiler,
    pub sink: Arc<dyn EventSink>,
    pub boards: Arc<dyn BoardProvider>,
    pub kv: Arc<dyn KvStore>,
    pub reload_hint: Arc<dyn ReloadHint>,
    pub autopilot: Arc<dyn AutopilotNotifier>,
    pub link_timeout: Duration,
    pub history_retention_days_default: u32,
    executions: StdRwLock<std::collections::HashMap<String, ActionInvocation>>,
}

impl ActionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        contexts: Arc<ContextRegistry>,
        sink: Arc<dyn EventSink>,
        boards: Arc<dyn BoardProvider>,
        kv: Arc<dyn KvStore>,
        reload_hint: Arc<dyn ReloadHint>,
        autopilot: Arc<dyn AutopilotNotifier>,
        link_timeout: Duration,
        history_retention_days_default: u32,
    ) -> Self {
        Self {
            store,
            contexts,
            compiler: CardCompiler::new(),
            sink,
            boards,
            kv,
            reload_hint,
            autopilot,
            link_timeout,
            history_retention_days_default,
            executions: StdRwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Snapshot of currently in-flight executions (supplemented feature,
    /// SPEC_FULL.md §3 "execution registry introspection").
    pub fn executions_snapshot(&self) -> Vec<ActionInvocation> {
        self.executions_read().values().cloned().collect()
    }

    fn executions_read(&self) -> std::sync::RwLockReadGuard<'_, std::collections::HashMap<String, ActionInvocation>> {
        self.executions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn executions_write(&self) -> std::sync::RwLockWriteGuard<'_, std::collections::HashMap<String, ActionInvocation>> {
        self.executions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entry point: `runAction(boardId, nameOrAlias, rawParams)` (spec.md §4.5).
    pub async fn run_action(self: &Arc<Self>, board_id: &str, name_or_alias: &str, raw_params: Value) -> Result<RunOutcome> {
        self.run_action_with_stack(board_id, name_or_alias, raw_params, Vec::new()).await
    }

    async fn run_action_with_stack(
        self: &Arc<Self>,
        board_id: &str,
        name_or_alias: &str,
        raw_params: Value,
        inherited_stack: Vec<StackFrame>,
    ) -> Result<RunOutcome> {
        // --- Step 1: resolve card, expanding presets -------------------------------
        let board = self.boards.get_board(board_id).await?;
        let (base_name, preset_name) = split_aliased_name(name_or_alias);
        let card = board
            .card(base_name)
            .ok_or_else(|| RuntimeError::NotFound(format!("{board_id}/{base_name}")))?;
        let effective_card = match preset_name {
            Some(preset) => card
                .with_preset_applied(preset)
                .ok_or_else(|| RuntimeError::NotFound(format!("{board_id}/{name_or_alias}")))?,
            None => card.clone(),
        };
        if effective_card.rules_code.trim().is_empty() {
            return Err(RuntimeError::NoCode(format!("{board_id}/{base_name}")));
        }

        // --- Step 2: extract control-channel fields --------------------------------
        let stack_trace: Vec<StackFrame> = if inherited_stack.is_empty() {
            raw_params
                .get("_stackTrace")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default()
        } else {
            inherited_stack
        };
        let supplied_context_id = raw_params.get("_contextId").and_then(|v| v.as_str()).map(str::to_owned);
        let confirmed = raw_params.get("confirmed").and_then(|v| v.as_bool()).unwrap_or(false);

        // --- Step 3: context selection ----------------------------------------------
        let context_id = match supplied_context_id {
            Some(cid) => Some(cid),
            None => match ContextRegistry::resolve_state_mode(&effective_card, board.is_ephemeral_by_default()) {
                crate::state::context::ResolvedStateMode::Ephemeral => Some(self.contexts.create_context(board_id)),
                crate::state::context::ResolvedStateMode::NonEphemeral => None,
            },
        };

        // --- Step 4: recursion check --------------------------------------------------
        let current_frame = StackFrame {
            card_name: base_name.to_owned(),
            board_id: board_id.to_owned(),
            context_id: context_id.clone(),
        };
        if stack_trace.iter().any(|f| *f == current_frame) {
            self.report_error(
                board_id,
                base_name,
                context_id.as_deref(),
                &stack_trace,
                &raw_params,
                &RuntimeError::Recursion,
                None,
            );
            return Err(RuntimeError::Recursion);
        }

        // --- Step 5: push frame -------------------------------------------------------
        let mut pushed_stack = Vec::with_capacity(stack_trace.len() + 1);
        pushed_stack.push(current_frame.clone());
        pushed_stack.extend(stack_trace);

        // --- Step 6: approval gate ------------------------------------------------------
        if effective_card.request_approval && !confirmed {
            let approval_id = Uuid::new_v4().to_string();
            let snapshot = serde_json::json!({
                "boardOnlyStates": self.store.get_by_tag("states", "boards", board_id),
                "cardDefinition": &effective_card,
                "params": raw_params,
                "metadata": { "offeredAt": epoch_ms() },
            });
            self.store.set(
                Key::new(APPROVALS_CHUNK, APPROVALS_GROUP, board_id, &approval_id),
                snapshot,
                SetOptions::default(),
            );
            self.sink.publish(EventEnvelope {
                path: EventEnvelope::approval_path(board_id, base_name, &approval_id),
                from: "runner".into(),
                user: None,
                ephemeral: context_id.is_some().then_some(true),
                payload: serde_json::json!({
                    "status": "offered",
                    "stackTrace": pushed_stack,
                    "params": raw_params,
                    "contextId": context_id,
                    "approvalId": approval_id,
                }),
            });
            self.links(&effective_card, board_id, &pushed_stack, links::LinkPhase::Pre).await;
            self.links(&effective_card, board_id, &pushed_stack, links::LinkPhase::Post).await;
            return Ok(RunOutcome::Offered { approval_id });
        }

        // --- Step 7: parameter resolution -------------------------------------------
        let resolver = ParamResolver::new(&self.contexts);
        let resolved_params = resolver.resolve(board_id, &effective_card.config_params, &raw_params, context_id.as_deref());
        let resolved_params_value =
            Value::Object(resolved_params.into_iter().collect::<serde_json::Map<_, _>>());

        // --- Step 8: assign executionId, record, emit run ----------------------------
        let execution_id = Uuid::new_v4().to_string();
        let started_at = epoch_ms();
        let invocation = ActionInvocation {
            execution_id: execution_id.clone(),
            board_id: board_id.to_owned(),
            card_name: base_name.to_owned(),
            aliased_name: preset_name.map(str::to_owned),
            params: resolved_params_value.clone(),
            stack_trace: pushed_stack.clone(),
            context_id: context_id.clone(),
            started_at,
            status: ExecutionStatus::Running,
        };
        self.executions_write().insert(execution_id.clone(), invocation);
        self.sink.publish(EventEnvelope {
            path: EventEnvelope::path_for(board_id, base_name, "run"),
            from: "runner".into(),
            user: None,
            ephemeral: context_id.is_some().then_some(true),
            payload: serde_json::json!({
                "status": "running",
                "executionId": execution_id,
                "startedAt": started_at,
                "stackTrace": pushed_stack,
                "params": resolved_params_value,
                "contextId": context_id,
            }),
        });

        // --- Step 9: pre-links ---------------------------------------------------------
        self.links(&effective_card, board_id, &pushed_stack, links::LinkPhase::Pre).await;

        // --- Step 10: compile + invoke ----------------------------------------------
        let invoke_result = self
            .invoke_body(&effective_card, &board, board_id, context_id.as_deref(), &resolved_params_value, raw_params.clone(), &pushed_stack)
            .await;

        let mut value = match invoke_result {
            Ok(v) => v,
            Err(e) => {
                self.report_error(
                    board_id,
                    base_name,
                    context_id.as_deref(),
                    &pushed_stack,
                    &resolved_params_value,
                    &e,
                    Some(&execution_id),
                );
                self.executions_write().remove(&execution_id);
                return Err(e);
            }
        };

        if let Some(return_type) = &effective_card.return_type {
            value = coerce_return(&value, return_type);
            if value.is_null() && effective_card.enable_return_custom_fallback {
                if let Some(fallback) = &effective_card.fallback_value {
                    value = fallback.clone();
                }
            }
        }

        // --- Step 11: response extraction -------------------------------------------
        if let Some(key) = &effective_card.response_key {
            if let Some(extracted) = value.get(key) {
                value = extracted.clone();
            }
        }

        // --- Step 12: publish -----------------------------------------------------------
        self.publish_value(&effective_card, board_id, base_name, context_id.as_deref(), &value);

        // --- Step 13: emit done, clear execution ----------------------------------------
        self.sink.publish(EventEnvelope {
            path: EventEnvelope::path_for(board_id, base_name, "done"),
            from: "runner".into(),
            user: None,
            ephemeral: context_id.is_some().then_some(true),
            payload: serde_json::json!({
                "status": "done",
                "response": value,
                "executionId": execution_id,
                "stackTrace": pushed_stack,
                "params": resolved_params_value,
            }),
        });
        self.executions_write().remove(&execution_id);

        // --- Step 14: post-links ---------------------------------------------------------
        self.links(&effective_card, board_id, &pushed_stack, links::LinkPhase::Post).await;

        // --- Step 15: chain termination ---------------------------------------------------
        if effective_card.chain_terminator {
            if let Some(cid) = &context_id {
                self.contexts.cleanup_context(cid);
            }
        }

        Ok(RunOutcome::Value(value))
    }

    async fn invoke_body(
        self: &Arc<Self>,
        card: &Card,
        board: &Board,
        board_id: &str,
        context_id: Option<&str>,
        resolved_params: &Value,
        raw_params: Value,
        stack_trace: &[StackFrame],
    ) -> Result<Value> {
        let body = self.compiler.compile(&card.rules_code)?;
        let invoker: Arc<dyn Invoker> = Arc::new(RunnerInvoker {
            runner: Arc::clone(self),
            board_id: board_id.to_owned(),
            context_id: context_id.map(str::to_owned),
            stack_trace: stack_trace.to_vec(),
        });
        let env = CardEnv {
            board_name: board.name.clone(),
            name: card.name.clone(),
            states: self.store.get_state_tree(Some("states")),
            user_params: raw_params,
            params: resolved_params.clone(),
            token: None,
            context_id: context_id.map(str::to_owned),
            stack_trace: serde_json::to_value(stack_trace).unwrap_or(Value::Null),
            invoker: Some(invoker),
        };
        let compiler = self.compiler.clone();
        tokio::task::spawn_blocking(move || compiler.invoke(&body, &env))
            .await
            .map_err(|e| RuntimeError::BodyError(format!("join error: {e}")))?
    }

    fn publish_value(&self, card: &Card, board_id: &str, card_name: &str, context_id: Option<&str>, value: &Value) {
        if context_id.is_some() {
            self.contexts.set_card_state(board_id, card_name, value.clone(), context_id);
            return;
        }

        let current = self.store.get(&Key::new("states", "boards", board_id, card_name));
        let changed = match &current {
            Some(existing) => !serialized_eq(existing, value),
            None => true,
        };

        if changed || card.always_report_value {
            self.store.set(
                Key::new("states", "boards", board_id, card_name),
                value.clone(),
                SetOptions { emit_event: true },
            );
            self.autopilot.notify_state_update(board_id, card_name, value);
            if !card.suppress_reload {
                self.reload_hint.board_reload_hint(board_id);
            }
        }

        if changed && card.keep_history {
            self.append_history(card, board_id, card_name, value);
        }
        if changed && card.persist_value {
            let text = serde_json::to_string_pretty(value).unwrap_or_default();
            let _ = self.kv.write(board_id, card_name, &text);
        }
    }

    fn append_history(&self, card: &Card, board_id: &str, card_name: &str, value: &Value) {
        let timestamp = epoch_ms();
        let retention_days = card.history_retention_days.unwrap_or(self.history_retention_days_default);
        let entry = HistoryEntry {
            board_id: board_id.to_owned(),
            card_key: format!("{board_id}/{card_name}"),
            card_name: card_name.to_owned(),
            value: value.clone(),
            timestamp,
            retention_days,
        };
        let name = format!("{card_name}@{timestamp}");
        self.store.set(
            Key::new(HISTORY_CHUNK, HISTORY_GROUP, board_id, &name),
            serde_json::to_value(entry).unwrap_or(Value::Null),
            SetOptions::default(),
        );
    }

    /// Sweep history entries past their `retention_days` window, returning
    /// the count removed. Mirrors `ContextRegistry::sweep_expired`.
    pub fn sweep_history_expired(&self) -> usize {
        const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;
        let now = epoch_ms();
        let by_tag = self.store.get_by_group(HISTORY_CHUNK, HISTORY_GROUP);
        let mut swept = 0usize;
        for (board_id, entries) in by_tag {
            for (name, value) in entries {
                let timestamp = value.get("timestamp").and_then(|v| v.as_u64()).unwrap_or(0);
                let retention_days =
                    value.get("retention_days").and_then(|v| v.as_u64()).unwrap_or(u64::from(self.history_retention_days_default));
                let ttl_ms = retention_days.saturating_mul(MS_PER_DAY);
                if now.saturating_sub(timestamp) >= ttl_ms {
                    self.store.remove(&Key::new(HISTORY_CHUNK, HISTORY_GROUP, &board_id, &name));
                    swept += 1;
                }
            }
        }
        swept
    }

    /// Spawn the periodic history-retention sweeper. Runs until `shutdown`
    /// is cancelled.
    pub fn spawn_history_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = runner.sweep_history_expired();
                        if swept > 0 {
                            tracing::debug!(swept, "history retention sweep");
                        }
                    }
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn report_error(
        &self,
        board_id: &str,
        card_name: &str,
        context_id: Option<&str>,
        stack_trace: &[StackFrame],
        params: &Value,
        error: &RuntimeError,
        execution_id: Option<&str>,
    ) {
        let error_value = serde_json::json!({ "error": error.to_string() });
        self.contexts.set_card_state(board_id, card_name, error_value, context_id);
        self.sink.publish(EventEnvelope {
            path: EventEnvelope::path_for(board_id, card_name, error.event_path_suffix()),
            from: "runner".into(),
            user: None,
            ephemeral: context_id.is_some().then_some(true),
            payload: serde_json::json!({
                "status": "error",
                "executionId": execution_id,
                "stackTrace": stack_trace,
                "stackDepth": stack_trace.len(),
                "params": params,
                "message": error.to_string(),
                "code": error.error_tag(),
            }),
        });
    }

    async fn links(self: &Arc<Self>, card: &Card, board_id: &str, stack_trace: &[StackFrame], phase: links::LinkPhase) {
        links::run_links(self, card, board_id, stack_trace, phase, self.link_timeout).await
    }
}

fn coerce_return(value: &Value, declared_type: &str) -> Value {
    match declared_type {
        "string" => Value::String(match value {
            Value::String(s) => s.clone(),
            Value::Null => return Value::Null,
            other => other.to_string(),
        }),
        "number" => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse::<f64>().ok()))
            .map(|n| serde_json::json!(n))
            .unwrap_or(Value::Null),
        "boolean" => Value::Bool(
            matches!(value, Value::Bool(true)) || matches!(value, Value::String(s) if s == "true"),
        ),
        "json" | "array" => match value {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| {
                if declared_type == "array" { serde_json::json!([]) } else { serde_json::json!({}) }
            }),
            other => other.clone(),
        },
        _ => value.clone(),
    }
}

struct RunnerInvoker {
    runner: Arc<ActionRunner>,
    board_id: String,
    context_id: Option<String>,
    stack_trace: Vec<StackFrame>,
}

impl Invoker for RunnerInvoker {
    fn run(&self, request: ExecuteActionRequest) -> Result<Value> {
        let board_id = request.board.unwrap_or_else(|| self.board_id.clone());
        let mut params = match request.params {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_owned(), other);
                map
            }
        };
        if let Some(cid) = &self.context_id {
            params.insert("_contextId".to_owned(), Value::String(cid.clone()));
        }
        let runner = Arc::clone(&self.runner);
        let stack = self.stack_trace.clone();
        let name = request.name;

        // `invoke_body` runs inside `spawn_blocking`; this is exactly the
        // thread where it is safe to drive the async runner to completion
        // via `block_on` (design note §9, "Injected execute_action").
        tokio::runtime::Handle::current().block_on(async move {
            match runner.run_action_with_stack(&board_id, &name, Value::Object(params), stack).await {
                Ok(RunOutcome::Value(v)) => Ok(v),
                Ok(RunOutcome::Offered { approval_id }) => {
                    Ok(serde_json::json!({ "offered": true, "approvalId": approval_id }))
                }
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
