// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turns a card's `rulesCode` source into a callable [`CardBody`]
//! (spec.md §4.3, design note §9 "Compiled card body semantics").
//!
//! The source is compiled once and cached; the sum-type split
//! (`Constant`/`Template`/`Script`) means the rest of the runtime never has
//! to inspect card source again. `Script` wraps a `rhai::AST`, the same way
//! policy-scripting platforms in the wider ecosystem (e.g. the `rhai`-based
//! routing policies in mail/edge-routing systems) embed user logic behind a
//! single opaque handle.

use std::sync::Arc;

use rhai::{Engine, Scope, AST};
use serde_json::Value;

use crate::error::{Result, RuntimeError};

/// A request made by a card body through the injected `execute_action`
/// preamble (spec.md §4.3, design note §9).
#[derive(Debug, Clone)]
pub struct ExecuteActionRequest {
    pub name: String,
    pub board: Option<String>,
    pub params: Value,
}

/// Capability bound at invocation time, holding `(boardId, contextId,
/// stackTrace)` and able to delegate a nested call back to the
/// [`crate::runner::ActionRunner`]. Deliberately synchronous: the engine
/// call site is always run inside a blocking task (see
/// `ActionRunner::invoke_body`), so the implementation is free to block on
/// the async runner underneath via `tokio::runtime::Handle::block_on`.
pub trait Invoker: Send + Sync {
    fn run(&self, request: ExecuteActionRequest) -> Result<Value>;
}

/// The compiled form of a card's `rulesCode`.
#[derive(Clone)]
pub enum CardBody {
    /// Empty source compiles to a constant-undefined (here, `Value::Null`) callable.
    Constant(Value),
    /// Source beginning with `<` is a literal template; the card returns the
    /// source text unchanged.
    Template(String),
    /// Otherwise, source is compiled as an expression/statement block.
    Script(Arc<AST>),
}

/// The fixed set of identifiers injected into a card body's environment
/// (spec.md §4.3). `Invoker` corresponds to the bound `execute_action`
/// preamble (design note §9).
#[derive(Clone)]
pub struct CardEnv {
    pub board_name: String,
    pub name: String,
    pub states: Value,
    pub user_params: Value,
    pub params: Value,
    pub token: Option<String>,
    pub context_id: Option<String>,
    pub stack_trace: Value,
    pub invoker: Option<Arc<dyn Invoker>>,
}

/// Compiles `rulesCode` into a [`CardBody`], per the three rules of
/// spec.md §4.3. Cheap to clone: `rhai::Engine` is internally reference
/// counted, so handing a clone to a blocking task costs no real copy.
#[derive(Clone)]
pub struct CardCompiler {
    engine: Engine,
}

impl Default for CardCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl CardCompiler {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        Self { engine }
    }

    /// Compile `rules_code` per spec.md §4.3 rules 1-3.
    pub fn compile(&self, rules_code: &str) -> Result<CardBody> {
        if rules_code.trim().is_empty() {
            return Ok(CardBody::Constant(Value::Null));
        }
        if rules_code.starts_with('<') {
            return Ok(CardBody::Template(rules_code.to_owned()));
        }
        let ast = self
            .engine
            .compile(rules_code)
            .map_err(|e| RuntimeError::CompileError(e.to_string()))?;
        Ok(CardBody::Script(Arc::new(ast)))
    }

    /// Invoke a compiled body with the given environment, returning the
    /// card's produced value.
    pub fn invoke(&self, body: &CardBody, env: &CardEnv) -> Result<Value> {
        match body {
            CardBody::Constant(v) => Ok(v.clone()),
            CardBody::Template(text) => Ok(Value::String(text.clone())),
            CardBody::Script(ast) => self.invoke_script(ast, env),
        }
    }

    fn invoke_script(&self, ast: &AST, env: &CardEnv) -> Result<Value> {
        let mut scope = Scope::new();
        scope.push_constant("boardName", env.board_name.clone());
        scope.push_constant("name", env.name.clone());
        scope.push_constant("states", rhai::serde::to_dynamic(&env.states).unwrap_or(rhai::Dynamic::UNIT));
        scope.push_constant("userParams", rhai::serde::to_dynamic(&env.user_params).unwrap_or(rhai::Dynamic::UNIT));
        scope.push_constant("params", rhai::serde::to_dynamic(&env.params).unwrap_or(rhai::Dynamic::UNIT));
        scope.push_constant("token", env.token.clone().unwrap_or_default());
        scope.push_constant("_contextId", env.context_id.clone().unwrap_or_default());
        scope.push_constant("stackTrace", rhai::serde::to_dynamic(&env.stack_trace).unwrap_or(rhai::Dynamic::UNIT));

        // `execute_action` is bound fresh per call so it closes over this
        // invocation's invoker capability without needing the shared engine
        // to carry per-call state (design note §9).
        let mut engine = self.engine.clone();
        if let Some(invoker) = env.invoker.clone() {
            engine.register_fn(
                "execute_action",
                move |call: rhai::Map| -> std::result::Result<rhai::Dynamic, Box<rhai::EvalAltResult>> {
                    let name = call
                        .get("name")
                        .and_then(|v| v.clone().into_string().ok())
                        .unwrap_or_default();
                    let board = call
                        .get("board")
                        .and_then(|v| v.clone().into_string().ok());
                    let params = call
                        .get("params")
                        .and_then(|v| rhai::serde::from_dynamic::<Value>(v).ok())
                        .unwrap_or(Value::Null);
                    let request = ExecuteActionRequest { name, board, params };
                    let result = invoker
                        .run(request)
                        .map_err(|e| e.to_string())?;
                    rhai::serde::to_dynamic(&result).map_err(|e| e.to_string().into())
                },
            );
        }

        let result: rhai::Dynamic = engine
            .eval_ast_with_scope(&mut scope, ast)
            .map_err(|e| RuntimeError::BodyError(e.to_string()))?;

        rhai::serde::from_dynamic(&result).map_err(|e| RuntimeError::BodyError(e.to_string()))
    }
}

#[cfg(test)]
#[path = "compiler_tests.rs"]
mod tests;
