// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolves effective parameter values for an action invocation
//! (spec.md §4.4).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::ConfigParamSpec;
use crate::state::context::ContextRegistry;

/// Resolves `configParams` against caller-supplied `params` and board
/// state, then coerces to each param's declared type.
pub struct ParamResolver<'a> {
    registry: &'a ContextRegistry,
}

impl<'a> ParamResolver<'a> {
    pub fn new(registry: &'a ContextRegistry) -> Self {
        Self { registry }
    }

    /// Resolve every declared param for `board_id`, given caller-supplied
    /// `raw_params` and an optional ephemeral context.
    pub fn resolve(
        &self,
        board_id: &str,
        config_params: &BTreeMap<String, ConfigParamSpec>,
        raw_params: &Value,
        context_id: Option<&str>,
    ) -> BTreeMap<String, Value> {
        let mut resolved = BTreeMap::new();
        for (name, spec) in config_params {
            let chosen = raw_params
                .get(name)
                .cloned()
                .or_else(|| spec.default_value.clone())
                .unwrap_or(Value::Null);

            let dereferenced = self.deref_if_state_ref(board_id, &chosen, context_id);
            let coerced = coerce(&dereferenced, spec.param_type.as_deref(), self, board_id, context_id);
            resolved.insert(name.clone(), coerced);
        }
        resolved
    }

    /// If `value` is a string naming a board state reference
    /// (`board.<name>`, `board?.<name>`, `board[<name>]`, `board?.[<name>]`),
    /// dereference it against board state (with context shadowing).
    /// Otherwise return `value` unchanged.
    fn deref_if_state_ref(&self, board_id: &str, value: &Value, context_id: Option<&str>) -> Value {
        match value.as_str().and_then(parse_state_ref) {
            Some(card_name) => self
                .registry
                .get_card_state(board_id, card_name, context_id)
                .unwrap_or(Value::Null),
            None => value.clone(),
        }
    }
}

/// Parse `board.<name>`, `board?.<name>`, `board[<name>]`, or
/// `board?.[<name>]` into the referenced card name.
fn parse_state_ref(s: &str) -> Option<&str> {
    let rest = s.strip_prefix("board")?;
    let rest = rest.strip_prefix('?').unwrap_or(rest);
    if let Some(name) = rest.strip_prefix('.') {
        if name.starts_with('[') {
            return name.strip_prefix('[')?.strip_suffix(']').map(unquote);
        }
        return Some(name);
    }
    if let Some(name) = rest.strip_prefix('[') {
        return name.strip_suffix(']').map(unquote);
    }
    None
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"')
}

/// Coerce `value` to `declared_type` per the table in spec.md §4.4.
fn coerce(
    value: &Value,
    declared_type: Option<&str>,
    resolver: &ParamResolver<'_>,
    board_id: &str,
    context_id: Option<&str>,
) -> Value {
    match declared_type {
        Some("string") => Value::String(value_to_string(value)),
        Some("number") => value_to_number(value).map(|n| serde_json::json!(n)).unwrap_or(Value::Null),
        Some("boolean") => {
            Value::Bool(matches!(value, Value::Bool(true)) || matches!(value, Value::String(s) if s == "true"))
        }
        Some("json") | Some("array") => match value {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| {
                if declared_type == Some("array") { serde_json::json!([]) } else { serde_json::json!({}) }
            }),
            other => other.clone(),
        },
        Some("card") | Some("text") => value.clone(),
        Some("state") => {
            let dereferenced = value
                .as_str()
                .and_then(parse_state_ref)
                .map(|name| resolver.registry.get_card_state(board_id, name, context_id).unwrap_or(Value::Null))
                .unwrap_or_else(|| value.clone());
            Value::String(serde_json::to_string(&dereferenced).unwrap_or_default())
        }
        _ => value.clone(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "params_tests.rs"]
mod tests;
