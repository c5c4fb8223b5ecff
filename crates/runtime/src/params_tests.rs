// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::state::store::StateStore;

fn registry() -> ContextRegistry {
    ContextRegistry::new(Arc::new(StateStore::new()), Duration::from_secs(3600))
}

fn spec(param_type: &str, default: Value) -> ConfigParamSpec {
    ConfigParamSpec { param_type: Some(param_type.to_owned()), default_value: Some(default), visible: None }
}

#[test]
fn caller_supplied_value_wins_over_default() {
    let reg = registry();
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("t".to_owned(), spec("number", json!(20)));

    let resolved = resolver.resolve("b", &config, &json!({"t": 99}), None);
    assert_eq!(resolved["t"], json!(99.0));
}

#[test]
fn default_value_used_when_caller_omits_param() {
    let reg = registry();
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("t".to_owned(), spec("number", json!(20)));

    let resolved = resolver.resolve("b", &config, &json!({}), None);
    assert_eq!(resolved["t"], json!(20.0));
}

#[test]
fn state_reference_default_dereferences_against_board_state() {
    let reg = registry();
    reg.set_card_state("sensors", "temperature", json!(31), None);
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("t".to_owned(), spec("number", json!("board.temperature")));

    let resolved = resolver.resolve("sensors", &config, &json!({}), None);
    assert_eq!(resolved["t"], json!(31.0));
}

#[test]
fn state_reference_honors_context_shadowing() {
    let reg = registry();
    reg.set_card_state("sensors", "temperature", json!(31), None);
    let cid = reg.create_context("sensors");
    reg.set_card_state("sensors", "temperature", json!(99), Some(&cid));

    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("t".to_owned(), spec("number", json!("board.temperature")));

    let resolved = resolver.resolve("sensors", &config, &json!({}), Some(&cid));
    assert_eq!(resolved["t"], json!(99.0));
}

#[test]
fn undereferencable_state_reference_becomes_null() {
    let reg = registry();
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("t".to_owned(), spec("number", json!("board.missing")));

    let resolved = resolver.resolve("sensors", &config, &json!({}), None);
    assert_eq!(resolved["t"], Value::Null);
}

#[test]
fn bracket_state_reference_syntax_is_recognized() {
    assert_eq!(parse_state_ref("board[temperature]"), Some("temperature"));
    assert_eq!(parse_state_ref("board?.[temperature]"), Some("temperature"));
    assert_eq!(parse_state_ref("board?.temperature"), Some("temperature"));
    assert_eq!(parse_state_ref("not_board"), None);
}

#[test]
fn boolean_coercion_accepts_bool_true_or_string_true() {
    let reg = registry();
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("a".to_owned(), spec("boolean", json!(true)));
    config.insert("b".to_owned(), spec("boolean", json!("false")));

    let resolved = resolver.resolve("b", &config, &json!({"a": "true", "b": false}), None);
    assert_eq!(resolved["a"], json!(true));
    assert_eq!(resolved["b"], json!(false));
}

#[test]
fn json_coercion_fails_safe_to_empty_object() {
    let reg = registry();
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("j".to_owned(), spec("json", json!("not json")));

    let resolved = resolver.resolve("b", &config, &json!({}), None);
    assert_eq!(resolved["j"], json!({}));
}

#[test]
fn array_coercion_fails_safe_to_empty_array() {
    let reg = registry();
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("arr".to_owned(), spec("array", json!("not json")));

    let resolved = resolver.resolve("b", &config, &json!({}), None);
    assert_eq!(resolved["arr"], json!([]));
}

#[test]
fn state_type_stringifies_the_dereferenced_value() {
    let reg = registry();
    reg.set_card_state("sensors", "temperature", json!(31), None);
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("t".to_owned(), spec("state", json!("board.temperature")));

    let resolved = resolver.resolve("sensors", &config, &json!({}), None);
    assert_eq!(resolved["t"], json!("31"));
}

#[test]
fn no_declared_type_passes_value_through() {
    let reg = registry();
    let resolver = ParamResolver::new(&reg);
    let mut config = BTreeMap::new();
    config.insert("raw".to_owned(), ConfigParamSpec { param_type: None, default_value: Some(json!({"x": 1})), visible: None });

    let resolved = resolver.resolve("b", &config, &json!({}), None);
    assert_eq!(resolved["raw"], json!({"x": 1}));
}

mod coercion_properties {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        /// Coercing a finite float to `"number"` never changes its value
        /// (spec.md §4.4's number coercion is lossless for already-numeric input).
        #[test]
        fn number_coercion_is_lossless_for_finite_floats(n in any::<f64>().prop_filter("finite", |n| n.is_finite())) {
            let reg = registry();
            let resolver = ParamResolver::new(&reg);
            let mut config = BTreeMap::new();
            config.insert("n".to_owned(), spec("number", json!(0)));

            let resolved = resolver.resolve("b", &config, &json!({"n": n}), None);
            prop_assert_eq!(resolved["n"].as_f64(), Some(n));
        }

        /// `"string"` coercion of any JSON string returns that string verbatim.
        #[test]
        fn string_coercion_is_identity_for_string_input(s in ".*") {
            let reg = registry();
            let resolver = ParamResolver::new(&reg);
            let mut config = BTreeMap::new();
            config.insert("s".to_owned(), spec("string", json!("")));

            let resolved = resolver.resolve("b", &config, &json!({"s": s.clone()}), None);
            prop_assert_eq!(resolved["s"].as_str(), Some(s.as_str()));
        }
    }
}
