// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

fn env() -> CardEnv {
    CardEnv {
        board_name: "sensors".into(),
        name: "tick".into(),
        states: json!({}),
        user_params: json!({}),
        params: json!({}),
        token: None,
        context_id: None,
        stack_trace: json!([]),
        invoker: None,
    }
}

#[test]
fn empty_source_compiles_to_constant_null() {
    let compiler = CardCompiler::new();
    let body = compiler.compile("").expect("compiles");
    assert!(matches!(body, CardBody::Constant(Value::Null)));
    assert_eq!(compiler.invoke(&body, &env()).unwrap(), Value::Null);
}

#[test]
fn whitespace_only_source_is_also_constant() {
    let compiler = CardCompiler::new();
    let body = compiler.compile("   \n  ").expect("compiles");
    assert!(matches!(body, CardBody::Constant(_)));
}

#[test]
fn template_source_returns_itself() {
    let compiler = CardCompiler::new();
    let body = compiler.compile("<div>hello</div>").expect("compiles");
    let result = compiler.invoke(&body, &env()).unwrap();
    assert_eq!(result, json!("<div>hello</div>"));
}

#[test]
fn script_source_evaluates_last_expression() {
    let compiler = CardCompiler::new();
    let body = compiler.compile("return 42;").expect("compiles");
    let result = compiler.invoke(&body, &env()).unwrap();
    assert_eq!(result, json!(42));
}

#[test]
fn script_can_read_injected_params() {
    let compiler = CardCompiler::new();
    let body = compiler.compile("params.t > 30").expect("compiles");
    let mut e = env();
    e.params = json!({"t": 31});
    assert_eq!(compiler.invoke(&body, &e).unwrap(), json!(true));

    let mut e2 = env();
    e2.params = json!({"t": 20});
    assert_eq!(compiler.invoke(&body, &e2).unwrap(), json!(false));
}

#[test]
fn invalid_script_returns_compile_error() {
    let compiler = CardCompiler::new();
    let result = compiler.compile("this is not { valid rhai (((");
    assert!(matches!(result, Err(RuntimeError::CompileError(_))));
}

#[test]
fn runtime_throw_returns_body_error() {
    let compiler = CardCompiler::new();
    let body = compiler.compile("throw \"boom\";").expect("compiles");
    let result = compiler.invoke(&body, &env());
    assert!(matches!(result, Err(RuntimeError::BodyError(_))));
}

struct RecordingInvoker {
    seen: std::sync::Mutex<Vec<ExecuteActionRequest>>,
}

impl Invoker for RecordingInvoker {
    fn run(&self, request: ExecuteActionRequest) -> Result<Value> {
        self.seen.lock().unwrap().push(request);
        Ok(json!("invoked"))
    }
}

#[test]
fn execute_action_delegates_to_the_invoker_capability() {
    let compiler = CardCompiler::new();
    let body = compiler.compile("execute_action(#{name: \"other\"})").expect("compiles");
    let invoker = Arc::new(RecordingInvoker { seen: std::sync::Mutex::new(vec![]) });
    let mut e = env();
    e.invoker = Some(invoker.clone());

    let result = compiler.invoke(&body, &e).unwrap();
    assert_eq!(result, json!("invoked"));
    assert_eq!(invoker.seen.lock().unwrap().len(), 1);
    assert_eq!(invoker.seen.lock().unwrap()[0].name, "other");
}
