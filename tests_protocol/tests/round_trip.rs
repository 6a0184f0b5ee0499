//! Request/Reply Tests
//!
//! Validates that each call sends one request and decodes the single reply
//! that answers it.

use ipc::{Bindings, CommandTag, Message};
use lifecycle::CancellationToken;
use script_engine::{NegotiationService, ScriptError};
use serde_json::{json, Value};
use tests_protocol::{negotiate, test_bootstrap, ScriptedWorker};

/// Test: `return 2+2` evaluates to 4
#[test]
fn test_evaluate_returns_value() {
    let (service, _worker) = test_bootstrap();
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    assert_eq!(engine.evaluate("return 2+2").unwrap(), json!(4));
}

/// Test: execute succeeds and its side effects persist in the instance
#[test]
fn test_execute_then_evaluate() {
    let (service, _worker) = test_bootstrap();
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    engine.execute("base = 40").unwrap();
    assert_eq!(engine.evaluate("base + 2").unwrap(), json!(42));
}

/// Test: bindings are visible to the evaluated script
#[test]
fn test_evaluate_with_bindings() {
    let (service, _worker) = test_bootstrap();
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    let mut bindings = Bindings::new();
    bindings.insert("width".to_string(), json!(6));
    bindings.insert("height".to_string(), json!(7));
    let area = engine
        .evaluate_with_bindings("width * height", bindings, &CancellationToken::none())
        .unwrap();
    assert_eq!(area, json!(42));
}

/// Test: a script with no final value yields null
#[test]
fn test_evaluate_without_value() {
    let (service, _worker) = test_bootstrap();
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    assert_eq!(engine.evaluate("# only a comment").unwrap(), Value::Null);
}

/// Test: the worker's exception text is the error message
#[test]
fn test_worker_error_text() {
    let (service, _worker) = test_bootstrap();
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    let err = engine.evaluate("1 / 0").unwrap_err();
    assert!(matches!(err, ScriptError::Script(_)));
    assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");

    let err = engine.execute("raise RuntimeError: stop").unwrap_err();
    assert_eq!(err.to_string(), "RuntimeError: stop");

    // The engine stays usable after a script error
    assert_eq!(engine.evaluate("return 1").unwrap(), json!(1));
}

/// Test: exception payloads that are not one text value
#[test]
fn test_malformed_exception_payloads() {
    let service = NegotiationService::new();
    let _worker = ScriptedWorker::spawn(
        service.worker_channels(),
        vec![
            Message::Exception { details: vec![] },
            Message::Exception {
                details: vec![json!("first"), json!("second")],
            },
            Message::Exception {
                details: vec![json!(404)],
            },
            Message::exception("well formed"),
        ],
    );
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    for _ in 0..3 {
        let err = engine.evaluate("anything").unwrap_err();
        assert!(matches!(err, ScriptError::UnknownExceptionFormat));
        assert_eq!(err.to_string(), "Exception thrown but unknown format");
    }
    assert_eq!(
        engine.execute("anything").unwrap_err().to_string(),
        "well formed"
    );
}

/// Test: a reply that belongs on another channel is rejected
#[test]
fn test_unexpected_reply() {
    let service = NegotiationService::new();
    let worker = ScriptedWorker::spawn(
        service.worker_channels(),
        vec![Message::NewEngineResult, Message::Execution],
    );
    let mut engine = negotiate(&service).expect("Failed to negotiate");

    let err = engine.evaluate("x").unwrap_err();
    assert!(matches!(
        err,
        ScriptError::UnexpectedReply(CommandTag::NewEngineResult)
    ));

    // An EXECUTION reply to EVALUATE carries no value
    assert_eq!(engine.evaluate("x").unwrap(), Value::Null);
    assert_eq!(
        worker.requests(),
        vec![CommandTag::Evaluate, CommandTag::Evaluate]
    );
}
