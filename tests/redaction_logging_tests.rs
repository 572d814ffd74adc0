//! Redaction and correlation guarantees across the logging pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use mystic::config::Environment;
use mystic::hijacker::hijack;
use mystic::logger::{log_calls_and_returns, CallLogger, EventKind, LogFormat};
use mystic::strategies::{CallArgs, NativeCall};
use mystic::{FunctionIdentity, Redactor};

#[test]
fn login_call_redacts_password_but_not_username() {
    let logger = Arc::new(CallLogger::new(LogFormat::Structured, true));
    let login: NativeCall = Arc::new(|_: &CallArgs| Ok(json!({"session": "s-1"})));
    let wrapped = log_calls_and_returns(
        logger.clone(),
        FunctionIdentity::new("auth", "login"),
        login,
    );

    wrapped(&CallArgs::positional(vec![
        json!("alice"),
        json!("password=hunter2"),
    ]))
    .unwrap();

    let events = logger.recent(10);
    assert_eq!(events.len(), 2);
    let call = &events[0];
    let ret = &events[1];

    let args = call.args.as_ref().unwrap();
    assert_eq!(args[0], json!("alice"), "username survives verbatim");
    assert_eq!(args[1], json!("password=****"), "password masked");

    assert_eq!(call.kind, EventKind::Call);
    assert_eq!(ret.kind, EventKind::Return);
    assert_eq!(
        call.correlation_id, ret.correlation_id,
        "call and return share one correlation id"
    );
}

#[test]
fn wrapper_events_carry_one_correlation_id_per_invocation() {
    mystic::correlation::clear();
    let logger = Arc::new(CallLogger::new(LogFormat::Structured, true));
    let wrapper = hijack(
        FunctionIdentity::new("auth", "refresh"),
        Arc::new(|_: &CallArgs| Ok(json!(true))),
    )
    .environment(Environment::Development)
    .logger(logger.clone())
    .build();

    wrapper.call(CallArgs::empty()).unwrap();
    wrapper.call(CallArgs::empty()).unwrap();

    let events = logger.recent(10);
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].correlation_id, events[1].correlation_id);
    assert_eq!(events[2].correlation_id, events[3].correlation_id);
    assert_ne!(
        events[0].correlation_id, events[2].correlation_id,
        "separate invocations get separate ids"
    );
    mystic::correlation::clear();
}

#[test]
fn redaction_is_identity_on_clean_values() {
    let redactor = Redactor::new();
    let clean = json!({
        "user": "alice",
        "amounts": [1, 2, 3],
        "note": "nothing secret here",
    });
    assert_eq!(redactor.redact_value(&clean), clean);
}

#[test]
fn redaction_is_idempotent_on_nested_values() {
    let redactor = Redactor::new();
    let value = json!({
        "creds": "password=hunter2 token=abc",
        "card": "4111 1111 1111 1111",
        "nested": [{"ssn": "123-45-6789"}],
    });
    let once = redactor.redact_value(&value);
    let twice = redactor.redact_value(&once);
    assert_eq!(once, twice);
    assert_eq!(once["creds"], json!("password=**** token=****"));
}

#[test]
fn kwargs_are_redacted_too() {
    let logger = CallLogger::new(LogFormat::Structured, true);
    let mut kwargs = BTreeMap::new();
    kwargs.insert("api".to_string(), json!("api_key=super-secret"));
    logger.log_call(
        &FunctionIdentity::new("billing", "charge"),
        &[],
        &kwargs,
        None,
    );
    let event = &logger.recent(1)[0];
    assert_eq!(event.kwargs.as_ref().unwrap()["api"], json!("api_key=****"));
}

#[test]
fn error_events_are_mutually_exclusive_with_results() {
    let logger = Arc::new(CallLogger::new(LogFormat::Structured, true));
    let failing: NativeCall = Arc::new(|_: &CallArgs| {
        Err(mystic::CallError::new("TimeoutError", "upstream slow"))
    });
    let wrapped = log_calls_and_returns(
        logger.clone(),
        FunctionIdentity::new("net", "fetch"),
        failing,
    );

    assert!(wrapped(&CallArgs::empty()).is_err());
    let events = logger.recent(10);
    let error_event = &events[1];
    assert_eq!(error_event.kind, EventKind::Error);
    assert!(error_event.result.is_none());
    assert_eq!(error_event.error.as_ref().unwrap().kind, "TimeoutError");
}

#[test]
fn late_subscriber_reads_history_from_ring() {
    let logger = CallLogger::new(LogFormat::Structured, false);
    for i in 0..5 {
        logger.log_call(
            &FunctionIdentity::new("m", "f"),
            &[json!(i)],
            &BTreeMap::new(),
            None,
        );
    }
    // A subscriber arriving now can backfill from recent history.
    let history = logger.recent(3);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].args.as_ref().unwrap()[0], json!(2));
    assert_eq!(history[2].args.as_ref().unwrap()[0], json!(4));
}
