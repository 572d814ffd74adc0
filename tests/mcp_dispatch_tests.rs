//! Full control-plane flow through the JSON-RPC surface: discover, hijack,
//! call, observe metrics and logs, unhijack.

use std::sync::Arc;

use serde_json::{json, Value};

use mystic::config::Environment;
use mystic::mcp::{JsonRpcRequest, McpServer, APP_ERROR};
use mystic::strategies::{CallArgs, NativeCall};
use mystic::FunctionIdentity;

fn request(method: &str, params: Value, id: u64) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: json!(id),
    }
}

fn demo_server() -> (McpServer, FunctionIdentity, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("orders.rs"),
        r#"
/// Total an order.
///
/// Args:
///     subtotal: pre-tax amount in cents
///     tax_rate: optional fractional rate
pub fn total(subtotal: u64, tax_rate: Option<f64>) -> u64 {
    let rate = tax_rate.unwrap_or(0.0);
    subtotal + (subtotal as f64 * rate) as u64
}
"#,
    )
    .unwrap();

    let server = McpServer::quiet(
        Environment::Development,
        tmp.path().to_path_buf(),
        tmp.path().join("cache"),
    );
    std::fs::create_dir_all(tmp.path().join("cache")).unwrap();

    let identity = FunctionIdentity::new("orders", "total");
    let callable: NativeCall = Arc::new(|args: &CallArgs| {
        let subtotal = args.args[0].as_u64().unwrap_or(0);
        let rate = args.args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
        Ok(json!(subtotal + (subtotal as f64 * rate) as u64))
    });
    server.register_function_with(
        identity.clone(),
        callable,
        Some(tmp.path().join("orders.rs")),
        None,
        None,
    );
    (server, identity, tmp)
}

#[test]
fn discover_inspect_hijack_call_metrics_unhijack() {
    let (server, identity, _tmp) = demo_server();

    // Discover sees the function with its doc summary.
    let discovered = server
        .dispatch(request("discover_functions", json!({}), 1))
        .result
        .unwrap();
    assert_eq!(discovered["count"], 1);
    assert_eq!(discovered["functions"][0]["docstring"], "Total an order.");

    // Inspect produces a schema keyed off the real signature.
    let inspected = server
        .dispatch(request(
            "inspect_function",
            json!({"full_name": identity.full_name()}),
            2,
        ))
        .result
        .unwrap();
    assert_eq!(inspected["schema"]["required"], json!(["subtotal"]));
    assert_eq!(
        inspected["schema"]["properties"]["tax_rate"],
        json!({"anyOf": [{"type": "number"}, {"type": "null"}]})
    );
    assert_eq!(inspected["doc"]["params"][0][0], "subtotal");

    // Hijack with a cache, drive two identical calls.
    let hijacked = server
        .dispatch(request(
            "hijack_function",
            json!({
                "full_name": identity.full_name(),
                "strategy": "cache",
                "options": {"ttl": "1h"},
            }),
            3,
        ))
        .result
        .unwrap();
    assert_eq!(hijacked["ok"], true);

    let out = server
        .call_function(&identity.full_name(), CallArgs::positional(vec![json!(100)]))
        .unwrap();
    assert_eq!(out, json!(100));
    server
        .call_function(&identity.full_name(), CallArgs::positional(vec![json!(100)]))
        .unwrap();

    // Metrics saw both wrapper calls.
    let metrics = server
        .dispatch(request(
            "get_function_metrics",
            json!({"full_name": identity.full_name()}),
            4,
        ))
        .result
        .unwrap();
    assert_eq!(metrics["call_count"], 2);

    // Logs carry call/return pairs for the invocations.
    let logs = server
        .dispatch(request(
            "logs_query",
            json!({"identity": identity.full_name(), "limit": 50}),
            5,
        ))
        .result
        .unwrap();
    assert!(logs["count"].as_u64().unwrap() >= 4);

    // Unhijack restores pass-through calls.
    let unhijacked = server
        .dispatch(request(
            "unhijack_function",
            json!({"full_name": identity.full_name()}),
            6,
        ))
        .result
        .unwrap();
    assert_eq!(unhijacked["ok"], true);
    assert_eq!(server.registry().len(), 0);
}

#[test]
fn list_hijacked_tracks_registry_contents() {
    let (server, identity, _tmp) = demo_server();

    let empty = server
        .dispatch(request("list_hijacked", json!({}), 1))
        .result
        .unwrap();
    assert_eq!(empty["count"], 0);

    server.dispatch(request(
        "hijack_function",
        json!({"full_name": identity.full_name(), "strategy": "analyze", "options": {}}),
        2,
    ));
    let listed = server
        .dispatch(request("list_hijacked", json!({}), 3))
        .result
        .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["hijacked"][0]["function"], identity.full_name());
}

#[test]
fn dispatch_line_round_trip() {
    let (server, _identity, _tmp) = demo_server();
    let raw = server.dispatch_line(r#"{"jsonrpc":"2.0","method":"mystic_status","params":{},"id":9}"#);
    let parsed: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["id"], 9);
    assert_eq!(parsed["result"]["status"], "healthy");
}

#[test]
fn error_detail_for_missing_function_is_human_readable() {
    let (server, _identity, _tmp) = demo_server();
    let response = server.dispatch(request(
        "inspect_function",
        json!({"full_name": "ghost::missing"}),
        1,
    ));
    let error = response.error.unwrap();
    assert_eq!(error.code, APP_ERROR);
    assert!(error.message.contains("ghost::missing"));
}

#[test]
fn state_timeline_reflects_captures() {
    let (server, _identity, _tmp) = demo_server();
    server.state().capture(
        mystic::SnapshotKind::FnArgs,
        json!([100]),
        Some("orders::total"),
        None,
        None,
    );
    let timeline = server
        .dispatch(request("state_timeline", json!({}), 1))
        .result
        .unwrap();
    assert_eq!(timeline["count"], 1);
    assert_eq!(timeline["by_kind"]["fn_args"], 1);
}
