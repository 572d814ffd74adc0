//! MCP tool surface
//!
//! JSON-RPC 2.0 request/response shapes plus a transport-agnostic
//! dispatcher. The external transport (stdio loop, HTTP, SSE) owns framing
//! and delivery; this module owns tool routing, parameter validation, and
//! error mapping. A failed import or unknown function yields a `-32000`
//! application error with human-readable detail.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{Environment, MysticConfig};
use crate::error::MysticError;
use crate::hijacker::{hijack, HijackRegistry};
use crate::identity::FunctionIdentity;
use crate::inspector::{self, Inspector};
use crate::logger::{CallLogger, LogFormat};
use crate::state_manager::{SnapshotFilter, SnapshotKind, StateManager};
use crate::strategies::{
    parse_ttl, AnalysisStrategy, BlockStrategy, CacheStrategy, MockData, MockStrategy,
    NativeCall, RedirectStrategy, Strategy,
};
use crate::tracker::PerformanceTracker;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const APP_ERROR: i64 = -32000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, detail)
    }
}

impl From<MysticError> for JsonRpcError {
    fn from(err: MysticError) -> Self {
        JsonRpcError::new(APP_ERROR, err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

struct CatalogEntry {
    callable: NativeCall,
    source_file: Option<PathBuf>,
    doc: Option<String>,
    signature: Option<String>,
}

/// The tool server: owns the five core subsystems and routes JSON-RPC
/// methods onto them.
pub struct McpServer {
    environment: Environment,
    source_root: PathBuf,
    cache_dir: PathBuf,
    registry: Arc<HijackRegistry>,
    inspector: Arc<Inspector>,
    logger: Arc<CallLogger>,
    tracker: Arc<PerformanceTracker>,
    state: Arc<StateManager>,
    catalog: Mutex<HashMap<FunctionIdentity, CatalogEntry>>,
}

impl McpServer {
    pub fn new(config: &MysticConfig) -> Self {
        let logger = CallLogger::new(config.log_format, config.filter_sensitive)
            .with_file_sink(config.log_dir.join("mystic.log"));
        Self {
            environment: config.environment,
            source_root: config.project_root.clone(),
            cache_dir: config.cache_dir.clone(),
            registry: Arc::new(HijackRegistry::new()),
            inspector: Arc::new(Inspector::new()),
            logger: Arc::new(logger),
            tracker: Arc::new(PerformanceTracker::new(
                config.profile_mode == crate::config::ProfileMode::Memory,
            )),
            state: Arc::new(StateManager::new(config.max_snapshots)),
            catalog: Mutex::new(HashMap::new()),
        }
    }

    /// Quiet server over explicit components, for embedding and tests.
    pub fn with_components(
        environment: Environment,
        source_root: PathBuf,
        cache_dir: PathBuf,
        registry: Arc<HijackRegistry>,
        logger: Arc<CallLogger>,
        tracker: Arc<PerformanceTracker>,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            environment,
            source_root,
            cache_dir,
            registry,
            inspector: Arc::new(Inspector::new()),
            logger,
            tracker,
            state,
            catalog: Mutex::new(HashMap::new()),
        }
    }

    pub fn quiet(environment: Environment, source_root: PathBuf, cache_dir: PathBuf) -> Self {
        Self::with_components(
            environment,
            source_root,
            cache_dir,
            Arc::new(HijackRegistry::new()),
            Arc::new(CallLogger::new(LogFormat::Structured, true)),
            Arc::new(PerformanceTracker::default()),
            Arc::new(StateManager::default()),
        )
    }

    pub fn registry(&self) -> &Arc<HijackRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn logger(&self) -> &Arc<CallLogger> {
        &self.logger
    }

    /// Register a callable so `hijack_function` and `redirect` targets can
    /// resolve it by full name.
    pub fn register_function(&self, identity: FunctionIdentity, callable: NativeCall) {
        self.register_function_with(identity, callable, None, None, None);
    }

    pub fn register_function_with(
        &self,
        identity: FunctionIdentity,
        callable: NativeCall,
        source_file: Option<PathBuf>,
        doc: Option<String>,
        signature: Option<String>,
    ) {
        if let Ok(mut catalog) = self.catalog.lock() {
            catalog.insert(
                identity,
                CatalogEntry {
                    callable,
                    source_file,
                    doc,
                    signature,
                },
            );
        }
    }

    /// Invoke a registered (possibly hijacked) function by full name.
    pub fn call_function(
        &self,
        full_name: &str,
        args: crate::strategies::CallArgs,
    ) -> Result<Value, MysticError> {
        let identity = FunctionIdentity::parse(full_name);
        if let Some(wrapper) = self.registry.get(&identity) {
            return wrapper.call(args);
        }
        let callable = self
            .catalog_entry(&identity, |entry| entry.callable.clone())
            .ok_or_else(|| MysticError::NotFound(full_name.to_string()))?;
        callable(&args).map_err(MysticError::from_call)
    }

    fn catalog_entry<R>(
        &self,
        identity: &FunctionIdentity,
        f: impl FnOnce(&CatalogEntry) -> R,
    ) -> Option<R> {
        let catalog = self.catalog.lock().ok()?;
        catalog.get(identity).map(|entry| f(entry))
    }

    /// Parse one JSON-RPC line and produce the serialized response.
    pub fn dispatch_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.dispatch(request),
            Err(e) => JsonRpcResponse::err(
                Value::Null,
                JsonRpcError::new(PARSE_ERROR, format!("parse error: {e}")),
            ),
        };
        serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"serialization failure"},"id":null}"#.to_string())
    }

    /// Route one request. Always produces a response object.
    pub fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::err(
                request.id,
                JsonRpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
            );
        }
        self.logger
            .log_mcp_request(&request.method, &request.params, &request.id);

        let outcome = match request.method.as_str() {
            "tools/list" => Ok(self.tools_list()),
            "discover_functions" => self.discover_functions(&request.params),
            "inspect_function" => self.inspect_function(&request.params),
            "hijack_function" => self.hijack_function(&request.params),
            "unhijack_function" => self.unhijack_function(&request.params),
            "list_hijacked" => Ok(self.list_hijacked()),
            "get_function_metrics" => self.get_function_metrics(&request.params),
            "state_snapshots" => self.state_snapshots(&request.params),
            "state_timeline" => Ok(self.state.timeline_summary()),
            "logs_query" => self.logs_query(&request.params),
            "mystic_status" => Ok(self.mystic_status()),
            other => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("unknown method {other:?}"),
            )),
        };

        match outcome {
            Ok(result) => {
                self.logger
                    .log_mcp_response(Some(&result), &request.id, None);
                JsonRpcResponse::ok(request.id, result)
            }
            Err(error) => {
                self.logger.log_mcp_response(
                    None,
                    &request.id,
                    Some(&crate::error::CallError::new(
                        "JsonRpcError",
                        error.message.clone(),
                    )),
                );
                JsonRpcResponse::err(request.id, error)
            }
        }
    }

    fn tools_list(&self) -> Value {
        let names = [
            "discover_functions",
            "inspect_function",
            "hijack_function",
            "unhijack_function",
            "list_hijacked",
            "get_function_metrics",
            "state_snapshots",
            "state_timeline",
            "logs_query",
            "mystic_status",
        ];
        json!({"tools": names})
    }

    fn discover_functions(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let module_filter = params.get("module_filter").and_then(Value::as_str);
        let include_private = params
            .get("include_private")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let found = inspector::discover(&self.source_root, module_filter, include_private)
            .map_err(JsonRpcError::from)?;
        Ok(json!({
            "functions": found.iter().map(|f| f.to_value()).collect::<Vec<_>>(),
            "count": found.len(),
        }))
    }

    fn inspect_function(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let full_name = required_str(params, "full_name")?;
        let identity = FunctionIdentity::parse(full_name);

        // A cataloged source file wins; otherwise fall back to discovery,
        // then to signature-only metadata from the catalog.
        let source_file = self
            .catalog_entry(&identity, |entry| entry.source_file.clone())
            .flatten()
            .or_else(|| self.locate_by_discovery(full_name));

        if let Some(path) = source_file {
            let analysis = self
                .inspector
                .inspect_file(&path, &identity.qualname)
                .map_err(JsonRpcError::from)?;
            return Ok(analysis.to_value());
        }

        let fallback = self.catalog_entry(&identity, |entry| {
            (entry.signature.clone(), entry.doc.clone())
        });
        match fallback {
            Some((signature, doc)) => Ok(self
                .inspector
                .signature_only(&identity, signature.as_deref(), doc.as_deref())
                .to_value()),
            None => Err(JsonRpcError::new(
                APP_ERROR,
                format!("function not found: {full_name}"),
            )),
        }
    }

    fn locate_by_discovery(&self, full_name: &str) -> Option<PathBuf> {
        let found = inspector::discover(&self.source_root, None, true).ok()?;
        found
            .into_iter()
            .find(|f| f.full_name == full_name || f.name == full_name)
            .map(|f| f.file)
    }

    fn hijack_function(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let full_name = required_str(params, "full_name")?;
        let strategy_kind = required_str(params, "strategy")?;
        let options = params.get("options").cloned().unwrap_or(json!({}));

        let identity = FunctionIdentity::parse(full_name);
        let callable = self
            .catalog_entry(&identity, |entry| entry.callable.clone())
            .ok_or_else(|| {
                JsonRpcError::new(APP_ERROR, format!("function not found: {full_name}"))
            })?;

        let strategy = self.build_strategy(strategy_kind, &options)?;
        let replace = options
            .get("replace")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let builder = hijack(identity.clone(), callable)
            .environment(self.environment)
            .logger(self.logger.clone())
            .tracker(self.tracker.clone())
            .with(strategy);

        let wrapper = if replace {
            let wrapper = builder.build();
            self.registry
                .register(wrapper.clone(), true)
                .map_err(JsonRpcError::from)?;
            wrapper
        } else {
            builder.register(&self.registry).map_err(JsonRpcError::from)?
        };

        Ok(json!({
            "ok": true,
            "identity": identity.full_name(),
            "strategies": wrapper.strategy_kinds(),
        }))
    }

    fn build_strategy(&self, kind: &str, options: &Value) -> Result<Strategy, JsonRpcError> {
        match kind {
            "cache" => {
                let ttl_spec = options.get("ttl").and_then(Value::as_str).unwrap_or("1h");
                let ttl = parse_ttl(ttl_spec).ok_or_else(|| {
                    JsonRpcError::invalid_params(format!("bad ttl spec {ttl_spec:?}"))
                })?;
                let mut cache = CacheStrategy::new(ttl);
                if let Some(max) = options.get("max_entries").and_then(Value::as_u64) {
                    cache = cache.with_max_entries(max as usize);
                }
                if options.get("disk").and_then(Value::as_bool).unwrap_or(false) {
                    cache = cache.with_cache_dir(&self.cache_dir);
                }
                if options.get("strict").and_then(Value::as_bool).unwrap_or(false) {
                    cache = cache.strict();
                }
                Ok(Strategy::Cache(cache))
            }
            "mock" => {
                let data = options.get("data").cloned().unwrap_or(json!({"mocked": true}));
                let mut mock = MockStrategy::new(MockData::Value(data));
                if let Some(envs) = options.get("environments").and_then(Value::as_array) {
                    let parsed: Result<Vec<Environment>, _> = envs
                        .iter()
                        .map(|e| {
                            e.as_str()
                                .unwrap_or_default()
                                .parse::<Environment>()
                                .map_err(|err| JsonRpcError::invalid_params(err.to_string()))
                        })
                        .collect();
                    mock = mock.with_environments(parsed?);
                }
                Ok(Strategy::Mock(mock))
            }
            "block" => {
                let reason = options
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("blocked via MCP");
                let mut block = BlockStrategy::new(reason);
                if options
                    .get("raise_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    block = block.raising();
                }
                if let Some(sentinel) = options.get("return_value") {
                    block = block.with_sentinel(sentinel.clone());
                }
                Ok(Strategy::Block(block))
            }
            "redirect" => {
                let target_name = options
                    .get("target")
                    .and_then(Value::as_str)
                    .ok_or_else(|| JsonRpcError::invalid_params("redirect requires target"))?;
                let target_identity = FunctionIdentity::parse(target_name);
                let target = self
                    .catalog_entry(&target_identity, |entry| entry.callable.clone())
                    .ok_or_else(|| {
                        JsonRpcError::new(
                            APP_ERROR,
                            format!("redirect target not found: {target_name}"),
                        )
                    })?;
                Ok(Strategy::Redirect(RedirectStrategy::new(target_name, target)))
            }
            "analyze" => {
                let mut analysis = AnalysisStrategy::new();
                if let Some(track) = options.get("track_arguments").and_then(Value::as_bool) {
                    analysis = analysis.track_arguments(track);
                }
                if let Some(track) = options.get("track_memory").and_then(Value::as_bool) {
                    analysis = analysis.track_memory(track);
                }
                Ok(Strategy::Analysis(analysis))
            }
            other => Err(JsonRpcError::invalid_params(format!(
                "unknown strategy {other:?} (expected cache, mock, block, redirect, or analyze)"
            ))),
        }
    }

    fn unhijack_function(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let full_name = required_str(params, "full_name")?;
        let identity = FunctionIdentity::parse(full_name);
        self.registry
            .unhijack(&identity)
            .map_err(JsonRpcError::from)?;
        Ok(json!({"ok": true}))
    }

    fn list_hijacked(&self) -> Value {
        let listed: Vec<Value> = self
            .registry
            .list()
            .into_iter()
            .map(|(identity, strategies)| {
                json!({
                    "function": identity.full_name(),
                    "strategies": strategies,
                })
            })
            .collect();
        json!({"hijacked": listed, "count": listed.len()})
    }

    fn get_function_metrics(&self, params: &Value) -> Result<Value, JsonRpcError> {
        match params.get("full_name").and_then(Value::as_str) {
            Some(full_name) => {
                let identity = FunctionIdentity::parse(full_name);
                let entry = self.tracker.get(&identity).ok_or_else(|| {
                    JsonRpcError::new(APP_ERROR, format!("no metrics for {full_name}"))
                })?;
                Ok(serde_json::to_value(entry).unwrap_or(Value::Null))
            }
            None => {
                let snapshot = self.tracker.snapshot();
                let map: serde_json::Map<String, Value> = snapshot
                    .into_iter()
                    .map(|(id, entry)| {
                        (
                            id.full_name(),
                            serde_json::to_value(entry).unwrap_or(Value::Null),
                        )
                    })
                    .collect();
                Ok(Value::Object(map))
            }
        }
    }

    fn state_snapshots(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let mut filter = SnapshotFilter::default();
        if let Some(kind) = params.get("kind").and_then(Value::as_str) {
            filter.kind = Some(
                serde_json::from_value::<SnapshotKind>(json!(kind))
                    .map_err(|_| JsonRpcError::invalid_params(format!("bad kind {kind:?}")))?,
            );
        }
        if let Some(function) = params.get("function").and_then(Value::as_str) {
            filter.function = Some(function.to_string());
        }
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize);
        let snapshots = self.state.list(&filter, limit, 0);
        let count = snapshots.len();
        Ok(json!({
            "snapshots": snapshots,
            "count": count,
        }))
    }

    fn logs_query(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let identity = params
            .get("identity")
            .and_then(Value::as_str)
            .map(FunctionIdentity::parse);
        let since_us = params.get("since_us").and_then(Value::as_u64);
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(100) as usize;
        let events = self.logger.query(identity.as_ref(), since_us, limit);
        let count = events.len();
        Ok(json!({"events": events, "count": count}))
    }

    fn mystic_status(&self) -> Value {
        json!({
            "status": "healthy",
            "environment": self.environment.as_str(),
            "components": {
                "hijacker": "ready",
                "inspector": "ready",
                "logger": "ready",
                "performance_tracker": "ready",
                "state_manager": "ready",
            },
            "hijacked_count": self.registry.len(),
            "registered_functions": self.catalog.lock().map(|c| c.len()).unwrap_or(0),
            "snapshot_count": self.state.len(),
            "recent_events": self.logger.recent(1).len(),
        })
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, JsonRpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_params(format!("missing required param {key:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::CallArgs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn server() -> McpServer {
        McpServer::quiet(
            Environment::Development,
            PathBuf::from("/nonexistent"),
            std::env::temp_dir(),
        )
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: json!(1),
        }
    }

    fn register_adder(server: &McpServer) -> FunctionIdentity {
        let identity = FunctionIdentity::new("demo", "adder");
        let counter = Arc::new(AtomicUsize::new(0));
        let callable: NativeCall = Arc::new(move |args: &CallArgs| {
            counter.fetch_add(1, Ordering::SeqCst);
            let sum: i64 = args.args.iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        });
        server.register_function(identity.clone(), callable);
        identity
    }

    #[test]
    fn rejects_wrong_jsonrpc_version() {
        let server = server();
        let mut req = request("mystic_status", json!({}));
        req.jsonrpc = "1.0".to_string();
        let response = server.dispatch(req);
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let server = server();
        let response = server.dispatch(request("no_such_tool", json!({})));
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[test]
    fn parse_error_on_bad_line() {
        let server = server();
        let raw = server.dispatch_line("{not json");
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["error"]["code"], PARSE_ERROR);
    }

    #[test]
    fn status_reports_components() {
        let server = server();
        let response = server.dispatch(request("mystic_status", json!({})));
        let result = response.result.unwrap();
        assert_eq!(result["status"], "healthy");
        assert_eq!(result["components"]["hijacker"], "ready");
    }

    #[test]
    fn hijack_then_call_uses_mock() {
        let server = server();
        let identity = register_adder(&server);

        let response = server.dispatch(request(
            "hijack_function",
            json!({
                "full_name": identity.full_name(),
                "strategy": "mock",
                "options": {"data": {"mocked": true}},
            }),
        ));
        let result = response.result.unwrap();
        assert_eq!(result["ok"], true);

        let out = server
            .call_function(
                &identity.full_name(),
                CallArgs::positional(vec![json!(1), json!(2)]),
            )
            .unwrap();
        assert_eq!(out, json!({"mocked": true}));
    }

    #[test]
    fn hijack_unknown_function_is_app_error() {
        let server = server();
        let response = server.dispatch(request(
            "hijack_function",
            json!({"full_name": "ghost::fn", "strategy": "cache", "options": {}}),
        ));
        let error = response.error.unwrap();
        assert_eq!(error.code, APP_ERROR);
        assert!(error.message.contains("ghost::fn"));
    }

    #[test]
    fn hijack_unknown_strategy_is_invalid_params() {
        let server = server();
        let identity = register_adder(&server);
        let response = server.dispatch(request(
            "hijack_function",
            json!({"full_name": identity.full_name(), "strategy": "teleport", "options": {}}),
        ));
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn unhijack_restores_and_errors_on_unknown() {
        let server = server();
        let identity = register_adder(&server);
        server.dispatch(request(
            "hijack_function",
            json!({"full_name": identity.full_name(), "strategy": "block", "options": {}}),
        ));
        assert_eq!(server.registry().len(), 1);

        let response = server.dispatch(request(
            "unhijack_function",
            json!({"full_name": identity.full_name()}),
        ));
        assert_eq!(response.result.unwrap()["ok"], true);
        assert_eq!(server.registry().len(), 0);

        // Calls fall through to the catalog entry again.
        let out = server
            .call_function(&identity.full_name(), CallArgs::positional(vec![json!(3)]))
            .unwrap();
        assert_eq!(out, json!(3));

        let again = server.dispatch(request(
            "unhijack_function",
            json!({"full_name": identity.full_name()}),
        ));
        assert_eq!(again.error.unwrap().code, APP_ERROR);
    }

    #[test]
    fn list_hijacked_shows_strategies() {
        let server = server();
        let identity = register_adder(&server);
        server.dispatch(request(
            "hijack_function",
            json!({"full_name": identity.full_name(), "strategy": "cache", "options": {"ttl": "30s"}}),
        ));
        let response = server.dispatch(request("list_hijacked", json!({})));
        let result = response.result.unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["hijacked"][0]["strategies"][0]["kind"], "cache");
    }

    #[test]
    fn metrics_flow_through_tracker() {
        let server = server();
        let identity = register_adder(&server);
        server.dispatch(request(
            "hijack_function",
            json!({"full_name": identity.full_name(), "strategy": "analyze", "options": {}}),
        ));
        server
            .call_function(&identity.full_name(), CallArgs::positional(vec![json!(5)]))
            .unwrap();

        let single = server.dispatch(request(
            "get_function_metrics",
            json!({"full_name": identity.full_name()}),
        ));
        assert_eq!(single.result.unwrap()["call_count"], 1);

        let all = server.dispatch(request("get_function_metrics", json!({})));
        let map = all.result.unwrap();
        assert!(map.get(identity.full_name()).is_some());

        let missing = server.dispatch(request(
            "get_function_metrics",
            json!({"full_name": "ghost::fn"}),
        ));
        assert_eq!(missing.error.unwrap().code, APP_ERROR);
    }

    #[test]
    fn state_tools_expose_timeline() {
        let server = server();
        server
            .state()
            .capture(SnapshotKind::Global, json!({"a": 1}), None, None, None);
        server
            .state()
            .capture(SnapshotKind::Exception, json!("boom"), Some("f"), None, None);

        let snapshots = server.dispatch(request("state_snapshots", json!({"limit": 10})));
        assert_eq!(snapshots.result.unwrap()["count"], 2);

        let filtered = server.dispatch(request(
            "state_snapshots",
            json!({"kind": "exception"}),
        ));
        assert_eq!(filtered.result.unwrap()["count"], 1);

        let bad_kind = server.dispatch(request("state_snapshots", json!({"kind": "bogus"})));
        assert_eq!(bad_kind.error.unwrap().code, INVALID_PARAMS);

        let timeline = server.dispatch(request("state_timeline", json!({})));
        assert_eq!(timeline.result.unwrap()["count"], 2);
    }

    #[test]
    fn logs_query_returns_recent_events() {
        let server = server();
        let identity = register_adder(&server);
        server.dispatch(request(
            "hijack_function",
            json!({"full_name": identity.full_name(), "strategy": "analyze", "options": {}}),
        ));
        server
            .call_function(&identity.full_name(), CallArgs::positional(vec![json!(1)]))
            .unwrap();

        let response = server.dispatch(request(
            "logs_query",
            json!({"identity": identity.full_name(), "limit": 10}),
        ));
        let result = response.result.unwrap();
        assert!(result["count"].as_u64().unwrap() >= 2);
    }

    #[test]
    fn discovery_on_missing_root_is_app_error() {
        let server = server();
        let response = server.dispatch(request("discover_functions", json!({})));
        assert_eq!(response.error.unwrap().code, APP_ERROR);
    }

    #[test]
    fn discovery_and_inspect_over_real_tree() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("pricing.rs"),
            "/// Price an order.\npub fn price(total: u64, discount: Option<f64>) -> f64 { total as f64 * discount.unwrap_or(1.0) }\n",
        )
        .unwrap();
        let server = McpServer::quiet(
            Environment::Development,
            tmp.path().to_path_buf(),
            std::env::temp_dir(),
        );

        let discovered = server.dispatch(request("discover_functions", json!({})));
        let result = discovered.result.unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["functions"][0]["full_name"], "pricing::price");

        let inspected = server.dispatch(request(
            "inspect_function",
            json!({"full_name": "pricing::price"}),
        ));
        let analysis = inspected.result.unwrap();
        assert_eq!(analysis["signature"]["name"], "price");
        assert_eq!(analysis["doc"]["summary"], "Price an order.");
        assert_eq!(analysis["schema"]["required"], json!(["total"]));
    }

    #[test]
    fn inspect_falls_back_to_catalog_metadata() {
        let server = server();
        let identity = FunctionIdentity::new("runtime", "closure_7");
        server.register_function_with(
            identity.clone(),
            Arc::new(|_: &CallArgs| Ok(Value::Null)),
            None,
            Some("A runtime-registered closure.".to_string()),
            Some("fn closure_7()".to_string()),
        );
        let response = server.dispatch(request(
            "inspect_function",
            json!({"full_name": identity.full_name()}),
        ));
        let analysis = response.result.unwrap();
        assert_eq!(analysis["doc"]["summary"], "A runtime-registered closure.");
        assert_eq!(analysis["ast_hash"], "");
    }

    #[test]
    fn redirect_strategy_resolves_target_from_catalog() {
        let server = server();
        let identity = register_adder(&server);
        let target_identity = FunctionIdentity::new("demo", "always_ten");
        server.register_function(
            target_identity.clone(),
            Arc::new(|_: &CallArgs| Ok(json!(10))),
        );

        server.dispatch(request(
            "hijack_function",
            json!({
                "full_name": identity.full_name(),
                "strategy": "redirect",
                "options": {"target": target_identity.full_name()},
            }),
        ));
        let out = server
            .call_function(&identity.full_name(), CallArgs::positional(vec![json!(1)]))
            .unwrap();
        assert_eq!(out, json!(10));
    }

    #[test]
    fn mcp_events_are_logged_with_request_ids() {
        let server = server();
        server.dispatch(request("mystic_status", json!({})));
        let events = server.logger().recent(10);
        assert!(events.len() >= 2);
        assert_eq!(events[0].correlation_id, "1");
        assert_eq!(events[1].correlation_id, "1");
    }
}
