//! Structured call logging
//!
//! The logger turns call/return/error boundaries (and MCP request/response
//! pairs) into `CallRecord` events, applies the redactor when sensitive
//! filtering is on, and delivers each event to a bounded ring of recent
//! history plus any live subscribers.
//!
//! Ring and fan-out share one lock: an event is appended to the ring and
//! delivered to every subscriber before the next event can enter, so a
//! subscriber never observes a later event ahead of an earlier one.
//! Fan-out is best-effort — a panicking subscriber is caught and counted,
//! never propagated to the caller. When the ring is full the oldest event
//! is dropped and a drop counter incremented; the producer never blocks.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::correlation::{self, now_us, CorrelationId, CorrelationScope};
use crate::error::CallError;
use crate::identity::FunctionIdentity;
use crate::redactor::Redactor;
use crate::strategies::{CallArgs, NativeCall};

/// Event rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, to stderr.
    Console,
    /// Human-readable, to a rotating file under the log directory.
    File,
    /// One JSON-RPC-shaped object per event, to stdout.
    JsonRpc,
    /// `key=value` pairs, to stderr.
    Structured,
    /// Indented JSON with direction arrows, mcp-debug style.
    McpDebug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Call,
    Return,
    Error,
    McpRequest,
    McpResponse,
}

/// One structured log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub kind: EventKind,
    pub ts_us: u64,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_delta_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
}

impl CallRecord {
    fn base(kind: EventKind, correlation_id: &CorrelationId) -> Self {
        Self {
            kind,
            ts_us: now_us(),
            correlation_id: correlation_id.to_string(),
            function: None,
            method: None,
            args: None,
            kwargs: None,
            result: None,
            error: None,
            duration_us: None,
            memory_delta_bytes: None,
            request_id: None,
        }
    }
}

type SubscriberFn = Box<dyn Fn(&CallRecord) + Send>;

struct Subscriber {
    id: u64,
    callback: SubscriberFn,
}

struct RingState {
    events: VecDeque<CallRecord>,
    dropped: u64,
    subscribers: Vec<Subscriber>,
}

struct FileSink {
    path: PathBuf,
    max_bytes: u64,
    written: u64,
    file: Option<File>,
}

impl FileSink {
    fn new(path: PathBuf, max_bytes: u64) -> Self {
        let written = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self {
            path,
            max_bytes,
            written,
            file: None,
        }
    }

    fn write_line(&mut self, line: &str) {
        if self.written + line.len() as u64 + 1 > self.max_bytes {
            self.rotate();
        }
        if self.file.is_none() {
            self.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .ok();
        }
        if let Some(file) = self.file.as_mut() {
            if writeln!(file, "{line}").is_ok() {
                self.written += line.len() as u64 + 1;
            }
        }
    }

    fn rotate(&mut self) {
        self.file = None;
        let rotated = self.path.with_extension("log.1");
        if let Err(e) = std::fs::rename(&self.path, &rotated) {
            debug!("log rotation failed: {e}");
        }
        self.written = 0;
    }
}

/// Structured event logger with correlation, redaction, and fan-out.
pub struct CallLogger {
    format: LogFormat,
    filter_sensitive: bool,
    redactor: Redactor,
    ring: Mutex<RingState>,
    capacity: usize,
    sink: Option<Mutex<FileSink>>,
    subscriber_faults: AtomicU64,
    next_subscriber_id: AtomicU64,
}

pub const DEFAULT_RING_CAPACITY: usize = 1000;
const DEFAULT_MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

impl CallLogger {
    pub fn new(format: LogFormat, filter_sensitive: bool) -> Self {
        Self {
            format,
            filter_sensitive,
            redactor: Redactor::new(),
            ring: Mutex::new(RingState {
                events: VecDeque::with_capacity(DEFAULT_RING_CAPACITY),
                dropped: 0,
                subscribers: Vec::new(),
            }),
            capacity: DEFAULT_RING_CAPACITY,
            sink: None,
            subscriber_faults: AtomicU64::new(0),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Attach a rotating file sink (used by the `File` format).
    pub fn with_file_sink(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Some(Mutex::new(FileSink::new(path.into(), DEFAULT_MAX_LOG_BYTES)));
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    fn filtered(&self, value: &Value) -> Value {
        if self.filter_sensitive {
            self.redactor.redact_value(value)
        } else {
            value.clone()
        }
    }

    /// Record a call boundary. Returns the correlation id used (the one
    /// supplied, the thread's current, or a fresh one) and sets it current.
    pub fn log_call(
        &self,
        identity: &FunctionIdentity,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
        correlation_id: Option<CorrelationId>,
    ) -> CorrelationId {
        let id = correlation_id
            .or_else(correlation::current)
            .unwrap_or_else(correlation::generate);
        correlation::set_current(id.clone());

        let mut record = CallRecord::base(EventKind::Call, &id);
        record.function = Some(identity.full_name());
        record.args = Some(args.iter().map(|v| self.filtered(v)).collect());
        record.kwargs = Some(
            kwargs
                .iter()
                .map(|(k, v)| (k.clone(), self.filtered(v)))
                .collect(),
        );
        self.emit(record);
        id
    }

    /// Record a return boundary. When no id is supplied, the thread's
    /// current id is used — even if it was produced by an earlier call on
    /// this thread.
    pub fn log_return(
        &self,
        identity: &FunctionIdentity,
        result: &Value,
        duration: Duration,
        correlation_id: Option<CorrelationId>,
    ) {
        let id = correlation_id.unwrap_or_else(correlation::current_or_generate);
        let mut record = CallRecord::base(EventKind::Return, &id);
        record.function = Some(identity.full_name());
        record.result = Some(self.filtered(result));
        record.duration_us = Some(duration.as_micros() as u64);
        self.emit(record);
    }

    /// Record an error boundary; mutually exclusive with a result.
    pub fn log_error(
        &self,
        identity: &FunctionIdentity,
        error: &CallError,
        duration: Duration,
        correlation_id: Option<CorrelationId>,
    ) {
        let id = correlation_id.unwrap_or_else(correlation::current_or_generate);
        let mut record = CallRecord::base(EventKind::Error, &id);
        record.function = Some(identity.full_name());
        record.error = Some(error.clone());
        record.duration_us = Some(duration.as_micros() as u64);
        self.emit(record);
    }

    /// Record an inbound JSON-RPC request; the correlation id is the
    /// request id.
    pub fn log_mcp_request(&self, method: &str, params: &Value, request_id: &Value) {
        let id = CorrelationId::from_external(id_text(request_id));
        correlation::set_current(id.clone());
        let mut record = CallRecord::base(EventKind::McpRequest, &id);
        record.method = Some(method.to_string());
        record.request_id = Some(request_id.clone());
        record.args = Some(vec![self.filtered(params)]);
        self.emit(record);
    }

    /// Record an outbound JSON-RPC response correlated by request id.
    pub fn log_mcp_response(
        &self,
        result: Option<&Value>,
        request_id: &Value,
        error: Option<&CallError>,
    ) {
        let id = CorrelationId::from_external(id_text(request_id));
        let mut record = CallRecord::base(EventKind::McpResponse, &id);
        record.result = result.map(|v| self.filtered(v));
        record.error = error.cloned();
        record.request_id = Some(request_id.clone());
        self.emit(record);
    }

    /// Register a subscriber for live events; returns a handle for
    /// [`CallLogger::unsubscribe`].
    pub fn subscribe(&self, callback: impl Fn(&CallRecord) + Send + 'static) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut ring) = self.ring.lock() {
            ring.subscribers.push(Subscriber {
                id,
                callback: Box::new(callback),
            });
        }
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        if let Ok(mut ring) = self.ring.lock() {
            let before = ring.subscribers.len();
            ring.subscribers.retain(|s| s.id != id);
            return ring.subscribers.len() != before;
        }
        false
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<CallRecord> {
        match self.ring.lock() {
            Ok(ring) => {
                let skip = ring.events.len().saturating_sub(limit);
                ring.events.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Query the ring by function and time, newest-bounded by `limit`.
    pub fn query(
        &self,
        identity: Option<&FunctionIdentity>,
        since_us: Option<u64>,
        limit: usize,
    ) -> Vec<CallRecord> {
        let full_name = identity.map(|id| id.full_name());
        match self.ring.lock() {
            Ok(ring) => {
                let matched: Vec<CallRecord> = ring
                    .events
                    .iter()
                    .filter(|r| {
                        full_name
                            .as_ref()
                            .map(|n| r.function.as_deref() == Some(n.as_str()))
                            .unwrap_or(true)
                            && since_us.map(|s| r.ts_us >= s).unwrap_or(true)
                    })
                    .cloned()
                    .collect();
                let skip = matched.len().saturating_sub(limit);
                matched.into_iter().skip(skip).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.ring.lock().map(|r| r.dropped).unwrap_or(0)
    }

    pub fn subscriber_faults(&self) -> u64 {
        self.subscriber_faults.load(Ordering::SeqCst)
    }

    fn emit(&self, record: CallRecord) {
        self.write_out(&record);

        let mut ring = match self.ring.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.events.len() == self.capacity {
            ring.events.pop_front();
            ring.dropped += 1;
        }
        ring.events.push_back(record.clone());
        // Fan-out happens under the same lock as the ring append, in
        // registration order. Panics are contained per subscriber.
        for sub in ring.subscribers.iter() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (sub.callback)(&record)
            }));
            if outcome.is_err() {
                self.subscriber_faults.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn write_out(&self, record: &CallRecord) {
        let line = self.format_record(record);
        match self.format {
            LogFormat::JsonRpc => println!("{line}"),
            LogFormat::File => {
                if let Some(sink) = &self.sink {
                    if let Ok(mut sink) = sink.lock() {
                        sink.write_line(&line);
                        return;
                    }
                }
                eprintln!("{line}");
            }
            _ => eprintln!("{line}"),
        }
    }

    /// Render a record in this logger's format.
    pub fn format_record(&self, record: &CallRecord) -> String {
        match self.format {
            LogFormat::Console | LogFormat::File => format_human(record),
            LogFormat::Structured => format_structured(record),
            LogFormat::JsonRpc => json!({
                "jsonrpc": "2.0",
                "method": "mystic/log",
                "params": record,
            })
            .to_string(),
            LogFormat::McpDebug => {
                let arrow = match record.kind {
                    EventKind::Call | EventKind::McpRequest => "-->",
                    _ => "<--",
                };
                let body = serde_json::to_string_pretty(record)
                    .unwrap_or_else(|_| "<unserializable>".to_string());
                format!("{arrow} {body}")
            }
        }
    }
}

fn id_text(request_id: &Value) -> String {
    match request_id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_tag(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Call => "CALL",
        EventKind::Return => "RETURN",
        EventKind::Error => "ERROR",
        EventKind::McpRequest => "MCP-REQ",
        EventKind::McpResponse => "MCP-RESP",
    }
}

fn human_ts(ts_us: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_micros(ts_us as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ts_us.to_string())
}

fn format_human(record: &CallRecord) -> String {
    let mut line = format!(
        "{} {:8} [{}]",
        human_ts(record.ts_us),
        kind_tag(record.kind),
        record.correlation_id
    );
    if let Some(function) = &record.function {
        line.push_str(&format!(" {function}"));
    }
    if let Some(method) = &record.method {
        line.push_str(&format!(" {method}"));
    }
    if let Some(args) = &record.args {
        line.push_str(&format!(" args={}", Value::Array(args.clone())));
    }
    if let Some(kwargs) = &record.kwargs {
        if !kwargs.is_empty() {
            let obj: serde_json::Map<String, Value> =
                kwargs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            line.push_str(&format!(" kwargs={}", Value::Object(obj)));
        }
    }
    if let Some(result) = &record.result {
        line.push_str(&format!(" -> {result}"));
    }
    if let Some(error) = &record.error {
        line.push_str(&format!(" !! {error}"));
    }
    if let Some(duration) = record.duration_us {
        line.push_str(&format!(" ({duration}µs)"));
    }
    line
}

fn format_structured(record: &CallRecord) -> String {
    let mut parts = vec![
        format!("ts={}", record.ts_us),
        format!("kind={}", kind_tag(record.kind).to_ascii_lowercase()),
        format!("correlation_id={}", record.correlation_id),
    ];
    if let Some(function) = &record.function {
        parts.push(format!("function={function}"));
    }
    if let Some(method) = &record.method {
        parts.push(format!("method={method}"));
    }
    if let Some(args) = &record.args {
        parts.push(format!("args={}", Value::Array(args.clone())));
    }
    if let Some(result) = &record.result {
        parts.push(format!("result={result}"));
    }
    if let Some(error) = &record.error {
        parts.push(format!("error=\"{error}\""));
    }
    if let Some(duration) = record.duration_us {
        parts.push(format!("duration_us={duration}"));
    }
    parts.join(" ")
}

// ---------------------------------------------------------------------------
// Logging decorators

/// What a logging decorator records.
#[derive(Clone)]
pub enum LogMode {
    CallsAndReturns,
    CallsOnly,
    ReturnsOnly,
    /// Calls and returns, with long strings truncated to `max_length`.
    Detailed { max_length: usize },
    /// Calls and returns, with caller-supplied projections applied to the
    /// logged args/result (the callable still sees the real values).
    Filtered {
        arg_filter: Arc<dyn Fn(&CallArgs) -> CallArgs + Send + Sync>,
        return_filter: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    },
}

/// Wrap a callable so every invocation is logged in `mode`. The returned
/// callable forwards arguments and propagates results/errors untouched.
pub fn logged(
    logger: Arc<CallLogger>,
    identity: FunctionIdentity,
    mode: LogMode,
    func: NativeCall,
) -> NativeCall {
    Arc::new(move |call_args: &CallArgs| {
        let started = std::time::Instant::now();

        let (log_args, log_kwargs) = match &mode {
            LogMode::Detailed { max_length } => {
                let args = call_args
                    .args
                    .iter()
                    .map(|v| truncate_value(v, *max_length))
                    .collect::<Vec<_>>();
                let kwargs = call_args
                    .kwargs
                    .iter()
                    .map(|(k, v)| (k.clone(), truncate_value(v, *max_length)))
                    .collect();
                (args, kwargs)
            }
            LogMode::Filtered { arg_filter, .. } => {
                let projected = arg_filter(call_args);
                (projected.args, projected.kwargs)
            }
            _ => (call_args.args.clone(), call_args.kwargs.clone()),
        };

        let correlation_id = if matches!(mode, LogMode::ReturnsOnly) {
            correlation::current_or_generate()
        } else {
            logger.log_call(&identity, &log_args, &log_kwargs, None)
        };
        let _scope = CorrelationScope::enter(correlation_id.clone());

        let outcome = func(call_args);
        let elapsed = started.elapsed();

        match &outcome {
            Ok(value) => {
                if !matches!(mode, LogMode::CallsOnly) {
                    let logged_value = match &mode {
                        LogMode::Detailed { max_length } => truncate_value(value, *max_length),
                        LogMode::Filtered { return_filter, .. } => return_filter(value),
                        _ => value.clone(),
                    };
                    logger.log_return(&identity, &logged_value, elapsed, Some(correlation_id));
                }
            }
            Err(error) => {
                logger.log_error(&identity, error, elapsed, Some(correlation_id));
            }
        }
        outcome
    })
}

pub fn log_calls_and_returns(
    logger: Arc<CallLogger>,
    identity: FunctionIdentity,
    func: NativeCall,
) -> NativeCall {
    logged(logger, identity, LogMode::CallsAndReturns, func)
}

pub fn log_calls_only(
    logger: Arc<CallLogger>,
    identity: FunctionIdentity,
    func: NativeCall,
) -> NativeCall {
    logged(logger, identity, LogMode::CallsOnly, func)
}

pub fn log_returns_only(
    logger: Arc<CallLogger>,
    identity: FunctionIdentity,
    func: NativeCall,
) -> NativeCall {
    logged(logger, identity, LogMode::ReturnsOnly, func)
}

pub fn detailed_log(
    logger: Arc<CallLogger>,
    identity: FunctionIdentity,
    max_length: usize,
    func: NativeCall,
) -> NativeCall {
    logged(logger, identity, LogMode::Detailed { max_length }, func)
}

pub fn filtered_log(
    logger: Arc<CallLogger>,
    identity: FunctionIdentity,
    arg_filter: Arc<dyn Fn(&CallArgs) -> CallArgs + Send + Sync>,
    return_filter: Arc<dyn Fn(&Value) -> Value + Send + Sync>,
    func: NativeCall,
) -> NativeCall {
    logged(
        logger,
        identity,
        LogMode::Filtered {
            arg_filter,
            return_filter,
        },
        func,
    )
}

fn truncate_value(value: &Value, max_length: usize) -> Value {
    match value {
        Value::String(s) if s.len() > max_length => {
            let mut cut = max_length;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            Value::String(format!("{}…", &s[..cut]))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| truncate_value(v, max_length))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_value(v, max_length)))
                .collect(),
        ),
        other => other.clone(),
    }
}
