//! Interception strategies
//!
//! A strategy inspects a call and either produces its value (`executed =
//! true`, the chain stops) or passes it along (`executed = false`). The set
//! of strategies is a closed enum: extension points are the analysis
//! callback and the conditional predicate with its sub-strategies, not open
//! inheritance.
//!
//! Priority order is `Critical > High > Normal > Low`; wrappers run
//! strategies in descending priority, insertion order breaking ties.
//! Analysis defaults to `Critical` so passive observers see every call,
//! including ones a later interceptor owns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::Environment;
use crate::correlation::now_us;
use crate::error::CallError;
use crate::identity::FunctionIdentity;

/// Positional and keyword arguments for one call. Keyword arguments live in
/// a `BTreeMap`, so the canonical form is ordered for free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Total, deterministic canonical form: JSON with sorted object keys.
    pub fn canonical(&self) -> String {
        json!({"args": self.args, "kwargs": self.kwargs}).to_string()
    }
}

/// The callable contract wrapped by a hijacker.
pub type NativeCall = Arc<dyn Fn(&CallArgs) -> Result<Value, CallError> + Send + Sync>;

/// Immutable per-call record handed to every strategy.
#[derive(Debug, Clone)]
pub struct HijackContext {
    pub identity: FunctionIdentity,
    pub args: CallArgs,
    pub correlation_id: String,
    pub environment: Environment,
    pub call_count: u64,
    pub started_at_us: u64,
    pub metadata: BTreeMap<String, Value>,
}

/// Outcome of one strategy's `handle`.
#[derive(Debug, Clone, Default)]
pub struct HijackResult {
    pub executed: bool,
    pub result: Option<Value>,
    pub error: Option<CallError>,
    pub metadata: BTreeMap<String, Value>,
}

impl HijackResult {
    /// The strategy was passive; continue the chain.
    pub fn pass_through() -> Self {
        Self::default()
    }

    /// The strategy produced the call's value; stop the chain.
    pub fn with_value(value: Value) -> Self {
        Self {
            executed: true,
            result: Some(value),
            ..Self::default()
        }
    }

    /// The call's outcome is this error (original fault or block).
    pub fn with_error(error: CallError) -> Self {
        Self {
            executed: true,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Internal strategy failure. The wrapper logs it, skips the strategy, and
/// continues the chain as if the strategy had passed.
#[derive(Debug, Clone)]
pub struct StrategyFault {
    pub strategy: &'static str,
    pub message: String,
}

impl std::fmt::Display for StrategyFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} strategy fault: {}", self.strategy, self.message)
    }
}

pub type HandleOutcome = Result<HijackResult, StrategyFault>;

/// Strategy ordering class. Later variants compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Parse a TTL spec: bare seconds (`"90"`) or a unit suffix (`"30s"`,
/// `"15m"`, `"1h"`, `"2d"`).
pub fn parse_ttl(spec: &str) -> Option<Duration> {
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }
    if let Ok(secs) = spec.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let last = spec.char_indices().last().map(|(i, _)| i)?;
    let (value, unit) = spec.split_at(last);
    let value: u64 = value.trim().parse().ok()?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(value * multiplier))
}

// ---------------------------------------------------------------------------
// Cache

struct CacheSlot {
    value: Value,
    created_at_us: u64,
    last_access_us: u64,
}

/// Result cache with an in-memory LRU map and an optional disk mirror at
/// `<cache_dir>/<sha256hex>.cache`.
pub struct CacheStrategy {
    pub ttl: Duration,
    pub max_entries: usize,
    pub cache_dir: Option<PathBuf>,
    /// Refuse to cache calls whose canonical key contains an unstable token
    /// instead of silently keying on it.
    pub strict: bool,
    priority: Priority,
    memory: Mutex<HashMap<String, CacheSlot>>,
    logged_io_keys: Mutex<HashSet<String>>,
    original_executions: AtomicU64,
}

// Debug-repr pointers and similar ephemeral tokens make a cache key
// non-deterministic across processes.
static UNSTABLE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]+ at 0x[0-9a-fA-F]+>|\b0x[0-9a-fA-F]{8,}\b").unwrap());

impl CacheStrategy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: 1000,
            cache_dir: None,
            strict: false,
            priority: Priority::High,
            memory: Mutex::new(HashMap::new()),
            logged_io_keys: Mutex::new(HashSet::new()),
            original_executions: AtomicU64::new(0),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// How many times this strategy has run the underlying callable.
    pub fn original_executions(&self) -> u64 {
        self.original_executions.load(Ordering::SeqCst)
    }

    fn cache_key(&self, ctx: &HijackContext) -> Option<String> {
        let canonical = ctx.args.canonical();
        if self.strict && UNSTABLE_TOKEN.is_match(&canonical) {
            return None;
        }
        let mut hasher = Sha256::new();
        hasher.update(ctx.identity.full_name().as_bytes());
        hasher.update(b"|");
        hasher.update(canonical.as_bytes());
        Some(format!("{:x}", hasher.finalize()))
    }

    fn is_fresh(&self, created_at_us: u64) -> bool {
        now_us().saturating_sub(created_at_us) < self.ttl.as_micros() as u64
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(format!("{key}.cache")))
    }

    fn log_io_error_once(&self, key: &str, detail: &str) {
        if let Ok(mut logged) = self.logged_io_keys.lock() {
            if logged.insert(key.to_string()) {
                debug!("cache io error for key {key}: {detail}");
            }
        }
    }

    fn lookup_memory(&self, key: &str) -> Option<Value> {
        let mut memory = self.memory.lock().ok()?;
        let fresh = match memory.get(key) {
            Some(slot) => self.is_fresh(slot.created_at_us),
            None => return None,
        };
        if !fresh {
            memory.remove(key);
            return None;
        }
        let slot = memory.get_mut(key)?;
        slot.last_access_us = now_us();
        Some(slot.value.clone())
    }

    fn load_disk(&self, key: &str) -> Option<(Value, u64)> {
        let path = self.disk_path(key)?;
        if !path.exists() {
            return None;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                self.log_io_error_once(key, &e.to_string());
                return None;
            }
        };
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.log_io_error_once(key, &e.to_string());
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };
        let created_at_us = parsed.get("created_at_us")?.as_u64()?;
        if !self.is_fresh(created_at_us) {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        Some((parsed.get("value")?.clone(), created_at_us))
    }

    fn store(&self, key: &str, value: &Value) {
        let created_at_us = now_us();
        if let Ok(mut memory) = self.memory.lock() {
            while memory.len() >= self.max_entries {
                let oldest = memory
                    .iter()
                    .min_by_key(|(_, slot)| slot.last_access_us)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        memory.remove(&k);
                    }
                    None => break,
                }
            }
            memory.insert(
                key.to_string(),
                CacheSlot {
                    value: value.clone(),
                    created_at_us,
                    last_access_us: created_at_us,
                },
            );
        }
        if let Some(path) = self.disk_path(key) {
            let payload = json!({"value": value, "created_at_us": created_at_us});
            if let Err(e) = std::fs::write(&path, payload.to_string()) {
                self.log_io_error_once(key, &e.to_string());
            }
        }
    }

    fn promote(&self, key: &str, value: &Value, created_at_us: u64) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(
                key.to_string(),
                CacheSlot {
                    value: value.clone(),
                    created_at_us,
                    last_access_us: now_us(),
                },
            );
        }
    }

    /// Read-only freshness check, no promotion and no execution.
    pub fn has_cached_value(&self, ctx: &HijackContext) -> bool {
        let Some(key) = self.cache_key(ctx) else {
            return false;
        };
        if let Ok(memory) = self.memory.lock() {
            if let Some(slot) = memory.get(&key) {
                if self.is_fresh(slot.created_at_us) {
                    return true;
                }
            }
        }
        self.load_disk(&key).is_some()
    }

    fn handle(&self, ctx: &HijackContext, original: &NativeCall) -> HandleOutcome {
        let Some(key) = self.cache_key(ctx) else {
            return Ok(HijackResult::pass_through().meta("cache_skipped", json!(true)));
        };

        if let Some(value) = self.lookup_memory(&key) {
            return Ok(HijackResult::with_value(value)
                .meta("cache_hit", json!(true))
                .meta("cache_key", json!(key)));
        }

        if let Some((value, created_at_us)) = self.load_disk(&key) {
            self.promote(&key, &value, created_at_us);
            return Ok(HijackResult::with_value(value)
                .meta("cache_hit", json!(true))
                .meta("cache_key", json!(key)));
        }

        self.original_executions.fetch_add(1, Ordering::SeqCst);
        match original(&ctx.args) {
            Ok(value) => {
                self.store(&key, &value);
                Ok(HijackResult::with_value(value)
                    .meta("cache_hit", json!(false))
                    .meta("cache_key", json!(key)))
            }
            // The original ran and failed; that outcome belongs to the
            // caller, not to the rest of the chain.
            Err(error) => Ok(HijackResult::with_error(error)),
        }
    }

    fn describe(&self) -> Value {
        json!({
            "ttl_s": self.ttl.as_secs(),
            "max_entries": self.max_entries,
            "disk": self.cache_dir.is_some(),
            "strict": self.strict,
        })
    }
}

// ---------------------------------------------------------------------------
// Mock

/// What the mock returns.
pub enum MockData {
    Value(Value),
    /// Computed from the call's arguments.
    Callable(Arc<dyn Fn(&CallArgs) -> Value + Send + Sync>),
    /// Keyed by environment tag; missing tag yields null.
    PerEnvironment(BTreeMap<String, Value>),
}

/// Replace the call's result in selected environments (by default
/// development and testing, never production unless asked).
pub struct MockStrategy {
    pub data: MockData,
    pub environments: HashSet<Environment>,
    priority: Priority,
}

impl MockStrategy {
    pub fn new(data: MockData) -> Self {
        Self {
            data,
            environments: HashSet::from([Environment::Development, Environment::Testing]),
            priority: Priority::High,
        }
    }

    pub fn with_environments(mut self, environments: impl IntoIterator<Item = Environment>) -> Self {
        self.environments = environments.into_iter().collect();
        self
    }

    fn should_intercept(&self, ctx: &HijackContext) -> bool {
        self.environments.contains(&ctx.environment)
    }

    fn handle(&self, ctx: &HijackContext) -> HandleOutcome {
        let value = match &self.data {
            MockData::Value(v) => v.clone(),
            MockData::Callable(f) => {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&ctx.args))).map_err(
                    |_| StrategyFault {
                        strategy: "mock",
                        message: "mock callable panicked".to_string(),
                    },
                )?
            }
            MockData::PerEnvironment(map) => map
                .get(ctx.environment.as_str())
                .cloned()
                .unwrap_or(Value::Null),
        };
        Ok(HijackResult::with_value(value)
            .meta("mocked", json!(true))
            .meta("environment", json!(ctx.environment.as_str())))
    }

    fn describe(&self) -> Value {
        let mut envs: Vec<&str> = self.environments.iter().map(|e| e.as_str()).collect();
        envs.sort_unstable();
        json!({"environments": envs})
    }
}

// ---------------------------------------------------------------------------
// Block

/// Refuse the call: either raise or return a configured sentinel.
pub struct BlockStrategy {
    pub reason: String,
    pub raise_error: bool,
    pub sentinel: Value,
    priority: Priority,
}

impl BlockStrategy {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raise_error: false,
            sentinel: Value::Null,
            priority: Priority::Critical,
        }
    }

    pub fn raising(mut self) -> Self {
        self.raise_error = true;
        self
    }

    pub fn with_sentinel(mut self, sentinel: Value) -> Self {
        self.sentinel = sentinel;
        self
    }

    fn handle(&self) -> HandleOutcome {
        let result = if self.raise_error {
            HijackResult::with_error(CallError::blocked(&self.reason))
        } else {
            HijackResult::with_value(self.sentinel.clone())
        };
        Ok(result
            .meta("blocked", json!(true))
            .meta("reason", json!(self.reason)))
    }

    fn describe(&self) -> Value {
        json!({"reason": self.reason, "raise_error": self.raise_error})
    }
}

// ---------------------------------------------------------------------------
// Redirect

pub type ArgTransform = Arc<dyn Fn(CallArgs) -> CallArgs + Send + Sync>;
pub type ResultTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Send the call to a different target, optionally transforming arguments
/// on the way in and the result on the way out.
pub struct RedirectStrategy {
    pub target_name: String,
    target: NativeCall,
    arg_transform: Option<ArgTransform>,
    result_transform: Option<ResultTransform>,
    priority: Priority,
}

impl RedirectStrategy {
    pub fn new(target_name: impl Into<String>, target: NativeCall) -> Self {
        Self {
            target_name: target_name.into(),
            target,
            arg_transform: None,
            result_transform: None,
            priority: Priority::Normal,
        }
    }

    pub fn with_arg_transform(mut self, transform: ArgTransform) -> Self {
        self.arg_transform = Some(transform);
        self
    }

    pub fn with_result_transform(mut self, transform: ResultTransform) -> Self {
        self.result_transform = Some(transform);
        self
    }

    fn handle(&self, ctx: &HijackContext) -> HandleOutcome {
        let args = match &self.arg_transform {
            Some(transform) => {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    transform(ctx.args.clone())
                }))
                .map_err(|_| StrategyFault {
                    strategy: "redirect",
                    message: "arg transform panicked".to_string(),
                })?
            }
            None => ctx.args.clone(),
        };

        match (self.target)(&args) {
            Ok(mut value) => {
                if let Some(transform) = &self.result_transform {
                    value = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        transform(value)
                    }))
                    .map_err(|_| StrategyFault {
                        strategy: "redirect",
                        message: "result transform panicked".to_string(),
                    })?;
                }
                Ok(HijackResult::with_value(value)
                    .meta("redirected_to", json!(self.target_name)))
            }
            Err(error) => Ok(HijackResult::with_error(error)
                .meta("redirected_to", json!(self.target_name))),
        }
    }

    fn describe(&self) -> Value {
        json!({"target": self.target_name})
    }
}

// ---------------------------------------------------------------------------
// Analysis

/// One recorded observation of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub ts_us: u64,
    pub correlation_id: String,
    pub call_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<CallArgs>,
}

pub type AnalysisCallback = Arc<dyn Fn(&HijackContext, &Observation) + Send + Sync>;

/// Passive observer: records calls and keeps the chain going. The only
/// strategy for which `executed = false` is the normal outcome.
pub struct AnalysisStrategy {
    pub track_arguments: bool,
    pub track_performance: bool,
    pub track_memory: bool,
    callback: Option<AnalysisCallback>,
    observations: Mutex<HashMap<FunctionIdentity, Vec<Observation>>>,
    priority: Priority,
}

impl Default for AnalysisStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisStrategy {
    pub fn new() -> Self {
        Self {
            track_arguments: true,
            track_performance: true,
            track_memory: false,
            callback: None,
            observations: Mutex::new(HashMap::new()),
            priority: Priority::Critical,
        }
    }

    pub fn with_callback(mut self, callback: AnalysisCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn track_memory(mut self, enabled: bool) -> Self {
        self.track_memory = enabled;
        self
    }

    pub fn track_arguments(mut self, enabled: bool) -> Self {
        self.track_arguments = enabled;
        self
    }

    pub fn observation_count(&self) -> usize {
        self.observations
            .lock()
            .map(|map| map.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn observations_for(&self, identity: &FunctionIdentity) -> Vec<Observation> {
        self.observations
            .lock()
            .ok()
            .and_then(|map| map.get(identity).cloned())
            .unwrap_or_default()
    }

    fn handle(&self, ctx: &HijackContext) -> HandleOutcome {
        let observation = Observation {
            ts_us: now_us(),
            correlation_id: ctx.correlation_id.clone(),
            call_count: ctx.call_count,
            args: self.track_arguments.then(|| ctx.args.clone()),
        };
        if let Ok(mut map) = self.observations.lock() {
            map.entry(ctx.identity.clone())
                .or_default()
                .push(observation.clone());
        }
        if let Some(callback) = &self.callback {
            // Observational path: a panicking callback must not disturb the
            // call.
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(ctx, &observation)
            }));
        }
        Ok(HijackResult::pass_through().meta("analyzed", json!(true)))
    }

    fn describe(&self) -> Value {
        json!({
            "track_arguments": self.track_arguments,
            "track_performance": self.track_performance,
            "track_memory": self.track_memory,
        })
    }
}

// ---------------------------------------------------------------------------
// Conditional

pub type Predicate = Arc<dyn Fn(&HijackContext) -> bool + Send + Sync>;

/// Pick a sub-strategy per call. A predicate panic counts as `false`.
pub struct ConditionalStrategy {
    predicate: Predicate,
    when_true: Box<Strategy>,
    when_false: Option<Box<Strategy>>,
    priority: Priority,
}

impl ConditionalStrategy {
    pub fn new(predicate: Predicate, when_true: Strategy) -> Self {
        Self {
            predicate,
            when_true: Box::new(when_true),
            when_false: None,
            priority: Priority::Normal,
        }
    }

    pub fn otherwise(mut self, when_false: Strategy) -> Self {
        self.when_false = Some(Box::new(when_false));
        self
    }

    fn evaluate(&self, ctx: &HijackContext) -> bool {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.predicate)(ctx)))
            .unwrap_or(false)
    }

    fn should_intercept(&self, ctx: &HijackContext) -> bool {
        if self.evaluate(ctx) {
            self.when_true.should_intercept(ctx)
        } else {
            self.when_false
                .as_ref()
                .map(|s| s.should_intercept(ctx))
                .unwrap_or(false)
        }
    }

    fn handle(&self, ctx: &HijackContext, original: &NativeCall) -> HandleOutcome {
        if self.evaluate(ctx) {
            self.when_true.handle(ctx, original)
        } else if let Some(branch) = &self.when_false {
            branch.handle(ctx, original)
        } else {
            Ok(HijackResult::pass_through().meta("condition_met", json!(false)))
        }
    }

    fn describe(&self) -> Value {
        json!({
            "when_true": self.when_true.kind(),
            "when_false": self.when_false.as_ref().map(|s| s.kind()),
        })
    }
}

// ---------------------------------------------------------------------------
// The closed strategy set

/// The closed set of interception strategies.
pub enum Strategy {
    Cache(CacheStrategy),
    Mock(MockStrategy),
    Block(BlockStrategy),
    Redirect(RedirectStrategy),
    Analysis(AnalysisStrategy),
    Conditional(ConditionalStrategy),
}

impl Strategy {
    /// Cache with a TTL spec like `"1h"`; an unparseable spec falls back to
    /// one hour.
    pub fn cache(ttl_spec: &str) -> Self {
        let ttl = parse_ttl(ttl_spec).unwrap_or(Duration::from_secs(3600));
        Strategy::Cache(CacheStrategy::new(ttl))
    }

    pub fn mock(value: Value) -> Self {
        Strategy::Mock(MockStrategy::new(MockData::Value(value)))
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Strategy::Block(BlockStrategy::new(reason))
    }

    pub fn redirect(target_name: impl Into<String>, target: NativeCall) -> Self {
        Strategy::Redirect(RedirectStrategy::new(target_name, target))
    }

    pub fn analyze() -> Self {
        Strategy::Analysis(AnalysisStrategy::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::Cache(_) => "cache",
            Strategy::Mock(_) => "mock",
            Strategy::Block(_) => "block",
            Strategy::Redirect(_) => "redirect",
            Strategy::Analysis(_) => "analyze",
            Strategy::Conditional(_) => "conditional",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Strategy::Cache(s) => s.priority,
            Strategy::Mock(s) => s.priority,
            Strategy::Block(s) => s.priority,
            Strategy::Redirect(s) => s.priority,
            Strategy::Analysis(s) => s.priority,
            Strategy::Conditional(s) => s.priority,
        }
    }

    pub fn should_intercept(&self, ctx: &HijackContext) -> bool {
        match self {
            Strategy::Cache(_) => true,
            Strategy::Mock(s) => s.should_intercept(ctx),
            Strategy::Block(_) => true,
            Strategy::Redirect(_) => true,
            Strategy::Analysis(_) => true,
            Strategy::Conditional(s) => s.should_intercept(ctx),
        }
    }

    pub fn handle(&self, ctx: &HijackContext, original: &NativeCall) -> HandleOutcome {
        match self {
            Strategy::Cache(s) => s.handle(ctx, original),
            Strategy::Mock(s) => s.handle(ctx),
            Strategy::Block(s) => s.handle(),
            Strategy::Redirect(s) => s.handle(ctx),
            Strategy::Analysis(s) => s.handle(ctx),
            Strategy::Conditional(s) => s.handle(ctx, original),
        }
    }

    /// JSON descriptor for registry listings.
    pub fn describe(&self) -> Value {
        let detail = match self {
            Strategy::Cache(s) => s.describe(),
            Strategy::Mock(s) => s.describe(),
            Strategy::Block(s) => s.describe(),
            Strategy::Redirect(s) => s.describe(),
            Strategy::Analysis(s) => s.describe(),
            Strategy::Conditional(s) => s.describe(),
        };
        json!({
            "kind": self.kind(),
            "priority": self.priority(),
            "options": detail,
        })
    }
}

impl From<CacheStrategy> for Strategy {
    fn from(s: CacheStrategy) -> Self {
        Strategy::Cache(s)
    }
}

impl From<MockStrategy> for Strategy {
    fn from(s: MockStrategy) -> Self {
        Strategy::Mock(s)
    }
}

impl From<BlockStrategy> for Strategy {
    fn from(s: BlockStrategy) -> Self {
        Strategy::Block(s)
    }
}

impl From<RedirectStrategy> for Strategy {
    fn from(s: RedirectStrategy) -> Self {
        Strategy::Redirect(s)
    }
}

impl From<AnalysisStrategy> for Strategy {
    fn from(s: AnalysisStrategy) -> Self {
        Strategy::Analysis(s)
    }
}

impl From<ConditionalStrategy> for Strategy {
    fn from(s: ConditionalStrategy) -> Self {
        Strategy::Conditional(s)
    }
}
