//! Call interception engine
//!
//! A `CallHijacker` wraps a callable with an ordered strategy chain. Per
//! call: build the context, emit a call notification, walk the chain in
//! priority order until one strategy owns the value, fall back to the
//! original, then emit return/error events and update metrics.
//!
//! Invariants: exactly one strategy owns the produced value; the original
//! runs at most once per call; ordering is deterministic given the
//! strategy list. Strategy-internal faults are logged and skipped, the
//! chain continues. Faults from the original (and intentional blocks)
//! propagate to the caller.
//!
//! The strategy list is snapshotted (a vector of `Arc`s) before the chain
//! runs, so no wrapper lock is held while user code executes and
//! re-decoration during an in-flight call is safe.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Environment;
use crate::correlation::{self, now_us, CorrelationScope};
use crate::error::{CallError, MysticError};
use crate::identity::FunctionIdentity;
use crate::logger::CallLogger;
use crate::strategies::{CallArgs, HijackContext, NativeCall, Strategy};
use crate::tracker::PerformanceTracker;

/// Phase of a call notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPhase {
    Call,
    Return,
    Error,
}

type NotificationFn = Box<dyn Fn(&Value) + Send + Sync>;

static MCP_CALLBACKS: Lazy<Mutex<Vec<NotificationFn>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Register a process-wide callback receiving every wrapper's call
/// notifications. Best-effort: panics are contained.
pub fn register_mcp_callback(callback: impl Fn(&Value) + Send + Sync + 'static) {
    if let Ok(mut callbacks) = MCP_CALLBACKS.lock() {
        callbacks.push(Box::new(callback));
    }
}

struct Slot {
    seq: u64,
    strategy: Arc<Strategy>,
}

/// Wrapper interposing a strategy chain on one callable.
pub struct CallHijacker {
    identity: FunctionIdentity,
    environment: Environment,
    original: NativeCall,
    strategies: RwLock<Vec<Slot>>,
    next_seq: AtomicU64,
    call_count: AtomicU64,
    last_args: Mutex<Option<CallArgs>>,
    last_result: Mutex<Option<Value>>,
    doc: Option<String>,
    signature: Option<String>,
    logger: Option<Arc<CallLogger>>,
    tracker: Option<Arc<PerformanceTracker>>,
    subscribers: Mutex<Vec<NotificationFn>>,
}

impl CallHijacker {
    pub fn identity(&self) -> &FunctionIdentity {
        &self.identity
    }

    /// The wrapped callable's docstring, preserved from registration.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// The wrapped callable's signature text, preserved from registration.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn original(&self) -> NativeCall {
        self.original.clone()
    }

    pub fn last_args(&self) -> Option<CallArgs> {
        self.last_args.lock().ok().and_then(|g| g.clone())
    }

    pub fn last_result(&self) -> Option<Value> {
        self.last_result.lock().ok().and_then(|g| g.clone())
    }

    /// Append a strategy; the chain re-sorts by priority (descending) with
    /// insertion order breaking ties.
    pub fn add_strategy(&self, strategy: Strategy) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slots) = self.strategies.write() {
            slots.push(Slot {
                seq,
                strategy: Arc::new(strategy),
            });
            sort_slots(&mut slots);
        }
    }

    /// Remove every strategy of the given kind (`"cache"`, `"mock"`, ...).
    pub fn remove_strategy(&self, kind: &str) -> usize {
        if let Ok(mut slots) = self.strategies.write() {
            let before = slots.len();
            slots.retain(|slot| slot.strategy.kind() != kind);
            return before - slots.len();
        }
        0
    }

    pub fn strategy_kinds(&self) -> Vec<&'static str> {
        self.strategies
            .read()
            .map(|slots| slots.iter().map(|s| s.strategy.kind()).collect())
            .unwrap_or_default()
    }

    pub fn describe_strategies(&self) -> Vec<Value> {
        self.strategies
            .read()
            .map(|slots| slots.iter().map(|s| s.strategy.describe()).collect())
            .unwrap_or_default()
    }

    /// Run a closure against a strategy of the given kind, if present.
    /// Used by tests and the MCP surface to reach strategy internals
    /// (e.g. analysis observations) without exposing the slot list.
    pub fn with_strategy<R>(&self, kind: &str, f: impl FnOnce(&Strategy) -> R) -> Option<R> {
        let slots = self.strategies.read().ok()?;
        slots
            .iter()
            .find(|slot| slot.strategy.kind() == kind)
            .map(|slot| f(&slot.strategy))
    }

    /// Subscribe to this wrapper's call notifications.
    pub fn on_notification(&self, callback: impl Fn(&Value) + Send + Sync + 'static) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Box::new(callback));
        }
    }

    /// Per-wrapper summary for listings and the MCP surface.
    pub fn metrics(&self) -> Value {
        json!({
            "function": self.identity.full_name(),
            "environment": self.environment.as_str(),
            "call_count": self.call_count(),
            "strategies": self.describe_strategies(),
        })
    }

    /// Invoke the wrapped callable through the strategy chain.
    pub fn call(&self, args: CallArgs) -> Result<Value, MysticError> {
        let call_count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let correlation_id = correlation::current_or_generate();
        let _scope = CorrelationScope::enter(correlation_id.clone());

        let ctx = HijackContext {
            identity: self.identity.clone(),
            args: args.clone(),
            correlation_id: correlation_id.to_string(),
            environment: self.environment,
            call_count,
            started_at_us: now_us(),
            metadata: BTreeMap::new(),
        };

        if let Some(logger) = &self.logger {
            logger.log_call(
                &self.identity,
                &args.args,
                &args.kwargs,
                Some(correlation_id.clone()),
            );
        }
        self.notify(&ctx, NotifyPhase::Call, None, None, None);

        let rss_before = self.tracker.as_ref().and_then(|t| t.probe_rss());
        let started = Instant::now();

        let chain: Vec<Arc<Strategy>> = self
            .strategies
            .read()
            .map(|slots| slots.iter().map(|s| s.strategy.clone()).collect())
            .unwrap_or_default();

        let mut owner: Option<&'static str> = None;
        let mut outcome = None;
        for strategy in &chain {
            if !strategy.should_intercept(&ctx) {
                continue;
            }
            match strategy.handle(&ctx, &self.original) {
                Ok(result) if result.executed => {
                    owner = Some(strategy.kind());
                    outcome = Some(result);
                    break;
                }
                Ok(_) => continue,
                Err(fault) => {
                    debug!("{fault}; skipping strategy");
                    if let Some(logger) = &self.logger {
                        logger.log_error(
                            &self.identity,
                            &CallError::new("StrategyFault", fault.to_string()),
                            started.elapsed(),
                            Some(correlation_id.clone()),
                        );
                    }
                    continue;
                }
            }
        }

        let result = match outcome {
            Some(result) => result,
            None => match (self.original)(&args) {
                Ok(value) => crate::strategies::HijackResult::with_value(value),
                Err(error) => crate::strategies::HijackResult::with_error(error),
            },
        };

        let elapsed = started.elapsed();
        let memory_delta = match (rss_before, self.tracker.as_ref().and_then(|t| t.probe_rss())) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        };

        if let Ok(mut last) = self.last_args.lock() {
            *last = Some(args);
        }

        if let Some(error) = result.error {
            if let Some(logger) = &self.logger {
                logger.log_error(&self.identity, &error, elapsed, Some(correlation_id));
            }
            if let Some(tracker) = &self.tracker {
                tracker.record_error(&self.identity, elapsed);
            }
            self.notify(
                &ctx,
                NotifyPhase::Error,
                owner,
                Some(elapsed.as_micros() as u64),
                Some(&error),
            );
            return Err(MysticError::from_call(error));
        }

        let value = result.result.unwrap_or(Value::Null);
        if let Ok(mut last) = self.last_result.lock() {
            *last = Some(value.clone());
        }
        if let Some(logger) = &self.logger {
            logger.log_return(&self.identity, &value, elapsed, Some(correlation_id));
        }
        if let Some(tracker) = &self.tracker {
            tracker.track(&self.identity, elapsed, memory_delta);
        }
        self.notify(
            &ctx,
            NotifyPhase::Return,
            owner,
            Some(elapsed.as_micros() as u64),
            None,
        );
        Ok(value)
    }

    fn notify(
        &self,
        ctx: &HijackContext,
        phase: NotifyPhase,
        owner: Option<&'static str>,
        duration_us: Option<u64>,
        error: Option<&CallError>,
    ) {
        let notification = json!({
            "type": match phase {
                NotifyPhase::Call => "call",
                NotifyPhase::Return => "return",
                NotifyPhase::Error => "error",
            },
            "function": ctx.identity.full_name(),
            "correlation_id": ctx.correlation_id,
            "environment": ctx.environment.as_str(),
            "call_count": ctx.call_count,
            "ts_us": now_us(),
            "strategy": owner,
            "duration_us": duration_us,
            "error": error.map(|e| e.to_string()),
        });

        if let Ok(subs) = self.subscribers.lock() {
            for callback in subs.iter() {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(&notification)
                }));
            }
        }
        if let Ok(callbacks) = MCP_CALLBACKS.lock() {
            for callback in callbacks.iter() {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(&notification)
                }));
            }
        }
    }
}

fn sort_slots(slots: &mut [Slot]) {
    slots.sort_by(|a, b| {
        b.strategy
            .priority()
            .cmp(&a.strategy.priority())
            .then(a.seq.cmp(&b.seq))
    });
}

/// Builder for a wrapper; the entry point of the decoration API.
pub struct HijackBuilder {
    identity: FunctionIdentity,
    original: NativeCall,
    strategies: Vec<Strategy>,
    environment: Environment,
    doc: Option<String>,
    signature: Option<String>,
    logger: Option<Arc<CallLogger>>,
    tracker: Option<Arc<PerformanceTracker>>,
}

/// Start wrapping `original` under `identity`.
pub fn hijack(identity: FunctionIdentity, original: NativeCall) -> HijackBuilder {
    HijackBuilder {
        identity,
        original,
        strategies: Vec::new(),
        environment: crate::config::MysticConfig::global().environment,
        doc: None,
        signature: None,
        logger: None,
        tracker: None,
    }
}

impl HijackBuilder {
    pub fn with(mut self, strategy: impl Into<Strategy>) -> Self {
        self.strategies.push(strategy.into());
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Preserve the callable's surface metadata on the wrapper.
    pub fn metadata(mut self, doc: Option<String>, signature: Option<String>) -> Self {
        self.doc = doc;
        self.signature = signature;
        self
    }

    pub fn logger(mut self, logger: Arc<CallLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn tracker(mut self, tracker: Arc<PerformanceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Build the wrapper without registering it.
    pub fn build(self) -> Arc<CallHijacker> {
        let hijacker = CallHijacker {
            identity: self.identity,
            environment: self.environment,
            original: self.original,
            strategies: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            call_count: AtomicU64::new(0),
            last_args: Mutex::new(None),
            last_result: Mutex::new(None),
            doc: self.doc,
            signature: self.signature,
            logger: self.logger,
            tracker: self.tracker,
            subscribers: Mutex::new(Vec::new()),
        };
        for strategy in self.strategies {
            hijacker.add_strategy(strategy);
        }
        Arc::new(hijacker)
    }

    /// Register in `registry`. Wrapping an identity that already has a
    /// wrapper is idempotent: the new strategies are appended to the
    /// existing wrapper and that wrapper is returned.
    pub fn register(self, registry: &HijackRegistry) -> Result<Arc<CallHijacker>, MysticError> {
        if let Some(existing) = registry.get(&self.identity) {
            for strategy in self.strategies {
                existing.add_strategy(strategy);
            }
            return Ok(existing);
        }
        let hijacker = self.build();
        registry.register(hijacker.clone(), false)?;
        Ok(hijacker)
    }
}

/// Process-wide map of identity → wrapper.
#[derive(Default)]
pub struct HijackRegistry {
    inner: RwLock<HashMap<FunctionIdentity, Arc<CallHijacker>>>,
}

impl HijackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a wrapper. A different wrapper under the same identity is a
    /// conflict unless `replace` is set.
    pub fn register(
        &self,
        hijacker: Arc<CallHijacker>,
        replace: bool,
    ) -> Result<(), MysticError> {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = inner.get(hijacker.identity()) {
            if !replace && !Arc::ptr_eq(existing, &hijacker) {
                return Err(MysticError::RegistryConflict {
                    identity: hijacker.identity().clone(),
                });
            }
        }
        inner.insert(hijacker.identity().clone(), hijacker);
        Ok(())
    }

    pub fn get(&self, identity: &FunctionIdentity) -> Option<Arc<CallHijacker>> {
        self.inner.read().ok()?.get(identity).cloned()
    }

    /// Remove the binding and hand back the original callable. The wrapper
    /// itself stays alive for in-flight references.
    pub fn unhijack(&self, identity: &FunctionIdentity) -> Result<NativeCall, MysticError> {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner
            .remove(identity)
            .map(|hijacker| hijacker.original())
            .ok_or_else(|| MysticError::NotFound(identity.full_name()))
    }

    pub fn list(&self) -> Vec<(FunctionIdentity, Vec<Value>)> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        let mut listed: Vec<_> = inner
            .iter()
            .map(|(id, h)| (id.clone(), h.describe_strategies()))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        listed
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unhijack everything.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.clear();
        }
    }
}

static GLOBAL_REGISTRY: Lazy<HijackRegistry> = Lazy::new(HijackRegistry::new);

/// The process-wide registry.
pub fn registry() -> &'static HijackRegistry {
    &GLOBAL_REGISTRY
}
