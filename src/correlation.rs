//! Correlation ids and the per-thread call context
//!
//! Every call/return/error event for one invocation carries the same
//! correlation id. The id is 128 bits of randomness rendered as 32 lowercase
//! hex characters, unique for the process lifetime.
//!
//! The store is thread-scoped: an id set by an outer frame is inherited by
//! nested calls on the same thread. A cross-thread activity map records the
//! last time each id was seen, under a single lock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Microseconds since the Unix epoch.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// A 128-bit correlation id in lowercase hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept an externally supplied id (e.g. a JSON-RPC request id).
    pub fn from_external(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

thread_local! {
    static CURRENT: RefCell<Option<CorrelationId>> = const { RefCell::new(None) };
}

static ACTIVITY: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Generate a fresh id and record it in the activity map.
pub fn generate() -> CorrelationId {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    let mut hex = String::with_capacity(32);
    for b in bytes {
        hex.push_str(&format!("{b:02x}"));
    }
    let id = CorrelationId(hex);
    touch(&id);
    id
}

/// Set the current id for this thread.
pub fn set_current(id: CorrelationId) {
    touch(&id);
    CURRENT.with(|c| *c.borrow_mut() = Some(id));
}

/// The current id for this thread, if any.
pub fn current() -> Option<CorrelationId> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Clear this thread's current id.
pub fn clear() {
    CURRENT.with(|c| *c.borrow_mut() = None);
}

/// Record activity for an id in the cross-thread map.
pub fn touch(id: &CorrelationId) {
    if let Ok(mut map) = ACTIVITY.lock() {
        map.insert(id.0.clone(), now_us());
    }
}

/// Last-seen timestamp (µs) for an id, if it has been active.
pub fn last_seen(id: &CorrelationId) -> Option<u64> {
    ACTIVITY.lock().ok().and_then(|map| map.get(id.as_str()).copied())
}

/// RAII frame: sets `id` current on entry and restores the previous id on
/// drop, which is what lets nested calls inherit the outer frame's id while
/// the outermost frame cleans up after itself.
pub struct CorrelationScope {
    previous: Option<CorrelationId>,
}

impl CorrelationScope {
    pub fn enter(id: CorrelationId) -> Self {
        let previous = current();
        set_current(id);
        Self { previous }
    }
}

impl Drop for CorrelationScope {
    fn drop(&mut self) {
        CURRENT.with(|c| *c.borrow_mut() = self.previous.take());
    }
}

/// The current id if set, otherwise a freshly generated one.
pub fn current_or_generate() -> CorrelationId {
    current().unwrap_or_else(generate)
}
