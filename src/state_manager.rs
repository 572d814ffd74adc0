//! Snapshot timeline and state store
//!
//! Snapshots are appended to an ordered timeline with a cursor. Navigation
//! moves only the cursor and deep-copies the targeted snapshot's data into
//! `current_state`; the snapshots themselves are never mutated. Ids are
//! monotone (`snapshot_N`) and list order equals capture order. When the
//! timeline exceeds its cap it is trimmed from the head; bookmarks hold ids,
//! so a bookmark whose snapshot was trimmed simply stops resolving.
//!
//! Watcher and breakpoint callbacks run after the timeline lock is
//! released, with panics contained, so a callback can safely call back into
//! the manager.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::correlation::now_us;
use crate::error::MysticError;

pub const EXPORT_VERSION: u32 = 1;
const DEFAULT_MAX_DEPTH: usize = 32;

/// What a snapshot captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Variable,
    FnArgs,
    FnReturn,
    Exception,
    Global,
    Local,
}

/// One captured state, addressable within the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub ts_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub kind: SnapshotKind,
    pub data: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Criteria for [`StateManager::list`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub kind: Option<SnapshotKind>,
    pub function: Option<String>,
    pub since_us: Option<u64>,
    pub until_us: Option<u64>,
}

impl SnapshotFilter {
    fn matches(&self, snapshot: &Snapshot) -> bool {
        self.kind.map(|k| snapshot.kind == k).unwrap_or(true)
            && self
                .function
                .as_deref()
                .map(|f| snapshot.function.as_deref() == Some(f))
                .unwrap_or(true)
            && self.since_us.map(|t| snapshot.ts_us >= t).unwrap_or(true)
            && self.until_us.map(|t| snapshot.ts_us <= t).unwrap_or(true)
    }
}

type WatcherFn = Arc<dyn Fn(&Snapshot) + Send + Sync>;
type KeyWatcherFn = Arc<dyn Fn(&str, Option<&Value>, &Value) + Send + Sync>;
type BreakpointFn = Arc<dyn Fn(&Snapshot) + Send + Sync>;

struct Inner {
    snapshots: VecDeque<Snapshot>,
    cursor: Option<usize>,
    counter: u64,
    bookmarks: HashMap<String, String>,
    current_state: Value,
    state_map: BTreeMap<String, Value>,
    watchers: Vec<WatcherFn>,
    key_watchers: HashMap<String, Vec<KeyWatcherFn>>,
    breakpoints: HashMap<(String, u32), BreakpointFn>,
}

/// Snapshot timeline with navigation, diffing, and export.
pub struct StateManager {
    inner: Mutex<Inner>,
    max_snapshots: usize,
    max_depth: usize,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl StateManager {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshots: VecDeque::new(),
                cursor: None,
                counter: 0,
                bookmarks: HashMap::new(),
                current_state: Value::Null,
                state_map: BTreeMap::new(),
                watchers: Vec::new(),
                key_watchers: HashMap::new(),
                breakpoints: HashMap::new(),
            }),
            max_snapshots: max_snapshots.max(1),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Capture a snapshot. Data nested beyond the depth cap is truncated to
    /// its string rendering at the violating depth; capture never fails.
    pub fn capture(
        &self,
        kind: SnapshotKind,
        data: Value,
        function: Option<&str>,
        line: Option<u32>,
        metadata: Option<BTreeMap<String, Value>>,
    ) -> String {
        let data = clamp_depth(data, self.max_depth);
        let (snapshot, watchers, breakpoint) = {
            let mut inner = self.lock();
            inner.counter += 1;
            let snapshot = Snapshot {
                id: format!("snapshot_{}", inner.counter),
                ts_us: now_us(),
                function: function.map(str::to_string),
                line,
                kind,
                data,
                metadata: metadata.unwrap_or_default(),
            };

            if inner.snapshots.len() == self.max_snapshots {
                inner.snapshots.pop_front();
                if let Some(cursor) = inner.cursor {
                    inner.cursor = cursor.checked_sub(1);
                }
            }
            inner.snapshots.push_back(snapshot.clone());
            inner.cursor = Some(inner.snapshots.len() - 1);
            inner.current_state = snapshot.data.clone();

            let breakpoint = match (&snapshot.function, snapshot.line) {
                (Some(function), Some(line)) => {
                    inner.breakpoints.get(&(function.clone(), line)).cloned()
                }
                _ => None,
            };
            (snapshot, inner.watchers.clone(), breakpoint)
        };

        // Callbacks run outside the lock so they may call back in.
        for watcher in &watchers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| watcher(&snapshot)));
        }
        if let Some(callback) = breakpoint {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&snapshot)));
        }

        snapshot.id
    }

    pub fn get(&self, id: &str) -> Option<Snapshot> {
        let inner = self.lock();
        inner.snapshots.iter().find(|s| s.id == id).cloned()
    }

    pub fn get_index(&self, index: usize) -> Option<Snapshot> {
        self.lock().snapshots.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots matching `filter`, in capture order, with offset/limit
    /// applied from the tail (newest-biased, like a log).
    pub fn list(
        &self,
        filter: &SnapshotFilter,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<Snapshot> {
        let inner = self.lock();
        let matched: Vec<Snapshot> = inner
            .snapshots
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        let end = matched.len().saturating_sub(offset);
        let start = limit.map(|l| end.saturating_sub(l)).unwrap_or(0);
        matched[start..end].to_vec()
    }

    /// Move the cursor to an absolute index; restores `current_state` from
    /// the targeted snapshot. Returns false when out of range.
    pub fn goto_index(&self, index: usize) -> bool {
        let mut inner = self.lock();
        if index >= inner.snapshots.len() {
            return false;
        }
        inner.cursor = Some(index);
        inner.current_state = inner.snapshots[index].data.clone();
        true
    }

    /// Move the cursor to a snapshot id.
    pub fn goto_id(&self, id: &str) -> Result<(), MysticError> {
        let mut inner = self.lock();
        let index = inner
            .snapshots
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| MysticError::NotFound(format!("snapshot {id}")))?;
        inner.cursor = Some(index);
        inner.current_state = inner.snapshots[index].data.clone();
        Ok(())
    }

    pub fn forward(&self, steps: usize) -> bool {
        let target = {
            let inner = self.lock();
            match inner.cursor {
                Some(cursor) => cursor + steps,
                None => return false,
            }
        };
        self.goto_index(target)
    }

    pub fn backward(&self, steps: usize) -> bool {
        let target = {
            let inner = self.lock();
            match inner.cursor.and_then(|c| c.checked_sub(steps)) {
                Some(target) => target,
                None => return false,
            }
        };
        self.goto_index(target)
    }

    pub fn cursor(&self) -> Option<usize> {
        self.lock().cursor
    }

    /// Deep copy of the state at the cursor.
    pub fn current_state(&self) -> Value {
        self.lock().current_state.clone()
    }

    /// Top-level diff of two snapshots. For mapping data the result is
    /// `{added, removed, changed}` with `changed` mapping each key to
    /// `[old, new]`; for anything else it is `{before, after}`.
    pub fn diff(&self, a_id: &str, b_id: &str) -> Result<Value, MysticError> {
        let a = self
            .get(a_id)
            .ok_or_else(|| MysticError::NotFound(format!("snapshot {a_id}")))?;
        let b = self
            .get(b_id)
            .ok_or_else(|| MysticError::NotFound(format!("snapshot {b_id}")))?;
        Ok(diff_values(&a.data, &b.data))
    }

    /// Name a snapshot id for later navigation.
    pub fn bookmark(&self, id: &str, name: &str) -> Result<(), MysticError> {
        let mut inner = self.lock();
        if !inner.snapshots.iter().any(|s| s.id == id) {
            return Err(MysticError::NotFound(format!("snapshot {id}")));
        }
        inner.bookmarks.insert(name.to_string(), id.to_string());
        Ok(())
    }

    pub fn goto_bookmark(&self, name: &str) -> Result<(), MysticError> {
        let id = {
            let inner = self.lock();
            inner
                .bookmarks
                .get(name)
                .cloned()
                .ok_or_else(|| MysticError::NotFound(format!("bookmark {name}")))?
        };
        self.goto_id(&id)
    }

    pub fn bookmarks(&self) -> BTreeMap<String, String> {
        self.lock()
            .bookmarks
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Register a callback invoked on every capture. Panics are contained.
    pub fn add_watcher(&self, watcher: impl Fn(&Snapshot) + Send + Sync + 'static) {
        self.lock().watchers.push(Arc::new(watcher));
    }

    /// Register a breakpoint: captures tagged with `(function, line)` fire
    /// the callback in addition to watchers.
    pub fn add_breakpoint(
        &self,
        function: &str,
        line: u32,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) {
        self.lock()
            .breakpoints
            .insert((function.to_string(), line), Arc::new(callback));
    }

    pub fn remove_breakpoint(&self, function: &str, line: u32) -> bool {
        self.lock()
            .breakpoints
            .remove(&(function.to_string(), line))
            .is_some()
    }

    /// Update one key of the mutable state map, firing per-key watchers and
    /// capturing a change snapshot when the value actually changed.
    pub fn update_state(&self, key: &str, value: Value) {
        let (changed, old) = {
            let mut inner = self.lock();
            let old = inner.state_map.get(key).cloned();
            let changed = old.as_ref() != Some(&value);
            inner.state_map.insert(key.to_string(), value.clone());
            (changed, old)
        };

        let key_watchers = {
            let inner = self.lock();
            inner.key_watchers.get(key).cloned().unwrap_or_default()
        };
        for watcher in &key_watchers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                watcher(key, old.as_ref(), &value)
            }));
        }

        if changed {
            let mut metadata = BTreeMap::new();
            metadata.insert("changed_key".to_string(), json!(key));
            self.capture(
                SnapshotKind::Variable,
                json!({ key: value }),
                None,
                None,
                Some(metadata),
            );
        }
    }

    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.lock().state_map.get(key).cloned()
    }

    /// Watch one key of the state map.
    pub fn add_key_watcher(
        &self,
        key: &str,
        watcher: impl Fn(&str, Option<&Value>, &Value) + Send + Sync + 'static,
    ) {
        self.lock()
            .key_watchers
            .entry(key.to_string())
            .or_default()
            .push(Arc::new(watcher));
    }

    /// Serialize the whole timeline.
    pub fn export(&self) -> Value {
        let inner = self.lock();
        json!({
            "version": EXPORT_VERSION,
            "cursor": inner.cursor,
            "bookmarks": inner.bookmarks,
            "snapshots": inner.snapshots.iter().collect::<Vec<_>>(),
        })
    }

    pub fn export_to(&self, path: &Path) -> Result<(), MysticError> {
        let payload = serde_json::to_string_pretty(&self.export())
            .map_err(|e| MysticError::Config(format!("export serialization: {e}")))?;
        std::fs::write(path, payload)
            .map_err(|e| MysticError::Config(format!("export write: {e}")))?;
        Ok(())
    }

    /// Replace the timeline with an exported form; the cursor resets to the
    /// last snapshot.
    pub fn import(&self, timeline: &Value) -> Result<usize, MysticError> {
        let snapshots: Vec<Snapshot> = timeline
            .get("snapshots")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| MysticError::Config(format!("import: bad snapshot list: {e}")))?
            .ok_or_else(|| MysticError::Config("import: missing snapshots".to_string()))?;
        let bookmarks: HashMap<String, String> = timeline
            .get("bookmarks")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| MysticError::Config(format!("import: bad bookmarks: {e}")))?
            .unwrap_or_default();

        let mut inner = self.lock();
        inner.counter = snapshots
            .iter()
            .filter_map(|s| s.id.strip_prefix("snapshot_")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        inner.snapshots = snapshots.into_iter().collect();
        inner.bookmarks = bookmarks;
        inner.cursor = inner.snapshots.len().checked_sub(1);
        inner.current_state = inner
            .snapshots
            .back()
            .map(|s| s.data.clone())
            .unwrap_or(Value::Null);
        Ok(inner.snapshots.len())
    }

    pub fn import_from(&self, path: &Path) -> Result<usize, MysticError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MysticError::Config(format!("import read: {e}")))?;
        let timeline: Value = serde_json::from_str(&raw)
            .map_err(|e| MysticError::Config(format!("import parse: {e}")))?;
        self.import(&timeline)
    }

    /// Summary for the MCP timeline tool.
    pub fn timeline_summary(&self) -> Value {
        let inner = self.lock();
        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        for snapshot in inner.snapshots.iter() {
            let tag = serde_json::to_value(snapshot.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            *by_kind.entry(tag).or_insert(0) += 1;
        }
        json!({
            "count": inner.snapshots.len(),
            "cursor": inner.cursor,
            "bookmarks": inner.bookmarks.keys().cloned().collect::<Vec<_>>(),
            "by_kind": by_kind,
        })
    }

    /// Drop all snapshots, bookmarks, and state.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.snapshots.clear();
        inner.cursor = None;
        inner.counter = 0;
        inner.bookmarks.clear();
        inner.current_state = Value::Null;
        inner.state_map.clear();
    }
}

/// Truncate a value at `max_depth` levels of nesting; the violating level
/// is replaced by its compact string rendering.
fn clamp_depth(value: Value, max_depth: usize) -> Value {
    if max_depth == 0 {
        let rendered = value.to_string();
        debug!("snapshot data exceeded depth cap; truncated to string form");
        return Value::String(rendered);
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| clamp_depth(v, max_depth - 1))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, clamp_depth(v, max_depth - 1)))
                .collect(),
        ),
        scalar => scalar,
    }
}

fn diff_values(a: &Value, b: &Value) -> Value {
    match (a.as_object(), b.as_object()) {
        (Some(before), Some(after)) => {
            let mut added = serde_json::Map::new();
            let mut removed = serde_json::Map::new();
            let mut changed = serde_json::Map::new();
            for (key, value) in after {
                match before.get(key) {
                    None => {
                        added.insert(key.clone(), value.clone());
                    }
                    Some(old) if old != value => {
                        changed.insert(key.clone(), json!([old, value]));
                    }
                    Some(_) => {}
                }
            }
            for (key, value) in before {
                if !after.contains_key(key) {
                    removed.insert(key.clone(), value.clone());
                }
            }
            json!({"added": added, "removed": removed, "changed": changed})
        }
        _ => json!({"before": a, "after": b}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn manager() -> StateManager {
        StateManager::new(100)
    }

    #[test]
    fn ids_are_monotone_and_order_preserved() {
        let state = manager();
        let a = state.capture(SnapshotKind::Variable, json!(1), None, None, None);
        let b = state.capture(SnapshotKind::Variable, json!(2), None, None, None);
        assert_eq!(a, "snapshot_1");
        assert_eq!(b, "snapshot_2");
        assert_eq!(state.get_index(0).unwrap().data, json!(1));
        assert_eq!(state.get_index(1).unwrap().data, json!(2));
    }

    #[test]
    fn capture_moves_cursor_to_tail() {
        let state = manager();
        state.capture(SnapshotKind::Global, json!({"a": 1}), None, None, None);
        state.capture(SnapshotKind::Global, json!({"a": 2}), None, None, None);
        assert_eq!(state.cursor(), Some(1));
        assert_eq!(state.current_state(), json!({"a": 2}));
    }

    #[test]
    fn goto_restores_state_without_mutating_snapshots() {
        let state = manager();
        state.capture(SnapshotKind::Global, json!({"x": 1}), None, None, None);
        state.capture(SnapshotKind::Global, json!({"x": 2}), None, None, None);

        assert!(state.goto_index(0));
        assert_eq!(state.current_state(), json!({"x": 1}));
        assert_eq!(state.cursor(), Some(0));
        // Timeline itself untouched.
        assert_eq!(state.len(), 2);
        assert_eq!(state.get_index(1).unwrap().data, json!({"x": 2}));
    }

    #[test]
    fn goto_out_of_range_is_false() {
        let state = manager();
        assert!(!state.goto_index(0));
        state.capture(SnapshotKind::Global, json!(1), None, None, None);
        assert!(!state.goto_index(5));
    }

    #[test]
    fn forward_backward_navigation() {
        let state = manager();
        for i in 0..4 {
            state.capture(SnapshotKind::Global, json!(i), None, None, None);
        }
        assert!(state.backward(2));
        assert_eq!(state.cursor(), Some(1));
        assert!(state.forward(1));
        assert_eq!(state.cursor(), Some(2));
        assert!(!state.backward(10));
        assert!(!state.forward(10));
    }

    #[test]
    fn head_trim_at_cap_adjusts_cursor() {
        let state = StateManager::new(3);
        for i in 0..5 {
            state.capture(SnapshotKind::Global, json!(i), None, None, None);
        }
        assert_eq!(state.len(), 3);
        assert_eq!(state.get_index(0).unwrap().data, json!(2));
        // Ids keep counting past the trim.
        assert_eq!(state.get_index(2).unwrap().id, "snapshot_5");
    }

    #[test]
    fn diff_of_mappings() {
        let state = manager();
        let a = state.capture(SnapshotKind::Global, json!({"a": 1, "b": 2}), None, None, None);
        let b = state.capture(
            SnapshotKind::Global,
            json!({"a": 1, "b": 3, "c": 4}),
            None,
            None,
            None,
        );
        let diff = state.diff(&a, &b).unwrap();
        assert_eq!(diff["added"], json!({"c": 4}));
        assert_eq!(diff["removed"], json!({}));
        assert_eq!(diff["changed"], json!({"b": [2, 3]}));
    }

    #[test]
    fn diff_of_non_mappings() {
        let state = manager();
        let a = state.capture(SnapshotKind::Variable, json!(1), None, None, None);
        let b = state.capture(SnapshotKind::Variable, json!([1, 2]), None, None, None);
        let diff = state.diff(&a, &b).unwrap();
        assert_eq!(diff, json!({"before": 1, "after": [1, 2]}));
    }

    #[test]
    fn diff_unknown_snapshot_is_not_found() {
        let state = manager();
        let a = state.capture(SnapshotKind::Variable, json!(1), None, None, None);
        assert!(state.diff(&a, "snapshot_99").is_err());
    }

    #[test]
    fn bookmarks_resolve_by_id() {
        let state = manager();
        let a = state.capture(SnapshotKind::Global, json!({"x": 1}), None, None, None);
        state.capture(SnapshotKind::Global, json!({"x": 2}), None, None, None);
        state.bookmark(&a, "before-change").unwrap();
        state.goto_bookmark("before-change").unwrap();
        assert_eq!(state.current_state(), json!({"x": 1}));
        assert!(state.goto_bookmark("missing").is_err());
    }

    #[test]
    fn list_filters_by_kind_and_function() {
        let state = manager();
        state.capture(SnapshotKind::FnArgs, json!([1]), Some("f"), None, None);
        state.capture(SnapshotKind::FnReturn, json!(2), Some("f"), None, None);
        state.capture(SnapshotKind::FnArgs, json!([3]), Some("g"), None, None);

        let only_args = state.list(
            &SnapshotFilter {
                kind: Some(SnapshotKind::FnArgs),
                ..Default::default()
            },
            None,
            0,
        );
        assert_eq!(only_args.len(), 2);

        let only_f = state.list(
            &SnapshotFilter {
                function: Some("f".to_string()),
                ..Default::default()
            },
            None,
            0,
        );
        assert_eq!(only_f.len(), 2);
    }

    #[test]
    fn list_limit_takes_newest() {
        let state = manager();
        for i in 0..5 {
            state.capture(SnapshotKind::Global, json!(i), None, None, None);
        }
        let latest = state.list(&SnapshotFilter::default(), Some(2), 0);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].data, json!(3));
        assert_eq!(latest[1].data, json!(4));
    }

    #[test]
    fn watchers_fire_on_capture_and_panics_contained() {
        let state = manager();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        state.add_watcher(|_| panic!("watcher bug"));
        state.add_watcher(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        state.capture(SnapshotKind::Global, json!(1), None, None, None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn breakpoints_fire_on_matching_capture() {
        let state = manager();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        state.add_breakpoint("compute", 42, move |snapshot| {
            assert_eq!(snapshot.line, Some(42));
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        state.capture(SnapshotKind::Local, json!(1), Some("compute"), Some(42), None);
        state.capture(SnapshotKind::Local, json!(1), Some("compute"), Some(43), None);
        state.capture(SnapshotKind::Local, json!(1), Some("other"), Some(42), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(state.remove_breakpoint("compute", 42));
        assert!(!state.remove_breakpoint("compute", 42));
    }

    #[test]
    fn update_state_snapshots_only_changes() {
        let state = manager();
        state.update_state("counter", json!(1));
        state.update_state("counter", json!(1));
        state.update_state("counter", json!(2));
        assert_eq!(state.len(), 2);
        assert_eq!(state.state_value("counter"), Some(json!(2)));
    }

    #[test]
    fn key_watchers_see_old_and_new() {
        let state = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        state.add_key_watcher("x", move |_, old, new| {
            seen2
                .lock()
                .unwrap()
                .push((old.cloned(), new.clone()));
        });
        state.update_state("x", json!(1));
        state.update_state("x", json!(2));
        let observed = seen.lock().unwrap().clone();
        assert_eq!(observed[0], (None, json!(1)));
        assert_eq!(observed[1], (Some(json!(1)), json!(2)));
    }

    #[test]
    fn export_import_round_trip() {
        let state = manager();
        let a = state.capture(SnapshotKind::Global, json!({"x": 1}), Some("f"), Some(3), None);
        state.capture(SnapshotKind::Exception, json!("boom"), None, None, None);
        state.bookmark(&a, "start").unwrap();

        let exported = state.export();
        assert_eq!(exported["version"], EXPORT_VERSION as u64);

        let restored = StateManager::new(100);
        let count = restored.import(&exported).unwrap();
        assert_eq!(count, 2);
        assert_eq!(restored.cursor(), Some(1));
        assert_eq!(restored.get(&a).unwrap().data, json!({"x": 1}));
        assert_eq!(restored.bookmarks().get("start"), Some(&a));

        // Ids continue after the imported max.
        let next = restored.capture(SnapshotKind::Global, json!(1), None, None, None);
        assert_eq!(next, "snapshot_3");
    }

    #[test]
    fn export_import_via_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("timeline.json");
        let state = manager();
        state.capture(SnapshotKind::Global, json!({"k": true}), None, None, None);
        state.export_to(&path).unwrap();

        let restored = StateManager::new(100);
        assert_eq!(restored.import_from(&path).unwrap(), 1);
        assert_eq!(restored.current_state(), json!({"k": true}));
    }

    #[test]
    fn import_rejects_malformed_payload() {
        let state = manager();
        assert!(state.import(&json!({"version": 1})).is_err());
        assert!(state.import(&json!({"snapshots": "nope"})).is_err());
    }

    #[test]
    fn deep_data_is_clamped_not_fatal() {
        let state = StateManager::new(10).with_max_depth(2);
        let id = state.capture(
            SnapshotKind::Global,
            json!({"a": {"b": {"c": 1}}}),
            None,
            None,
            None,
        );
        let data = state.get(&id).unwrap().data;
        assert_eq!(data["a"]["b"], json!("{\"c\":1}"));
    }

    #[test]
    fn timeline_summary_counts_kinds() {
        let state = manager();
        state.capture(SnapshotKind::Global, json!(1), None, None, None);
        state.capture(SnapshotKind::Global, json!(2), None, None, None);
        state.capture(SnapshotKind::Exception, json!("x"), None, None, None);
        let summary = state.timeline_summary();
        assert_eq!(summary["count"], 3);
        assert_eq!(summary["by_kind"]["global"], 2);
        assert_eq!(summary["by_kind"]["exception"], 1);
    }

    #[test]
    fn clear_resets_everything() {
        let state = manager();
        state.capture(SnapshotKind::Global, json!(1), None, None, None);
        state.clear();
        assert!(state.is_empty());
        assert_eq!(state.cursor(), None);
        let id = state.capture(SnapshotKind::Global, json!(1), None, None, None);
        assert_eq!(id, "snapshot_1");
    }
}
