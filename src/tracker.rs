//! Per-function performance accounting
//!
//! The tracker keeps one rolling `MetricsEntry` per function identity. Mean
//! and variance use Welford's online algorithm so no second pass over raw
//! samples is ever needed. All fields of a single update become visible
//! atomically: every mutation happens under one lock acquisition.
//!
//! The lock is a plain `Mutex` rather than anything re-entrant; callers
//! never re-enter the tracker from inside an update. On a single-threaded
//! hot path the mutex is uncontended and its fast path is a handful of
//! atomic instructions, which keeps the per-call overhead within budget
//! even without a dedicated unsynchronized mode.
//!
//! Memory sampling is optional and reads the process RSS from procfs;
//! probe failures are swallowed and recorded as an absent delta.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::correlation::now_us;
use crate::identity::FunctionIdentity;

/// Rolling statistics for one function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEntry {
    pub call_count: u64,
    pub error_count: u64,
    pub total_time_us: u64,
    pub min_time_us: u64,
    pub max_time_us: u64,
    /// Welford running mean, in microseconds.
    pub mean_us: f64,
    /// Welford running sum of squared deviations.
    pub m2: f64,
    pub last_time_us: u64,
    pub last_called_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
}

/// Aggregated RSS deltas for one function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_delta_bytes: i64,
    pub peak_delta_bytes: i64,
    pub samples: u64,
}

impl MetricsEntry {
    fn new() -> Self {
        Self {
            call_count: 0,
            error_count: 0,
            total_time_us: 0,
            min_time_us: u64::MAX,
            max_time_us: 0,
            mean_us: 0.0,
            m2: 0.0,
            last_time_us: 0,
            last_called_us: 0,
            memory: None,
        }
    }

    fn update(&mut self, duration: Duration, memory_delta: Option<i64>, is_error: bool) {
        let micros = duration.as_micros() as u64;
        self.call_count += 1;
        if is_error {
            self.error_count += 1;
        }
        self.total_time_us += micros;
        self.min_time_us = self.min_time_us.min(micros);
        self.max_time_us = self.max_time_us.max(micros);
        self.last_time_us = micros;
        self.last_called_us = now_us();

        // Welford step.
        let x = micros as f64;
        let delta = x - self.mean_us;
        self.mean_us += delta / self.call_count as f64;
        self.m2 += delta * (x - self.mean_us);

        if let Some(delta_bytes) = memory_delta {
            let mem = self.memory.get_or_insert_with(MemoryStats::default);
            mem.total_delta_bytes += delta_bytes;
            mem.peak_delta_bytes = mem.peak_delta_bytes.max(delta_bytes);
            mem.samples += 1;
        }
    }

    /// Sample variance in µs², `None` until two samples exist.
    pub fn variance_us(&self) -> Option<f64> {
        if self.call_count < 2 {
            None
        } else {
            Some(self.m2 / (self.call_count - 1) as f64)
        }
    }

    pub fn std_dev_us(&self) -> Option<f64> {
        self.variance_us().map(f64::sqrt)
    }
}

/// Which metric a threshold watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    ExecutionTimeUs,
    PeakMemoryBytes,
    CallCount,
}

type MetricCallback = Box<dyn Fn(&FunctionIdentity, &MetricsEntry) + Send + Sync>;
type ThresholdCallback =
    Box<dyn Fn(&FunctionIdentity, &MetricsEntry, ThresholdKind, f64) + Send + Sync>;

struct ThresholdWatch {
    kind: ThresholdKind,
    limit: f64,
    callback: ThresholdCallback,
}

/// Self-measured tracker overhead, from the last 1000 updates.
#[derive(Debug, Clone, Serialize)]
pub struct OverheadReport {
    pub samples: usize,
    pub avg_ns: f64,
    pub max_ns: u64,
}

/// Per-function rolling statistics with bounded, self-measured overhead.
pub struct PerformanceTracker {
    entries: Mutex<HashMap<FunctionIdentity, MetricsEntry>>,
    callbacks: Mutex<Vec<MetricCallback>>,
    thresholds: Mutex<Vec<ThresholdWatch>>,
    overhead_ns: Mutex<Vec<u64>>,
    memory_probe: bool,
}

const OVERHEAD_RING: usize = 1000;

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(false)
    }
}

impl PerformanceTracker {
    pub fn new(memory_probe: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
            thresholds: Mutex::new(Vec::new()),
            overhead_ns: Mutex::new(Vec::with_capacity(OVERHEAD_RING)),
            memory_probe,
        }
    }

    pub fn memory_probe_enabled(&self) -> bool {
        self.memory_probe
    }

    /// Record a successful call.
    pub fn track(&self, identity: &FunctionIdentity, duration: Duration, memory_delta: Option<i64>) {
        self.track_outcome(identity, duration, memory_delta, false);
    }

    /// Record a call that ended in an error; the duration covers the time
    /// up to the throw.
    pub fn record_error(&self, identity: &FunctionIdentity, duration: Duration) {
        self.track_outcome(identity, duration, None, true);
    }

    fn track_outcome(
        &self,
        identity: &FunctionIdentity,
        duration: Duration,
        memory_delta: Option<i64>,
        is_error: bool,
    ) {
        let started = Instant::now();
        let snapshot = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let entry = entries
                .entry(identity.clone())
                .or_insert_with(MetricsEntry::new);
            entry.update(duration, memory_delta, is_error);
            entry.clone()
        };

        self.fire_callbacks(identity, &snapshot);
        self.check_thresholds(identity, &snapshot);

        if let Ok(mut ring) = self.overhead_ns.lock() {
            if ring.len() == OVERHEAD_RING {
                ring.remove(0);
            }
            ring.push(started.elapsed().as_nanos() as u64);
        }
    }

    fn fire_callbacks(&self, identity: &FunctionIdentity, entry: &MetricsEntry) {
        let callbacks = match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for cb in callbacks.iter() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(identity, entry)));
        }
    }

    fn check_thresholds(&self, identity: &FunctionIdentity, entry: &MetricsEntry) {
        let watches = match self.thresholds.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for watch in watches.iter() {
            let value = match watch.kind {
                ThresholdKind::ExecutionTimeUs => entry.last_time_us as f64,
                ThresholdKind::PeakMemoryBytes => entry
                    .memory
                    .as_ref()
                    .map(|m| m.peak_delta_bytes as f64)
                    .unwrap_or(0.0),
                ThresholdKind::CallCount => entry.call_count as f64,
            };
            if value > watch.limit {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    (watch.callback)(identity, entry, watch.kind, watch.limit)
                }));
            }
        }
    }

    /// Register a callback fired after every update. Faults are swallowed.
    pub fn add_metric_callback(
        &self,
        callback: impl Fn(&FunctionIdentity, &MetricsEntry) + Send + Sync + 'static,
    ) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    /// Register a threshold watch; the callback fires whenever the watched
    /// metric exceeds `limit` after an update.
    pub fn add_threshold_callback(
        &self,
        kind: ThresholdKind,
        limit: f64,
        callback: impl Fn(&FunctionIdentity, &MetricsEntry, ThresholdKind, f64) + Send + Sync + 'static,
    ) {
        if let Ok(mut watches) = self.thresholds.lock() {
            watches.push(ThresholdWatch {
                kind,
                limit,
                callback: Box::new(callback),
            });
        }
    }

    pub fn get(&self, identity: &FunctionIdentity) -> Option<MetricsEntry> {
        self.entries.lock().ok()?.get(identity).cloned()
    }

    /// A point-in-time copy of every entry.
    pub fn snapshot(&self) -> HashMap<FunctionIdentity, MetricsEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Reset one identity, or everything when `identity` is `None`.
    pub fn reset(&self, identity: Option<&FunctionIdentity>) {
        if let Ok(mut entries) = self.entries.lock() {
            match identity {
                Some(id) => {
                    entries.remove(id);
                }
                None => entries.clear(),
            }
        }
        if identity.is_none() {
            if let Ok(mut ring) = self.overhead_ns.lock() {
                ring.clear();
            }
        }
    }

    /// Current process RSS in bytes, read from `/proc/self/status`.
    /// Returns `None` when the probe is disabled or the read fails.
    pub fn probe_rss(&self) -> Option<i64> {
        if !self.memory_probe {
            return None;
        }
        read_rss_bytes()
    }

    pub fn overhead_report(&self) -> OverheadReport {
        let ring = match self.overhead_ns.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.is_empty() {
            return OverheadReport {
                samples: 0,
                avg_ns: 0.0,
                max_ns: 0,
            };
        }
        let sum: u64 = ring.iter().sum();
        OverheadReport {
            samples: ring.len(),
            avg_ns: sum as f64 / ring.len() as f64,
            max_ns: ring.iter().copied().max().unwrap_or(0),
        }
    }

    /// JSON report: totals plus top-N tables by time, calls, and mean.
    pub fn report(&self) -> serde_json::Value {
        let entries = self.snapshot();
        let total_calls: u64 = entries.values().map(|m| m.call_count).sum();
        let total_time_us: u64 = entries.values().map(|m| m.total_time_us).sum();
        let total_errors: u64 = entries.values().map(|m| m.error_count).sum();

        json!({
            "generated_at_us": now_us(),
            "summary": {
                "functions_tracked": entries.len(),
                "total_calls": total_calls,
                "total_time_us": total_time_us,
                "total_errors": total_errors,
            },
            "overhead": self.overhead_report(),
            "top_by_time": top_table(&entries, |m| m.total_time_us as f64),
            "top_by_calls": top_table(&entries, |m| m.call_count as f64),
            "top_by_mean": top_table(&entries, |m| m.mean_us),
            "functions": entries
                .iter()
                .map(|(id, m)| (id.full_name(), serde_json::to_value(m).unwrap_or_default()))
                .collect::<serde_json::Map<String, serde_json::Value>>(),
        })
    }
}

fn top_table(
    entries: &HashMap<FunctionIdentity, MetricsEntry>,
    key: impl Fn(&MetricsEntry) -> f64,
) -> serde_json::Value {
    let mut rows: Vec<_> = entries.iter().collect();
    rows.sort_by(|a, b| {
        key(b.1)
            .partial_cmp(&key(a.1))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows.truncate(10);
    json!(rows
        .into_iter()
        .map(|(id, m)| json!({
            "function": id.full_name(),
            "value": key(m),
            "call_count": m.call_count,
        }))
        .collect::<Vec<_>>())
}

fn read_rss_bytes() -> Option<i64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: i64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn id(name: &str) -> FunctionIdentity {
        FunctionIdentity::new("tests", name)
    }

    #[test]
    fn counts_and_totals() {
        let tracker = PerformanceTracker::default();
        let f = id("f");
        tracker.track(&f, Duration::from_micros(100), None);
        tracker.track(&f, Duration::from_micros(300), None);
        tracker.track(&f, Duration::from_micros(200), None);

        let m = tracker.get(&f).unwrap();
        assert_eq!(m.call_count, 3);
        assert_eq!(m.total_time_us, 600);
        assert_eq!(m.min_time_us, 100);
        assert_eq!(m.max_time_us, 300);
        assert_eq!(m.last_time_us, 200);
        assert!((m.mean_us - 200.0).abs() < 1e-9);
    }

    #[test]
    fn welford_matches_naive_variance() {
        let tracker = PerformanceTracker::default();
        let f = id("f");
        let samples = [120u64, 80, 95, 310, 42, 200, 77];
        for s in samples {
            tracker.track(&f, Duration::from_micros(s), None);
        }
        let m = tracker.get(&f).unwrap();
        let mean = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
        let naive_var = samples
            .iter()
            .map(|&s| (s as f64 - mean).powi(2))
            .sum::<f64>()
            / (samples.len() - 1) as f64;
        assert!((m.mean_us - mean).abs() < 1e-6);
        assert!((m.variance_us().unwrap() - naive_var).abs() < 1e-6);
    }

    #[test]
    fn variance_needs_two_samples() {
        let tracker = PerformanceTracker::default();
        let f = id("f");
        tracker.track(&f, Duration::from_micros(50), None);
        assert!(tracker.get(&f).unwrap().variance_us().is_none());
    }

    #[test]
    fn errors_are_counted_separately() {
        let tracker = PerformanceTracker::default();
        let f = id("f");
        tracker.track(&f, Duration::from_micros(10), None);
        tracker.record_error(&f, Duration::from_micros(20));

        let m = tracker.get(&f).unwrap();
        assert_eq!(m.call_count, 2);
        assert_eq!(m.error_count, 1);
        assert_eq!(m.total_time_us, 30);
    }

    #[test]
    fn memory_deltas_aggregate() {
        let tracker = PerformanceTracker::default();
        let f = id("f");
        tracker.track(&f, Duration::from_micros(10), Some(4096));
        tracker.track(&f, Duration::from_micros(10), Some(1024));
        tracker.track(&f, Duration::from_micros(10), None);

        let mem = tracker.get(&f).unwrap().memory.unwrap();
        assert_eq!(mem.total_delta_bytes, 5120);
        assert_eq!(mem.peak_delta_bytes, 4096);
        assert_eq!(mem.samples, 2);
    }

    #[test]
    fn reset_single_identity() {
        let tracker = PerformanceTracker::default();
        tracker.track(&id("a"), Duration::from_micros(10), None);
        tracker.track(&id("b"), Duration::from_micros(10), None);
        tracker.reset(Some(&id("a")));
        assert!(tracker.get(&id("a")).is_none());
        assert!(tracker.get(&id("b")).is_some());
    }

    #[test]
    fn reset_all() {
        let tracker = PerformanceTracker::default();
        tracker.track(&id("a"), Duration::from_micros(10), None);
        tracker.reset(None);
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn metric_callbacks_fire() {
        let tracker = PerformanceTracker::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        tracker.add_metric_callback(move |_, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        tracker.track(&id("f"), Duration::from_micros(10), None);
        tracker.track(&id("f"), Duration::from_micros(10), None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_callback_does_not_poison_tracking() {
        let tracker = PerformanceTracker::default();
        tracker.add_metric_callback(|_, _| panic!("subscriber bug"));
        tracker.track(&id("f"), Duration::from_micros(10), None);
        tracker.track(&id("f"), Duration::from_micros(10), None);
        assert_eq!(tracker.get(&id("f")).unwrap().call_count, 2);
    }

    #[test]
    fn threshold_callback_fires_above_limit() {
        let tracker = PerformanceTracker::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        tracker.add_threshold_callback(ThresholdKind::ExecutionTimeUs, 100.0, move |_, _, _, _| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        tracker.track(&id("f"), Duration::from_micros(50), None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tracker.track(&id("f"), Duration::from_micros(500), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn call_count_threshold() {
        let tracker = PerformanceTracker::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        tracker.add_threshold_callback(ThresholdKind::CallCount, 2.0, move |_, _, kind, limit| {
            assert_eq!(kind, ThresholdKind::CallCount);
            assert_eq!(limit, 2.0);
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..3 {
            tracker.track(&id("f"), Duration::from_micros(1), None);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overhead_report_populates() {
        let tracker = PerformanceTracker::default();
        for _ in 0..5 {
            tracker.track(&id("f"), Duration::from_micros(10), None);
        }
        let report = tracker.overhead_report();
        assert_eq!(report.samples, 5);
        assert!(report.max_ns >= report.avg_ns as u64);
    }

    #[test]
    fn probe_disabled_returns_none() {
        let tracker = PerformanceTracker::new(false);
        assert!(tracker.probe_rss().is_none());
    }

    #[test]
    fn probe_enabled_reads_rss_on_linux() {
        let tracker = PerformanceTracker::new(true);
        if let Some(rss) = tracker.probe_rss() {
            assert!(rss > 0);
        }
    }

    #[test]
    fn report_shape() {
        let tracker = PerformanceTracker::default();
        tracker.track(&id("hot"), Duration::from_micros(900), None);
        tracker.track(&id("cold"), Duration::from_micros(5), None);
        let report = tracker.report();
        assert_eq!(report["summary"]["functions_tracked"], 2);
        assert_eq!(report["summary"]["total_calls"], 2);
        let top = report["top_by_time"].as_array().unwrap();
        assert_eq!(top[0]["function"], "tests::hot");
    }

    #[test]
    fn concurrent_updates_are_consistent() {
        let tracker = Arc::new(PerformanceTracker::default());
        let mut handles = vec![];
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    tracker.track(&id("shared"), Duration::from_micros(10), None);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let m = tracker.get(&id("shared")).unwrap();
        assert_eq!(m.call_count, 800);
        assert_eq!(m.total_time_us, 8000);
    }
}
