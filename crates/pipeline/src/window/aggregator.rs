//! Concurrent window store.
//!
//! Fixed windows live in a [`DashMap`] keyed by `(window_key, window_start)`;
//! each update is a read-modify-write under that entry's shard guard.
//! Session windows are kept per key, also under the key's entry guard, so
//! merges see a consistent set of sessions.
//!
//! Windows go OPEN -> CLOSED when the watermark passes their end, and are
//! evicted once their end is older than the retention period.
//!
//! Event time is tracked per source partition. The watermark follows the
//! slowest partition seen so far, minus the allowed lateness, so a partition
//! that lags behind a busier one does not have its events turned away.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use kurier_core::config::WindowConfig;
use kurier_core::{AggregateWindow, EnrichedEvent, PipelineStats, WindowState};

use super::assigner::WindowAssigner;

/// Result of offering one event to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// Number of windows the event was applied to.
    Applied(usize),
    /// Every target window was closed or already evicted.
    Late,
}

pub struct WindowedAggregator {
    assigner: WindowAssigner,
    allowed_lateness_ms: i64,
    retention_ms: i64,
    windows: DashMap<(String, i64), AggregateWindow>,
    sessions: DashMap<String, Vec<AggregateWindow>>,
    /// Newest applied event time per source partition.
    partition_marks: DashMap<u32, i64>,
    watermark: AtomicI64,
    stats: Arc<PipelineStats>,
}

impl WindowedAggregator {
    pub fn new(
        assigner: WindowAssigner,
        allowed_lateness: Duration,
        retention: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            assigner,
            allowed_lateness_ms: allowed_lateness.as_millis() as i64,
            retention_ms: retention.as_millis() as i64,
            windows: DashMap::new(),
            sessions: DashMap::new(),
            partition_marks: DashMap::new(),
            watermark: AtomicI64::new(i64::MIN),
            stats,
        }
    }

    pub fn from_config(config: &WindowConfig, stats: Arc<PipelineStats>) -> Self {
        Self::new(
            WindowAssigner::from_config(config),
            Duration::from_secs(config.allowed_lateness_secs),
            Duration::from_secs(config.retention_secs),
            stats,
        )
    }

    pub fn assigner(&self) -> WindowAssigner {
        self.assigner
    }

    /// Current watermark in epoch milliseconds; `i64::MIN` before any event.
    pub fn watermark(&self) -> i64 {
        self.watermark.load(Ordering::Acquire)
    }

    /// Apply an enriched event to the window(s) under `key`.
    pub fn aggregate(&self, key: &str, event: &EnrichedEvent) -> AggregateOutcome {
        self.aggregate_from(0, key, event)
    }

    /// [`aggregate`](Self::aggregate) for an event read from `partition`.
    pub fn aggregate_from(&self, partition: u32, key: &str, event: &EnrichedEvent) -> AggregateOutcome {
        self.aggregate_value_from(
            partition,
            key,
            event.source_timestamp,
            event.numeric_value(),
            &event.source_entity_id,
        )
    }

    pub fn aggregate_value(&self, key: &str, ts: i64, value: f64, source_key: &str) -> AggregateOutcome {
        self.aggregate_value_from(0, key, ts, value, source_key)
    }

    pub fn aggregate_value_from(
        &self,
        partition: u32,
        key: &str,
        ts: i64,
        value: f64,
        source_key: &str,
    ) -> AggregateOutcome {
        let watermark = self.watermark();
        let outcome = if ts < watermark.saturating_sub(self.retention_ms) {
            AggregateOutcome::Late
        } else {
            match self.assigner {
                WindowAssigner::Session { gap_ms } => {
                    self.apply_session(key, ts, value, source_key, gap_ms, watermark)
                }
                _ => self.apply_fixed(key, ts, value, source_key, watermark),
            }
        };

        match outcome {
            AggregateOutcome::Late => {
                self.stats.record_late_event();
                debug!(key, ts, watermark, "late event dropped");
            }
            AggregateOutcome::Applied(_) => self.observe(partition, ts),
        }
        outcome
    }

    /// Record `ts` for `partition` and raise the watermark to the slowest
    /// partition's mark.
    fn observe(&self, partition: u32, ts: i64) {
        self.partition_marks
            .entry(partition)
            .and_modify(|mark| *mark = (*mark).max(ts))
            .or_insert(ts);
        let slowest = self
            .partition_marks
            .iter()
            .map(|entry| *entry.value())
            .min()
            .unwrap_or(ts);
        self.watermark
            .fetch_max(slowest.saturating_sub(self.allowed_lateness_ms), Ordering::AcqRel);
    }

    fn apply_fixed(&self, key: &str, ts: i64, value: f64, source_key: &str, watermark: i64) -> AggregateOutcome {
        let mut applied = 0;
        for (start, end) in self.assigner.fixed_windows(ts) {
            if end <= watermark {
                continue;
            }
            let mut entry = self
                .windows
                .entry((key.to_string(), start))
                .or_insert_with(|| AggregateWindow::open(key, start, end));
            if entry.is_open() {
                entry.apply(ts, value, source_key);
                applied += 1;
            }
        }
        if applied == 0 {
            AggregateOutcome::Late
        } else {
            AggregateOutcome::Applied(applied)
        }
    }

    fn apply_session(
        &self,
        key: &str,
        ts: i64,
        value: f64,
        source_key: &str,
        gap_ms: i64,
        watermark: i64,
    ) -> AggregateOutcome {
        let mut sessions = self.sessions.entry(key.to_string()).or_default();
        let reaches = |w: &AggregateWindow| ts >= w.window_start - gap_ms && ts < w.window_end;

        if sessions.iter().any(|w| !w.is_open() && reaches(w)) {
            return AggregateOutcome::Late;
        }
        if ts + gap_ms <= watermark {
            return AggregateOutcome::Late;
        }

        let (bridged, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *sessions)
            .into_iter()
            .partition(|w| w.is_open() && reaches(w));

        let mut merged = AggregateWindow::open(key, ts, ts + gap_ms);
        for w in bridged {
            merged.window_start = merged.window_start.min(w.window_start);
            merged.window_end = merged.window_end.max(w.window_end);
            merged.count += w.count;
            merged.sum += w.sum;
            merged.distinct_keys.extend(w.distinct_keys);
            merged.last_update = merged.last_update.max(w.last_update);
        }
        merged.apply(ts, value, source_key);

        *sessions = rest;
        sessions.push(merged);
        sessions.sort_by_key(|w| w.window_start);
        AggregateOutcome::Applied(1)
    }

    /// Close every open window whose end is at or before the watermark.
    /// Each window is returned exactly once.
    pub fn advance_watermark(&self) -> Vec<AggregateWindow> {
        self.close_where(|w| w.window_end <= self.watermark())
    }

    /// Raise the watermark (never lowers it), then close ready windows.
    pub fn advance_watermark_to(&self, watermark: i64) -> Vec<AggregateWindow> {
        self.watermark.fetch_max(watermark, Ordering::AcqRel);
        self.advance_watermark()
    }

    /// Close every open window regardless of the watermark.
    pub fn flush(&self) -> Vec<AggregateWindow> {
        self.close_where(|_| true)
    }

    fn close_where(&self, ready: impl Fn(&AggregateWindow) -> bool) -> Vec<AggregateWindow> {
        let mut closed = Vec::new();
        for mut entry in self.windows.iter_mut() {
            let window = entry.value_mut();
            if window.is_open() && ready(window) {
                window.state = WindowState::Closed;
                closed.push(window.clone());
            }
        }
        for mut entry in self.sessions.iter_mut() {
            for window in entry.value_mut().iter_mut() {
                if window.is_open() && ready(window) {
                    window.state = WindowState::Closed;
                    closed.push(window.clone());
                }
            }
        }
        closed.sort_by(|a, b| {
            (a.window_end, &a.window_key, a.window_start).cmp(&(b.window_end, &b.window_key, b.window_start))
        });
        closed
    }

    /// Drop closed windows whose end is older than `now_ms - retention`.
    pub fn evict_expired(&self, now_ms: i64) -> usize {
        let floor = now_ms.saturating_sub(self.retention_ms);
        let expired = |w: &AggregateWindow| !w.is_open() && w.window_end <= floor;

        let before = self.windows.len();
        self.windows.retain(|_, w| !expired(w));
        let mut evicted = before - self.windows.len();

        for mut entry in self.sessions.iter_mut() {
            let sessions = entry.value_mut();
            let n = sessions.len();
            sessions.retain(|w| !expired(w));
            evicted += n - sessions.len();
        }
        self.sessions.retain(|_, sessions| !sessions.is_empty());

        if evicted > 0 {
            debug!(evicted, floor, "evicted expired windows");
        }
        evicted
    }

    /// Open and closed windows under `key` overlapping `[from, to)`.
    pub fn snapshot(&self, key: &str, from: i64, to: i64) -> Vec<AggregateWindow> {
        let mut result: Vec<AggregateWindow> = if self.assigner.is_session() {
            self.sessions
                .get(key)
                .map(|sessions| sessions.iter().filter(|w| w.overlaps(from, to)).cloned().collect())
                .unwrap_or_default()
        } else {
            self.windows
                .iter()
                .filter(|entry| entry.key().0 == key && entry.value().overlaps(from, to))
                .map(|entry| entry.value().clone())
                .collect()
        };
        result.sort_by_key(|w| w.window_start);
        result
    }

    /// Number of windows held, in any state.
    pub fn len(&self) -> usize {
        self.windows.len() + self.sessions.iter().map(|e| e.value().len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open_windows(&self) -> usize {
        let fixed = self.windows.iter().filter(|e| e.value().is_open()).count();
        let sessions: usize = self
            .sessions
            .iter()
            .map(|e| e.value().iter().filter(|w| w.is_open()).count())
            .sum();
        fixed + sessions
    }
}

/// Run [`WindowedAggregator::evict_expired`] every `interval` against the
/// wall clock until `shutdown` turns `true`.
pub fn spawn_eviction_sweep(
    aggregator: Arc<WindowedAggregator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    aggregator.evict_expired(chrono::Utc::now().timestamp_millis());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("window eviction sweep stopped");
    })
}
