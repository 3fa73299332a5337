//! Metric event construction and the emission seam.
//!
//! The core's only output obligation is a well-formed event tuple of
//! (metric name, numeric value, dimension tags, timestamp). Serialization
//! and transport live behind the [`Emitter`] trait; the built-in
//! implementations render JSON lines through the `log` facade or collect
//! events in memory.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Feed tag applied to events whose monitor was not given an explicit one.
pub const DEFAULT_METRICS_FEED: &str = "metrics";

/// A single produced measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricEvent {
    pub feed: String,
    pub metric: String,
    pub value: i64,
    pub dimensions: BTreeMap<String, String>,
    /// Milliseconds since the UNIX epoch, captured as close to read time
    /// as possible.
    pub timestamp_ms: u64,
}

/// Builder carrying a feed and a set of fixed dimensions across the many
/// events one poll produces.
#[derive(Debug, Clone)]
pub struct MetricEventBuilder {
    feed: String,
    dimensions: BTreeMap<String, String>,
}

impl MetricEventBuilder {
    pub fn new(feed: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            dimensions: BTreeMap::new(),
        }
    }

    /// Adds one dimension tag.
    pub fn dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Adds every dimension from `dimensions`, overwriting on collision.
    pub fn dimensions(mut self, dimensions: &BTreeMap<String, String>) -> Self {
        self.dimensions
            .extend(dimensions.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Builds one event; the builder stays usable for the next metric of
    /// the same poll.
    pub fn build(&self, timestamp_ms: u64, metric: impl Into<String>, value: i64) -> MetricEvent {
        MetricEvent {
            feed: self.feed.clone(),
            metric: metric.into(),
            value,
            dimensions: self.dimensions.clone(),
            timestamp_ms,
        }
    }
}

/// Wall-clock milliseconds since the UNIX epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Sink for produced events. Implementations own serialization and
/// transport; the core never blocks on them beyond the call itself.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: MetricEvent);
}

/// Emits every event as one JSON line through `log::info!`.
#[derive(Debug, Default)]
pub struct LogEmitter;

impl Emitter for LogEmitter {
    fn emit(&self, event: MetricEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => log::info!(target: "deltamon::metrics", "{json}"),
            Err(err) => log::error!("failed to serialize metric event {event:?}: {err}"),
        }
    }
}

/// Stores emitted events in memory. Useful in tests and for embedders that
/// drain events on their own schedule.
#[derive(Debug, Default)]
pub struct CollectingEmitter {
    events: Mutex<Vec<MetricEvent>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything emitted so far.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().expect("emitter lock poisoned").clone()
    }

    /// Removes and returns everything emitted so far.
    pub fn drain(&self) -> Vec<MetricEvent> {
        std::mem::take(&mut *self.events.lock().expect("emitter lock poisoned"))
    }
}

impl Emitter for CollectingEmitter {
    fn emit(&self, event: MetricEvent) {
        self.events.lock().expect("emitter lock poisoned").push(event);
    }
}
