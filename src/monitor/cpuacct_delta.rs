use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cgroup::CgroupDiscoverer;
use crate::emitter::{DEFAULT_METRICS_FEED, Emitter, MetricEventBuilder, unix_millis};
use crate::error::ResultOkLogExt;
use crate::pid::PidSource;
use crate::stats::{CpuAcct, CpuAcctSnapshot};

use super::snapshot::{SnapshotSlot, Timestamped};
use super::{Monitor, MonitorState};

const CPU_TIME_DELTA_METRIC: &str = "cgroup/cpu_time_delta_ns";
const CPU_TIME_ELAPSED_METRIC: &str = "cgroup/cpu_time_delta_ns_elapsed";

/// Emits per-cpu user/system time deltas from the monitored process's
/// `cpuacct` cgroup.
///
/// The accounting directory is re-discovered on every poll. The first
/// successful poll only establishes a baseline; later polls emit one
/// usr and one sys delta per cpu plus an elapsed-time metric covering the
/// interval between the two snapshots.
#[derive(Debug)]
pub struct CpuAcctDeltaMonitor<D, P> {
    state: MonitorState,
    feed: String,
    dimensions: BTreeMap<String, String>,
    source: CpuAcct<D, P>,
    prior: SnapshotSlot<CpuAcctSnapshot>,
}

impl<D: CgroupDiscoverer, P: PidSource> CpuAcctDeltaMonitor<D, P> {
    pub fn new(discoverer: D, pids: P) -> Self {
        Self::with_feed(DEFAULT_METRICS_FEED, BTreeMap::new(), discoverer, pids)
    }

    pub fn with_feed(
        feed: impl Into<String>,
        dimensions: BTreeMap<String, String>,
        discoverer: D,
        pids: P,
    ) -> Self {
        Self {
            state: MonitorState::new(),
            feed: feed.into(),
            dimensions,
            source: CpuAcct::new(discoverer, pids),
            prior: SnapshotSlot::new(),
        }
    }

    fn builder(&self) -> MetricEventBuilder {
        MetricEventBuilder::new(self.feed.as_str()).dimensions(&self.dimensions)
    }

    /// One poll. Returns whether a delta was reported this cycle.
    fn do_monitor(&self, emitter: &dyn Emitter) -> bool {
        let observed = self.prior.load();
        let Some(snapshot) = self.source.snapshot().ok_warn().flatten() else {
            return false;
        };
        let timestamp_ms = unix_millis();
        let next = Arc::new(Timestamped::now(snapshot));

        if !self.prior.publish(&observed, Arc::clone(&next)) {
            log::debug!("pre-empted by a concurrent poll, skipping cpu accounting report");
            return false;
        }
        let Some(prior) = observed else {
            log::info!("first cpu accounting snapshot, caching baseline for the next poll");
            return false;
        };

        let delta = match next.value().cumulative_since(prior.value()) {
            Ok(delta) => delta,
            Err(err) => {
                log::warn!("{err}; skipping cpu accounting emission this cycle");
                return false;
            }
        };
        let elapsed = next.captured_at().duration_since(prior.captured_at());

        for cpu in 0..delta.cpu_count() {
            let builder = self.builder().dimension("cpuName", cpu.to_string());
            emitter.emit(builder.clone().dimension("cpuTime", "usr").build(
                timestamp_ms,
                CPU_TIME_DELTA_METRIC,
                delta.usr_tick(cpu),
            ));
            emitter.emit(builder.dimension("cpuTime", "sys").build(
                timestamp_ms,
                CPU_TIME_DELTA_METRIC,
                delta.sys_tick(cpu),
            ));
        }
        emitter.emit(self.builder().build(
            timestamp_ms,
            CPU_TIME_ELAPSED_METRIC,
            elapsed.as_nanos() as i64,
        ));
        true
    }
}

impl<D: CgroupDiscoverer + 'static, P: PidSource + 'static> Monitor for CpuAcctDeltaMonitor<D, P> {
    fn start(&self) {
        self.state.start();
    }

    fn monitor(&self, emitter: &dyn Emitter) -> bool {
        if !self.state.is_started() {
            return false;
        }
        self.do_monitor(emitter);
        self.state.is_started()
    }

    fn stop(&self) {
        self.state.stop();
    }
}
