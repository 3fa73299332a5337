use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use sysinfo::Networks;

use crate::diff::KeyedDiff;
use crate::emitter::{DEFAULT_METRICS_FEED, Emitter, MetricEventBuilder, unix_millis};
use crate::sysutil;

use super::{Monitor, MonitorState};

/// Interfaces that never carry interesting traffic.
const NET_NAME_BLACKLIST: &[&str] = &["lo"];

/// Host-level monitor over the shared OS-stats handle: memory and swap
/// gauges, per-cpu usage, and per-interface network deltas.
///
/// Not cgroup-scoped; this unit exists so a scheduler run can mix
/// OS-binding metrics with cgroup delta monitors behind the same
/// [`Monitor`] capability. Network counters are cumulative and go through
/// a [`KeyedDiff`], so the first poll only establishes baselines for them.
#[derive(Debug)]
pub struct SysMonitor {
    state: MonitorState,
    feed: String,
    dimensions: BTreeMap<String, String>,
    net: Mutex<NetState>,
}

#[derive(Debug)]
struct NetState {
    networks: Networks,
    diff: KeyedDiff<String>,
}

impl SysMonitor {
    pub fn new() -> Self {
        Self::with_feed(DEFAULT_METRICS_FEED, BTreeMap::new())
    }

    pub fn with_feed(feed: impl Into<String>, dimensions: BTreeMap<String, String>) -> Self {
        Self {
            state: MonitorState::new(),
            feed: feed.into(),
            dimensions,
            net: Mutex::new(NetState {
                networks: Networks::new_with_refreshed_list(),
                diff: KeyedDiff::new(),
            }),
        }
    }

    fn builder(&self) -> MetricEventBuilder {
        MetricEventBuilder::new(self.feed.as_str()).dimensions(&self.dimensions)
    }

    fn do_monitor(&self, emitter: &dyn Emitter) -> bool {
        let timestamp_ms = unix_millis();

        {
            let mut system = sysutil::shared_system()
                .lock()
                .expect("system handle lock poisoned");
            system.refresh_memory();
            system.refresh_cpu_usage();

            let builder = self.builder();
            emitter.emit(builder.build(timestamp_ms, "sys/mem/max", system.total_memory() as i64));
            emitter.emit(builder.build(timestamp_ms, "sys/mem/used", system.used_memory() as i64));
            emitter.emit(builder.build(timestamp_ms, "sys/swap/max", system.total_swap() as i64));
            emitter.emit(builder.build(timestamp_ms, "sys/swap/used", system.used_swap() as i64));

            for (index, cpu) in system.cpus().iter().enumerate() {
                emitter.emit(
                    self.builder()
                        .dimension("cpuName", index.to_string())
                        .build(timestamp_ms, "sys/cpu", cpu.cpu_usage().round() as i64),
                );
            }
        }

        let mut net = self.net.lock().expect("network state lock poisoned");
        let NetState { networks, diff } = &mut *net;
        networks.refresh_list();
        for (name, data) in networks.iter() {
            if NET_NAME_BLACKLIST.contains(&name.as_str()) {
                log::debug!("not monitoring net stats for `{name}`");
                continue;
            }
            let current = HashMap::from([
                ("sys/net/read/size".to_owned(), data.total_received()),
                ("sys/net/write/size".to_owned(), data.total_transmitted()),
            ]);
            if let Some(stats) = diff.to(name.clone(), current) {
                let builder = self.builder().dimension("netName", name.as_str());
                for (metric, value) in stats {
                    emitter.emit(builder.clone().build(timestamp_ms, metric, value));
                }
            }
        }
        true
    }
}

impl Default for SysMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor for SysMonitor {
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
