use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::emitter::{Emitter, MetricEventBuilder, unix_millis};
use crate::error::ResultOkLogExt;
use crate::fsutil;
use crate::stats::{DiskDeviceSnapshot, parse_diskstats};

use super::snapshot::{SnapshotSlot, Timestamped};
use super::{Monitor, MonitorState};

const DISKSTATS_PATH: &str = "/proc/diskstats";

/// Emits per-device disk counters from `/proc/diskstats`.
///
/// Totals are emitted on every successful poll, including the first;
/// deltas are emitted once a prior snapshot exists, and only for devices
/// present in both reads. A device that appeared since the prior read is
/// reported as totals and skipped for deltas with a warning; one that
/// disappeared simply has no current series.
#[derive(Debug)]
pub struct ProcDiskStatsDeltaMonitor {
    state: MonitorState,
    feed: String,
    dimensions: BTreeMap<String, String>,
    diskstats_path: PathBuf,
    prior: SnapshotSlot<Vec<DiskDeviceSnapshot>>,
}

impl ProcDiskStatsDeltaMonitor {
    pub fn new(feed: impl Into<String>, dimensions: BTreeMap<String, String>) -> Self {
        Self::with_diskstats_path(feed, dimensions, DISKSTATS_PATH)
    }

    /// Reads from `diskstats_path` instead of `/proc/diskstats`.
    pub fn with_diskstats_path(
        feed: impl Into<String>,
        dimensions: BTreeMap<String, String>,
        diskstats_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state: MonitorState::new(),
            feed: feed.into(),
            dimensions,
            diskstats_path: diskstats_path.into(),
            prior: SnapshotSlot::new(),
        }
    }

    fn builder(&self, device: &str) -> MetricEventBuilder {
        MetricEventBuilder::new(self.feed.as_str())
            .dimensions(&self.dimensions)
            .dimension("device", device)
    }

    /// One poll. Returns whether anything was reported this cycle.
    fn do_monitor(&self, emitter: &dyn Emitter) -> bool {
        let observed = self.prior.load();
        let Some(mut reader) = fsutil::open_file_reader(&self.diskstats_path).ok_warn() else {
            return false;
        };
        let Some(devices) = parse_diskstats(&mut reader).ok_warn() else {
            return false;
        };
        let timestamp_ms = unix_millis();
        let next = Arc::new(Timestamped::now(devices));

        if !self.prior.publish(&observed, Arc::clone(&next)) {
            log::debug!("lost the race for reporting disk stats, skipping report");
            return false;
        }

        // Totals go out on every cycle, baseline or not.
        for device in next.value() {
            self.emit_totals(emitter, timestamp_ms, device);
        }

        let Some(prior) = observed else {
            log::debug!("first disk stats snapshot, skipping deltas");
            return true;
        };

        let prior_by_device: HashMap<&str, &DiskDeviceSnapshot> = prior
            .value()
            .iter()
            .map(|device| (device.device.as_str(), device))
            .collect();

        for device in next.value() {
            let Some(previous) = prior_by_device.get(device.device.as_str()).copied() else {
                log::warn!("skipping delta for new device `{}`", device.device);
                continue;
            };
            match device.delta_since(previous) {
                Ok(delta) => {
                    let builder = self.builder(&delta.device);
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/read/complete/delta",
                        delta.read_complete,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/read/merge/delta",
                        delta.read_merge,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/read/sector/delta",
                        delta.read_sectors,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/read/timeMs/delta",
                        delta.read_time_ms,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/write/complete/delta",
                        delta.write_complete,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/write/merge/delta",
                        delta.write_merge,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/write/sector/delta",
                        delta.write_sectors,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/write/timeMs/delta",
                        delta.write_time_ms,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/timeMs/delta",
                        delta.active_time_ms,
                    ));
                    emitter.emit(builder.build(
                        timestamp_ms,
                        "sys/disk/weightedTimeMs/delta",
                        delta.weighted_active_time_ms,
                    ));
                }
                Err(err) => log::warn!("{err}; skipping delta for `{}`", device.device),
            }
        }

        let elapsed = next.captured_at().duration_since(prior.captured_at());
        emitter.emit(MetricEventBuilder::new(self.feed.as_str())
            .dimensions(&self.dimensions)
            .build(
                timestamp_ms,
                "sys/disk/metricTimeNs/delta",
                elapsed.as_nanos() as i64,
            ));
        true
    }

    fn emit_totals(&self, emitter: &dyn Emitter, timestamp_ms: u64, device: &DiskDeviceSnapshot) {
        let builder = self.builder(&device.device);
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/read/complete/total",
            device.read_complete as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/read/merge/total",
            device.read_merge as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/read/sector/total",
            device.read_sectors as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/read/timeMs/total",
            device.read_time_ms as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/write/complete/total",
            device.write_complete as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/write/merge/total",
            device.write_merge as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/write/sector/total",
            device.write_sectors as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/write/timeMs/total",
            device.write_time_ms as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/timeMs/total",
            device.active_time_ms as i64,
        ));
        emitter.emit(builder.build(
            timestamp_ms,
            "sys/disk/weightedTimeMs/total",
            device.weighted_active_time_ms as i64,
        ));
        // In-flight I/O count is a gauge; it has totals but no delta.
        emitter.emit(builder.build(timestamp_ms, "sys/disk/queue", device.active_count as i64));
    }
}

impl Monitor for ProcDiskStatsDeltaMonitor {
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
