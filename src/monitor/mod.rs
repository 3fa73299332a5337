//! Pluggable monitor units and the race-safe delta-monitor pattern.
//!
//! A monitor unit is anything the scheduler can poll on a fixed period:
//! cgroup-backed delta monitors, the OS-binding system monitor, or
//! embedder-defined units. The scheduler depends only on the [`Monitor`]
//! capability, never on a concrete metric source.
//!
//! The delta monitors in this module share one pattern: read a snapshot of
//! monotonic counters, exchange it through a compare-and-swap
//! [`SnapshotSlot`], and emit the element-wise difference against the
//! snapshot the slot held before. A lost exchange, a first-run baseline,
//! or a dimensionality change each skip the cycle's affected series and
//! nothing else.

mod cpuacct_delta;
mod diskstats_delta;
mod snapshot;
mod sys;

pub use cpuacct_delta::CpuAcctDeltaMonitor;
pub use diskstats_delta::ProcDiskStatsDeltaMonitor;
pub use snapshot::{SnapshotSlot, Timestamped};
pub use sys::SysMonitor;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::emitter::Emitter;

/// A schedulable monitor unit.
///
/// `start` and `stop` bracket the unit's scheduled lifetime; `monitor`
/// performs one poll-and-emit cycle and returns whether polling should
/// continue. Poll-internal failures degrade to skipped cycles and still
/// signal continue; only a stopped unit signals stop.
pub trait Monitor: Send + Sync {
    fn start(&self);

    fn monitor(&self, emitter: &dyn Emitter) -> bool;

    fn stop(&self);
}

/// Started flag shared by the built-in monitors.
#[derive(Debug, Default)]
pub struct MonitorState {
    started: AtomicBool,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
