//! Parsers for raw kernel accounting counters.
//!
//! Each parser turns one pseudo-filesystem table into an immutable
//! structured snapshot; the snapshot types carry the delta operations the
//! monitors build on. Parsers are pure functions over supplied text and
//! hold no state between calls.

pub mod cpuacct;
pub mod diskstats;
mod error;

pub use cpuacct::{CPUACCT_CGROUP, CpuAcct, CpuAcctDelta, CpuAcctSnapshot};
pub use diskstats::{DiskDeviceDelta, DiskDeviceSnapshot, parse_diskstats};
pub use error::{DeltaError, SnapshotParseError};
