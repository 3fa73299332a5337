//! Per-cpu accounting snapshots from a cgroup `cpuacct.usage_all` file.
//!
//! The file carries one header line followed by one line per logical cpu:
//!
//! ```text
//! cpu user system
//! 0 131090862395 57006115293
//! 1 130542639660 56990977344
//! ```
//!
//! Values are monotonically increasing tick counters, meaningful only as
//! the difference between two reads; [`CpuAcctSnapshot::cumulative_since`]
//! produces that difference.

use std::io::BufRead;
use std::path::PathBuf;

use crate::cgroup::CgroupDiscoverer;
use crate::fsutil;
use crate::pid::PidSource;

use super::error::{DeltaError, SnapshotParseError};

/// Subsystem name of the cpu accounting controller.
pub const CPUACCT_CGROUP: &str = "cpuacct";

const USAGE_ALL_FILE: &str = "cpuacct.usage_all";

/// One read of `cpuacct.usage_all`: parallel per-cpu user and system tick
/// arrays, indexed by logical cpu id. Both arrays always have the same
/// length, fixed at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuAcctSnapshot {
    usr_ticks: Vec<u64>,
    sys_ticks: Vec<u64>,
}

impl CpuAcctSnapshot {
    /// Parses a `cpuacct.usage_all` stream.
    ///
    /// The first line is a header and is discarded unconditionally. The
    /// snapshot is sized by the number of data lines; a cpu index outside
    /// that range is a hard parse error rather than a silent
    /// mis-assignment.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidData` error wrapping a [`SnapshotParseError`] on
    /// wrong field counts, non-numeric values, or out-of-range cpu
    /// indices.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Self> {
        let mut line = String::new();
        if buf.read_line(&mut line)? == 0 {
            // No header means no cpus; an empty snapshot is still valid.
            return Ok(Self {
                usr_ticks: Vec::new(),
                sys_ticks: Vec::new(),
            });
        }
        line.clear();

        let mut rows = Vec::new();
        let mut lineno = 1;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            rows.push(Self::parse_row(&line, lineno)?);
            line.clear();
        }

        let count = rows.len();
        let mut usr_ticks = vec![0u64; count];
        let mut sys_ticks = vec![0u64; count];
        for (lineno, cpu, usr, sys) in rows {
            if cpu >= count {
                return Err(SnapshotParseError::CpuIndexOutOfRange {
                    index: cpu,
                    count,
                    lineno,
                }
                .into());
            }
            usr_ticks[cpu] = usr;
            sys_ticks[cpu] = sys;
        }
        Ok(Self {
            usr_ticks,
            sys_ticks,
        })
    }

    fn parse_row(line: &str, lineno: usize) -> std::io::Result<(usize, usize, u64, u64)> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(SnapshotParseError::UnexpectedFieldCount {
                expected: 3,
                actual: fields.len(),
                lineno,
                line: line.trim().to_owned(),
            }
            .into());
        }
        let parse = |value: &str| -> std::io::Result<u64> {
            value
                .parse()
                .map_err(|source| SnapshotParseError::InvalidValue {
                    value: value.to_owned(),
                    lineno,
                    source,
                }
                .into())
        };
        Ok((
            lineno,
            parse(fields[0])? as usize,
            parse(fields[1])?,
            parse(fields[2])?,
        ))
    }

    pub fn cpu_count(&self) -> usize {
        self.usr_ticks.len()
    }

    pub fn usr_tick(&self, cpu: usize) -> u64 {
        self.usr_ticks[cpu]
    }

    pub fn sys_tick(&self, cpu: usize) -> u64 {
        self.sys_ticks[cpu]
    }

    /// Sum of user ticks across all cpus.
    pub fn usr_total(&self) -> u64 {
        self.usr_ticks.iter().sum()
    }

    /// Sum of system ticks across all cpus.
    pub fn sys_total(&self) -> u64 {
        self.sys_ticks.iter().sum()
    }

    /// Elapsed per-cpu ticks since `other`.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::CpuCountMismatch`] when the snapshots have a
    /// different cpu count (the machine changed shape between reads); the
    /// caller treats this as "skip this cycle".
    pub fn cumulative_since(&self, other: &Self) -> std::result::Result<CpuAcctDelta, DeltaError> {
        if self.cpu_count() != other.cpu_count() {
            return Err(DeltaError::CpuCountMismatch {
                prior: other.cpu_count(),
                current: self.cpu_count(),
            });
        }
        let diff = |now: &[u64], then: &[u64]| {
            now.iter()
                .zip(then)
                .map(|(&a, &b)| a as i64 - b as i64)
                .collect()
        };
        Ok(CpuAcctDelta {
            usr_ticks: diff(&self.usr_ticks, &other.usr_ticks),
            sys_ticks: diff(&self.sys_ticks, &other.sys_ticks),
        })
    }
}

/// Per-cpu elapsed ticks between two snapshots. Signed: a counter reset
/// surfaces as a negative delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuAcctDelta {
    usr_ticks: Vec<i64>,
    sys_ticks: Vec<i64>,
}

impl CpuAcctDelta {
    pub fn cpu_count(&self) -> usize {
        self.usr_ticks.len()
    }

    pub fn usr_tick(&self, cpu: usize) -> i64 {
        self.usr_ticks[cpu]
    }

    pub fn sys_tick(&self, cpu: usize) -> i64 {
        self.sys_ticks[cpu]
    }
}

/// Errors raised while reading a cpu accounting snapshot end to end.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Pid(#[from] crate::pid::Error),

    #[error(transparent)]
    Discover(#[from] crate::cgroup::Error),

    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),

    #[error("failed to parse accounting file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reads cpu accounting snapshots for the monitored process by coupling a
/// [`CgroupDiscoverer`] with a [`PidSource`].
#[derive(Debug)]
pub struct CpuAcct<D, P> {
    discoverer: D,
    pids: P,
}

impl<D: CgroupDiscoverer, P: PidSource> CpuAcct<D, P> {
    pub fn new(discoverer: D, pids: P) -> Self {
        Self { discoverer, pids }
    }

    /// Takes one snapshot, re-resolving the accounting directory first.
    ///
    /// Returns `Ok(None)` when the directory is currently unavailable
    /// (e.g. removed between polls); hard failures propagate.
    pub fn snapshot(&self) -> Result<Option<CpuAcctSnapshot>> {
        let pid = self.pids.pid()?;
        let Some(dir) = self.discoverer.discover(CPUACCT_CGROUP, pid)? else {
            return Ok(None);
        };
        let path = dir.join(USAGE_ALL_FILE);
        let mut reader = fsutil::open_file_reader(&path)?;
        let snapshot = CpuAcctSnapshot::from_reader(&mut reader)
            .map_err(|source| Error::Parse { path, source })?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::error::extract_snapshot_parse_error;
    use std::fmt::Write as _;

    fn snapshot(data: &str) -> CpuAcctSnapshot {
        CpuAcctSnapshot::from_reader(&mut data.as_bytes()).unwrap()
    }

    #[test]
    fn parses_header_plus_data_lines() {
        let data = "\
cpu user system
0 100 10
1 200 20
2 300 30
";
        let snap = snapshot(data);
        assert_eq!(snap.cpu_count(), 3);
        assert_eq!(snap.usr_tick(0), 100);
        assert_eq!(snap.sys_tick(2), 30);
        assert_eq!(snap.usr_total(), 600);
        assert_eq!(snap.sys_total(), 60);
    }

    #[test]
    fn data_line_count_fixes_cpu_count() {
        let mut data = String::from("cpu user system\n");
        for cpu in 0..128 {
            writeln!(data, "{cpu} 0 0").unwrap();
        }
        assert_eq!(snapshot(&data).cpu_count(), 128);
    }

    #[test]
    fn reordered_indices_assign_by_index_not_position() {
        let data = "\
cpu user system
1 200 20
0 100 10
";
        let snap = snapshot(data);
        assert_eq!(snap.usr_tick(0), 100);
        assert_eq!(snap.usr_tick(1), 200);
    }

    #[test]
    fn empty_input_yields_empty_snapshot() {
        assert_eq!(snapshot("").cpu_count(), 0);
    }

    #[test]
    fn wrong_field_count_fails() {
        let data = "cpu user system\n0 100\n";
        let err = CpuAcctSnapshot::from_reader(&mut data.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        match extract_snapshot_parse_error(&err) {
            SnapshotParseError::UnexpectedFieldCount {
                expected, actual, lineno, ..
            } => {
                assert_eq!(*expected, 3);
                assert_eq!(*actual, 2);
                assert_eq!(*lineno, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_numeric_value_fails() {
        let data = "cpu user system\n0 abc 10\n";
        let err = CpuAcctSnapshot::from_reader(&mut data.as_bytes()).unwrap_err();
        match extract_snapshot_parse_error(&err) {
            SnapshotParseError::InvalidValue { value, .. } => assert_eq!(value, "abc"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn out_of_range_cpu_index_fails() {
        let data = "cpu user system\n7 100 10\n";
        let err = CpuAcctSnapshot::from_reader(&mut data.as_bytes()).unwrap_err();
        match extract_snapshot_parse_error(&err) {
            SnapshotParseError::CpuIndexOutOfRange { index, count, .. } => {
                assert_eq!(*index, 7);
                assert_eq!(*count, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cumulative_since_is_element_wise() {
        let now = snapshot("h\n0 110 12\n1 220 24\n");
        let then = snapshot("h\n0 100 10\n1 200 20\n");
        let delta = now.cumulative_since(&then).unwrap();
        assert_eq!(delta.usr_tick(0), 10);
        assert_eq!(delta.sys_tick(0), 2);
        assert_eq!(delta.usr_tick(1), 20);
        assert_eq!(delta.sys_tick(1), 4);
    }

    #[test]
    fn cumulative_since_is_antisymmetric() {
        let a = snapshot("h\n0 110 12\n1 220 24\n");
        let b = snapshot("h\n0 100 18\n1 260 20\n");
        let ab = a.cumulative_since(&b).unwrap();
        let ba = b.cumulative_since(&a).unwrap();
        for cpu in 0..a.cpu_count() {
            assert_eq!(ab.usr_tick(cpu), -ba.usr_tick(cpu));
            assert_eq!(ab.sys_tick(cpu), -ba.sys_tick(cpu));
        }
    }

    #[test]
    fn identical_snapshots_yield_zero_delta() {
        let a = snapshot("h\n0 110 12\n1 220 24\n");
        let delta = a.cumulative_since(&a.clone()).unwrap();
        for cpu in 0..a.cpu_count() {
            assert_eq!(delta.usr_tick(cpu), 0);
            assert_eq!(delta.sys_tick(cpu), 0);
        }
    }

    #[test]
    fn cpu_count_mismatch_fails() {
        let two = snapshot("h\n0 1 1\n1 1 1\n");
        let one = snapshot("h\n0 1 1\n");
        let err = two.cumulative_since(&one).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::CpuCountMismatch { prior: 1, current: 2 }
        ));
    }

    struct FixedPath(std::path::PathBuf);

    impl CgroupDiscoverer for FixedPath {
        fn discover(
            &self,
            _cgroup: &str,
            _pid: u32,
        ) -> crate::cgroup::Result<Option<std::path::PathBuf>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct FixedPid(u32);

    impl PidSource for FixedPid {
        fn pid(&self) -> crate::pid::Result<u32> {
            Ok(self.0)
        }
    }

    #[test]
    fn source_reads_usage_all_from_discovered_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USAGE_ALL_FILE), "cpu user system\n0 5 7\n").unwrap();

        let source = CpuAcct::new(FixedPath(dir.path().to_path_buf()), FixedPid(384));
        let snap = source.snapshot().unwrap().unwrap();
        assert_eq!(snap.cpu_count(), 1);
        assert_eq!(snap.usr_tick(0), 5);
        assert_eq!(snap.sys_tick(0), 7);
    }

    #[test]
    fn source_propagates_missing_accounting_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = CpuAcct::new(FixedPath(dir.path().to_path_buf()), FixedPid(384));
        assert!(matches!(source.snapshot(), Err(Error::FileOpen(_))));
    }
}
