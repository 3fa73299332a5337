//! Per-device block I/O counters from `/proc/diskstats`.
//!
//! Each line carries 14 whitespace-run-delimited fields; see the kernel's
//! `Documentation/iostats.txt` for the layout. The field offsets are
//! purely positional, so the parser insists on the exact field count to
//! fail loudly if the kernel format ever drifts.

use std::io::BufRead;

use super::error::{DeltaError, SnapshotParseError};

const DISKSTATS_FIELD_COUNT: usize = 14;

/// One device's counters from a single read of the disk stats table.
///
/// All counters except `active_count` increase monotonically;
/// `active_count` is the number of I/Os currently in flight, a gauge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskDeviceSnapshot {
    pub device: String,
    pub read_complete: u64,
    pub read_merge: u64,
    pub read_sectors: u64,
    pub read_time_ms: u64,
    pub write_complete: u64,
    pub write_merge: u64,
    pub write_sectors: u64,
    pub write_time_ms: u64,
    pub active_count: u64,
    pub active_time_ms: u64,
    pub weighted_active_time_ms: u64,
}

impl DiskDeviceSnapshot {
    fn parse_line(line: &str, lineno: usize) -> std::io::Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != DISKSTATS_FIELD_COUNT {
            return Err(SnapshotParseError::UnexpectedFieldCount {
                expected: DISKSTATS_FIELD_COUNT,
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
        // Fields 0 and 1 are the major:minor pair, unused here.
        Ok(Self {
            device: fields[2].to_owned(),
            read_complete: parse(fields[3])?,
            read_merge: parse(fields[4])?,
            read_sectors: parse(fields[5])?,
            read_time_ms: parse(fields[6])?,
            write_complete: parse(fields[7])?,
            write_merge: parse(fields[8])?,
            write_sectors: parse(fields[9])?,
            write_time_ms: parse(fields[10])?,
            active_count: parse(fields[11])?,
            active_time_ms: parse(fields[12])?,
            weighted_active_time_ms: parse(fields[13])?,
        })
    }

    /// Counter movement since `other`.
    ///
    /// `active_count` is a gauge, not a counter, so its "delta" is defined
    /// as zero by convention rather than by subtraction.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::DeviceMismatch`] when the two records do not
    /// describe the same device.
    pub fn delta_since(&self, other: &Self) -> Result<DiskDeviceDelta, DeltaError> {
        if self.device != other.device {
            return Err(DeltaError::DeviceMismatch {
                prior: other.device.clone(),
                current: self.device.clone(),
            });
        }
        let diff = |now: u64, then: u64| now as i64 - then as i64;
        Ok(DiskDeviceDelta {
            device: self.device.clone(),
            read_complete: diff(self.read_complete, other.read_complete),
            read_merge: diff(self.read_merge, other.read_merge),
            read_sectors: diff(self.read_sectors, other.read_sectors),
            read_time_ms: diff(self.read_time_ms, other.read_time_ms),
            write_complete: diff(self.write_complete, other.write_complete),
            write_merge: diff(self.write_merge, other.write_merge),
            write_sectors: diff(self.write_sectors, other.write_sectors),
            write_time_ms: diff(self.write_time_ms, other.write_time_ms),
            active_count: 0,
            active_time_ms: diff(self.active_time_ms, other.active_time_ms),
            weighted_active_time_ms: diff(
                self.weighted_active_time_ms,
                other.weighted_active_time_ms,
            ),
        })
    }
}

/// Counter movement for one device between two reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskDeviceDelta {
    pub device: String,
    pub read_complete: i64,
    pub read_merge: i64,
    pub read_sectors: i64,
    pub read_time_ms: i64,
    pub write_complete: i64,
    pub write_merge: i64,
    pub write_sectors: i64,
    pub write_time_ms: i64,
    pub active_count: i64,
    pub active_time_ms: i64,
    pub weighted_active_time_ms: i64,
}

/// Parses a full disk stats table, one [`DiskDeviceSnapshot`] per line, in
/// table order.
///
/// # Errors
///
/// Any line that does not carry exactly 14 fields, or whose numeric fields
/// fail to parse, aborts the whole read with an `InvalidData` error
/// wrapping a [`SnapshotParseError`].
pub fn parse_diskstats<R: BufRead>(buf: &mut R) -> std::io::Result<Vec<DiskDeviceSnapshot>> {
    let mut devices = Vec::new();
    let mut line = String::new();
    let mut lineno = 0;
    while buf.read_line(&mut line)? != 0 {
        lineno += 1;
        devices.push(DiskDeviceSnapshot::parse_line(&line, lineno)?);
        line.clear();
    }
    Ok(devices)
}
