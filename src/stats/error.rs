//! Error types for counter snapshot parsing and delta computation.
//!
//! [`SnapshotParseError`] converts into [`std::io::Error`]
//! (`InvalidData`) so the reader-based parsers keep plain `io::Result`
//! signatures; tests unwrap the inner error with
//! [`extract_snapshot_parse_error`].

use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotParseError {
    #[error("expected {expected} fields but found {actual} at line {lineno}: `{line}`")]
    UnexpectedFieldCount {
        expected: usize,
        actual: usize,
        lineno: usize,
        line: String,
    },

    #[error("invalid numeric value `{value}` at line {lineno}: {source}")]
    InvalidValue {
        value: String,
        lineno: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("cpu index {index} outside expected range 0..{count} at line {lineno}")]
    CpuIndexOutOfRange {
        index: usize,
        count: usize,
        lineno: usize,
    },

    #[error("error during I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SnapshotParseError> for std::io::Error {
    fn from(err: SnapshotParseError) -> Self {
        match err {
            SnapshotParseError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Precondition violations when computing a delta between two snapshots.
///
/// These are recoverable and scoped: the caller skips the affected series
/// for the cycle instead of crashing.
#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("cpu count mismatch: prior snapshot has {prior} cpus, current has {current}")]
    CpuCountMismatch { prior: usize, current: usize },

    #[error("device mismatch: cannot delta `{current}` against `{prior}`")]
    DeviceMismatch { prior: String, current: String },
}

/// Extracts a `SnapshotParseError` from an `io::Error` that wrapped it.
///
/// Panics when the inner error is something else. Test assertions only.
#[cfg(test)]
pub(super) fn extract_snapshot_parse_error(err: &std::io::Error) -> &SnapshotParseError {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<SnapshotParseError>())
        .unwrap()
}
