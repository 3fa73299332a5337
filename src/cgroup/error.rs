use std::num::ParseIntError;
use std::path::PathBuf;

use crate::fsutil;

/// Errors raised while resolving a cgroup directory from the kernel tables.
///
/// Malformed table rows and missing subsystem/hierarchy entries are hard
/// errors: they signal a format incompatibility or a configuration
/// mismatch, never a transient condition. Transient conditions (a resolved
/// directory that no longer exists, a relocated proc mount) are *not*
/// errors; discovery reports them as an absent result instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),

    #[error("failed to read line from `{path}`: {source}")]
    ReadLine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed mount table entry: `{line}`")]
    MalformedMountsEntry { line: String },

    #[error("malformed subsystem table entry: `{line}`")]
    MalformedCgroupsEntry { line: String },

    #[error("malformed pid membership entry: `{line}`")]
    MalformedPidCgroupEntry { line: String },

    #[error("invalid numeric field in table entry `{line}`: {source}")]
    InvalidField {
        line: String,
        #[source]
        source: ParseIntError,
    },

    #[error("subsystem `{cgroup}` has no enabled entry in the subsystem table")]
    UnknownSubsystem { cgroup: String },

    #[error("no cgroup mount carries subsystem `{cgroup}`")]
    SubsystemNotMounted { cgroup: String },

    #[error("no pid membership entry for hierarchy {hierarchy}")]
    HierarchyNotFound { hierarchy: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
