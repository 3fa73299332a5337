//! Resolution of per-process cgroup accounting directories.
//!
//! The kernel exposes control-group state across several pseudo-filesystem
//! tables; this module cross-references them to locate the directory that
//! holds a subsystem's accounting files for a given process. Resolution is
//! deliberately uncached: mount points and group membership can change
//! while a monitored process runs, so every call reads current kernel
//! state.

mod discover;
mod error;

pub use discover::{CgroupDiscoverer, CgroupsEntry, MountsEntry, PidCgroupEntry, ProcCgroupDiscoverer};
pub use error::{Error, Result};
