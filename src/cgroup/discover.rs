//! Cgroup directory resolution from the kernel's proc tables.
//!
//! A process's accounting directory for one subsystem is not recorded in
//! any single file; it is the concatenation of the subsystem's mount point
//! with the process's group path, cross-referenced through a shared
//! hierarchy id:
//!
//! 1. `<proc>/cgroups` names every subsystem and its hierarchy id.
//! 2. `<proc>/mounts` locates the mount carrying the subsystem (subsystems
//!    are frequently co-mounted, e.g. `cpu,cpuacct`).
//! 3. `<proc>/<pid>/cgroup` maps the hierarchy id to the group path the
//!    process currently belongs to.
//!
//! Every call re-reads all three tables: mounts and group membership can
//! change under a long-lived process, so nothing here is cached.

use std::collections::HashSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::fsutil;

use super::{Error, Result};

const CGROUP_FS_TYPE: &str = "cgroup";
const PROC_FS_TYPE: &str = "proc";

/// Resolves the filesystem directory of a named cgroup subsystem for a
/// process.
///
/// Returns `Ok(None)` for transient/absent conditions (the directory does
/// not exist, the proc mount is not where it claims to be) and `Err` for
/// genuine misconfiguration (unknown subsystem, unmounted hierarchy,
/// malformed tables).
pub trait CgroupDiscoverer: Send + Sync {
    fn discover(&self, cgroup: &str, pid: u32) -> Result<Option<PathBuf>>;
}

/// One line of the mount table.
///
/// Example: `cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,relatime,cpu,cpuacct 0 0`
///
/// The trailing dump/pass fields are required to be present but are not
/// interpreted.
#[derive(Debug, PartialEq, Eq)]
pub struct MountsEntry {
    pub device: String,
    pub path: PathBuf,
    pub fs_type: String,
    pub options: HashSet<String>,
}

impl MountsEntry {
    fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(Error::MalformedMountsEntry {
                line: line.trim().to_owned(),
            });
        }
        Ok(Self {
            device: fields[0].to_owned(),
            path: PathBuf::from(fields[1]),
            fs_type: fields[2].to_owned(),
            options: fields[3].split(',').map(str::to_owned).collect(),
        })
    }
}

/// One line of the subsystem table: `<name>\t<hierarchy>\t<num_cgroups>\t<enabled>`.
#[derive(Debug, PartialEq, Eq)]
pub struct CgroupsEntry {
    pub subsystem: String,
    pub hierarchy: u32,
    pub num_cgroups: u64,
    pub enabled: bool,
}

impl CgroupsEntry {
    fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 4 {
            return Err(Error::MalformedCgroupsEntry {
                line: line.trim().to_owned(),
            });
        }
        Ok(Self {
            subsystem: fields[0].to_owned(),
            hierarchy: parse_field(fields[1], line)?,
            num_cgroups: parse_field(fields[2], line)?,
            enabled: parse_field::<u8>(fields[3], line)? == 1,
        })
    }
}

/// One line of the per-pid membership table:
/// `<hierarchy>:<comma-separated subsystems>:<group path>`.
///
/// Example: `3:cpu,cpuacct:/system.slice/my.service/abc`
#[derive(Debug, PartialEq, Eq)]
pub struct PidCgroupEntry {
    pub hierarchy: u32,
    pub subsystems: Vec<String>,
    pub path: String,
}

impl PidCgroupEntry {
    fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end().splitn(3, ':').collect();
        if fields.len() != 3 {
            return Err(Error::MalformedPidCgroupEntry {
                line: line.trim().to_owned(),
            });
        }
        Ok(Self {
            hierarchy: parse_field(fields[0], line)?,
            subsystems: fields[1].split(',').map(str::to_owned).collect(),
            path: fields[2].to_owned(),
        })
    }
}

fn parse_field<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    field: &str,
    line: &str,
) -> Result<T> {
    field.parse().map_err(|source| Error::InvalidField {
        line: line.trim().to_owned(),
        source,
    })
}

/// [`CgroupDiscoverer`] over the live proc tables.
#[derive(Debug)]
pub struct ProcCgroupDiscoverer {
    proc_root: PathBuf,
}

impl Default for ProcCgroupDiscoverer {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl ProcCgroupDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `proc_root` instead of `/proc`. The root undergoes the same
    /// self-entry validation as the real one, so fixtures must list it in
    /// their own mount table.
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Sanity-checks the proc root against the mount table's own proc
    /// entry. Inside containers the tables may describe a different
    /// namespace than the one we read them from; in that case resolution
    /// is abandoned for this call rather than trusted.
    fn validated_proc_root(&self) -> Result<Option<&Path>> {
        let proc = self.proc_root.as_path();
        if !proc.is_dir() {
            log::warn!("proc root `{}` is not a directory", proc.display());
            return Ok(None);
        }
        let mut found_elsewhere = None;
        for entry in read_mounts(&proc.join("mounts"))? {
            if entry.fs_type == PROC_FS_TYPE {
                if entry.path == proc {
                    return Ok(Some(proc));
                }
                found_elsewhere = Some(entry.path);
            }
        }
        match found_elsewhere {
            Some(path) => log::warn!(
                "expected proc to be mounted on `{}`, but found it on `{}`",
                proc.display(),
                path.display()
            ),
            None => log::warn!("no proc entry found in `{}`", proc.join("mounts").display()),
        }
        Ok(None)
    }
}

impl CgroupDiscoverer for ProcCgroupDiscoverer {
    fn discover(&self, cgroup: &str, pid: u32) -> Result<Option<PathBuf>> {
        let Some(proc_root) = self.validated_proc_root()? else {
            return Ok(None);
        };

        let subsystem = read_cgroups(&proc_root.join("cgroups"))?
            .into_iter()
            .find(|entry| entry.enabled && entry.subsystem == cgroup)
            .ok_or_else(|| Error::UnknownSubsystem {
                cgroup: cgroup.to_owned(),
            })?;

        let mount = read_mounts(&proc_root.join("mounts"))?
            .into_iter()
            .find(|entry| entry.fs_type == CGROUP_FS_TYPE && entry.options.contains(cgroup))
            .ok_or_else(|| Error::SubsystemNotMounted {
                cgroup: cgroup.to_owned(),
            })?;

        let membership = read_pid_cgroup(&proc_root.join(pid.to_string()).join("cgroup"))?
            .into_iter()
            .find(|entry| entry.hierarchy == subsystem.hierarchy)
            .ok_or(Error::HierarchyNotFound {
                hierarchy: subsystem.hierarchy,
            })?;

        // The membership path is absolute within the hierarchy; joining it
        // verbatim would discard the mount prefix.
        let dir = mount.path.join(membership.path.trim_start_matches('/'));
        if dir.is_dir() {
            Ok(Some(dir))
        } else {
            log::warn!("invalid cgroup directory `{}`", dir.display());
            Ok(None)
        }
    }
}

fn read_mounts(path: &Path) -> Result<Vec<MountsEntry>> {
    let reader = fsutil::open_file_reader(path)?;
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|source| Error::ReadLine {
            path: path.to_path_buf(),
            source,
        })?;
        entries.push(MountsEntry::parse(&line)?);
    }
    Ok(entries)
}

fn read_cgroups(path: &Path) -> Result<Vec<CgroupsEntry>> {
    let reader = fsutil::open_file_reader(path)?;
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|source| Error::ReadLine {
            path: path.to_path_buf(),
            source,
        })?;
        if line.starts_with('#') {
            continue;
        }
        entries.push(CgroupsEntry::parse(&line)?);
    }
    Ok(entries)
}

fn read_pid_cgroup(path: &Path) -> Result<Vec<PidCgroupEntry>> {
    let reader = fsutil::open_file_reader(path)?;
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|source| Error::ReadLine {
            path: path.to_path_buf(),
            source,
        })?;
        entries.push(PidCgroupEntry::parse(&line)?);
    }
    Ok(entries)
}
