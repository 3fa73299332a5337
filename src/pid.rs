//! Sources for the id of the monitored process.
//!
//! Cgroup-based monitors resolve their accounting directory per pid, so the
//! pid lookup is abstracted behind [`PidSource`]. The default source asks
//! the OS-stats binding for the current process id; [`InterningPidSource`]
//! wraps any source and resolves it at most once.

use dashmap::DashMap;

/// Errors that may occur while determining the monitored process id.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to determine the monitored process id: {0}")]
    Indeterminate(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Supplies the id of the process being monitored.
///
/// Implementations may ask the runtime, the OS, or return a fixed value
/// (e.g. in tests). A failed lookup is fatal to that lookup only and is
/// propagated to the caller.
pub trait PidSource: Send + Sync {
    fn pid(&self) -> Result<u32>;
}

/// A [`PidSource`] backed by the OS-stats binding's current-pid lookup.
#[derive(Debug, Default)]
pub struct CurrentProcessPidSource;

impl PidSource for CurrentProcessPidSource {
    fn pid(&self) -> Result<u32> {
        sysinfo::get_current_pid()
            .map(|pid| pid.as_u32())
            .map_err(|reason| Error::Indeterminate(reason.to_owned()))
    }
}

const PID_KEY: &str = "pid";

/// Wraps a [`PidSource`] and caches the first successful answer.
///
/// A failed resolution is not cached; the next call retries the inner
/// source.
#[derive(Debug, Default)]
pub struct InterningPidSource<P> {
    inner: P,
    cache: DashMap<&'static str, u32>,
}

impl<P> InterningPidSource<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: DashMap::with_capacity(1),
        }
    }
}

impl<P: PidSource> PidSource for InterningPidSource<P> {
    fn pid(&self) -> Result<u32> {
        self.cache
            .entry(PID_KEY)
            .or_try_insert_with(|| self.inner.pid())
            .map(|pid| *pid)
    }
}
