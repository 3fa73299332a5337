//! Periodic execution of monitor units.
//!
//! The scheduler runs every registered unit on one fixed period, each in
//! its own repeating task, and supports adding and removing units while
//! running. Registry and lifecycle state live under a single mutex; the
//! re-arm decision for every task reads that same serialized state *after*
//! the tick ran, which is what guarantees a unit removed mid-flight still
//! gets one final invocation to flush pending state.
//!
//! Polls themselves run on the blocking pool: they are small bounded
//! pseudo-filesystem reads, and an in-flight poll is never interrupted.
//! Cancellation only prevents re-arming.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::emitter::Emitter;
use crate::monitor::Monitor;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between two scheduled polls of the same unit.
    pub emission_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            emission_period: Duration::from_secs(60),
        }
    }
}

/// Misuse of the scheduler API. These are programmer errors and are raised
/// synchronously; nothing about a running poll can produce them.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("monitors may only be added while the scheduler is running")]
    NotStarted,

    #[error("monitor is already registered")]
    AlreadyRegistered,
}

struct Registry {
    started: bool,
    /// Bumped on every `start()`. A task re-arms only within the
    /// generation it was spawned in, so a stop/start cycle can never leave
    /// a stale task double-polling a unit next to its replacement.
    epoch: u64,
    monitors: Vec<Arc<dyn Monitor>>,
}

/// Runs a set of [`Monitor`] units on a fixed period.
///
/// `stop()` ends every unit's task but keeps the units registered, so a
/// later `start()` resumes polling of all of them. A unit that signals
/// stop from its own poll is deregistered by its task.
pub struct MonitorScheduler {
    config: SchedulerConfig,
    handle: tokio::runtime::Handle,
    emitter: Arc<dyn Emitter>,
    registry: Mutex<Registry>,
}

impl MonitorScheduler {
    pub fn new(
        config: SchedulerConfig,
        handle: tokio::runtime::Handle,
        emitter: Arc<dyn Emitter>,
        monitors: Vec<Arc<dyn Monitor>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            handle,
            emitter,
            registry: Mutex::new(Registry {
                started: false,
                epoch: 0,
                monitors,
            }),
        })
    }

    /// Begins a repeating task for every registered unit. No-op when
    /// already running.
    pub fn start(self: &Arc<Self>) {
        let mut registry = self.lock();
        if registry.started {
            return;
        }
        registry.started = true;
        registry.epoch += 1;
        let epoch = registry.epoch;
        for monitor in registry.monitors.clone() {
            self.start_monitor(monitor, epoch);
        }
    }

    /// Registers `monitor` and immediately begins its repeating task.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotStarted`] before the first `start()`,
    /// [`SchedulerError::AlreadyRegistered`] if this exact unit is already
    /// registered.
    pub fn add_monitor(self: &Arc<Self>, monitor: Arc<dyn Monitor>) -> Result<(), SchedulerError> {
        let mut registry = self.lock();
        if !registry.started {
            return Err(SchedulerError::NotStarted);
        }
        if registry
            .monitors
            .iter()
            .any(|registered| Arc::ptr_eq(registered, &monitor))
        {
            return Err(SchedulerError::AlreadyRegistered);
        }
        registry.monitors.push(Arc::clone(&monitor));
        let epoch = registry.epoch;
        self.start_monitor(monitor, epoch);
        Ok(())
    }

    /// Deregisters `monitor` and stops it. Its task ends after at most one
    /// more invocation. No-op when not registered.
    pub fn remove_monitor(&self, monitor: &Arc<dyn Monitor>) {
        let mut registry = self.lock();
        let before = registry.monitors.len();
        registry
            .monitors
            .retain(|registered| !Arc::ptr_eq(registered, monitor));
        let removed = registry.monitors.len() != before;
        drop(registry);
        if removed {
            monitor.stop();
        }
    }

    /// Stops every unit's task and the units themselves, keeping them
    /// registered for a later `start()`. No-op when already stopped.
    pub fn stop(&self) {
        let mut registry = self.lock();
        if !registry.started {
            return;
        }
        registry.started = false;
        let monitors = registry.monitors.clone();
        drop(registry);
        for monitor in monitors {
            monitor.stop();
        }
    }

    fn start_monitor(self: &Arc<Self>, monitor: Arc<dyn Monitor>, epoch: u64) {
        monitor.start();
        let scheduler = Arc::clone(self);
        let period = self.config.emission_period;
        self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately;
            // consume it so the first poll lands one full period in.
            interval.tick().await;
            loop {
                interval.tick().await;
                let unit = Arc::clone(&monitor);
                let emitter = Arc::clone(&scheduler.emitter);
                let keep_going =
                    tokio::task::spawn_blocking(move || unit.monitor(emitter.as_ref()))
                        .await
                        .unwrap_or(false);
                if !scheduler.rearm(&monitor, keep_going, epoch) {
                    break;
                }
            }
        });
    }

    /// Decides under the registry lock whether a unit's task runs another
    /// period, and deregisters a unit that signaled stop on its own while
    /// the scheduler is running.
    fn rearm(&self, monitor: &Arc<dyn Monitor>, keep_going: bool, epoch: u64) -> bool {
        let mut registry = self.lock();
        if !registry.started || registry.epoch != epoch {
            return false;
        }
        let registered = registry
            .monitors
            .iter()
            .any(|registered| Arc::ptr_eq(registered, monitor));
        if !registered {
            return false;
        }
        if keep_going {
            return true;
        }
        registry
            .monitors
            .retain(|registered| !Arc::ptr_eq(registered, monitor));
        false
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().expect("scheduler registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::CollectingEmitter;
    use crate::monitor::MonitorState;
    use std::sync::atomic::{AtomicU32, Ordering};

    const PERIOD: Duration = Duration::from_millis(20);

    /// Long enough for several periods even on a loaded test machine.
    const SETTLE: Duration = Duration::from_millis(150);

    #[derive(Default)]
    struct TestMonitor {
        state: MonitorState,
        polls: AtomicU32,
        starts: AtomicU32,
        stops: AtomicU32,
        /// Clears the started flag once this many polls have run.
        stop_after: Option<u32>,
    }

    impl TestMonitor {
        fn polls(&self) -> u32 {
            self.polls.load(Ordering::SeqCst)
        }
    }

    impl Monitor for TestMonitor {
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.state.start();
        }

        fn monitor(&self, _emitter: &dyn Emitter) -> bool {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(stop_after) = self.stop_after {
                if polls >= stop_after {
                    self.state.stop();
                }
            }
            self.state.is_started()
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.state.stop();
        }
    }

    fn scheduler_with(monitors: Vec<Arc<dyn Monitor>>) -> Arc<MonitorScheduler> {
        let _ = env_logger::builder().is_test(true).try_init();
        MonitorScheduler::new(
            SchedulerConfig {
                emission_period: PERIOD,
            },
            tokio::runtime::Handle::current(),
            Arc::new(CollectingEmitter::new()),
            monitors,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_before_start_fails() {
        let scheduler = scheduler_with(vec![]);
        let monitor: Arc<dyn Monitor> = Arc::new(TestMonitor::default());
        assert_eq!(
            scheduler.add_monitor(monitor),
            Err(SchedulerError::NotStarted)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_registration_fails() {
        let scheduler = scheduler_with(vec![]);
        scheduler.start();
        let monitor: Arc<dyn Monitor> = Arc::new(TestMonitor::default());
        scheduler.add_monitor(Arc::clone(&monitor)).unwrap();
        assert_eq!(
            scheduler.add_monitor(monitor),
            Err(SchedulerError::AlreadyRegistered)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn polls_registered_monitors_periodically() {
        let monitor = Arc::new(TestMonitor::default());
        let scheduler = scheduler_with(vec![monitor.clone()]);
        scheduler.start();
        tokio::time::sleep(SETTLE).await;
        assert!(monitor.polls() >= 2, "expected repeated polls, got {}", monitor.polls());
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_is_idempotent() {
        let monitor = Arc::new(TestMonitor::default());
        let scheduler = scheduler_with(vec![monitor.clone()]);
        scheduler.start();
        scheduler.start();
        tokio::time::sleep(SETTLE).await;
        // A second start must not double-schedule the unit.
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removed_monitor_gets_at_most_one_final_poll() {
        let monitor = Arc::new(TestMonitor::default());
        let scheduler = scheduler_with(vec![monitor.clone()]);
        scheduler.start();
        tokio::time::sleep(SETTLE).await;

        let as_dyn: Arc<dyn Monitor> = monitor.clone();
        scheduler.remove_monitor(&as_dyn);
        let at_removal = monitor.polls();
        assert_eq!(monitor.stops.load(Ordering::SeqCst), 1);

        tokio::time::sleep(SETTLE).await;
        let after = monitor.polls();
        assert!(
            after <= at_removal + 1,
            "expected at most one final poll, had {at_removal} then {after}"
        );
        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_of_unregistered_monitor_is_a_no_op() {
        let scheduler = scheduler_with(vec![]);
        scheduler.start();
        let monitor = Arc::new(TestMonitor::default());
        let as_dyn: Arc<dyn Monitor> = monitor.clone();
        scheduler.remove_monitor(&as_dyn);
        assert_eq!(monitor.stops.load(Ordering::SeqCst), 0);
        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_then_start_resumes_remaining_units() {
        let monitor = Arc::new(TestMonitor::default());
        let scheduler = scheduler_with(vec![monitor.clone()]);
        scheduler.start();
        tokio::time::sleep(SETTLE).await;

        scheduler.stop();
        assert_eq!(monitor.stops.load(Ordering::SeqCst), 1);
        tokio::time::sleep(SETTLE).await;
        let while_stopped = monitor.polls();
        tokio::time::sleep(SETTLE).await;
        // Stale tasks may deliver one final in-flight poll, never more.
        assert!(monitor.polls() <= while_stopped + 1);

        scheduler.start();
        tokio::time::sleep(SETTLE).await;
        assert!(monitor.polls() > while_stopped + 1);
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 2);
        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn self_stopping_unit_is_deregistered() {
        let monitor = Arc::new(TestMonitor {
            stop_after: Some(2),
            ..TestMonitor::default()
        });
        let scheduler = scheduler_with(vec![monitor.clone()]);
        scheduler.start();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(monitor.polls(), 2);

        // Deregistration means the same instance can be added again.
        let as_dyn: Arc<dyn Monitor> = monitor.clone();
        scheduler.add_monitor(as_dyn).unwrap();
        tokio::time::sleep(SETTLE).await;
        assert!(monitor.polls() > 2);
        scheduler.stop();
    }
}
