//! Lock-free single-slot snapshot exchange.
//!
//! Delta monitors need exactly one authoritative "previous snapshot" per
//! polling interval, even when the scheduler manages to run two ticks of
//! the same unit concurrently. The slot below provides that with a single
//! primitive: replace the held snapshot only if it is still the one this
//! poll observed at its start. The losing racer discards its own work for
//! the cycle; nothing ever blocks or queues on the hot path.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;

/// An immutable payload paired with its monotonic capture instant.
#[derive(Debug)]
pub struct Timestamped<T> {
    value: T,
    captured_at: Instant,
}

impl<T> Timestamped<T> {
    /// Stamps `value` with the current instant.
    pub fn now(value: T) -> Self {
        Self {
            value,
            captured_at: Instant::now(),
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// Atomically replaceable cell holding the last published snapshot.
///
/// Starts empty; transitions one-way from "no prior snapshot" to "has a
/// snapshot" for the life of the owning monitor.
#[derive(Debug)]
pub struct SnapshotSlot<T> {
    cell: ArcSwapOption<Timestamped<T>>,
}

impl<T> SnapshotSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: ArcSwapOption::empty(),
        }
    }

    /// Returns the currently held snapshot, if any.
    pub fn load(&self) -> Option<Arc<Timestamped<T>>> {
        self.cell.load_full()
    }

    /// Installs `next` only if the slot still holds `observed` (by pointer
    /// identity). Returns whether this caller won the exchange.
    pub fn publish(
        &self,
        observed: &Option<Arc<Timestamped<T>>>,
        next: Arc<Timestamped<T>>,
    ) -> bool {
        let held = self.cell.compare_and_swap(observed, Some(next));
        match (&*held, observed) {
            (None, None) => true,
            (Some(held), Some(observed)) => Arc::ptr_eq(held, observed),
            _ => false,
        }
    }
}

impl<T> Default for SnapshotSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_publish_fills_empty_slot() {
        let slot = SnapshotSlot::new();
        assert!(slot.load().is_none());
        assert!(slot.publish(&None, Arc::new(Timestamped::now(7u64))));
        assert_eq!(*slot.load().unwrap().value(), 7);
    }

    #[test]
    fn stale_observation_loses_the_exchange() {
        let slot = SnapshotSlot::new();
        assert!(slot.publish(&None, Arc::new(Timestamped::now(1u64))));

        // This poll started before the publish above and still believes
        // the slot is empty.
        assert!(!slot.publish(&None, Arc::new(Timestamped::now(2u64))));
        assert_eq!(*slot.load().unwrap().value(), 1);
    }

    #[test]
    fn publish_advances_from_observed_snapshot() {
        let slot = SnapshotSlot::new();
        slot.publish(&None, Arc::new(Timestamped::now(1u64)));
        let observed = slot.load();
        assert!(slot.publish(&observed, Arc::new(Timestamped::now(2u64))));
        assert_eq!(*slot.load().unwrap().value(), 2);
    }

    #[test]
    fn concurrent_pollers_produce_exactly_one_winner_per_interval() {
        const POLLERS: usize = 8;
        const INTERVALS: usize = 50;

        let slot = SnapshotSlot::new();
        let wins = AtomicUsize::new(0);
        let round_start = Barrier::new(POLLERS);
        let round_end = Barrier::new(POLLERS);

        std::thread::scope(|scope| {
            for poller in 0..POLLERS {
                let slot = &slot;
                let wins = &wins;
                let round_start = &round_start;
                let round_end = &round_end;
                scope.spawn(move || {
                    for interval in 0..INTERVALS {
                        // Everyone observes the same prior snapshot...
                        let observed = slot.load();
                        round_start.wait();
                        // ...then races to publish its own.
                        let value = (interval * POLLERS + poller) as u64;
                        if slot.publish(&observed, Arc::new(Timestamped::now(value))) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                        round_end.wait();
                    }
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), INTERVALS);
        assert!(slot.load().is_some());
    }
}
