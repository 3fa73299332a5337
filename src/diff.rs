//! Generic keyed delta engine for monotonically increasing counters.
//!
//! OS and runtime counters are meaningful only as rates, so the first
//! sample for any key is a baseline and is never reported. Every later
//! sample yields the element-wise difference against the previous one.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;

/// Maps a key (a device name, an interface name, a cpu id, ...) to the last
/// value map observed for it and produces deltas once a baseline exists.
///
/// The cache is replaced on *every* observation, including ones whose delta
/// the caller ends up discarding, so a skipped report never double-counts
/// the following interval. Entries are never pruned; the map is bounded by
/// the number of distinct keys the owning monitor observes.
///
/// # Examples
///
/// ```rust
/// use std::collections::HashMap;
/// use deltamon::diff::KeyedDiff;
///
/// let mut diff = KeyedDiff::new();
/// let first: HashMap<String, u64> = HashMap::from([("rx".to_owned(), 100)]);
/// assert!(diff.to("eth0", first).is_none());
///
/// let second: HashMap<String, u64> = HashMap::from([("rx".to_owned(), 175)]);
/// let delta = diff.to("eth0", second).unwrap();
/// assert_eq!(delta["rx"], 75);
/// ```
#[derive(Debug, Default)]
pub struct KeyedDiff<K> {
    last_seen: HashMap<K, HashMap<String, u64>>,
}

impl<K: Eq + Hash> KeyedDiff<K> {
    pub fn new() -> Self {
        Self {
            last_seen: HashMap::new(),
        }
    }

    /// Records `current` for `key` and returns the delta against the
    /// previously recorded values.
    ///
    /// Returns `None` on the first observation of `key`; the sample is
    /// cached as the baseline. On later calls the delta covers the fields
    /// present in both samples, and the cache is overwritten
    /// unconditionally.
    pub fn to(&mut self, key: K, current: HashMap<String, u64>) -> Option<HashMap<String, i64>> {
        match self.last_seen.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(current);
                None
            }
            Entry::Occupied(mut slot) => {
                let delta = subtract(&current, slot.get());
                slot.insert(current);
                Some(delta)
            }
        }
    }
}

/// Element-wise `current - previous` over the fields present in both maps.
///
/// Deltas are signed: a counter reset shows up as a negative value rather
/// than an absurd unsigned wrap.
fn subtract(
    current: &HashMap<String, u64>,
    previous: &HashMap<String, u64>,
) -> HashMap<String, i64> {
    current
        .iter()
        .filter_map(|(field, &now)| {
            previous
                .get(field)
                .map(|&then| (field.clone(), now as i64 - then as i64))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|&(k, v)| (k.to_owned(), v)).collect()
    }

    #[test]
    fn first_observation_yields_no_delta() {
        let mut diff = KeyedDiff::new();
        assert!(diff.to("sda", values(&[("reads", 10)])).is_none());
    }

    #[test]
    fn identical_resubmission_yields_zero_delta() {
        let mut diff = KeyedDiff::new();
        let sample = values(&[("reads", 10), ("writes", 20)]);
        assert!(diff.to("sda", sample.clone()).is_none());
        let delta = diff.to("sda", sample).unwrap();
        assert_eq!(delta["reads"], 0);
        assert_eq!(delta["writes"], 0);
    }

    #[test]
    fn deltas_are_element_wise() {
        let mut diff = KeyedDiff::new();
        diff.to("eth0", values(&[("rx", 100), ("tx", 50)]));
        let delta = diff.to("eth0", values(&[("rx", 160), ("tx", 51)])).unwrap();
        assert_eq!(delta["rx"], 60);
        assert_eq!(delta["tx"], 1);
    }

    #[test]
    fn counter_reset_yields_negative_delta() {
        let mut diff = KeyedDiff::new();
        diff.to("eth0", values(&[("rx", 1000)]));
        let delta = diff.to("eth0", values(&[("rx", 10)])).unwrap();
        assert_eq!(delta["rx"], -990);
    }

    #[test]
    fn keys_are_tracked_independently() {
        let mut diff = KeyedDiff::new();
        diff.to("a", values(&[("n", 1)]));
        // First observation for "b" is still a baseline.
        assert!(diff.to("b", values(&[("n", 100)])).is_none());
        let delta = diff.to("a", values(&[("n", 3)])).unwrap();
        assert_eq!(delta["n"], 2);
    }

    #[test]
    fn cache_replaced_even_when_fields_drop_out() {
        let mut diff = KeyedDiff::new();
        diff.to("a", values(&[("n", 1), ("m", 5)]));
        let delta = diff.to("a", values(&[("n", 2)])).unwrap();
        assert_eq!(delta.len(), 1);
        // "m" reappearing diffs against nothing: baseline was overwritten.
        let delta = diff.to("a", values(&[("n", 3), ("m", 9)])).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta["n"], 1);
    }
}
