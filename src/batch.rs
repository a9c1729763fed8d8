use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

pub(crate) type AckIdSet = HashSet<String>;
pub(crate) type WatchMap = HashMap<String, AckWatch>;

// Request size estimate used to split ack-id batches: a serialized
// Acknowledge/ModifyAckDeadline request has a small constant overhead plus the
// subscription name (assumed 100 bytes together) and 3 bytes per id (a tag
// byte and two size bytes) on top of the id itself. The broker rejects
// requests above 512 KiB.
pub(crate) const REQ_FIXED_OVERHEAD: usize = 100;
pub(crate) const OVERHEAD_PER_ID: usize = 3;
pub(crate) const MAX_REQUEST_PAYLOAD: usize = 512 * 1024;

/// Deadline watch for one in-flight ack id: the instant at which the broker
/// will redeliver unless the deadline is extended before then.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AckWatch {
    next_ack: Instant,
}

impl AckWatch {
    pub(crate) fn new(next_ack: Instant) -> Self {
        Self { next_ack }
    }

    /// Time remaining until the deadline, zero if it already passed.
    pub(crate) fn extend_in(&self, now: Instant) -> Duration {
        self.next_ack.saturating_duration_since(now)
    }

    pub(crate) fn update_next_ack(&mut self, next_ack: Instant) {
        self.next_ack = next_ack;
    }
}

pub(crate) fn erase_keys(from: &mut WatchMap, what: &AckIdSet) {
    for key in what {
        from.remove(key);
    }
}

/// Partitions the watches at `now`: ids whose deadline is within the grace
/// period (due for extension), plus the smallest remaining margin among the
/// ids that are not due yet.
pub(crate) fn expiring_keys(
    ids: &WatchMap,
    grace: Duration,
    now: Instant,
) -> (Vec<String>, Option<Duration>) {
    let mut due = Vec::new();
    let mut min_wait: Option<Duration> = None;
    for (id, watch) in ids {
        let left = watch.extend_in(now);
        if left <= grace {
            due.push(id.clone());
        } else {
            min_wait = Some(min_wait.map_or(left, |m| m.min(left)));
        }
    }
    (due, min_wait)
}

/// Moves ids out of `remainder` until the estimated request size would reach
/// `max_size`. Callers loop until `remainder` is empty.
pub(crate) fn split_request_ids(remainder: &mut AckIdSet, max_size: usize) -> AckIdSet {
    let mut batch = AckIdSet::new();
    let mut size = REQ_FIXED_OVERHEAD;
    while let Some(id) = remainder.iter().next().cloned() {
        size += OVERHEAD_PER_ID + id.len();
        if size >= max_size {
            break;
        }
        remainder.remove(&id);
        batch.insert(id);
    }
    batch
}

/// Same splitting rule over a key list (the keep-alive extension path, where
/// the ids must survive in the watch map to have their deadlines bumped after
/// the call).
pub(crate) fn split_request_keys(remainder: &mut Vec<String>, max_size: usize) -> Vec<String> {
    let mut batch = Vec::new();
    let mut size = REQ_FIXED_OVERHEAD;
    while let Some(id) = remainder.last() {
        let next = size + OVERHEAD_PER_ID + id.len();
        if next >= max_size {
            break;
        }
        size = next;
        if let Some(id) = remainder.pop() {
            batch.push(id);
        }
    }
    batch
}

/// Drains `from` into the request's ack id list.
pub(crate) fn populate_ack_ids(to: &mut Vec<String>, from: &mut AckIdSet) {
    to.reserve(from.len());
    to.extend(from.drain());
}

/// Copies `from` into the request's ack id list, leaving `from` untouched.
pub(crate) fn populate_ack_keys(to: &mut Vec<String>, from: &[String]) {
    to.reserve(from.len());
    to.extend_from_slice(from);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_id(len: usize) -> String {
        use rand::distr::Alphanumeric;
        use rand::Rng;
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn watch_at(now: Instant, seconds: u64) -> AckWatch {
        AckWatch::new(now + Duration::from_secs(seconds))
    }

    #[test]
    fn erase_keys_removes_only_the_given_ids() {
        let now = Instant::now();
        let mut from = WatchMap::new();
        let mut what = AckIdSet::new();
        for i in 0..100 {
            let id = random_id(64);
            from.insert(id.clone(), watch_at(now, 30));
            if i % 2 == 0 {
                what.insert(id);
            }
        }
        let before = from.len();
        erase_keys(&mut from, &what);
        assert_eq!(from.len(), before - what.len());
        for id in &what {
            assert!(!from.contains_key(id));
        }
    }

    #[test]
    fn expiring_keys_takes_everything_past_the_grace_period() {
        let now = Instant::now();
        let mut ids = WatchMap::new();
        for _ in 0..100 {
            ids.insert(random_id(64), watch_at(now, 2));
        }
        let (due, min_wait) = expiring_keys(&ids, Duration::from_secs(5), now);
        assert_eq!(due.len(), 100);
        assert_eq!(min_wait, None);
    }

    #[test]
    fn expiring_keys_takes_nothing_when_margins_are_wide() {
        let now = Instant::now();
        let mut ids = WatchMap::new();
        for _ in 0..100 {
            ids.insert(random_id(64), watch_at(now, 60));
        }
        let (due, min_wait) = expiring_keys(&ids, Duration::from_secs(5), now);
        assert!(due.is_empty());
        assert_eq!(min_wait, Some(Duration::from_secs(60)));
    }

    #[test]
    fn expiring_keys_partitions_mixed_margins() {
        let now = Instant::now();
        let mut ids = WatchMap::new();
        for _ in 0..100 {
            ids.insert(random_id(64), watch_at(now, 60));
        }
        for _ in 0..3 {
            ids.insert(random_id(64), watch_at(now, 2));
        }
        let (due, min_wait) = expiring_keys(&ids, Duration::from_secs(5), now);
        assert_eq!(due.len(), 3);
        assert_eq!(min_wait, Some(Duration::from_secs(60)));
    }

    #[test]
    fn split_with_zero_cap_yields_nothing() {
        let mut all: AckIdSet = (0..100).map(|_| random_id(10)).collect();
        let batch = split_request_ids(&mut all, 0);
        assert!(batch.is_empty());
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn split_with_a_huge_cap_takes_everything() {
        let mut all: AckIdSet = (0..100).map(|_| random_id(10)).collect();
        let batch = split_request_ids(&mut all, usize::MAX);
        assert_eq!(batch.len(), 100);
        assert!(all.is_empty());
    }

    #[test]
    fn split_set_pairs_two_ten_byte_ids_under_a_130_byte_cap() {
        let mut all: AckIdSet = (0..100).map(|_| random_id(10)).collect();
        let mut processed = 0;
        while !all.is_empty() {
            let batch = split_request_ids(&mut all, 130);
            assert_eq!(batch.len(), 2);
            processed += batch.len();
        }
        assert_eq!(processed, 100);
    }

    #[test]
    fn split_keys_pairs_two_twenty_byte_ids_under_a_150_byte_cap() {
        let mut all: Vec<String> = (0..100).map(|_| random_id(20)).collect();
        let mut processed = 0;
        while !all.is_empty() {
            let batch = split_request_keys(&mut all, 150);
            assert_eq!(batch.len(), 2);
            processed += batch.len();
        }
        assert_eq!(processed, 100);
    }

    #[test]
    fn populate_from_a_set_drains_it() {
        let mut all: AckIdSet = (0..100).map(|_| random_id(10)).collect();
        let copy = all.clone();
        let mut to = Vec::new();
        populate_ack_ids(&mut to, &mut all);
        assert!(all.is_empty());
        assert_eq!(to.len(), copy.len());
        for id in &to {
            assert!(copy.contains(id));
        }
    }

    #[test]
    fn populate_from_keys_leaves_them_in_place() {
        let keys: Vec<String> = (0..100).map(|_| random_id(10)).collect();
        let mut to = Vec::new();
        populate_ack_keys(&mut to, &keys);
        assert_eq!(keys.len(), 100);
        assert_eq!(to, keys);
    }
}
