use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded histogram with one lock-free counter per bucket.
///
/// Values are clamped into `0..=high`. `percentile` walks a snapshot of the
/// buckets; concurrent `record` calls may make the snapshot slightly stale,
/// which is acceptable for its only use, picking an ack deadline.
pub(crate) struct Distribution {
    hist: Box<[AtomicU64]>,
}

impl Distribution {
    pub(crate) fn new(high: u64) -> Self {
        let mut hist = Vec::with_capacity(high as usize + 1);
        hist.resize_with(high as usize + 1, AtomicU64::default);
        Self {
            hist: hist.into_boxed_slice(),
        }
    }

    pub(crate) fn record(&self, value: u64) {
        let index = (value as usize).min(self.hist.len() - 1);
        self.hist[index].fetch_add(1, Ordering::Relaxed);
    }

    /// Smallest bucket index whose cumulative count reaches `ceil(total * p)`.
    pub(crate) fn percentile(&self, p: f64) -> u64 {
        debug_assert!((0.0..=1.0).contains(&p), "percentile out of range: {p}");
        let mut total = 0u64;
        let sums: Vec<u64> = self
            .hist
            .iter()
            .map(|bucket| {
                total += bucket.load(Ordering::Relaxed);
                total
            })
            .collect();

        let target = (total as f64 * p).ceil() as u64;
        sums.iter().position(|&sum| sum >= target).unwrap_or(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_distribution_reports_zero() {
        let dist = Distribution::new(600);
        assert_eq!(dist.percentile(0.99), 0);
    }

    #[test]
    fn percentile_picks_the_smallest_qualifying_bucket() {
        let dist = Distribution::new(600);
        for _ in 0..90 {
            dist.record(1);
        }
        for _ in 0..10 {
            dist.record(30);
        }
        assert_eq!(dist.percentile(0.5), 1);
        assert_eq!(dist.percentile(0.9), 1);
        assert_eq!(dist.percentile(0.91), 30);
        assert_eq!(dist.percentile(0.99), 30);
    }

    #[test]
    fn full_percentile_is_the_highest_nonempty_bucket() {
        let dist = Distribution::new(600);
        dist.record(2);
        dist.record(17);
        dist.record(421);
        assert_eq!(dist.percentile(1.0), 421);
    }

    #[test]
    fn values_above_the_bound_are_clamped() {
        let dist = Distribution::new(600);
        dist.record(10_000);
        assert_eq!(dist.percentile(1.0), 600);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        let dist = std::sync::Arc::new(Distribution::new(600));
        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let dist = dist.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        dist.record(worker);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(dist.percentile(1.0), 7);
        // All 8000 samples are in buckets 0..=7.
        assert_eq!(dist.percentile(0.125), 0);
    }
}
