//! Retained pose history with timestamp-window eviction.
//!
//! `PoseSample` is small and `Copy`, so the ring buffer stores samples
//! directly. Timestamps are strictly increasing inside the buffer; lookups
//! take the caller's `now` and never return samples older than
//! `now - window`.

use std::fmt;

use contracts::PoseSample;
use ringbuf::{traits::*, HeapRb};

/// Tolerance for treating a lookup target as an exact sample hit
const EXACT_EPS: f64 = 1e-9;

/// Result of a bracketing lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bracket {
    /// A retained sample sits exactly on the target
    Exact(PoseSample),
    /// Target lies strictly between two consecutive retained samples
    Between(PoseSample, PoseSample),
    /// Target is outside the retained window
    Outside,
}

/// Bounded pose ring buffer
pub struct PoseHistory {
    ring: HeapRb<PoseSample>,
    window_s: f64,
    newest: Option<f64>,
    rejected_count: u64,
    evicted_count: u64,
}

impl fmt::Debug for PoseHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoseHistory")
            .field("len", &self.ring.occupied_len())
            .field("window_s", &self.window_s)
            .field("rejected", &self.rejected_count)
            .field("evicted", &self.evicted_count)
            .finish()
    }
}

impl PoseHistory {
    /// Create a history holding at most `capacity` samples over `window_s` seconds
    pub fn new(capacity: usize, window_s: f64) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(2)),
            window_s,
            newest: None,
            rejected_count: 0,
            evicted_count: 0,
        }
    }

    /// Append a sample
    ///
    /// Samples whose timestamp does not advance past the newest retained one
    /// are rejected and counted. Returns whether the sample was stored.
    pub fn push(&mut self, sample: PoseSample) -> bool {
        if let Some(newest) = self.newest {
            if sample.timestamp <= newest {
                self.rejected_count += 1;
                return false;
            }
        }

        if self.ring.is_full() {
            let _ = self.ring.try_pop();
            self.evicted_count += 1;
        }
        let _ = self.ring.try_push(sample);
        self.newest = Some(sample.timestamp);

        self.evict_before(sample.timestamp - self.window_s);
        true
    }

    /// Drop samples older than `cutoff`
    fn evict_before(&mut self, cutoff: f64) {
        while let Some(front) = self.ring.iter().next() {
            if front.timestamp >= cutoff {
                break;
            }
            let _ = self.ring.try_pop();
            self.evicted_count += 1;
        }
    }

    /// Samples visible at `now`, oldest first
    fn visible(&self, now: f64) -> impl Iterator<Item = &PoseSample> + '_ {
        let cutoff = now - self.window_s;
        self.ring.iter().filter(move |s| s.timestamp >= cutoff)
    }

    /// Find the samples bracketing `target`
    pub fn bracket(&self, target: f64, now: f64) -> Bracket {
        let mut before: Option<PoseSample> = None;

        for sample in self.visible(now) {
            if (sample.timestamp - target).abs() <= EXACT_EPS {
                return Bracket::Exact(*sample);
            }
            if sample.timestamp < target {
                before = Some(*sample);
            } else {
                return match before {
                    Some(a) => Bracket::Between(a, *sample),
                    None => Bracket::Outside,
                };
            }
        }
        Bracket::Outside
    }

    /// Most recent visible sample
    pub fn latest(&self, now: f64) -> Option<PoseSample> {
        self.visible(now).last().copied()
    }

    /// Two most recent visible samples, older first
    pub fn latest_pair(&self, now: f64) -> Option<(PoseSample, PoseSample)> {
        let mut prev: Option<PoseSample> = None;
        let mut last: Option<PoseSample> = None;
        for sample in self.visible(now) {
            prev = last;
            last = Some(*sample);
        }
        Some((prev?, last?))
    }

    /// Visible sample with the exact timestamp
    pub fn find(&self, timestamp: f64, now: f64) -> Option<PoseSample> {
        self.visible(now)
            .find(|s| (s.timestamp - timestamp).abs() <= EXACT_EPS)
            .copied()
    }

    /// Oldest retained timestamp
    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.ring.iter().next().map(|s| s.timestamp)
    }

    /// Newest retained timestamp
    pub fn newest_timestamp(&self) -> Option<f64> {
        self.newest
    }

    /// Retention window in seconds
    #[inline]
    pub fn window_s(&self) -> f64 {
        self.window_s
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Non-increasing pushes rejected so far
    #[inline]
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count
    }

    /// Samples evicted by window or capacity
    #[inline]
    pub fn evicted_count(&self) -> u64 {
        self.evicted_count
    }

    /// Drop every sample
    pub fn clear(&mut self) {
        self.ring.clear();
        self.newest = None;
    }
}
