//! Reorder / dedup buffer on the render-thread side of the transport.
//!
//! Frames drained from the I/O queue are released in ascending sequence
//! order. A frame at or below the release floor (the larger of the last
//! released and the last composited sequence) can never be shown and is
//! discarded, so released sequences are strictly increasing. Gaps are not
//! waited for: a missing frame is simply skipped once a later one is released.

use std::collections::BTreeMap;

use contracts::InboundFrame;

/// Counters for discarded frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorderStats {
    /// Same sequence already pending
    pub duplicates: u64,
    /// At or below the release floor
    pub stale: u64,
    /// Dropped to respect the depth bound (oldest first)
    pub overflowed: u64,
    /// Released out of arrival order
    pub reordered: u64,
}

/// Bounded ascending-order release buffer
#[derive(Debug)]
pub struct ReorderBuffer {
    pending: BTreeMap<u64, InboundFrame>,
    depth: usize,
    last_released: Option<u64>,
    last_composited: Option<u64>,
    last_arrival: Option<u64>,
    stats: ReorderStats,
}

impl ReorderBuffer {
    pub fn new(depth: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            depth: depth.max(1),
            last_released: None,
            last_composited: None,
            last_arrival: None,
            stats: ReorderStats::default(),
        }
    }

    /// Sequences at or below this are discarded
    pub fn floor(&self) -> Option<u64> {
        match (self.last_released, self.last_composited) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Accept a frame; returns whether it was kept
    pub fn insert(&mut self, frame: InboundFrame) -> bool {
        let seq = frame.sequence;

        if self.floor().is_some_and(|floor| seq <= floor) {
            self.stats.stale += 1;
            return false;
        }
        if self.pending.contains_key(&seq) {
            self.stats.duplicates += 1;
            return false;
        }
        if self.last_arrival.is_some_and(|last| seq < last) {
            self.stats.reordered += 1;
        }
        self.last_arrival = Some(self.last_arrival.map_or(seq, |last| last.max(seq)));

        self.pending.insert(seq, frame);
        while self.pending.len() > self.depth {
            self.pending.pop_first();
            self.stats.overflowed += 1;
        }
        true
    }

    /// Release the lowest pending frame
    pub fn release(&mut self) -> Option<InboundFrame> {
        let (seq, frame) = self.pending.pop_first()?;
        self.last_released = Some(seq);
        Some(frame)
    }

    /// Raise the floor to `sequence` and drop pending frames below it
    pub fn mark_composited(&mut self, sequence: u64) {
        let composited = self.last_composited.map_or(sequence, |c| c.max(sequence));
        self.last_composited = Some(composited);

        let keep = self.pending.split_off(&composited.saturating_add(1));
        self.stats.stale += self.pending.len() as u64;
        self.pending = keep;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> ReorderStats {
        self.stats
    }

    /// Drop pending frames (floor is kept)
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{CodecKind, PoseSample, StereoLayout};

    fn frame(sequence: u64) -> InboundFrame {
        InboundFrame {
            sequence,
            server_timestamp: sequence as f64,
            pose_sequence: sequence,
            render_pose: PoseSample::paused(0.0),
            server_received_at: 0.0,
            received_at: 0.0,
            payload: Bytes::new(),
            width: 1,
            height: 1,
            stereo_layout: StereoLayout::Mono,
            codec: CodecKind::Raw,
        }
    }

    fn drain(buf: &mut ReorderBuffer) -> Vec<u64> {
        std::iter::from_fn(|| buf.release()).map(|f| f.sequence).collect()
    }

    #[test]
    fn test_release_ascending() {
        let mut buf = ReorderBuffer::new(8);
        for seq in [3, 1, 2] {
            assert!(buf.insert(frame(seq)));
        }
        assert_eq!(drain(&mut buf), vec![1, 2, 3]);
        assert_eq!(buf.stats().reordered, 2);
    }

    #[test]
    fn test_duplicates_and_stale_discarded() {
        let mut buf = ReorderBuffer::new(8);
        buf.insert(frame(5));
        assert!(!buf.insert(frame(5)));
        assert_eq!(drain(&mut buf), vec![5]);
        assert!(!buf.insert(frame(4)));
        assert!(!buf.insert(frame(5)));
        let stats = buf.stats();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.stale, 2);
    }

    #[test]
    fn test_mark_composited_raises_floor() {
        let mut buf = ReorderBuffer::new(8);
        for seq in [2, 3, 7] {
            buf.insert(frame(seq));
        }
        buf.mark_composited(5);
        assert_eq!(buf.floor(), Some(5));
        assert!(!buf.insert(frame(4)));
        assert_eq!(drain(&mut buf), vec![7]);
    }

    #[test]
    fn test_depth_bound_drops_oldest() {
        let mut buf = ReorderBuffer::new(2);
        for seq in 1..=4 {
            buf.insert(frame(seq));
        }
        assert_eq!(buf.stats().overflowed, 2);
        assert_eq!(drain(&mut buf), vec![3, 4]);
    }

    #[test]
    fn test_released_sequences_strictly_increase() {
        // Arbitrary interleaving of arrivals, releases and compositions.
        let arrivals = [4u64, 2, 9, 3, 9, 1, 12, 10, 11, 5, 15, 14, 13, 20, 16];
        let mut buf = ReorderBuffer::new(4);
        let mut released = Vec::new();
        for (i, seq) in arrivals.iter().enumerate() {
            buf.insert(frame(*seq));
            if i % 2 == 1 {
                if let Some(f) = buf.release() {
                    released.push(f.sequence);
                    if i % 4 == 3 {
                        buf.mark_composited(f.sequence);
                    }
                }
            }
        }
        released.extend(drain(&mut buf));
        assert!(released.windows(2).all(|w| w[0] < w[1]), "{released:?}");
    }
}
