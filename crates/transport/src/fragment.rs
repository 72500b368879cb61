//! Fragment reassembly.
//!
//! Holds a bounded number of partially received frames. Once a frame
//! completes, partial frames with a lower sequence can never be presented
//! and are discarded.

use std::collections::BTreeMap;

use tracing::debug;

use crate::wire::Fragment;
use crate::TransportError;

#[derive(Debug)]
struct Partial {
    count: u16,
    received: usize,
    chunks: Vec<Option<Vec<u8>>>,
}

/// Bounded fragment reassembler
#[derive(Debug)]
pub struct FragmentAssembler {
    partials: BTreeMap<u64, Partial>,
    max_slots: usize,
    newest_complete: Option<u64>,
    discarded: u64,
}

impl FragmentAssembler {
    pub fn new(max_slots: usize) -> Self {
        Self {
            partials: BTreeMap::new(),
            max_slots: max_slots.max(1),
            newest_complete: None,
            discarded: 0,
        }
    }

    /// Add a fragment; returns the reassembled `Frame` encoding once complete
    pub fn insert(&mut self, fragment: Fragment) -> Result<Option<Vec<u8>>, TransportError> {
        let seq = fragment.frame_sequence;

        if fragment.count == 0 || fragment.index >= fragment.count {
            return Err(TransportError::fragment(
                seq,
                format!("index {} out of range (count {})", fragment.index, fragment.count),
            ));
        }

        if self.newest_complete.is_some_and(|newest| seq <= newest) {
            self.discarded += 1;
            return Ok(None);
        }

        let partial = self.partials.entry(seq).or_insert_with(|| Partial {
            count: fragment.count,
            received: 0,
            chunks: vec![None; fragment.count as usize],
        });

        if partial.count != fragment.count {
            return Err(TransportError::fragment(
                seq,
                format!("count changed from {} to {}", partial.count, fragment.count),
            ));
        }

        let slot = &mut partial.chunks[fragment.index as usize];
        if slot.is_none() {
            *slot = Some(fragment.bytes);
            partial.received += 1;
        }

        if partial.received == partial.count as usize {
            let done = self.partials.remove(&seq);
            self.complete(seq);
            let bytes = done
                .map(|p| p.chunks.into_iter().flatten().flatten().collect())
                .unwrap_or_default();
            return Ok(Some(bytes));
        }

        // Keep the newest partial frames only.
        while self.partials.len() > self.max_slots {
            if let Some((old, _)) = self.partials.pop_first() {
                debug!(frame_sequence = old, "dropping incomplete frame");
                self.discarded += 1;
            }
        }
        Ok(None)
    }

    fn complete(&mut self, seq: u64) {
        self.newest_complete = Some(self.newest_complete.map_or(seq, |n| n.max(seq)));
        let stale: Vec<u64> = self.partials.range(..seq).map(|(k, _)| *k).collect();
        for key in stale {
            self.partials.remove(&key);
            self.discarded += 1;
        }
    }

    /// Note a frame that arrived unfragmented
    pub fn note_complete(&mut self, seq: u64) {
        self.complete(seq);
    }

    /// Partial or late fragments discarded so far
    #[inline]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Frames currently being reassembled
    #[inline]
    pub fn pending(&self) -> usize {
        self.partials.len()
    }
}
