//! Session synchronization state.
//!
//! Owned by the coordinator and passed by reference; lives from session
//! start to session end and survives pause/resume untouched.

use std::collections::VecDeque;

use contracts::{ClockFilterConfig, DecodedFrame, FenceId};
use metrics::histogram;
use tracing::{debug, trace};

use crate::{ClockOffsetFilter, OffsetSample};

/// Sent-pose ledger capacity
pub const SENT_LEDGER_CAPACITY: usize = 1024;

/// A pose message that actually went out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentPose {
    pub sequence: u64,
    /// Local timestamp of the pose sample
    pub pose_timestamp: f64,
    /// Local clock at hand-off
    pub sent_at: f64,
}

/// Frame kept for re-presentation
#[derive(Debug)]
pub struct GoodFrame {
    pub frame: DecodedFrame,
    /// Sent-pose entry the server rendered against
    pub sent: SentPose,
    /// Whether it has been presented at least once
    pub presented: bool,
}

/// Comparable summary of a [`SyncState`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub offset: f64,
    pub drift: f64,
    pub rtt: Option<f64>,
    pub last_composited: Option<u64>,
    pub last_good_sequence: Option<u64>,
    pub sent_len: usize,
    pub frames_observed: u64,
}

/// Clock offset, round-trip estimate, last-good frame and sent ledger
#[derive(Debug)]
pub struct SyncState {
    filter: ClockOffsetFilter,
    rtt: Option<f64>,
    rtt_alpha: f64,
    last_good: Option<GoodFrame>,
    last_composited: Option<u64>,
    sent: VecDeque<SentPose>,
    frames_observed: u64,
}

impl SyncState {
    pub fn new(clock: &ClockFilterConfig, rtt_alpha: f64) -> Self {
        Self {
            filter: ClockOffsetFilter::new(clock),
            rtt: None,
            rtt_alpha: rtt_alpha.clamp(f64::EPSILON, 1.0),
            last_good: None,
            last_composited: None,
            sent: VecDeque::with_capacity(SENT_LEDGER_CAPACITY),
            frames_observed: 0,
        }
    }

    /// Record a pose message handed to the transport
    ///
    /// Sequences must increase; anything else is ignored.
    pub fn record_sent(&mut self, sent: SentPose) {
        if self.sent.back().is_some_and(|last| sent.sequence <= last.sequence) {
            return;
        }
        if self.sent.len() == SENT_LEDGER_CAPACITY {
            self.sent.pop_front();
        }
        self.sent.push_back(sent);
    }

    /// Ledger entry for `sequence`
    pub fn sent(&self, sequence: u64) -> Option<SentPose> {
        self.sent
            .binary_search_by_key(&sequence, |s| s.sequence)
            .ok()
            .and_then(|i| self.sent.get(i).copied())
    }

    /// Feed one frame's clock exchange into the offset filter
    pub fn observe_exchange(&mut self, frame: &DecodedFrame, sent: &SentPose) -> f64 {
        let sample = OffsetSample::from_exchange(
            sent.sent_at,
            frame.server_received_at,
            frame.server_timestamp,
            frame.received_at,
        );
        let (offset, residual) = self.filter.update(sample, frame.received_at);
        self.frames_observed += 1;
        trace!(
            sequence = frame.sequence,
            offset_ms = offset * 1e3,
            residual_ms = residual * 1e3,
            network_ms = sample.network_delay * 1e3,
            "clock exchange"
        );
        offset
    }

    /// Fold a round-trip sample (seconds) into the EWMA
    pub fn observe_rtt(&mut self, sample: f64) -> f64 {
        let rtt = match self.rtt {
            Some(current) => current + self.rtt_alpha * (sample - current),
            None => sample,
        };
        self.rtt = Some(rtt);
        rtt
    }

    #[inline]
    pub fn filter(&self) -> &ClockOffsetFilter {
        &self.filter
    }

    #[inline]
    pub fn offset(&self) -> f64 {
        self.filter.offset()
    }

    /// Smoothed round trip (seconds)
    #[inline]
    pub fn rtt(&self) -> Option<f64> {
        self.rtt
    }

    #[inline]
    pub fn last_composited(&self) -> Option<u64> {
        self.last_composited
    }

    #[inline]
    pub fn last_good(&self) -> Option<&GoodFrame> {
        self.last_good.as_ref()
    }

    /// Install a new last-good frame, returning the previous one
    pub(crate) fn replace_last_good(&mut self, good: GoodFrame) -> Option<GoodFrame> {
        self.last_good.replace(good)
    }

    /// The last-good frame was presented under `fence`
    ///
    /// `round_trip` feeds the EWMA on the frame's first presentation only.
    /// Returns the updated estimate when it changed.
    pub fn note_presented(&mut self, fence: FenceId, round_trip: Option<f64>) -> Option<f64> {
        let good = self.last_good.as_mut()?;
        good.frame.last_fence = Some(fence);
        let first = !std::mem::replace(&mut good.presented, true);
        let sequence = good.frame.sequence;
        self.last_composited = Some(self.last_composited.map_or(sequence, |c| c.max(sequence)));

        let sample = round_trip.filter(|_| first)?;
        let rtt = self.observe_rtt(sample);
        histogram!("cloudar_rtt_ms").record(rtt * 1e3);
        debug!(sequence, rtt_ms = rtt * 1e3, sample_ms = sample * 1e3, "round trip updated");
        Some(rtt)
    }

    /// Remove the last-good frame (session teardown)
    pub fn take_last_good(&mut self) -> Option<DecodedFrame> {
        self.last_good.take().map(|g| g.frame)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            offset: self.filter.offset(),
            drift: self.filter.drift(),
            rtt: self.rtt,
            last_composited: self.last_composited,
            last_good_sequence: self.last_good.as_ref().map(|g| g.frame.sequence),
            sent_len: self.sent.len(),
            frames_observed: self.frames_observed,
        }
    }
}
