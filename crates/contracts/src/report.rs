//! Per-draw report emitted by the session coordinator.
//!
//! Carries the metadata observability aggregates; the coordinator never
//! reads it back.

use serde::{Deserialize, Serialize};

use crate::{DrawStatus, LinkHealth};

/// What one `draw_frame` call did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Draw call counter (1-based)
    pub tick: u64,

    pub status: DrawStatus,

    /// Local clock of the draw
    pub present_time: f64,

    /// Frame composited this tick, if any
    pub presented_sequence: Option<u64>,

    /// Whether the composited frame arrived this tick (vs. re-presented)
    pub new_frame: bool,

    /// Reprojection rotation applied (degrees); `None` when unwarped
    pub warp_angle_deg: Option<f64>,

    /// Reason the frame went out unwarped
    pub warp_skip: Option<String>,

    /// Smoothed round trip (ms)
    pub rtt_ms: Option<f64>,

    /// Server clock minus local clock (ms)
    pub clock_offset_ms: f64,

    /// Local age of the composited frame since reassembly (ms)
    pub frame_age_ms: Option<f64>,

    /// Frames waiting in the decode queue after this tick
    pub decode_queue: usize,

    pub link_health: LinkHealth,
}

impl TickReport {
    /// Report for a draw that did no pipeline work
    pub fn idle(tick: u64, status: DrawStatus, present_time: f64) -> Self {
        Self {
            tick,
            status,
            present_time,
            presented_sequence: None,
            new_frame: false,
            warp_angle_deg: None,
            warp_skip: None,
            rtt_ms: None,
            clock_offset_ms: 0.0,
            frame_age_ms: None,
            decode_queue: 0,
            link_health: LinkHealth::Connecting,
        }
    }

    #[inline]
    pub fn presented(&self) -> bool {
        self.presented_sequence.is_some()
    }
}
