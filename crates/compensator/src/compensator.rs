//! Latency Compensator
//!
//! Per display tick:
//! 1. accept the newest decoded frame (if any) into [`SyncState`]
//! 2. reconstruct the local render pose from the retained pose history
//! 3. predict the live pose at the display instant
//! 4. emit a composite request warped by `display⁻¹ · render`, or unwarped
//!    when the reconstruction is missing or the correction too large
//!
//! Without a new frame the last-good frame is re-presented with a freshly
//! computed warp.

use contracts::{CompensatorConfig, CompositeRequest, DecodedFrame, PoseSample};
use metrics::counter;
use pose_source::{Bracket, PoseHistory};
use tracing::{debug, instrument, warn};

use crate::kinematics::{extrapolate, interpolate};
use crate::warp::{bounded_correction, WarpLimits, WarpSkip};
use crate::{GoodFrame, SyncState};

/// Compensator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensatorStats {
    pub accepted: u64,
    /// At or below the last composited / last-good sequence
    pub stale: u64,
    /// Rendered against a pose that is not in the sent ledger
    pub unknown_pose: u64,
    pub warped: u64,
    pub unwarped: u64,
    pub re_presented: u64,
}

/// Result of one compensation step
#[derive(Debug)]
pub struct CompensationOutcome<'a> {
    /// What to composite this tick; `None` when no remote frame exists yet
    pub present: Option<CompositeRequest<'a>>,
    /// Frames leaving the compensator; release them with their fences
    pub retired: Vec<DecodedFrame>,
    /// Why the presented frame carries no warp
    pub warp_skip: Option<WarpSkip>,
    /// Whether `present` shows a frame accepted this tick
    pub new_frame: bool,
    /// `present_time − render_time` of the presented frame (seconds)
    ///
    /// Hand it to [`SyncState::note_presented`] once the composite succeeds.
    pub round_trip: Option<f64>,
}

/// Pose-based reprojection of remote frames
#[derive(Debug, Clone)]
pub struct LatencyCompensator {
    config: CompensatorConfig,
    limits: WarpLimits,
    stats: CompensatorStats,
}

impl LatencyCompensator {
    pub fn new(config: &CompensatorConfig) -> Self {
        Self {
            config: config.clone(),
            limits: WarpLimits::from_config(config),
            stats: CompensatorStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> CompensatorStats {
        self.stats
    }

    #[inline]
    pub fn limits(&self) -> WarpLimits {
        self.limits
    }

    /// Take ownership of `frame` as the new last-good frame
    ///
    /// Returns the displaced last-good frame, or hands `frame` back when it
    /// is stale or rendered against an unknown pose.
    fn accept(&mut self, state: &mut SyncState, frame: DecodedFrame) -> Result<Option<DecodedFrame>, DecodedFrame> {
        let floor = match (state.last_composited(), state.last_good().map(|g| g.frame.sequence)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if floor.is_some_and(|floor| frame.sequence <= floor) {
            self.stats.stale += 1;
            counter!("cloudar_frames_rejected_total", "reason" => "stale").increment(1);
            debug!(sequence = frame.sequence, ?floor, "stale frame discarded");
            return Err(frame);
        }

        let Some(sent) = state.sent(frame.pose_sequence) else {
            self.stats.unknown_pose += 1;
            counter!("cloudar_frames_rejected_total", "reason" => "unknown_pose").increment(1);
            warn!(
                sequence = frame.sequence,
                pose_sequence = frame.pose_sequence,
                "frame rendered against a pose that was never sent"
            );
            return Err(frame);
        };

        state.observe_exchange(&frame, &sent);
        self.stats.accepted += 1;
        let previous = state.replace_last_good(GoodFrame {
            frame,
            sent,
            presented: false,
        });
        Ok(previous.map(|g| g.frame))
    }

    /// Local render pose of the last-good frame, if still in the window
    fn reconstruct(&self, state: &SyncState, good: &GoodFrame, history: &PoseHistory, now: f64) -> (f64, Option<PoseSample>) {
        // Never newer than the pose that was actually sent.
        let render_time = state
            .filter()
            .to_local(good.frame.render_pose.timestamp)
            .min(good.sent.pose_timestamp);
        let render = match history.bracket(render_time, now) {
            Bracket::Exact(sample) => Some(sample),
            Bracket::Between(a, b) => Some(interpolate(&a, &b, render_time)),
            Bracket::Outside => None,
        };
        (render_time, render)
    }

    /// Predicted live pose at `display_time`
    fn live_pose(&self, history: &PoseHistory, now: f64, display_time: f64) -> Option<PoseSample> {
        let horizon = self.config.max_extrapolation_ms / 1e3;
        match history.latest_pair(now) {
            Some((prev, latest)) => Some(extrapolate(&prev, &latest, display_time, horizon)),
            None => history.latest(now).map(|latest| latest.at(display_time)),
        }
    }

    /// Run one display tick
    ///
    /// `present_time` is the local clock of the display refresh; history
    /// lookups treat it as "now".
    #[instrument(name = "compensate", level = "trace", skip_all, fields(present_time = present_time))]
    pub fn compensate<'s>(
        &mut self,
        state: &'s mut SyncState,
        incoming: Option<DecodedFrame>,
        history: &PoseHistory,
        present_time: f64,
    ) -> CompensationOutcome<'s> {
        let mut retired = Vec::new();
        let mut new_frame = false;

        if let Some(frame) = incoming {
            match self.accept(state, frame) {
                Ok(previous) => {
                    new_frame = true;
                    retired.extend(previous);
                }
                Err(rejected) => retired.push(rejected),
            }
        }

        let display_time = present_time + self.config.display_latency_ms / 1e3;

        let (render_time, warp) = match state.last_good() {
            None => {
                return CompensationOutcome {
                    present: None,
                    retired,
                    warp_skip: None,
                    new_frame: false,
                    round_trip: None,
                }
            }
            Some(good) => {
                let (render_time, render) = self.reconstruct(state, good, history, present_time);
                let live = self.live_pose(history, present_time, display_time);
                let warp = match (render, live) {
                    (None, _) => Err(WarpSkip::NoBracket),
                    (_, None) => Err(WarpSkip::NoLivePose),
                    (Some(render), Some(live)) => bounded_correction(&render.isometry(), &live.isometry(), &self.limits),
                };
                (render_time, warp)
            }
        };

        match &warp {
            Ok(_) => self.stats.warped += 1,
            Err(skip) => {
                self.stats.unwarped += 1;
                counter!("cloudar_warp_skipped_total", "reason" => skip.as_str()).increment(1);
                debug!(reason = skip.as_str(), ?skip, "presenting without correction");
            }
        }

        if state.last_good().is_some_and(|good| good.presented) {
            self.stats.re_presented += 1;
        }

        let state: &'s SyncState = state;
        let present = state.last_good().map(|good| CompositeRequest {
            surface: &good.frame.surface,
            sequence: good.frame.sequence,
            stereo_layout: good.frame.stereo_layout,
            warp: warp.ok(),
            present_time: display_time,
        });

        CompensationOutcome {
            present,
            retired,
            warp_skip: warp.err(),
            new_frame,
            round_trip: Some(present_time - render_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SentPose;
    use contracts::{ClockFilterConfig, FenceId, StereoLayout, Surface, SurfaceHandle, TrackingState};
    use nalgebra::{UnitQuaternion, Vector3};

    const STEP: f64 = 1.0 / 64.0;

    fn pose(t: f64) -> PoseSample {
        // 1 m/s along x
        PoseSample::new(t, Vector3::new(t, 1.5, 0.0), UnitQuaternion::identity(), TrackingState::Tracking)
    }

    fn history(until: f64) -> PoseHistory {
        let mut history = PoseHistory::new(1024, 0.5);
        let mut k = 0;
        while k as f64 * STEP <= until {
            history.push(pose(k as f64 * STEP));
            k += 1;
        }
        history
    }

    fn state() -> SyncState {
        SyncState::new(&ClockFilterConfig::default(), 0.5)
    }

    /// Frame rendered against pose `k` (sent at its sample time), received 30 ms later
    fn frame(sequence: u64, k: u64, state: &mut SyncState) -> DecodedFrame {
        let ts = k as f64 * STEP;
        state.record_sent(SentPose {
            sequence: k,
            pose_timestamp: ts,
            sent_at: ts,
        });
        DecodedFrame {
            surface: Surface {
                handle: SurfaceHandle {
                    slot: sequence as usize,
                    generation: sequence,
                },
                width: 1,
                height: 1,
                pixels: vec![0; 4],
            },
            sequence,
            pose_sequence: k,
            render_pose: pose(ts),
            server_timestamp: ts + 0.02,
            server_received_at: ts + 0.01,
            received_at: ts + 0.03,
            decode_timestamp: ts + 0.035,
            stereo_layout: StereoLayout::Mono,
            last_fence: None,
        }
    }

    #[test]
    fn test_nothing_to_present() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        let out = comp.compensate(&mut state, None, &history(1.0), 1.0);
        assert!(out.present.is_none());
        assert!(out.retired.is_empty());
    }

    #[test]
    fn test_new_frame_is_warped_towards_live_pose() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        let f = frame(1, 60, &mut state);
        let h = history(1.0);

        let out = comp.compensate(&mut state, Some(f), &h, 1.0);
        assert!(out.new_frame);
        let request = out.present.unwrap();
        let warp = request.warp.unwrap();
        // rendered at x = 60/64, displayed at x = 1.0
        assert!((warp.translation.vector.x - (60.0 * STEP - 1.0)).abs() < 1e-6);
        assert_eq!(request.sequence, 1);
    }

    #[test]
    fn test_unknown_pose_rejected() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        let mut f = frame(1, 60, &mut state);
        f.pose_sequence = 999;
        let out = comp.compensate(&mut state, Some(f), &history(1.0), 1.0);
        assert!(out.present.is_none());
        assert_eq!(out.retired.len(), 1);
        assert_eq!(comp.stats().unknown_pose, 1);
    }

    #[test]
    fn test_stale_frame_retired() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        let h = history(1.0);
        let newer = frame(5, 60, &mut state);
        comp.compensate(&mut state, Some(newer), &h, 1.0);
        state.note_presented(FenceId(1), None);

        let older = frame(4, 61, &mut state);
        let out = comp.compensate(&mut state, Some(older), &h, 1.0);
        assert_eq!(out.retired.len(), 1);
        assert_eq!(out.retired[0].sequence, 4);
        assert_eq!(out.present.unwrap().sequence, 5);
        assert_eq!(comp.stats().stale, 1);
    }

    #[test]
    fn test_render_pose_outside_window_presents_unwarped() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        // pose 600 ms before the display instant
        let present_time = 1.5;
        let k = ((present_time - 0.6) / STEP) as u64;
        let f = frame(1, k, &mut state);
        let out = comp.compensate(&mut state, Some(f), &history(present_time), present_time);
        let request = out.present.unwrap();
        assert!(request.warp.is_none());
        assert_eq!(out.warp_skip, Some(WarpSkip::NoBracket));
    }

    #[test]
    fn test_large_correction_presents_unwarped() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        // 0.3 m of motion between render and display
        let f = frame(1, 45, &mut state);
        let out = comp.compensate(&mut state, Some(f), &history(1.0), 1.0);
        assert!(out.present.unwrap().warp.is_none());
        assert!(matches!(out.warp_skip, Some(WarpSkip::Exceeded { .. })));
    }

    #[test]
    fn test_last_good_represented_with_fresh_warp() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        let f = frame(1, 60, &mut state);
        let out = comp.compensate(&mut state, Some(f), &history(1.0), 1.0);
        let first = out.present.unwrap().warp.unwrap();
        let round_trip = out.round_trip;
        state.note_presented(FenceId(7), round_trip);

        let later = 1.0 + 2.0 * STEP;
        let out = comp.compensate(&mut state, None, &history(later), later);
        assert!(!out.new_frame);
        let round_trip = out.round_trip;
        let second = out.present.unwrap().warp.unwrap();
        state.note_presented(FenceId(8), round_trip);
        assert!(second.translation.vector.x < first.translation.vector.x);
        assert_eq!(comp.stats().re_presented, 1);
        // rtt only counted on first presentation
        assert!((state.rtt().unwrap() - (1.0 - 60.0 * STEP)).abs() < 1e-6);
    }

    #[test]
    fn test_replaced_frame_keeps_its_fence() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        let h = history(1.0);
        let a = frame(1, 60, &mut state);
        comp.compensate(&mut state, Some(a), &h, 1.0);
        state.note_presented(FenceId(3), None);

        let b = frame(2, 62, &mut state);
        let out = comp.compensate(&mut state, Some(b), &h, 1.0);
        assert_eq!(out.retired.len(), 1);
        assert_eq!(out.retired[0].last_fence, Some(FenceId(3)));
        assert_eq!(out.present.unwrap().sequence, 2);
    }

    #[test]
    fn test_rtt_waits_for_presentation() {
        let mut comp = LatencyCompensator::new(&CompensatorConfig::default());
        let mut state = state();
        let h = history(1.2);
        let mut incoming = Some(frame(1, 60, &mut state));

        // nothing composited: each tick offers a sample, none is folded in
        for tick in 0..5 {
            let out = comp.compensate(&mut state, incoming.take(), &h, 1.0 + tick as f64 * STEP);
            assert!(out.round_trip.is_some());
        }
        assert!(state.rtt().is_none());

        let out = comp.compensate(&mut state, None, &h, 1.0 + 5.0 * STEP);
        let round_trip = out.round_trip;
        state.note_presented(FenceId(1), round_trip);
        assert!((state.rtt().unwrap() - (1.0 + 5.0 * STEP - 60.0 * STEP)).abs() < 1e-6);
    }
}
