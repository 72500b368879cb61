//! Pose interpolation and constant-velocity extrapolation.

use contracts::{PoseSample, TrackingState};
use nalgebra::UnitQuaternion;

fn weaker(a: TrackingState, b: TrackingState) -> TrackingState {
    match (a, b) {
        (TrackingState::Paused, _) | (_, TrackingState::Paused) => TrackingState::Paused,
        (TrackingState::Limited, _) | (_, TrackingState::Limited) => TrackingState::Limited,
        _ => TrackingState::Tracking,
    }
}

/// Pose at `t` between `a` and `b` (lerp + slerp); `t` is clamped to `[a, b]`
pub fn interpolate(a: &PoseSample, b: &PoseSample, t: f64) -> PoseSample {
    let span = b.timestamp - a.timestamp;
    if span <= 0.0 {
        return b.at(t);
    }
    let s = ((t - a.timestamp) / span).clamp(0.0, 1.0);
    PoseSample::new(
        t,
        a.position.lerp(&b.position, s),
        a.orientation.slerp(&b.orientation, s),
        weaker(a.tracking_state, b.tracking_state),
    )
}

/// Pose at `target` predicted from the two most recent samples
///
/// Assumes constant linear and angular velocity over `prev → latest`.
/// Targets further than `max_horizon_s` past `latest` hold `latest`
/// unchanged; targets before `latest` return `latest` as well.
pub fn extrapolate(prev: &PoseSample, latest: &PoseSample, target: f64, max_horizon_s: f64) -> PoseSample {
    let horizon = target - latest.timestamp;
    let dt = latest.timestamp - prev.timestamp;
    if horizon <= 0.0 || horizon > max_horizon_s || dt <= 0.0 {
        return latest.at(target);
    }

    let velocity = (latest.position - prev.position) / dt;
    let delta = latest.orientation * prev.orientation.inverse();
    let angular_velocity = delta.scaled_axis() / dt;

    PoseSample::new(
        target,
        latest.position + velocity * horizon,
        UnitQuaternion::from_scaled_axis(angular_velocity * horizon) * latest.orientation,
        latest.tracking_state,
    )
}
