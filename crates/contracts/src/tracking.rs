//! TrackingBackend trait - local tracking subsystem abstraction
//!
//! Decouples the Pose Source from the platform tracking session. Plane and
//! feature detection are consumed through `plane_count`, not implemented here.

use nalgebra::Isometry3;

use crate::{DisplayGeometry, StreamError, TrackingState};

/// One poll result from the tracking subsystem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerUpdate {
    /// Device pose; `None` when localization is lost
    pub pose: Option<Isometry3<f64>>,

    pub state: TrackingState,

    /// Planes detected so far
    pub plane_count: usize,
}

impl TrackerUpdate {
    /// Update reporting lost localization
    pub fn lost(plane_count: usize) -> Self {
        Self {
            pose: None,
            state: TrackingState::Paused,
            plane_count,
        }
    }
}

/// Local tracking session
///
/// Implemented by platform trackers and by the simulated tracker used in
/// headless runs and tests. Called only from the render thread.
pub trait TrackingBackend: Send {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Start or restart tracking
    fn resume(&mut self) -> Result<(), StreamError>;

    /// Suspend tracking; poses are not produced until `resume`
    fn pause(&mut self);

    /// Poll the latest pose at local clock `now`
    fn poll(&mut self, now: f64) -> TrackerUpdate;

    /// Display rotation or size changed
    fn on_geometry_changed(&mut self, _geometry: DisplayGeometry) {}

    /// Release the tracking session
    fn shutdown(&mut self) {}
}
