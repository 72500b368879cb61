//! Pose Source
//!
//! Samples the tracking backend once per tracking tick and keeps the
//! retained history used for latency compensation.

use contracts::{
    DisplayGeometry, PoseConfig, PoseSample, StreamError, TrackingBackend, TrackingState,
};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::PoseHistory;

/// Local tracking session plus retained pose history
pub struct PoseSource {
    backend: Box<dyn TrackingBackend>,
    history: PoseHistory,
    plane_count: usize,
    last_state: Option<TrackingState>,
    active: bool,
}

impl std::fmt::Debug for PoseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseSource")
            .field("backend", &self.backend.name())
            .field("history", &self.history)
            .field("plane_count", &self.plane_count)
            .field("active", &self.active)
            .finish()
    }
}

impl PoseSource {
    pub fn new(backend: Box<dyn TrackingBackend>, config: &PoseConfig) -> Self {
        Self {
            backend,
            history: PoseHistory::new(config.capacity, config.window_s()),
            plane_count: 0,
            last_state: None,
            active: false,
        }
    }

    /// Start or restart the tracking session
    pub fn resume(&mut self) -> Result<(), StreamError> {
        self.backend.resume()?;
        self.active = true;
        info!(backend = self.backend.name(), "pose source resumed");
        Ok(())
    }

    /// Suspend tracking; retained history is kept
    pub fn pause(&mut self) {
        self.backend.pause();
        self.active = false;
        debug!("pose source paused");
    }

    /// Sample the current pose at local time `now`
    ///
    /// Returns a `Paused` sample when localization is lost or the source is
    /// not active. Only usable samples are appended to the history.
    #[instrument(name = "pose_sample", skip(self), level = "trace")]
    pub fn sample(&mut self, now: f64) -> PoseSample {
        if !self.active {
            return PoseSample::paused(now);
        }

        let update = self.backend.poll(now);
        self.plane_count = update.plane_count;

        let sample = match update.pose {
            Some(iso) if update.state.has_pose() => PoseSample::new(
                now,
                iso.translation.vector,
                iso.rotation,
                update.state,
            ),
            _ => PoseSample::paused(now),
        };

        if self.last_state != Some(sample.tracking_state) {
            if sample.tracking_state == TrackingState::Paused {
                warn!(t = now, "tracking lost");
                counter!("cloudar_tracking_lost_total").increment(1);
            } else {
                debug!(t = now, state = ?sample.tracking_state, "tracking state changed");
            }
            self.last_state = Some(sample.tracking_state);
        }

        if sample.is_usable() && !self.history.push(sample) {
            counter!("cloudar_pose_rejected_total").increment(1);
        }
        sample
    }

    pub fn on_geometry_changed(&mut self, geometry: DisplayGeometry) {
        self.backend.on_geometry_changed(geometry);
    }

    /// Release the tracking session
    pub fn shutdown(&mut self) {
        self.active = false;
        self.backend.shutdown();
    }

    #[inline]
    pub fn history(&self) -> &PoseHistory {
        &self.history
    }

    /// Planes detected by the tracker
    #[inline]
    pub fn plane_count(&self) -> usize {
        self.plane_count
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }
}
