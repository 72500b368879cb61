//! Headless display compositor
//!
//! Stands in for the GPU path in the CLI and in tests: every composite is
//! recorded into a shared log, and each presentation fence signals a fixed
//! number of draw ticks after it was issued.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{
    CompositeRequest, DisplayCompositor, DisplayGeometry, FenceId, FenceProbe, StereoLayout,
    StreamError,
};
use nalgebra::Isometry3;
use tracing::{debug, trace};

/// Presentations kept in the log
const LOG_CAPACITY: usize = 1024;

/// One recorded composite
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub sequence: u64,
    pub present_time: f64,
    pub warp: Option<Isometry3<f64>>,
    pub stereo_layout: StereoLayout,
    pub width: u32,
    pub height: u32,
    pub fence: FenceId,
}

/// Everything the compositor was asked to do
#[derive(Debug, Default)]
pub struct CompositorLog {
    /// Most recent presentations, oldest first
    pub presentations: VecDeque<Presentation>,
    /// Total composites (not bounded by the log)
    pub composited: u64,
    /// Draws with no remote frame
    pub local_frames: u64,
    pub surfaces_created: u32,
    pub releases: u32,
    pub geometry: Option<DisplayGeometry>,
}

impl CompositorLog {
    /// Presented sequences in order
    pub fn sequences(&self) -> Vec<u64> {
        self.presentations.iter().map(|p| p.sequence).collect()
    }
}

/// Shared view of a [`HeadlessCompositor`]'s log
pub type SharedCompositorLog = Arc<Mutex<CompositorLog>>;

/// Compositor with no display behind it
#[derive(Debug)]
pub struct HeadlessCompositor {
    fence_latency: u64,
    tick: u64,
    next_fence: u64,
    /// Issued fences and the tick they were issued on
    in_flight: VecDeque<(FenceId, u64)>,
    /// Every fence at or below this id has signaled
    signaled_through: u64,
    surface: bool,
    log: SharedCompositorLog,
}

impl Default for HeadlessCompositor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl HeadlessCompositor {
    /// Fences signal `fence_latency` draw ticks after they were issued
    pub fn new(fence_latency: u64) -> Self {
        Self {
            fence_latency,
            tick: 0,
            next_fence: 1,
            in_flight: VecDeque::new(),
            signaled_through: 0,
            surface: false,
            log: SharedCompositorLog::default(),
        }
    }

    /// Handle to the log; stays valid after the compositor is boxed
    pub fn log(&self) -> SharedCompositorLog {
        Arc::clone(&self.log)
    }

    fn lock(&self) -> MutexGuard<'_, CompositorLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One display refresh elapsed
    fn advance(&mut self) {
        self.tick += 1;
        while let Some(&(fence, issued)) = self.in_flight.front() {
            if self.tick < issued + self.fence_latency {
                break;
            }
            self.signaled_through = fence.0;
            self.in_flight.pop_front();
            trace!(fence = fence.0, "fence signaled");
        }
    }
}

impl FenceProbe for HeadlessCompositor {
    fn is_signaled(&self, fence: FenceId) -> bool {
        fence.0 <= self.signaled_through
    }
}

impl DisplayCompositor for HeadlessCompositor {
    fn on_surface_created(&mut self) -> Result<(), StreamError> {
        self.surface = true;
        self.lock().surfaces_created += 1;
        debug!("headless surface created");
        Ok(())
    }

    fn on_geometry_changed(&mut self, geometry: DisplayGeometry) {
        self.lock().geometry = Some(geometry);
    }

    fn composite(&mut self, request: &CompositeRequest<'_>) -> Result<FenceId, StreamError> {
        if !self.surface {
            return Err(StreamError::compositor("no display surface"));
        }
        self.advance();

        let fence = FenceId(self.next_fence);
        self.next_fence += 1;
        self.in_flight.push_back((fence, self.tick));

        let presentation = Presentation {
            sequence: request.sequence,
            present_time: request.present_time,
            warp: request.warp,
            stereo_layout: request.stereo_layout,
            width: request.surface.width,
            height: request.surface.height,
            fence,
        };
        let mut log = self.lock();
        if log.presentations.len() == LOG_CAPACITY {
            log.presentations.pop_front();
        }
        log.presentations.push_back(presentation);
        log.composited += 1;
        Ok(fence)
    }

    fn present_local(&mut self, _present_time: f64) -> Result<(), StreamError> {
        self.advance();
        self.lock().local_frames += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.surface = false;
        // Nothing is drawing any more
        self.signaled_through = self.next_fence.saturating_sub(1);
        self.in_flight.clear();
        self.lock().releases += 1;
        debug!("headless surface released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Surface, SurfaceHandle};

    fn surface() -> Surface {
        Surface {
            handle: SurfaceHandle { slot: 0, generation: 1 },
            width: 2,
            height: 1,
            pixels: vec![0; 8],
        }
    }

    fn request(surface: &Surface, sequence: u64) -> CompositeRequest<'_> {
        CompositeRequest {
            surface,
            sequence,
            stereo_layout: StereoLayout::Mono,
            warp: None,
            present_time: sequence as f64,
        }
    }

    #[test]
    fn test_requires_surface() {
        let mut compositor = HeadlessCompositor::new(1);
        let s = surface();
        assert!(compositor.composite(&request(&s, 1)).is_err());
        compositor.on_surface_created().unwrap();
        assert!(compositor.composite(&request(&s, 1)).is_ok());
    }

    #[test]
    fn test_fence_signals_after_latency() {
        let mut compositor = HeadlessCompositor::new(2);
        compositor.on_surface_created().unwrap();
        let s = surface();

        let fence = compositor.composite(&request(&s, 1)).unwrap();
        assert!(!compositor.is_signaled(fence));
        compositor.present_local(0.0).unwrap();
        assert!(!compositor.is_signaled(fence));
        let second = compositor.composite(&request(&s, 2)).unwrap();
        assert!(compositor.is_signaled(fence));
        assert!(!compositor.is_signaled(second));
    }

    #[test]
    fn test_log_records_and_release_signals_everything() {
        let mut compositor = HeadlessCompositor::new(10);
        let log = compositor.log();
        compositor.on_surface_created().unwrap();
        compositor.on_geometry_changed(DisplayGeometry::new(1, 640, 480));
        let s = surface();
        let fence = compositor.composite(&request(&s, 7)).unwrap();
        compositor.release();

        assert!(compositor.is_signaled(fence));
        let log = log.lock().unwrap();
        assert_eq!(log.sequences(), vec![7]);
        assert_eq!(log.presentations[0].width, 2);
        assert_eq!(log.geometry.map(|g| g.rotation), Some(1));
        assert_eq!((log.surfaces_created, log.releases), (1, 1));
    }
}
