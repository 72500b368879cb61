//! DisplayCompositor trait - display surface abstraction
//!
//! The compositor consumes a decoded surface plus an optional corrective
//! warp, and returns a fence that signals once the GPU no longer reads the
//! surface.

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::{FenceId, StereoLayout, StreamError, Surface};

/// Display rotation and size in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    /// Quarter turns from the natural orientation (0..=3)
    pub rotation: u8,
    pub width: u32,
    pub height: u32,
}

impl DisplayGeometry {
    pub fn new(rotation: i32, width: u32, height: u32) -> Self {
        Self {
            rotation: rotation.rem_euclid(4) as u8,
            width,
            height,
        }
    }
}

/// One composition request
#[derive(Debug)]
pub struct CompositeRequest<'a> {
    pub surface: &'a Surface,

    /// Frame sequence number
    pub sequence: u64,

    pub stereo_layout: StereoLayout,

    /// Corrective reprojection (display⁻¹ · render); `None` presents the raw frame
    pub warp: Option<Isometry3<f64>>,

    /// Local clock of the display refresh this request targets
    pub present_time: f64,
}

/// Fence state query
pub trait FenceProbe {
    /// Whether the GPU has finished with the presentation behind `fence`
    fn is_signaled(&self, fence: FenceId) -> bool;
}

/// Display surface and composition
pub trait DisplayCompositor: FenceProbe + Send {
    /// Allocate display resources
    fn on_surface_created(&mut self) -> Result<(), StreamError>;

    fn on_geometry_changed(&mut self, geometry: DisplayGeometry);

    /// Composite the surface; returns the presentation fence
    fn composite(&mut self, request: &CompositeRequest<'_>) -> Result<FenceId, StreamError>;

    /// Draw local content only (no remote frame available)
    fn present_local(&mut self, _present_time: f64) -> Result<(), StreamError> {
        Ok(())
    }

    /// Release display resources
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_wraps() {
        assert_eq!(DisplayGeometry::new(5, 10, 20).rotation, 1);
        assert_eq!(DisplayGeometry::new(-1, 10, 20).rotation, 3);
    }
}
