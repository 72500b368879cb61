//! Corrective reprojection.
//!
//! The remote frame was rendered from `render`; the display shows it from
//! `display`. The correction `display⁻¹ · render` maps the rendered view into
//! the current one. Large corrections mean the reconstruction is unreliable
//! and the frame is shown as rendered.

use contracts::CompensatorConfig;
use nalgebra::Isometry3;

/// Correction bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpLimits {
    pub max_angle_rad: f64,
    pub max_translation_m: f64,
}

impl WarpLimits {
    pub fn from_config(config: &CompensatorConfig) -> Self {
        Self {
            max_angle_rad: config.max_correction_deg.to_radians(),
            max_translation_m: config.max_correction_m,
        }
    }
}

/// Why a frame was composited without correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WarpSkip {
    /// Render time fell outside the retained pose window
    NoBracket,
    /// No live pose to correct towards
    NoLivePose,
    /// Correction larger than the limits
    Exceeded { angle_deg: f64, translation_m: f64 },
}

impl WarpSkip {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarpSkip::NoBracket => "no_bracket",
            WarpSkip::NoLivePose => "no_live_pose",
            WarpSkip::Exceeded { .. } => "exceeded",
        }
    }
}

/// `display⁻¹ · render`
#[inline]
pub fn correction(render: &Isometry3<f64>, display: &Isometry3<f64>) -> Isometry3<f64> {
    display.inverse() * render
}

/// Correction within `limits`, or why not
pub fn bounded_correction(
    render: &Isometry3<f64>,
    display: &Isometry3<f64>,
    limits: &WarpLimits,
) -> Result<Isometry3<f64>, WarpSkip> {
    let warp = correction(render, display);
    let angle = warp.rotation.angle();
    let translation = warp.translation.vector.norm();
    if angle > limits.max_angle_rad || translation > limits.max_translation_m {
        return Err(WarpSkip::Exceeded {
            angle_deg: angle.to_degrees(),
            translation_m: translation,
        });
    }
    Ok(warp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    fn iso(x: f64, yaw_deg: f64) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(x, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw_deg.to_radians()),
        )
    }

    fn limits() -> WarpLimits {
        WarpLimits::from_config(&CompensatorConfig::default())
    }

    #[test]
    fn test_identity_when_poses_match() {
        let warp = bounded_correction(&iso(0.3, 10.0), &iso(0.3, 10.0), &limits()).unwrap();
        assert!(warp.rotation.angle() < 1e-12);
        assert!(warp.translation.vector.norm() < 1e-12);
    }

    #[test]
    fn test_correction_maps_render_into_display() {
        let render = iso(0.05, 2.0);
        let display = iso(0.0, 5.0);
        let warp = bounded_correction(&render, &display, &limits()).unwrap();
        let recomposed = display * warp;
        assert!((recomposed.translation.vector - render.translation.vector).norm() < 1e-12);
        assert!((recomposed.rotation.angle_to(&render.rotation)).abs() < 1e-12);
    }

    #[test]
    fn test_limits_reject_large_corrections() {
        let l = limits();
        assert!(matches!(
            bounded_correction(&iso(0.0, 0.0), &iso(0.0, 20.0), &l),
            Err(WarpSkip::Exceeded { .. })
        ));
        assert!(matches!(
            bounded_correction(&iso(0.3, 0.0), &iso(0.0, 0.0), &l),
            Err(WarpSkip::Exceeded { .. })
        ));
        assert!(bounded_correction(&iso(0.2, 0.0), &iso(0.0, 14.0), &l).is_ok());
    }
}
