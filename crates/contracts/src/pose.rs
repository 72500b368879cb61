//! PoseSample - Pose Source 输出
//!
//! 带时间戳的 6 自由度设备位姿。

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// 随每个位姿上报的跟踪质量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// 完整 6DoF 跟踪
    #[default]
    Tracking,
    /// 位姿可用但质量下降（如特征点不足）
    Limited,
    /// 定位丢失，位姿不含有效信息
    Paused,
}

impl TrackingState {
    /// Whether a pose in this state may be sent or used for reprojection
    #[inline]
    pub fn has_pose(self) -> bool {
        !matches!(self, TrackingState::Paused)
    }
}

/// 某一时刻的设备位姿
///
/// 普通 `Copy` 值，创建后不再原地修改。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    /// 单调时钟值（秒）
    pub timestamp: f64,

    /// 跟踪空间中的位置（米）
    pub position: Vector3<f64>,

    /// 跟踪空间中的朝向
    pub orientation: UnitQuaternion<f64>,

    /// 跟踪质量
    pub tracking_state: TrackingState,
}

impl PoseSample {
    /// 创建位姿样本
    pub fn new(
        timestamp: f64,
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
        tracking_state: TrackingState,
    ) -> Self {
        Self {
            timestamp,
            position,
            orientation,
            tracking_state,
        }
    }

    /// Identity pose with `Paused` state, returned when localization is lost
    pub fn paused(timestamp: f64) -> Self {
        Self::new(
            timestamp,
            Vector3::zeros(),
            UnitQuaternion::identity(),
            TrackingState::Paused,
        )
    }

    /// Same pose, different timestamp
    pub fn at(&self, timestamp: f64) -> Self {
        Self { timestamp, ..*self }
    }

    /// Rigid transform (tracking space <- device)
    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.orientation)
    }

    /// Whether the pose may be used (not `Paused`)
    #[inline]
    pub fn is_usable(&self) -> bool {
        self.tracking_state.has_pose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_pose_is_identity() {
        let pose = PoseSample::paused(1.5);
        assert_eq!(pose.timestamp, 1.5);
        assert_eq!(pose.tracking_state, TrackingState::Paused);
        assert!(!pose.is_usable());
        assert_eq!(pose.position, Vector3::zeros());
    }

    #[test]
    fn test_at_keeps_pose() {
        let pose = PoseSample::new(
            0.0,
            Vector3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5),
            TrackingState::Limited,
        );
        let moved = pose.at(2.0);
        assert_eq!(moved.timestamp, 2.0);
        assert_eq!(moved.position, pose.position);
        assert_eq!(moved.tracking_state, TrackingState::Limited);
    }

    #[test]
    fn test_serde_round_trip_keeps_state() {
        let pose = PoseSample::new(
            0.25,
            Vector3::new(0.1, 0.0, -0.3),
            UnitQuaternion::identity(),
            TrackingState::Tracking,
        );
        let json = serde_json::to_string(&pose).unwrap();
        assert!(json.contains("tracking"));
        let back: PoseSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pose);
    }
}
