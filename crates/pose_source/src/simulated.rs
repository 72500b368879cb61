//! 模拟跟踪器
//!
//! 平台跟踪会话的确定性替身：设备以恒定偏航角速度绕中心点运动并始终朝向中心。
//! 可按时间区间脚本化地丢失定位；跟踪建立后按固定间隔"发现"平面。

use contracts::{StreamError, TrackerUpdate, TrackingBackend, TrackingState};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 模拟运动与跟踪脚本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedTrackerConfig {
    /// 轨道半径（米）
    pub radius_m: f64,
    /// 设备高度（米）
    pub height_m: f64,
    /// 绕中心的偏航角速度（rad/s）
    pub yaw_rate: f64,
    /// 恢复后在此时长内报告 `Limited`（秒）
    pub warmup_s: f64,
    /// 本地时钟上的定位丢失区间 `[start, end)`（秒）
    pub loss_intervals: Vec<(f64, f64)>,
    /// 跟踪期间每隔此时长发现一个新平面（秒）
    pub plane_interval_s: f64,
    pub max_planes: usize,
}

impl Default for SimulatedTrackerConfig {
    fn default() -> Self {
        Self {
            radius_m: 0.5,
            height_m: 1.5,
            yaw_rate: 0.5,
            warmup_s: 0.2,
            loss_intervals: Vec::new(),
            plane_interval_s: 1.0,
            max_planes: 4,
        }
    }
}

/// 脚本化跟踪后端
#[derive(Debug)]
pub struct SimulatedTracker {
    config: SimulatedTrackerConfig,
    running: bool,
    resumed_at: Option<f64>,
    tracking_since: Option<f64>,
    plane_count: usize,
}

impl SimulatedTracker {
    pub fn new(config: SimulatedTrackerConfig) -> Self {
        Self {
            config,
            running: false,
            resumed_at: None,
            tracking_since: None,
            plane_count: 0,
        }
    }

    /// 时刻 `t` 的真实设备位姿
    pub fn pose_at(&self, t: f64) -> Isometry3<f64> {
        let angle = self.config.yaw_rate * t;
        let position = Vector3::new(
            self.config.radius_m * angle.sin(),
            self.config.height_m,
            self.config.radius_m * angle.cos(),
        );
        // Rotate about +Y so the device keeps facing the orbit center.
        let orientation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle);
        Isometry3::from_parts(Translation3::from(position), orientation)
    }

    fn is_lost_at(&self, t: f64) -> bool {
        self.config
            .loss_intervals
            .iter()
            .any(|&(start, end)| t >= start && t < end)
    }
}

impl Default for SimulatedTracker {
    fn default() -> Self {
        Self::new(SimulatedTrackerConfig::default())
    }
}

impl TrackingBackend for SimulatedTracker {
    fn name(&self) -> &str {
        "simulated"
    }

    fn resume(&mut self) -> Result<(), StreamError> {
        self.running = true;
        self.resumed_at = None;
        debug!("simulated tracker resumed");
        Ok(())
    }

    fn pause(&mut self) {
        self.running = false;
        self.tracking_since = None;
    }

    fn poll(&mut self, now: f64) -> TrackerUpdate {
        if !self.running {
            return TrackerUpdate::lost(self.plane_count);
        }
        let resumed_at = *self.resumed_at.get_or_insert(now);

        if self.is_lost_at(now) {
            self.tracking_since = None;
            return TrackerUpdate::lost(self.plane_count);
        }

        let state = if now - resumed_at < self.config.warmup_s {
            TrackingState::Limited
        } else {
            TrackingState::Tracking
        };

        if state == TrackingState::Tracking {
            let since = *self.tracking_since.get_or_insert(now);
            if self.config.plane_interval_s > 0.0 {
                let discovered = ((now - since) / self.config.plane_interval_s) as usize + 1;
                self.plane_count = self
                    .plane_count
                    .max(discovered.min(self.config.max_planes));
            }
        }

        TrackerUpdate {
            pose: Some(self.pose_at(now)),
            state,
            plane_count: self.plane_count,
        }
    }
}
