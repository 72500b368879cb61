//! 跨 crate 共享的会话配置契约
//!
//! 每个分区都有 serde 默认值，空文档即为合法配置。
//! 字段范围由 `validator` 检查；跨字段规则位于 `config_loader`。

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::CodecKind;

/// 完整会话配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionConfig {
    /// 远端渲染器地址
    #[validate(nested)]
    pub server: ServerConfig,

    /// 位姿保留
    #[validate(nested)]
    pub pose: PoseConfig,

    /// 帧传输队列与超时
    #[validate(nested)]
    pub transport: TransportConfig,

    /// 解码队列与表面池
    #[validate(nested)]
    pub decoder: DecoderConfig,

    /// 重投影边界与估计器
    #[validate(nested)]
    pub compensator: CompensatorConfig,

    /// 时钟偏移滤波器
    #[validate(nested)]
    pub clock: ClockFilterConfig,
}

/// 远端渲染器地址
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务端主机或 IP；由启动参数设置前为空
    pub host: String,

    pub port: u16,

    /// Local bind address for the UDP socket
    pub bind: String,

    /// Datagram budget; larger frames are fragmented
    #[validate(range(min = 256, max = 65000))]
    pub max_datagram_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 48010,
            bind: "0.0.0.0:0".to_string(),
            max_datagram_bytes: 1400,
        }
    }
}

impl ServerConfig {
    /// `host:port`, or `None` if no host is configured
    pub fn address(&self) -> Option<String> {
        if self.host.is_empty() {
            None
        } else {
            Some(format!("{}:{}", self.host, self.port))
        }
    }
}

/// 位姿历史保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PoseConfig {
    /// 保留窗口，需覆盖最坏情况的往返时延
    #[validate(range(min = 10, max = 10000))]
    pub window_ms: u64,

    /// 环形缓冲区容量（样本数）
    #[validate(range(min = 2, max = 65536))]
    pub capacity: usize,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            window_ms: 500,
            capacity: 256,
        }
    }
}

impl PoseConfig {
    /// Window in seconds
    pub fn window_s(&self) -> f64 {
        self.window_ms as f64 / 1000.0
    }
}

/// 帧传输配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TransportConfig {
    /// Outbound pose queue depth (newest displaces oldest)
    #[validate(range(min = 1, max = 1024))]
    pub send_queue: usize,

    /// Inbound frame queue depth (newest displaces oldest)
    #[validate(range(min = 1, max = 1024))]
    pub recv_queue: usize,

    /// Maximum frames held for reordering
    #[validate(range(min = 1, max = 1024))]
    pub reorder_depth: usize,

    /// Silence before the link is reported stalled
    #[validate(range(min = 1))]
    pub stall_timeout_ms: u64,

    /// Silence before the link is declared lost
    #[validate(range(min = 1))]
    pub disconnect_timeout_ms: u64,

    #[validate(range(min = 1))]
    pub heartbeat_interval_ms: u64,

    /// Consecutive socket errors before the link is declared lost
    #[validate(range(min = 1))]
    pub max_send_failures: u32,

    #[validate(range(min = 1))]
    pub backoff_initial_ms: u64,

    #[validate(range(min = 1))]
    pub backoff_max_ms: u64,

    /// Bounded wait for the I/O thread on shutdown
    pub shutdown_timeout_ms: u64,

    /// Fragment reassembly slots
    #[validate(range(min = 1, max = 256))]
    pub reassembly_slots: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            send_queue: 4,
            recv_queue: 8,
            reorder_depth: 8,
            stall_timeout_ms: 250,
            disconnect_timeout_ms: 5000,
            heartbeat_interval_ms: 100,
            max_send_failures: 32,
            backoff_initial_ms: 10,
            backoff_max_ms: 500,
            shutdown_timeout_ms: 500,
            reassembly_slots: 4,
        }
    }
}

impl TransportConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// 帧解码器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DecoderConfig {
    /// Backpressure threshold for undecoded frames
    #[validate(range(min = 1, max = 64))]
    pub queue_depth: usize,

    /// Decoded frames waiting for the render thread
    #[validate(range(min = 1, max = 64))]
    pub output_depth: usize,

    /// Surface pool capacity
    #[validate(range(min = 2, max = 64))]
    pub pool_size: usize,

    /// Codec requested from the server
    pub preferred_codec: CodecKind,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            queue_depth: 3,
            output_depth: 2,
            pool_size: 6,
            preferred_codec: CodecKind::Png,
        }
    }
}

/// 延迟补偿器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CompensatorConfig {
    /// Corrections rotating more than this are not applied
    #[validate(range(min = 0.0, max = 180.0))]
    pub max_correction_deg: f64,

    /// Corrections translating more than this are not applied
    #[validate(range(min = 0.0))]
    pub max_correction_m: f64,

    /// Cap on the extrapolation horizon
    #[validate(range(min = 0.0, max = 1000.0))]
    pub max_extrapolation_ms: f64,

    /// EWMA weight of a new round-trip sample
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub rtt_alpha: f64,

    /// Expected scan-out delay added to the present instant
    #[validate(range(min = 0.0, max = 100.0))]
    pub display_latency_ms: f64,
}

impl Default for CompensatorConfig {
    fn default() -> Self {
        Self {
            max_correction_deg: 15.0,
            max_correction_m: 0.25,
            max_extrapolation_ms: 100.0,
            rtt_alpha: 0.1,
            display_latency_ms: 0.0,
        }
    }
}

/// 时钟偏移的自适应卡尔曼滤波配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClockFilterConfig {
    /// Initial offset estimate (remote − local, seconds)
    pub initial_offset: f64,

    /// 过程噪声 (Q)
    #[validate(range(exclusive_min = 0.0))]
    pub process_noise: f64,

    /// 测量噪声 (R)
    #[validate(range(exclusive_min = 0.0))]
    pub measurement_noise: f64,

    /// 自适应调节的残差窗口大小
    #[validate(range(min = 1, max = 1000))]
    pub residual_window: usize,

    /// Expected measurement interval (seconds); scales Q for irregular gaps
    pub expected_interval: Option<f64>,
}

impl Default for ClockFilterConfig {
    fn default() -> Self {
        Self {
            initial_offset: 0.0,
            process_noise: 1e-6,
            measurement_noise: 1e-4,
            residual_window: 20,
            expected_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pose.window_ms, 500);
        assert_eq!(config.compensator.max_correction_deg, 15.0);
        assert_eq!(config.server.address(), None);
    }

    #[test]
    fn test_nested_range_violation() {
        let mut config = SessionConfig::default();
        config.decoder.queue_depth = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.errors().contains_key("decoder"));
        assert!(!errors.errors().contains_key("server"));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"server": {"host": "10.0.0.2"}}"#).unwrap();
        assert_eq!(config.server.address().as_deref(), Some("10.0.0.2:48010"));
        assert_eq!(config.transport.send_queue, 4);
    }
}
