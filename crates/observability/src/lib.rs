//! # Observability
//!
//! 流客户端的可观测性：tracing 订阅器初始化、Prometheus 导出，
//! 以及逐帧的会话指标。
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig::verbosity(1, false))?;
//!
//! let status = session.draw_frame();
//! if let Some(report) = session.last_report() {
//!     observability::record_tick_metrics(report);
//!     aggregator.update(report);
//! }
//! ```

pub mod metrics;

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

pub use crate::metrics::{
    record_link_health, record_tick_metrics, MetricsSummary, RunningStats, SessionMetricsAggregator,
    StatsSummary,
};

/// Prometheus 监听的默认端口
pub const DEFAULT_METRICS_PORT: u16 = 9000;

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with thread and source location
    Json,
    #[default]
    Pretty,
    Compact,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
        }
    }

    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            LogFormat::Pretty => fmt::layer().pretty().with_thread_names(true).boxed(),
            LogFormat::Compact => fmt::layer().compact().with_thread_names(true).boxed(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// 订阅器与导出器配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// 未设置 `RUST_LOG` 时使用的过滤器
    pub default_filter: String,

    /// Ignore `RUST_LOG` and always use `default_filter`
    pub force_filter: bool,

    /// Prometheus listener; `None` keeps metrics in-process only
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            default_filter: "info".to_string(),
            force_filter: false,
            metrics_addr: None,
        }
    }
}

impl ObservabilityConfig {
    /// `-v` / `-vv` / `-q` style verbosity; quiet wins and ignores `RUST_LOG`
    pub fn verbosity(verbose: u8, quiet: bool) -> Self {
        let (default_filter, force_filter) = match (quiet, verbose) {
            (true, _) => ("warn", true),
            (false, 0) => ("info", false),
            (false, 1) => ("debug", false),
            (false, _) => ("trace", false),
        };
        Self {
            default_filter: default_filter.to_string(),
            force_filter,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Serve Prometheus on all interfaces at `port`
    pub fn with_metrics_port(mut self, port: u16) -> Self {
        self.metrics_addr = Some(SocketAddr::from(([0, 0, 0, 0], port)));
        self
    }

    fn filter(&self) -> EnvFilter {
        if self.force_filter {
            return EnvFilter::new(&self.default_filter);
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// 安装全局订阅器；如已配置，同时启动 Prometheus 导出器
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(config.log_format.layer())
        .with(config.filter())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(addr) = config.metrics_addr {
        install_exporter(addr)?;
    }

    tracing::debug!(
        log_format = config.log_format.as_str(),
        filter = %config.default_filter,
        metrics = ?config.metrics_addr,
        "observability initialized"
    );
    Ok(())
}

/// 仅启动 Prometheus 导出器（日志已另行初始化）
pub fn init_metrics_only(port: u16) -> Result<()> {
    install_exporter(SocketAddr::from(([0, 0, 0, 0], port)))
}

fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to install Prometheus recorder on {addr}"))?;
    tracing::info!(%addr, "Prometheus metrics endpoint listening");
    Ok(())
}
