//! 会话指标收集模块
//!
//! 每次绘制把一个 `TickReport` 写入 `metrics` 门面，并在内存中聚合，
//! 用于运行结束时的统计摘要。

use std::collections::BTreeMap;

use contracts::{LinkHealth, TickReport};
use metrics::{counter, gauge, histogram};

/// 记录一次绘制的指标
///
/// 每次 `draw_frame` 之后调用。
///
/// # Example
///
/// ```ignore
/// let status = session.draw_frame();
/// if let Some(report) = session.last_report() {
///     record_tick_metrics(report);
/// }
/// ```
pub fn record_tick_metrics(report: &TickReport) {
    counter!("cloudar_draws_total", "status" => report.status.as_str()).increment(1);
    gauge!("cloudar_last_draw_tick").set(report.tick as f64);

    if let Some(sequence) = report.presented_sequence {
        gauge!("cloudar_last_presented_sequence").set(sequence as f64);
        if report.new_frame {
            counter!("cloudar_new_frames_presented_total").increment(1);
        }
    }

    if let Some(angle) = report.warp_angle_deg {
        histogram!("cloudar_warp_angle_deg").record(angle);
    }
    if let Some(skip) = &report.warp_skip {
        counter!("cloudar_unwarped_presents_total", "reason" => skip.clone()).increment(1);
    }

    if let Some(age) = report.frame_age_ms {
        histogram!("cloudar_frame_age_ms").record(age);
    }
    if let Some(rtt) = report.rtt_ms {
        gauge!("cloudar_rtt_ms_current").set(rtt);
    }
    gauge!("cloudar_clock_offset_ms").set(report.clock_offset_ms);
    gauge!("cloudar_decode_queue_depth").set(report.decode_queue as f64);
}

/// 以数值 gauge 记录链路健康状态
pub fn record_link_health(health: LinkHealth) {
    gauge!("cloudar_link_health").set(health.as_u8() as f64);
}

/// 运行期间的内存聚合器
#[derive(Debug, Clone, Default)]
pub struct SessionMetricsAggregator {
    pub total_draws: u64,

    /// 合成了远端帧的绘制次数
    pub presented: u64,

    /// 当帧到达即呈现的次数
    pub new_frames: u64,

    /// 未经校正的呈现次数
    pub unwarped: u64,

    pub status_counts: BTreeMap<String, u64>,

    pub warp_skip_counts: BTreeMap<String, u64>,

    pub rtt_stats: RunningStats,

    pub frame_age_stats: RunningStats,

    pub warp_angle_stats: RunningStats,

    pub clock_offset_stats: RunningStats,
}

impl SessionMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, report: &TickReport) {
        self.total_draws += 1;
        *self
            .status_counts
            .entry(report.status.as_str().to_string())
            .or_insert(0) += 1;

        if !report.presented() {
            return;
        }
        self.presented += 1;
        if report.new_frame {
            self.new_frames += 1;
        }

        match report.warp_angle_deg {
            Some(angle) => self.warp_angle_stats.push(angle),
            None => self.unwarped += 1,
        }
        if let Some(skip) = &report.warp_skip {
            *self.warp_skip_counts.entry(skip.clone()).or_insert(0) += 1;
        }
        if let Some(age) = report.frame_age_ms {
            self.frame_age_stats.push(age);
        }
        if let Some(rtt) = report.rtt_ms {
            self.rtt_stats.push(rtt);
        }
        self.clock_offset_stats.push(report.clock_offset_ms);
    }

    pub fn summary(&self) -> MetricsSummary {
        let rate = |n: u64| {
            if self.total_draws > 0 {
                n as f64 / self.total_draws as f64 * 100.0
            } else {
                0.0
            }
        };
        MetricsSummary {
            total_draws: self.total_draws,
            presented: self.presented,
            new_frames: self.new_frames,
            unwarped: self.unwarped,
            presented_rate: rate(self.presented),
            nominal_rate: rate(self.status_counts.get("nominal").copied().unwrap_or(0)),
            rtt_ms: StatsSummary::from(&self.rtt_stats),
            frame_age_ms: StatsSummary::from(&self.frame_age_stats),
            warp_angle_deg: StatsSummary::from(&self.warp_angle_stats),
            clock_offset_ms: StatsSummary::from(&self.clock_offset_stats),
            status_counts: self.status_counts.clone(),
            warp_skip_counts: self.warp_skip_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// [`SessionMetricsAggregator`] 的统计摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_draws: u64,
    pub presented: u64,
    pub new_frames: u64,
    pub unwarped: u64,
    pub presented_rate: f64,
    pub nominal_rate: f64,
    pub rtt_ms: StatsSummary,
    pub frame_age_ms: StatsSummary,
    pub warp_angle_deg: StatsSummary,
    pub clock_offset_ms: StatsSummary,
    pub status_counts: BTreeMap<String, u64>,
    pub warp_skip_counts: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Session Metrics Summary ===")?;
        writeln!(f, "Draws: {}", self.total_draws)?;
        writeln!(
            f,
            "Presented: {} ({:.2}%), new: {}, unwarped: {}",
            self.presented, self.presented_rate, self.new_frames, self.unwarped
        )?;
        writeln!(f, "Nominal: {:.2}%", self.nominal_rate)?;
        writeln!(f, "RTT (ms): {}", self.rtt_ms)?;
        writeln!(f, "Frame age (ms): {}", self.frame_age_ms)?;
        writeln!(f, "Warp angle (deg): {}", self.warp_angle_deg)?;
        writeln!(f, "Clock offset (ms): {}", self.clock_offset_ms)?;

        if !self.status_counts.is_empty() {
            writeln!(f, "Status counts:")?;
            for (status, count) in &self.status_counts {
                writeln!(f, "  {}: {}", status, count)?;
            }
        }
        if !self.warp_skip_counts.is_empty() {
            writeln!(f, "Unwarped reasons:")?;
            for (reason, count) in &self.warp_skip_counts {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        Ok(())
    }
}

/// [`RunningStats`] 的快照
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线均值与方差（Welford 算法）
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DrawStatus;

    fn presented(tick: u64, angle: Option<f64>) -> TickReport {
        TickReport {
            presented_sequence: Some(tick),
            new_frame: tick % 2 == 0,
            warp_angle_deg: angle,
            warp_skip: angle.is_none().then(|| "no_bracket".to_string()),
            rtt_ms: Some(40.0 + tick as f64),
            clock_offset_ms: 1.5,
            frame_age_ms: Some(12.0),
            link_health: LinkHealth::Connected,
            ..TickReport::idle(tick, DrawStatus::Nominal, tick as f64 / 60.0)
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = SessionMetricsAggregator::new();
        aggregator.update(&TickReport::idle(1, DrawStatus::Searching, 0.0));
        aggregator.update(&presented(2, Some(0.5)));
        aggregator.update(&presented(3, None));

        assert_eq!(aggregator.total_draws, 3);
        assert_eq!(aggregator.presented, 2);
        assert_eq!(aggregator.new_frames, 1);
        assert_eq!(aggregator.unwarped, 1);
        assert_eq!(aggregator.status_counts.get("nominal"), Some(&2));
        assert_eq!(aggregator.warp_skip_counts.get("no_bracket"), Some(&1));
        assert_eq!(aggregator.rtt_stats.count(), 2);
        assert!((aggregator.rtt_stats.mean() - 42.5).abs() < 1e-10);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = SessionMetricsAggregator::new();
        for tick in 1..=4 {
            aggregator.update(&presented(tick, Some(1.0)));
        }
        let summary = aggregator.summary();
        assert!((summary.nominal_rate - 100.0).abs() < 1e-10);

        let output = format!("{}", summary);
        assert!(output.contains("Draws: 4"));
        assert!(output.contains("100.00%"));
        assert!(output.contains("nominal: 4"));
    }
}
