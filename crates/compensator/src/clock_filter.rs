//! Clock offset estimation.
//!
//! Each received frame yields one NTP-style exchange:
//!
//! ```text
//! t1 sent_at             (local)   pose handed to the transport
//! t2 server_received_at  (remote)  pose arrived at the renderer
//! t3 server_timestamp    (remote)  frame finished rendering
//! t4 received_at         (local)   frame reassembled
//! ```
//!
//! The raw offset `((t2 - t1) + (t3 - t4)) / 2` is smoothed by a 2-state
//! (offset + drift) Kalman filter whose measurement noise adapts to the
//! residual variance (EWMA) and grows with the exchange's network delay.

use std::collections::VecDeque;

use contracts::ClockFilterConfig;

const MIN_DT: f64 = 1e-3;
const DEFAULT_ALPHA: f64 = 0.85;

/// One clock exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetSample {
    /// remote − local (seconds)
    pub offset: f64,
    /// Round trip minus server processing (seconds)
    pub network_delay: f64,
}

impl OffsetSample {
    /// Build from the four exchange timestamps
    pub fn from_exchange(sent_at: f64, server_received_at: f64, server_timestamp: f64, received_at: f64) -> Self {
        Self {
            offset: ((server_received_at - sent_at) + (server_timestamp - received_at)) / 2.0,
            network_delay: ((received_at - sent_at) - (server_timestamp - server_received_at)).max(0.0),
        }
    }
}

/// Adaptive Kalman filter over (offset, drift)
///
/// Transition F = [[1, Δt], [0, 1]], observation H = [1, 0].
#[derive(Debug, Clone, PartialEq)]
pub struct ClockOffsetFilter {
    state: [f64; 2],
    covariance: [[f64; 2]; 2],
    q_offset: f64,
    q_drift: f64,
    base_r: f64,
    r: f64,
    ewma_variance: f64,
    residuals: VecDeque<f64>,
    window_size: usize,
    alpha: f64,
    expected_interval: f64,
    /// Smallest network delay seen; delays above it inflate R
    min_delay: Option<f64>,
    last_update: Option<f64>,
    updates: u64,
}

impl ClockOffsetFilter {
    pub fn new(config: &ClockFilterConfig) -> Self {
        let window_size = config.residual_window.max(3);
        let base_r = config.measurement_noise.max(1e-12);
        Self {
            state: [config.initial_offset, 0.0],
            covariance: [[1.0, 0.0], [0.0, 1.0]],
            q_offset: config.process_noise.max(1e-12),
            q_drift: (config.process_noise * 0.1).max(1e-12),
            base_r,
            r: base_r,
            ewma_variance: base_r,
            residuals: VecDeque::with_capacity(window_size),
            window_size,
            alpha: DEFAULT_ALPHA,
            expected_interval: config.expected_interval.unwrap_or(1.0 / 60.0).max(MIN_DT),
            min_delay: None,
            last_update: None,
            updates: 0,
        }
    }

    /// Fold in one exchange observed at local time `now`
    ///
    /// Returns `(offset, residual)`.
    pub fn update(&mut self, sample: OffsetSample, now: f64) -> (f64, f64) {
        let dt = self
            .last_update
            .map(|last| now - last)
            .filter(|dt| dt.is_finite() && *dt > 0.0)
            .unwrap_or(self.expected_interval)
            .max(MIN_DT);
        self.last_update = Some(now);

        // Exchanges with queuing delay carry an asymmetric-path error of up
        // to half the excess delay.
        let min_delay = self.min_delay.map_or(sample.network_delay, |m| m.min(sample.network_delay));
        self.min_delay = Some(min_delay);
        let excess = (sample.network_delay - min_delay).max(0.0);
        let r = self.r + (excess / 2.0).powi(2);

        // Predict
        let offset_pred = self.state[0] + dt * self.state[1];
        let drift_pred = self.state[1];
        let [[p00, p01], [_, p11]] = self.covariance;
        let pred00 = p00 + 2.0 * dt * p01 + dt * dt * p11 + self.q_offset;
        let pred01 = p01 + dt * p11;
        let pred11 = p11 + self.q_drift;

        // Update
        let residual = sample.offset - offset_pred;
        let s = pred00 + r;
        let k0 = pred00 / s;
        let k1 = pred01 / s;

        self.state = [offset_pred + k0 * residual, drift_pred + k1 * residual];
        let new_p00 = (1.0 - k0) * pred00;
        let new_p01 = (1.0 - k0) * pred01;
        let new_p11 = pred11 - k1 * pred01;
        self.covariance = [[new_p00.max(0.0), new_p01], [new_p01, new_p11.max(0.0)]];

        self.residuals.push_back(residual);
        if self.residuals.len() > self.window_size {
            self.residuals.pop_front();
        }
        self.ewma_variance = self.alpha * self.ewma_variance + (1.0 - self.alpha) * residual.powi(2);
        self.r = self.ewma_variance.clamp(self.base_r * 0.1, self.base_r * 10.0);
        self.updates += 1;

        (self.state[0], residual)
    }

    /// remote − local (seconds)
    #[inline]
    pub fn offset(&self) -> f64 {
        self.state[0]
    }

    /// Offset change rate (seconds per second)
    #[inline]
    pub fn drift(&self) -> f64 {
        self.state[1]
    }

    /// Variance of the offset estimate
    #[inline]
    pub fn uncertainty(&self) -> f64 {
        self.covariance[0][0]
    }

    #[inline]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn recent_residuals(&self) -> impl Iterator<Item = &f64> {
        self.residuals.iter()
    }

    /// Map a remote timestamp onto the local clock
    #[inline]
    pub fn to_local(&self, remote: f64) -> f64 {
        remote - self.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClockFilterConfig {
        ClockFilterConfig {
            initial_offset: 0.0,
            process_noise: 1e-6,
            measurement_noise: 1e-4,
            residual_window: 10,
            expected_interval: None,
        }
    }

    #[test]
    fn test_exchange_math() {
        // remote clock 2 s ahead, 10 ms each way, 5 ms render
        let sample = OffsetSample::from_exchange(1.000, 3.010, 3.015, 1.025);
        assert!((sample.offset - 2.0).abs() < 1e-9);
        assert!((sample.network_delay - 0.020).abs() < 1e-9);
    }

    #[test]
    fn test_converges_to_constant_offset() {
        let mut kf = ClockOffsetFilter::new(&ClockFilterConfig {
            process_noise: 1e-4,
            ..config()
        });
        for i in 0..50 {
            let sample = OffsetSample {
                offset: 0.25,
                network_delay: 0.02,
            };
            kf.update(sample, i as f64 * 0.05);
        }
        assert!((kf.offset() - 0.25).abs() < 1e-3, "got {}", kf.offset());
        assert_eq!(kf.updates(), 50);
    }

    #[test]
    fn test_noisy_exchanges() {
        let mut kf = ClockOffsetFilter::new(&config());
        for i in 0..200 {
            let noise = ((i % 10) as f64 - 4.5) * 0.002;
            let sample = OffsetSample {
                offset: -0.1 + noise,
                network_delay: 0.02,
            };
            kf.update(sample, i as f64 / 60.0);
        }
        assert!((kf.offset() + 0.1).abs() < 0.005, "got {}", kf.offset());
    }

    #[test]
    fn test_delayed_exchange_weighs_less() {
        let mut a = ClockOffsetFilter::new(&config());
        let mut b = ClockOffsetFilter::new(&config());
        for i in 0..30 {
            let sample = OffsetSample {
                offset: 0.5,
                network_delay: 0.01,
            };
            a.update(sample, i as f64 * 0.02);
            b.update(sample, i as f64 * 0.02);
        }
        // same outlier, one arriving with 200 ms of queuing delay
        a.update(OffsetSample { offset: 0.6, network_delay: 0.01 }, 0.62);
        b.update(OffsetSample { offset: 0.6, network_delay: 0.21 }, 0.62);
        assert!((b.offset() - 0.5).abs() < (a.offset() - 0.5).abs());
    }

    #[test]
    fn test_to_local() {
        let mut kf = ClockOffsetFilter::new(&ClockFilterConfig {
            initial_offset: 3.0,
            ..config()
        });
        assert_eq!(kf.to_local(10.0), 7.0);
        kf.update(OffsetSample { offset: 3.0, network_delay: 0.0 }, 1.0);
        assert!((kf.to_local(10.0) - 7.0).abs() < 1e-9);
    }
}
