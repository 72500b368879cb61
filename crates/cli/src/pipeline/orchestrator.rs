//! Headless session driver.
//!
//! Builds a session around the simulated tracker and the headless
//! compositor, then calls `draw_frame` at the display rate until the frame
//! budget, the timeout, a disconnect or the shutdown signal ends the run.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{DrawStatus, MonotonicClock, SessionConfig, SharedClock, StreamError};
use observability::{record_link_health, record_tick_metrics};
use pose_source::{SimulatedTracker, SimulatedTrackerConfig};
use session::{HeadlessCompositor, SessionCoordinator};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use transport::{FrameTransport, LoopbackConfig, LoopbackHandle, LoopbackRenderer, MemoryLink};

use super::PipelineStats;
use crate::error::CliError;

/// Datagrams buffered per direction of the in-process link
const LOOPBACK_LINK_CAPACITY: usize = 256;

/// Session driver configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub session: SessionConfig,

    /// Launch command line forwarded before the first resume
    pub launch_args: Option<String>,

    /// Draws to run (None = until interrupted)
    pub max_frames: Option<u64>,

    pub display_hz: f64,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// In-process renderer; UDP to `session.server` when `None`
    pub loopback: Option<LoopbackConfig>,

    pub tracker: SimulatedTrackerConfig,

    /// Ticks before a presentation fence signals
    pub fence_latency: u64,
}

/// Headless session driver
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until done or until `shutdown` resolves
    pub async fn run<S>(self, shutdown: S) -> Result<PipelineStats>
    where
        S: Future<Output = ()>,
    {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let clock = MonotonicClock::shared();
        let compositor = HeadlessCompositor::new(self.config.fence_latency);
        let tracker = SimulatedTracker::new(self.config.tracker.clone());

        let mut session = SessionCoordinator::create(
            self.config.session.clone(),
            Box::new(tracker),
            Box::new(compositor),
            clock.clone(),
        )
        .context("Failed to create session")?;

        let renderer = match &self.config.loopback {
            Some(loopback) => {
                let (client, server) = MemoryLink::pair(LOOPBACK_LINK_CAPACITY);
                let handle = LoopbackRenderer::new(loopback.clone(), clock.clone())
                    .spawn_thread(server)
                    .context("Failed to start loopback renderer")?;
                session = session.with_connector(loopback_connector(client));
                info!(latency_ms = loopback.latency_ms, "In-process loopback renderer started");
                Some(handle)
            }
            None => None,
        };

        if let Some(args) = &self.config.launch_args {
            session
                .handle_launch_options(args)
                .context("Launch options rejected")?;
        }
        if renderer.is_none() && session.server_ip().is_empty() {
            return Err(CliError::MissingServer.into());
        }

        session.on_surface_created().context("Failed to attach display surface")?;
        session
            .on_resume()
            .map_err(|e| CliError::session(e.to_string()))?;

        info!(
            server = session.server_ip(),
            display_hz = self.config.display_hz,
            max_frames = ?self.config.max_frames,
            "Session resumed"
        );

        let stats = self.draw_loop(&mut session, renderer, shutdown).await;
        Ok(stats)
    }

    async fn draw_loop<S>(
        &self,
        session: &mut SessionCoordinator,
        renderer: Option<LoopbackHandle>,
        shutdown: S,
    ) -> PipelineStats
    where
        S: Future<Output = ()>,
    {
        let mut stats = PipelineStats::default();
        let period = Duration::from_secs_f64(1.0 / self.config.display_hz.max(1.0));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let start = Instant::now();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Shutdown requested, stopping session");
                    break;
                }
                _ = interval.tick() => {}
            }

            let status = session.draw_frame();
            stats.final_status = Some(status);
            if let Some(report) = session.last_report() {
                record_tick_metrics(report);
                record_link_health(report.link_health);
                stats.session_metrics.update(report);
            }

            if status == DrawStatus::Disconnected {
                warn!(reason = ?session.disconnect_reason(), "Renderer disconnected");
                break;
            }
            if self
                .config
                .max_frames
                .is_some_and(|max| stats.session_metrics.total_draws >= max)
            {
                info!("Frame budget reached");
                break;
            }
            if self.config.timeout.is_some_and(|t| start.elapsed() >= t) {
                warn!("Session timeout reached");
                break;
            }
        }

        stats.duration = start.elapsed();
        stats.session = session.stats();
        stats.transport = session.transport_stats();
        stats.decoder = session.decoder_stats();
        stats.compensator = session.compensator_stats();
        stats.disconnect_reason = session.disconnect_reason().map(str::to_string);

        session.destroy();

        if let Some(renderer) = renderer {
            match renderer.stop() {
                Ok(summary) => stats.renderer = Some(summary),
                Err(e) => warn!(error = %e, "Loopback renderer stopped with an error"),
            }
        }

        stats
    }
}

/// Connector that hands the in-process link to the first transport
fn loopback_connector(
    link: MemoryLink,
) -> impl FnMut(&SessionConfig, SharedClock) -> Result<FrameTransport, StreamError> + Send + 'static {
    let mut link = Some(link);
    move |config: &SessionConfig, clock: SharedClock| {
        let link = link
            .take()
            .ok_or_else(|| StreamError::connection_lost("loopback link already used"))?;
        FrameTransport::with_link(link, config, clock)
    }
}
