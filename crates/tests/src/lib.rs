//! # Integration Tests
//!
//! 跨 crate 的端到端测试。
//!
//! 覆盖：
//! - a session against a loopback renderer over real UDP
//! - latency, corruption, tracking loss and disconnect flows over in-memory links
//! - configuration files feeding a session
//! - the session registry and per-draw metric aggregation

#[cfg(test)]
mod support {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    use contracts::{CodecKind, DrawStatus, MonotonicClock, SessionConfig, SharedClock, StreamError, TickReport};
    use pose_source::{SimulatedTracker, SimulatedTrackerConfig};
    use session::{HeadlessCompositor, SessionCoordinator, SharedCompositorLog};
    use tokio::sync::oneshot;
    use transport::{
        FrameTransport, LoopbackConfig, LoopbackHandle, LoopbackRenderer, LoopbackSummary, MemoryLink, UdpLink,
    };

    pub fn session_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.transport.heartbeat_interval_ms = 20;
        config.transport.stall_timeout_ms = 300;
        config.transport.disconnect_timeout_ms = 3000;
        config.decoder.preferred_codec = CodecKind::Raw;
        config
    }

    pub fn tracker() -> SimulatedTrackerConfig {
        SimulatedTrackerConfig {
            warmup_s: 0.0,
            ..SimulatedTrackerConfig::default()
        }
    }

    pub fn loopback(latency_ms: u64) -> LoopbackConfig {
        LoopbackConfig {
            latency_ms,
            width: 64,
            height: 32,
            ..LoopbackConfig::default()
        }
    }

    pub struct Harness {
        pub session: SessionCoordinator,
        pub log: SharedCompositorLog,
        pub renderer: Option<LoopbackHandle>,
    }

    fn build(config: SessionConfig, tracker: SimulatedTrackerConfig, clock: SharedClock) -> (SessionCoordinator, SharedCompositorLog) {
        let compositor = HeadlessCompositor::new(1);
        let log = compositor.log();
        let session = SessionCoordinator::create(
            config,
            Box::new(SimulatedTracker::new(tracker)),
            Box::new(compositor),
            clock,
        )
        .unwrap();
        (session, log)
    }

    /// Session wired to an in-process renderer over a memory link, resumed
    pub fn in_memory(tracker: SimulatedTrackerConfig, renderer: LoopbackConfig) -> Harness {
        let clock = MonotonicClock::shared();
        let (client, server) = MemoryLink::pair(256);
        let handle = LoopbackRenderer::new(renderer, Arc::clone(&clock))
            .spawn_thread(server)
            .unwrap();

        let (session, log) = build(session_config(), tracker, clock);
        let mut link = Some(client);
        let mut session = session.with_connector(move |config: &SessionConfig, clock: SharedClock| {
            let link = link
                .take()
                .ok_or_else(|| StreamError::connection_lost("link already used"))?;
            FrameTransport::with_link(link, config, clock)
        });

        session.on_surface_created().unwrap();
        session.on_resume().unwrap();
        Harness {
            session,
            log,
            renderer: Some(handle),
        }
    }

    /// Session using the default UDP connector against `server`, resumed
    pub fn over_udp(server: SocketAddr, tracker: SimulatedTrackerConfig) -> Harness {
        let mut config = session_config();
        config.server.host = server.ip().to_string();
        config.server.port = server.port();
        config.server.bind = "127.0.0.1:0".to_string();

        let (mut session, log) = build(config, tracker, MonotonicClock::shared());
        session.on_surface_created().unwrap();
        session.on_resume().unwrap();
        Harness {
            session,
            log,
            renderer: None,
        }
    }

    /// Loopback renderer listening on a real UDP socket
    pub struct UdpRenderer {
        pub addr: SocketAddr,
        stop: Option<oneshot::Sender<()>>,
        thread: Option<JoinHandle<LoopbackSummary>>,
    }

    impl UdpRenderer {
        pub fn spawn(config: LoopbackConfig) -> Self {
            let (addr_tx, addr_rx) = std::sync::mpsc::channel();
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            let thread = std::thread::spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let link = UdpLink::listen("127.0.0.1:0").await.unwrap();
                    addr_tx.send(link.local_addr().unwrap()).unwrap();
                    LoopbackRenderer::new(config, MonotonicClock::shared())
                        .run(link, async {
                            let _ = stop_rx.await;
                        })
                        .await
                        .unwrap()
                })
            });
            let addr = addr_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            Self {
                addr,
                stop: Some(stop_tx),
                thread: Some(thread),
            }
        }

        pub fn stop(mut self) -> LoopbackSummary {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            self.thread.take().map(|t| t.join().unwrap()).unwrap_or_default()
        }
    }

    /// Draw until `pred` accepts a report or `timeout` passes
    pub fn draw_until<F>(session: &mut SessionCoordinator, timeout: Duration, mut pred: F) -> Option<TickReport>
    where
        F: FnMut(&TickReport) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            session.draw_frame();
            if let Some(report) = session.last_report() {
                if pred(report) {
                    return Some(report.clone());
                }
            }
            std::thread::sleep(Duration::from_millis(4));
        }
        None
    }

    pub fn draw_until_status(session: &mut SessionCoordinator, want: DrawStatus, timeout: Duration) -> bool {
        draw_until(session, timeout, |report| report.status == want).is_some()
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::time::Duration;

    use contracts::{DrawStatus, LinkHealth};
    use observability::SessionMetricsAggregator;
    use transport::LoopbackConfig;

    use crate::support::*;

    /// Session -> UDP -> loopback renderer -> UDP -> decode -> compensate -> composite
    #[test]
    fn test_e2e_udp_session() {
        let renderer = UdpRenderer::spawn(loopback(10));
        let mut h = over_udp(renderer.addr, tracker());

        assert!(draw_until_status(&mut h.session, DrawStatus::Nominal, Duration::from_secs(5)));
        let report = draw_until(&mut h.session, Duration::from_secs(3), |r| {
            r.presented_sequence.is_some_and(|s| s >= 5)
        })
        .expect("frames keep arriving");

        assert_eq!(report.link_health, LinkHealth::Connected);
        assert!(report.rtt_ms.is_some_and(|rtt| rtt > 0.0));

        let sequences = h.log.lock().unwrap().sequences();
        assert!(sequences.windows(2).all(|w| w[0] <= w[1]));

        let transport = h.session.transport_stats().unwrap();
        assert!(transport.frames_received >= 5);

        h.session.destroy();
        let summary = renderer.stop();
        assert!(summary.poses_received > 0);
        assert!(summary.frames_sent >= 5);
    }

    #[test]
    fn test_latency_beyond_pose_window_presents_unwarped() {
        let mut h = in_memory(tracker(), loopback(600));

        let report = draw_until(&mut h.session, Duration::from_secs(5), |r| r.presented())
            .expect("a frame is presented");

        assert_eq!(report.warp_skip.as_deref(), Some("no_bracket"));
        assert_eq!(report.warp_angle_deg, None);
        assert_eq!(report.status, DrawStatus::Nominal);
        assert!(report.rtt_ms.is_some_and(|rtt| rtt > 500.0));

        let presented = h.log.lock().unwrap().presentations.back().cloned().unwrap();
        assert!(presented.warp.is_none());
    }

    #[test]
    fn test_corrupt_frames_are_skipped() {
        let renderer = LoopbackConfig {
            corrupt_every: Some(2),
            ..loopback(10)
        };
        let mut h = in_memory(tracker(), renderer);

        let report = draw_until(&mut h.session, Duration::from_secs(5), |r| {
            r.presented_sequence.is_some_and(|s| s >= 5)
        })
        .expect("good frames are presented");
        assert_ne!(report.status, DrawStatus::Disconnected);

        let decoder = h.session.decoder_stats().unwrap();
        assert!(decoder.dropped_corrupt > 0);
        assert!(decoder.decoded > 0);

        // only odd sequences carry a decodable payload
        let sequences = h.log.lock().unwrap().sequences();
        assert!(sequences.iter().all(|s| s % 2 == 1));
    }

    #[test]
    fn test_tracking_loss_and_recovery() {
        let tracker = pose_source::SimulatedTrackerConfig {
            loss_intervals: vec![(1.0, 1.4)],
            ..tracker()
        };
        let mut h = in_memory(tracker, loopback(10));

        assert!(draw_until_status(&mut h.session, DrawStatus::Nominal, Duration::from_secs(3)));
        assert!(draw_until_status(&mut h.session, DrawStatus::TrackingLost, Duration::from_secs(3)));
        assert!(draw_until_status(&mut h.session, DrawStatus::Nominal, Duration::from_secs(3)));
        assert!(h.session.has_detected_planes());
    }

    #[test]
    fn test_renderer_goodbye_disconnects_once() {
        let renderer = LoopbackConfig {
            goodbye_after: Some(3),
            ..loopback(10)
        };
        let mut h = in_memory(tracker(), renderer);

        assert!(draw_until_status(&mut h.session, DrawStatus::Disconnected, Duration::from_secs(5)));
        assert!(h.session.disconnect_reason().is_some());
        assert!(h.session.transport_stats().is_none());

        let stats = h.session.stats();
        for _ in 0..5 {
            assert_eq!(h.session.draw_frame(), DrawStatus::Disconnected);
        }
        assert_eq!(h.session.stats().poses_sent, stats.poses_sent);

        let summary = h.renderer.take().unwrap().stop().unwrap();
        assert_eq!(summary.frames_sent, 3);
    }

    #[test]
    fn test_pause_resume_over_live_link() {
        let mut h = in_memory(tracker(), loopback(10));
        assert!(draw_until_status(&mut h.session, DrawStatus::Nominal, Duration::from_secs(3)));
        let before = h.session.sync_snapshot();

        h.session.on_pause().unwrap();
        for _ in 0..10 {
            assert_eq!(h.session.draw_frame(), DrawStatus::Inactive);
        }
        std::thread::sleep(Duration::from_millis(100));

        h.session.on_resume().unwrap();
        assert_eq!(h.session.sync_snapshot().last_composited, before.last_composited);
        let report = draw_until(&mut h.session, Duration::from_secs(3), |r| {
            r.new_frame && r.presented_sequence > before.last_composited
        });
        assert!(report.is_some());
    }

    #[test]
    fn test_metrics_aggregate_a_run() {
        let mut h = in_memory(tracker(), loopback(10));
        let mut aggregator = SessionMetricsAggregator::new();

        for _ in 0..150 {
            h.session.draw_frame();
            if let Some(report) = h.session.last_report() {
                observability::record_tick_metrics(report);
                aggregator.update(report);
            }
            std::thread::sleep(Duration::from_millis(4));
        }

        let summary = aggregator.summary();
        assert_eq!(summary.total_draws, 150);
        assert!(summary.presented > 0);
        assert!(summary.new_frames <= summary.presented);
        assert!(summary.rtt_ms.count > 0);
        assert_eq!(
            summary.status_counts.values().sum::<u64>(),
            summary.total_draws
        );
    }
}

#[cfg(test)]
mod config_tests {
    use std::io::Write;

    use config_loader::ConfigLoader;
    use contracts::{CodecKind, ErrorKind, MonotonicClock, StreamError};
    use pose_source::SimulatedTracker;
    use session::{HeadlessCompositor, SessionCoordinator, SessionError};

    const SESSION_TOML: &str = r#"
[server]
host = "10.0.0.2"
port = 48020

[pose]
window_ms = 600

[decoder]
preferred_codec = "jpeg"
pool_size = 8

[compensator]
max_correction_deg = 10.0
"#;

    fn create(config: contracts::SessionConfig) -> Result<SessionCoordinator, SessionError> {
        SessionCoordinator::create(
            config,
            Box::new(SimulatedTracker::default()),
            Box::new(HeadlessCompositor::default()),
            MonotonicClock::shared(),
        )
    }

    #[test]
    fn test_config_file_feeds_session() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", SESSION_TOML).unwrap();

        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.decoder.preferred_codec, CodecKind::Jpeg);

        let mut session = create(config).unwrap();
        assert_eq!(session.server_ip(), "10.0.0.2");

        session
            .handle_launch_options("-s 10.0.0.3 --pose-window-ms 800 --codec raw")
            .unwrap();
        assert_eq!(session.server_ip(), "10.0.0.3");
        assert_eq!(session.config().pose.window_ms, 800);
        assert_eq!(session.config().decoder.preferred_codec, CodecKind::Raw);
        assert_eq!(session.config().compensator.max_correction_deg, 10.0);
    }

    #[test]
    fn test_json_and_toml_agree() {
        let from_toml = ConfigLoader::load_from_str(SESSION_TOML, config_loader::ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&from_toml).unwrap();
        let from_json = ConfigLoader::load_from_str(&json, config_loader::ConfigFormat::Json).unwrap();
        assert_eq!(from_toml, from_json);
    }

    #[test]
    fn test_invalid_config_rejected_at_create() {
        let mut config = contracts::SessionConfig::default();
        config.transport.stall_timeout_ms = 6000;

        let err: StreamError = create(config).unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_bad_launch_options_leave_config_untouched() {
        let mut session = create(contracts::SessionConfig::default()).unwrap();
        assert!(session.handle_launch_options("--pose-window-ms 0").is_err());
        assert_eq!(session.config().pose.window_ms, 500);
        assert_eq!(session.server_ip(), "");
    }
}

#[cfg(test)]
mod registry_tests {
    use std::time::Duration;

    use contracts::DrawStatus;
    use session::{SessionError, SessionHandle, SessionRegistry};

    use crate::support::*;

    #[test]
    fn test_registry_drives_sessions_by_handle() {
        let mut registry = SessionRegistry::new();
        let Harness { session, renderer: _first_renderer, .. } = in_memory(tracker(), loopback(10));
        let first = registry.insert(session);
        let Harness { session, renderer: _second_renderer, .. } = in_memory(tracker(), loopback(10));
        let second = registry.insert(session);
        assert_ne!(first, second);

        let session = registry.get_mut(first).unwrap();
        assert!(draw_until_status(session, DrawStatus::Nominal, Duration::from_secs(3)));

        registry.destroy(first).unwrap();
        assert!(matches!(registry.get(first), Err(SessionError::UnknownHandle(_))));
        assert!(registry.contains(second));

        let raw = second.raw();
        assert_eq!(SessionHandle::from_raw(raw), second);

        registry.destroy_all();
        assert!(registry.is_empty());
    }
}
