//! Session Coordinator
//!
//! Owns every per-session component and runs the per-display-tick pipeline:
//!
//! 1. sample the tracker and send the pose (with queued input) to the server
//! 2. drain received frames into the decoder
//! 3. return retired surfaces to the pool and reclaim signaled ones
//! 4. take the newest decoded frame and compensate it against pose history
//! 5. composite, then hand retired frames back fence-gated
//!
//! Resources are acquired on first resume in the order tracker, transport,
//! decoder (with its surface pool), display surface, and released in reverse
//! on destroy. Nothing here blocks the render thread: cross-thread hand-offs
//! are try-operations and contended pool releases wait for the next tick.

use std::collections::VecDeque;
use std::sync::Arc;

use compensator::{CompensationOutcome, CompensatorStats, LatencyCompensator, SentPose, SyncSnapshot, SyncState};
use config_loader::{ConfigLoader, LaunchOptions};
use contracts::{
    DisplayCompositor, DisplayGeometry, DrawStatus, InputEvent, LinkHealth, OutboundPoseMessage,
    SessionConfig, SharedClock, StreamError, TickReport, TrackingBackend, TrackingState,
};
use decoder::{Deferred, DecoderStatsSnapshot, FrameDecoder, SurfacePool};
use metrics::{counter, gauge};
use pose_source::PoseSource;
use tracing::{debug, error, info, instrument, trace, warn};
use transport::{FrameTransport, TransportStatsSnapshot};

use crate::{SessionError, SessionState, Step, Transition};

/// Input events held while no pose goes out
pub const MAX_PENDING_INPUT: usize = 64;

/// Builds the frame transport on first resume
pub type TransportConnector =
    Box<dyn FnMut(&SessionConfig, SharedClock) -> Result<FrameTransport, StreamError> + Send>;

/// Coordinator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub draws: u64,
    pub poses_sent: u64,
    pub frames_submitted: u64,
    pub frames_presented: u64,
    /// Presentations of a frame accepted that same tick
    pub frames_new: u64,
    pub local_frames: u64,
    pub composite_errors: u64,
    pub inputs_dropped: u64,
    pub deferred_releases: u64,
}

/// One AR streaming session
pub struct SessionCoordinator {
    config: SessionConfig,
    clock: SharedClock,
    state: SessionState,

    /// Held until first resume builds the pose source around it
    tracker: Option<Box<dyn TrackingBackend>>,
    source: Option<PoseSource>,
    connector: TransportConnector,
    transport: Option<FrameTransport>,
    decoder: Option<FrameDecoder>,
    compensator: LatencyCompensator,
    sync: SyncState,
    compositor: Box<dyn DisplayCompositor>,

    /// The binding asked for a display surface
    surface_requested: bool,
    /// Compositor resources are allocated
    surface_live: bool,
    geometry: Option<DisplayGeometry>,

    pending_input: VecDeque<InputEvent>,
    launch_forwarded: bool,
    next_sequence: u64,
    deferred: Vec<Deferred>,

    disconnected: Option<String>,
    last_status: Option<DrawStatus>,
    last_report: Option<TickReport>,
    stats: SessionStats,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("state", &self.state)
            .field("source", &self.source)
            .field("transport", &self.transport)
            .field("decoder", &self.decoder)
            .field("surface_live", &self.surface_live)
            .field("disconnected", &self.disconnected)
            .field("stats", &self.stats)
            .finish()
    }
}

impl SessionCoordinator {
    /// Create a session; nothing is acquired until the first resume
    ///
    /// The transport connects over UDP unless replaced with
    /// [`with_connector`](Self::with_connector).
    pub fn create(
        config: SessionConfig,
        tracker: Box<dyn TrackingBackend>,
        compositor: Box<dyn DisplayCompositor>,
        clock: SharedClock,
    ) -> Result<Self, SessionError> {
        ConfigLoader::validate(&config).map_err(SessionError::Config)?;
        info!(
            tracker = tracker.name(),
            server = %config.server.host,
            port = config.server.port,
            "session created"
        );
        Ok(Self {
            sync: SyncState::new(&config.clock, config.compensator.rtt_alpha),
            compensator: LatencyCompensator::new(&config.compensator),
            config,
            clock,
            state: SessionState::Uninitialized,
            tracker: Some(tracker),
            source: None,
            connector: Box::new(FrameTransport::connect_udp),
            transport: None,
            decoder: None,
            compositor,
            surface_requested: false,
            surface_live: false,
            geometry: None,
            pending_input: VecDeque::new(),
            launch_forwarded: false,
            next_sequence: 1,
            deferred: Vec::new(),
            disconnected: None,
            last_status: None,
            last_report: None,
            stats: SessionStats::default(),
        })
    }

    /// Replace how the transport is built (in-memory links, custom sockets)
    pub fn with_connector<F>(mut self, connector: F) -> Self
    where
        F: FnMut(&SessionConfig, SharedClock) -> Result<FrameTransport, StreamError> + Send + 'static,
    {
        self.connector = Box::new(connector);
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start or restart the per-tick pipeline
    ///
    /// The first resume acquires every resource; a failed acquisition rolls
    /// back what was acquired and leaves the session uninitialized.
    #[instrument(name = "session_resume", skip(self), fields(state = %self.state))]
    pub fn on_resume(&mut self) -> Result<(), SessionError> {
        let next = match self.state.step(Transition::Resume) {
            None => return Err(SessionError::invalid_transition(Transition::Resume.as_str(), self.state)),
            Some(Step::Stay) => return Ok(()),
            Some(Step::Enter(next)) => next,
        };

        if self.state == SessionState::Uninitialized {
            self.acquire()?;
        } else {
            if let Some(source) = self.source.as_mut() {
                source.resume().map_err(|e| SessionError::acquire("tracker", e))?;
            }
            if let Some(transport) = self.transport.as_mut() {
                transport.resume();
            }
        }

        self.state = next;
        info!("session resumed");
        Ok(())
    }

    /// Suspend tracking and frame delivery; sync state is kept
    #[instrument(name = "session_pause", skip(self), fields(state = %self.state))]
    pub fn on_pause(&mut self) -> Result<(), SessionError> {
        let next = match self.state.step(Transition::Pause) {
            None => return Err(SessionError::invalid_transition(Transition::Pause.as_str(), self.state)),
            Some(Step::Stay) => return Ok(()),
            Some(Step::Enter(next)) => next,
        };

        if let Some(source) = self.source.as_mut() {
            source.pause();
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.pause();
        }
        if let Some(decoder) = self.decoder.as_ref() {
            decoder.cancel_in_flight();
            flush_deferred(decoder.pool(), &mut self.deferred);
        }

        self.state = next;
        info!("session paused");
        Ok(())
    }

    /// Release everything in reverse acquisition order (idempotent)
    #[instrument(name = "session_destroy", skip(self), fields(state = %self.state))]
    pub fn destroy(&mut self) {
        if self.state.is_destroyed() {
            return;
        }

        if self.surface_live {
            self.compositor.release();
            self.surface_live = false;
        }
        self.release_pipeline();
        if let Some(source) = self.source.as_mut() {
            source.shutdown();
        }
        self.pending_input.clear();

        self.state = SessionState::Destroyed;
        info!(draws = self.stats.draws, "session destroyed");
    }

    /// The display surface (GL context) was created or recreated
    pub fn on_surface_created(&mut self) -> Result<(), SessionError> {
        if self.state.is_destroyed() {
            return Err(SessionError::invalid_transition("surface_created", self.state));
        }
        if self.surface_live {
            debug!("display surface recreated");
            self.compositor.release();
            self.surface_live = false;
        }
        self.surface_requested = true;
        if self.state != SessionState::Uninitialized {
            self.attach_surface()?;
        }
        Ok(())
    }

    pub fn on_display_geometry_changed(&mut self, rotation: i32, width: u32, height: u32) {
        if self.state.is_destroyed() {
            return;
        }
        let geometry = DisplayGeometry::new(rotation, width, height);
        debug!(rotation = geometry.rotation, width, height, "display geometry changed");
        self.geometry = Some(geometry);
        if let Some(source) = self.source.as_mut() {
            source.on_geometry_changed(geometry);
        }
        if self.surface_live {
            self.compositor.on_geometry_changed(geometry);
        }
    }

    #[instrument(name = "session_acquire", skip(self))]
    fn acquire(&mut self) -> Result<(), SessionError> {
        if let Some(tracker) = self.tracker.take() {
            let mut source = PoseSource::new(tracker, &self.config.pose);
            if let Some(geometry) = self.geometry {
                source.on_geometry_changed(geometry);
            }
            self.source = Some(source);
        }
        if let Some(source) = self.source.as_mut() {
            source.resume().map_err(|e| SessionError::acquire("tracker", e))?;
        }
        debug!("tracker acquired");

        if self.transport.is_none() {
            match (self.connector)(&self.config, Arc::clone(&self.clock)) {
                Ok(transport) => self.transport = Some(transport),
                Err(e) => return Err(self.roll_back("transport", e)),
            }
            debug!("transport acquired");
        }

        if self.decoder.is_none() {
            match FrameDecoder::spawn(&self.config.decoder, Arc::clone(&self.clock)) {
                Ok(decoder) => self.decoder = Some(decoder),
                Err(e) => return Err(self.roll_back("decoder", e)),
            }
            debug!(pool = self.config.decoder.pool_size, "decoder acquired");
        }

        if self.surface_requested && !self.surface_live {
            if let Err(e) = self.attach_surface() {
                self.release_pipeline();
                if let Some(source) = self.source.as_mut() {
                    source.pause();
                }
                return Err(e);
            }
        }

        self.compensator = LatencyCompensator::new(&self.config.compensator);
        Ok(())
    }

    fn roll_back(&mut self, resource: &'static str, cause: StreamError) -> SessionError {
        error!(resource, error = %cause, "acquisition failed, rolling back");
        self.release_pipeline();
        if let Some(source) = self.source.as_mut() {
            source.pause();
        }
        SessionError::acquire(resource, cause)
    }

    fn attach_surface(&mut self) -> Result<(), SessionError> {
        self.compositor
            .on_surface_created()
            .map_err(|e| SessionError::acquire("display surface", e))?;
        if let Some(geometry) = self.geometry {
            self.compositor.on_geometry_changed(geometry);
        }
        self.surface_live = true;
        debug!("display surface acquired");
        Ok(())
    }

    /// Stop the decoder (returning its surfaces) and then the transport
    fn release_pipeline(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            let pool = Arc::clone(decoder.pool());
            if let Some(frame) = self.sync.take_last_good() {
                if let Err(e) = pool.release_frame(frame) {
                    warn!(error = %e, "failed to return last-good surface");
                }
            }
            for deferred in self.deferred.drain(..) {
                release_now(&pool, deferred);
            }
            decoder.shutdown();
        }
        self.deferred.clear();

        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
    }

    // ========================================================================
    // Per-tick pipeline
    // ========================================================================

    /// Run one display refresh and report its status
    ///
    /// Never fails: recoverable conditions map to a status, a lost connection
    /// tears the pipeline down and yields `Disconnected` from then on.
    pub fn draw_frame(&mut self) -> DrawStatus {
        self.stats.draws += 1;
        let now = self.clock.now();

        let report = if self.state.is_destroyed() {
            TickReport::idle(self.stats.draws, DrawStatus::Inactive, now)
        } else if self.disconnected.is_some() {
            TickReport::idle(self.stats.draws, DrawStatus::Disconnected, now)
        } else if !self.state.is_resumed() {
            TickReport::idle(self.stats.draws, DrawStatus::Inactive, now)
        } else {
            match self.tick(now) {
                Ok(report) => report,
                Err(e) if !e.is_recoverable() => {
                    self.disconnect(e);
                    TickReport::idle(self.stats.draws, DrawStatus::Disconnected, now)
                }
                Err(e) => {
                    warn!(error = %e, "draw degraded");
                    TickReport::idle(self.stats.draws, DrawStatus::Stalled, now)
                }
            }
        };

        let status = report.status;
        self.note_status(status);
        self.last_report = Some(report);
        status
    }

    #[instrument(name = "draw_tick", level = "trace", skip(self), fields(tick = self.stats.draws))]
    fn tick(&mut self, now: f64) -> Result<TickReport, StreamError> {
        let (Some(source), Some(transport), Some(decoder)) =
            (self.source.as_mut(), self.transport.as_mut(), self.decoder.as_ref())
        else {
            return Ok(TickReport::idle(self.stats.draws, DrawStatus::Searching, now));
        };

        // 1. pose out
        let sample = source.sample(now);
        if sample.is_usable() {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.sync.record_sent(SentPose {
                sequence,
                pose_timestamp: sample.timestamp,
                sent_at: now,
            });
            transport.send(OutboundPoseMessage {
                sequence,
                pose: sample,
                input_events: self.pending_input.drain(..).collect(),
                sent_at: now,
            });
            self.stats.poses_sent += 1;
        }

        // 2. frames in
        while let Some(frame) = transport.poll_received()? {
            trace!(sequence = frame.sequence, pose_sequence = frame.pose_sequence, "frame received");
            decoder.submit(frame);
            self.stats.frames_submitted += 1;
        }

        // 3. surfaces back
        let pool = decoder.pool();
        flush_deferred(pool, &mut self.deferred);
        pool.reclaim(&*self.compositor);

        // 4. compensate
        let incoming = decoder.try_take_decoded();
        let CompensationOutcome {
            present,
            retired,
            warp_skip,
            new_frame,
            round_trip,
        } = self
            .compensator
            .compensate(&mut self.sync, incoming, source.history(), now);

        // 5. composite
        let mut presented = None;
        let mut warp_angle_deg = None;
        match present {
            Some(request) if self.surface_live => {
                match self.compositor.composite(&request) {
                    Ok(fence) => {
                        presented = Some((request.sequence, fence));
                        warp_angle_deg = request.warp.map(|w| w.rotation.angle().to_degrees());
                    }
                    Err(e) => {
                        self.stats.composite_errors += 1;
                        counter!("cloudar_composite_errors_total").increment(1);
                        warn!(sequence = request.sequence, error = %e, "composite failed");
                    }
                }
            }
            _ if self.surface_live => {
                if let Err(e) = self.compositor.present_local(now) {
                    warn!(error = %e, "local present failed");
                }
                self.stats.local_frames += 1;
            }
            _ => {}
        }

        if let Some((sequence, fence)) = presented {
            self.sync.note_presented(fence, round_trip);
            transport.mark_composited(sequence);
            self.stats.frames_presented += 1;
            if new_frame {
                self.stats.frames_new += 1;
            }
            counter!("cloudar_frames_presented_total").increment(1);
        }

        for frame in retired {
            match pool.try_release(frame.surface, frame.last_fence) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(sequence = frame.sequence, error = %e, "surface release rejected"),
                Err(deferred) => {
                    self.stats.deferred_releases += 1;
                    self.deferred.push(deferred);
                }
            }
        }

        let link_health = transport.health();
        let status = if sample.tracking_state == TrackingState::Paused {
            DrawStatus::TrackingLost
        } else if link_health == LinkHealth::Stalled {
            DrawStatus::Stalled
        } else if self.sync.last_composited().is_none() || sample.tracking_state == TrackingState::Limited {
            DrawStatus::Searching
        } else {
            DrawStatus::Nominal
        };

        Ok(TickReport {
            tick: self.stats.draws,
            status,
            present_time: now,
            presented_sequence: presented.map(|(sequence, _)| sequence),
            new_frame: new_frame && presented.is_some(),
            warp_angle_deg,
            warp_skip: presented.and(warp_skip).map(|skip| skip.as_str().to_string()),
            rtt_ms: self.sync.rtt().map(|rtt| rtt * 1e3),
            clock_offset_ms: self.sync.offset() * 1e3,
            frame_age_ms: presented
                .and(self.sync.last_good())
                .map(|good| (now - good.frame.received_at) * 1e3),
            decode_queue: decoder.queue_len(),
            link_health,
        })
    }

    fn disconnect(&mut self, cause: StreamError) {
        let reason = match cause {
            StreamError::ConnectionLost { reason } => reason,
            other => other.to_string(),
        };
        error!(reason = %reason, "connection lost; session must be destroyed");
        counter!("cloudar_disconnects_total").increment(1);
        self.release_pipeline();
        self.disconnected = Some(reason);
    }

    fn note_status(&mut self, status: DrawStatus) {
        if self.last_status == Some(status) {
            return;
        }
        match status {
            DrawStatus::Disconnected => warn!(status = %status, "draw status changed"),
            _ => info!(
                from = self.last_status.map(DrawStatus::as_str),
                to = status.as_str(),
                "draw status changed"
            ),
        }
        gauge!("cloudar_draw_status").set(status.code() as f64);
        self.last_status = Some(status);
    }

    // ========================================================================
    // Input and launch arguments
    // ========================================================================

    /// Queue a touch for the next outbound pose
    pub fn on_touched(&mut self, x: f32, y: f32, long_press: bool) {
        if self.state.is_destroyed() {
            return;
        }
        trace!(x, y, long_press, "touch queued");
        self.queue_input(InputEvent::touch(x, y, long_press));
    }

    fn queue_input(&mut self, event: InputEvent) {
        if self.pending_input.len() >= MAX_PENDING_INPUT {
            self.pending_input.pop_front();
            self.stats.inputs_dropped += 1;
            counter!("cloudar_input_dropped_total").increment(1);
        }
        self.pending_input.push_back(event);
    }

    /// Apply an argument string (`-s <ip> -p <port> ...`)
    ///
    /// Invalid arguments leave the configuration untouched. Changes after the
    /// first resume apply to the next session.
    pub fn set_args(&mut self, args: &str) -> Result<(), SessionError> {
        if self.state.is_destroyed() {
            return Err(SessionError::invalid_transition("set_args", self.state));
        }
        let options = LaunchOptions::parse_cmdline(args).map_err(SessionError::Config)?;
        if options.is_empty() {
            return Ok(());
        }

        let mut candidate = self.config.clone();
        options.apply(&mut candidate);
        ConfigLoader::validate(&candidate).map_err(SessionError::Config)?;
        if self.state != SessionState::Uninitialized && candidate != self.config {
            warn!("arguments changed after resume; they apply to the next session");
        }
        self.config = candidate;
        Ok(())
    }

    /// Apply launch options and forward them to the server once
    pub fn handle_launch_options(&mut self, cmdline: &str) -> Result<(), SessionError> {
        self.set_args(cmdline)?;
        let options = cmdline.trim();
        if !self.launch_forwarded && !options.is_empty() {
            self.queue_input(InputEvent::Launch {
                options: options.to_string(),
            });
            self.launch_forwarded = true;
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Configured server host (empty when unset)
    pub fn server_ip(&self) -> &str {
        &self.config.server.host
    }

    pub fn plane_count(&self) -> usize {
        self.source.as_ref().map_or(0, PoseSource::plane_count)
    }

    pub fn has_detected_planes(&self) -> bool {
        self.plane_count() > 0
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Why the session disconnected, once it has
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnected.as_deref()
    }

    #[inline]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }

    pub fn sync_snapshot(&self) -> SyncSnapshot {
        self.sync.snapshot()
    }

    pub fn link_health(&self) -> Option<LinkHealth> {
        self.transport.as_ref().map(FrameTransport::health)
    }

    pub fn transport_stats(&self) -> Option<TransportStatsSnapshot> {
        self.transport.as_ref().map(FrameTransport::stats)
    }

    pub fn decoder_stats(&self) -> Option<DecoderStatsSnapshot> {
        self.decoder.as_ref().map(FrameDecoder::stats)
    }

    pub fn compensator_stats(&self) -> CompensatorStats {
        self.compensator.stats()
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Retry releases the pool was too busy for
fn flush_deferred(pool: &SurfacePool, deferred: &mut Vec<Deferred>) {
    for pending in std::mem::take(deferred) {
        match pool.try_release(pending.surface, pending.fence) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "deferred release rejected"),
            Err(again) => deferred.push(again),
        }
    }
}

/// Blocking release used on teardown
fn release_now(pool: &SurfacePool, deferred: Deferred) {
    let result = match deferred.fence {
        Some(fence) => pool.retire(deferred.surface, fence),
        None => pool.recycle(deferred.surface),
    };
    if let Err(e) = result {
        warn!(error = %e, "surface release rejected");
    }
}
