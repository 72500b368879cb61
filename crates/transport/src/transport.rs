//! Frame Transport
//!
//! Render-thread handle plus a dedicated I/O thread running a current-thread
//! tokio runtime. The two sides meet only through bounded `async-channel`
//! queues and a few atomics:
//!
//! - outbound poses: `force_send`, the newest pose displaces the oldest queued one
//! - inbound frames: `force_send`, the newest frame displaces the oldest undelivered one
//! - link health: written by the I/O thread, read by the render thread

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use contracts::{
    CodecKind, InboundFrame, LinkHealth, OutboundPoseMessage, SessionConfig, SharedClock,
    StreamError, TransportConfig,
};
use metrics::{counter, gauge};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::fragment::FragmentAssembler;
use crate::reorder::{ReorderBuffer, ReorderStats};
use crate::wire::{self, Hello, WireFrame, WireMessage, PROTOCOL_VERSION};
use crate::{FrameLink, TransportError, UdpLink};

/// Shared transport counters
#[derive(Debug, Default)]
pub struct TransportStats {
    pub poses_sent: AtomicU64,
    pub poses_superseded: AtomicU64,
    pub poses_rejected: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_displaced: AtomicU64,
    pub frames_discarded_paused: AtomicU64,
    pub fragments_dropped: AtomicU64,
    pub decode_errors: AtomicU64,
    pub send_failures: AtomicU64,
    pub heartbeats_sent: AtomicU64,
}

/// Point-in-time copy of the transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub poses_sent: u64,
    pub poses_superseded: u64,
    pub poses_rejected: u64,
    pub frames_received: u64,
    pub frames_displaced: u64,
    pub frames_discarded_paused: u64,
    pub fragments_dropped: u64,
    pub decode_errors: u64,
    pub send_failures: u64,
    pub heartbeats_sent: u64,
    pub reorder: ReorderStats,
}

fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared between the render thread and the I/O thread
#[derive(Debug, Default)]
struct Shared {
    health: AtomicU8,
    delivering: AtomicBool,
    lost_reason: Mutex<Option<String>>,
    stats: TransportStats,
}

impl Shared {
    fn health(&self) -> LinkHealth {
        LinkHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    /// `Lost` is final
    fn set_health(&self, health: LinkHealth) {
        let previous = self.health();
        if previous == health || previous == LinkHealth::Lost {
            return;
        }
        self.health.store(health.as_u8(), Ordering::Release);
        gauge!("cloudar_link_health").set(health.as_u8() as f64);
        match health {
            LinkHealth::Stalled => warn!(from = ?previous, "transport stalled"),
            _ => info!(from = ?previous, to = ?health, "transport health changed"),
        }
    }

    fn mark_lost(&self, reason: String) {
        if let Ok(mut slot) = self.lost_reason.lock() {
            slot.get_or_insert(reason);
        }
        self.set_health(LinkHealth::Lost);
    }

    fn lost_reason(&self) -> String {
        self.lost_reason
            .lock()
            .ok()
            .and_then(|r| r.clone())
            .unwrap_or_else(|| "link lost".to_string())
    }
}

/// Frame Transport handle (render-thread side)
pub struct FrameTransport {
    outbound_tx: Sender<OutboundPoseMessage>,
    inbound_rx: Receiver<InboundFrame>,
    reorder: ReorderBuffer,
    shared: Arc<Shared>,
    io_thread: Option<JoinHandle<()>>,
    last_sequence: Option<u64>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for FrameTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTransport")
            .field("health", &self.shared.health())
            .field("reorder", &self.reorder.len())
            .field("last_sequence", &self.last_sequence)
            .finish()
    }
}

impl FrameTransport {
    /// Connect to the configured server over UDP
    pub fn connect_udp(config: &SessionConfig, clock: SharedClock) -> Result<Self, StreamError> {
        let address = config.server.address().ok_or_else(|| {
            StreamError::config_validation("server.host", "no server address configured")
        })?;
        let bind = config.server.bind.clone();
        Self::spawn(
            move || async move { UdpLink::connect(&bind, &address).await },
            config,
            clock,
        )
    }

    /// Run the transport over an already-built link
    pub fn with_link<L>(link: L, config: &SessionConfig, clock: SharedClock) -> Result<Self, StreamError>
    where
        L: FrameLink + 'static,
    {
        Self::spawn(
            move || async move { Ok::<L, TransportError>(link) },
            config,
            clock,
        )
    }

    #[instrument(name = "transport_spawn", skip_all)]
    fn spawn<F, Fut, L>(connect: F, config: &SessionConfig, clock: SharedClock) -> Result<Self, StreamError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<L, TransportError>>,
        L: FrameLink + 'static,
    {
        let transport = config.transport.clone();
        let (outbound_tx, outbound_rx) = async_channel::bounded(transport.send_queue);
        let (inbound_tx, inbound_rx) = async_channel::bounded(transport.recv_queue);

        let shared = Arc::new(Shared::default());
        shared.delivering.store(true, Ordering::Release);

        let ctx = IoContext {
            config: transport.clone(),
            max_datagram: config.server.max_datagram_bytes,
            codec: config.decoder.preferred_codec,
            outbound_rx,
            inbound_tx,
            shared: Arc::clone(&shared),
            clock,
        };

        let io_thread = std::thread::Builder::new()
            .name("cloudar-io".into())
            .spawn(move || io_thread_main(connect, ctx))?;

        debug!(
            send_queue = transport.send_queue,
            recv_queue = transport.recv_queue,
            "transport I/O thread spawned"
        );

        Ok(Self {
            outbound_tx,
            inbound_rx,
            reorder: ReorderBuffer::new(transport.reorder_depth),
            shared,
            io_thread: Some(io_thread),
            last_sequence: None,
            shutdown_timeout: transport.shutdown_timeout(),
        })
    }

    /// Hand a pose message to the I/O thread (non-blocking, latest wins)
    ///
    /// Sequence numbers must strictly increase; anything else is dropped.
    pub fn send(&mut self, message: OutboundPoseMessage) {
        if self.last_sequence.is_some_and(|last| message.sequence <= last) {
            inc(&self.shared.stats.poses_rejected);
            warn!(
                sequence = message.sequence,
                last = ?self.last_sequence,
                "non-increasing pose sequence dropped"
            );
            return;
        }
        self.last_sequence = Some(message.sequence);

        match self.outbound_tx.force_send(message) {
            Ok(Some(displaced)) => {
                inc(&self.shared.stats.poses_superseded);
                debug!(sequence = displaced.sequence, "queued pose superseded");
            }
            Ok(None) => {}
            Err(_) => debug!("I/O loop gone, pose dropped"),
        }
    }

    /// Next frame in ascending sequence order, if any
    ///
    /// # Errors
    /// `ConnectionLost` once the link is lost (terminal).
    pub fn poll_received(&mut self) -> Result<Option<InboundFrame>, StreamError> {
        if self.shared.health() == LinkHealth::Lost {
            return Err(StreamError::connection_lost(self.shared.lost_reason()));
        }
        while let Ok(frame) = self.inbound_rx.try_recv() {
            self.reorder.insert(frame);
        }
        Ok(self.reorder.release())
    }

    /// Frames at or below `sequence` will be discarded from now on
    pub fn mark_composited(&mut self, sequence: u64) {
        self.reorder.mark_composited(sequence);
    }

    /// Stop inbound delivery; the link and its heartbeats stay up
    pub fn pause(&mut self) {
        self.shared.delivering.store(false, Ordering::Release);
        while self.inbound_rx.try_recv().is_ok() {}
        self.reorder.clear();
        debug!("transport delivery paused");
    }

    pub fn resume(&mut self) {
        self.shared.delivering.store(true, Ordering::Release);
        debug!("transport delivery resumed");
    }

    #[inline]
    pub fn health(&self) -> LinkHealth {
        self.shared.health()
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        let s = &self.shared.stats;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TransportStatsSnapshot {
            poses_sent: load(&s.poses_sent),
            poses_superseded: load(&s.poses_superseded),
            poses_rejected: load(&s.poses_rejected),
            frames_received: load(&s.frames_received),
            frames_displaced: load(&s.frames_displaced),
            frames_discarded_paused: load(&s.frames_discarded_paused),
            fragments_dropped: load(&s.fragments_dropped),
            decode_errors: load(&s.decode_errors),
            send_failures: load(&s.send_failures),
            heartbeats_sent: load(&s.heartbeats_sent),
            reorder: self.reorder.stats(),
        }
    }

    /// Send `Goodbye`, stop the I/O loop and join its thread (bounded wait)
    #[instrument(name = "transport_shutdown", skip(self))]
    pub fn shutdown(&mut self) {
        let Some(handle) = self.io_thread.take() else {
            return;
        };
        self.outbound_tx.close();
        self.inbound_rx.close();

        let deadline = Instant::now() + self.shutdown_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                error!("transport I/O thread panicked");
            }
            debug!("transport I/O thread joined");
        } else {
            warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "transport I/O thread did not stop in time, detaching"
            );
        }
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// I/O thread
// ============================================================================

struct IoContext {
    config: TransportConfig,
    max_datagram: usize,
    codec: CodecKind,
    outbound_rx: Receiver<OutboundPoseMessage>,
    inbound_tx: Sender<InboundFrame>,
    shared: Arc<Shared>,
    clock: SharedClock,
}

enum IoExit {
    Shutdown,
    Lost(String),
}

fn io_thread_main<F, Fut, L>(connect: F, ctx: IoContext)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<L, TransportError>>,
    L: FrameLink,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build transport runtime");
            ctx.shared.mark_lost(format!("runtime: {e}"));
            return;
        }
    };

    runtime.block_on(async move {
        match connect().await {
            Ok(link) => run_io(link, ctx).await,
            Err(e) => {
                error!(error = %e, "transport connect failed");
                ctx.shared.mark_lost(format!("connect: {e}"));
                ctx.inbound_tx.close();
            }
        }
    });
}

/// Send pacing and liveness bookkeeping for the I/O loop
struct LinkState {
    started: Instant,
    last_inbound: Option<Instant>,
    failures: u32,
    backoff: Duration,
    retry_at: Option<Instant>,
    pending: Option<Vec<u8>>,
    config: TransportConfig,
}

impl LinkState {
    fn new(config: TransportConfig) -> Self {
        Self {
            started: Instant::now(),
            last_inbound: None,
            failures: 0,
            backoff: Duration::from_millis(config.backoff_initial_ms),
            retry_at: None,
            pending: None,
            config,
        }
    }

    fn on_inbound(&mut self) {
        self.last_inbound = Some(Instant::now());
    }

    fn evaluate(&self, now: Instant) -> LinkHealth {
        let reference = self.last_inbound.unwrap_or(self.started);
        let silence = now.saturating_duration_since(reference);
        if silence >= self.config.disconnect_timeout() {
            LinkHealth::Lost
        } else if self.last_inbound.is_none() {
            LinkHealth::Connecting
        } else if silence >= self.config.stall_timeout() {
            LinkHealth::Stalled
        } else {
            LinkHealth::Connected
        }
    }

    fn can_send(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    fn on_send_ok(&mut self) {
        self.failures = 0;
        self.backoff = Duration::from_millis(self.config.backoff_initial_ms);
        self.retry_at = None;
    }

    /// Returns true once the failure budget is exhausted
    fn on_failure(&mut self, now: Instant) -> bool {
        self.failures += 1;
        self.retry_at = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(Duration::from_millis(self.config.backoff_max_ms));
        self.failures >= self.config.max_send_failures
    }
}

#[instrument(name = "transport_io_loop", skip_all, fields(link = link.name()))]
async fn run_io<L: FrameLink>(link: L, ctx: IoContext) {
    let IoContext {
        config,
        max_datagram,
        codec,
        outbound_rx,
        inbound_tx,
        shared,
        clock,
    } = ctx;

    let mut assembler = FragmentAssembler::new(config.reassembly_slots);
    let mut state = LinkState::new(config.clone());
    let heartbeat_interval = config.heartbeat_interval();
    let tick_period = (heartbeat_interval.min(config.stall_timeout()) / 2).max(Duration::from_millis(5));
    let mut ticker = tokio::time::interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_heartbeat = Instant::now();

    info!("transport I/O loop started");

    let hello = WireMessage::Hello(Hello {
        version: PROTOCOL_VERSION,
        codec,
        max_datagram_bytes: max_datagram as u32,
    });
    let mut exit = send_control(&link, &hello, &mut state, &shared).await;

    while exit.is_none() {
        tokio::select! {
            msg = outbound_rx.recv() => match msg {
                Ok(msg) => {
                    let sequence = msg.sequence;
                    match wire::encode(&WireMessage::Pose(msg)) {
                        Ok(bytes) => {
                            if state.pending.replace(bytes).is_some() {
                                inc(&shared.stats.poses_superseded);
                            }
                        }
                        Err(e) => warn!(sequence, error = %e, "pose encode failed"),
                    }
                }
                Err(_) => exit = Some(IoExit::Shutdown),
            },
            res = link.recv() => match res {
                Ok(datagram) => {
                    state.on_inbound();
                    shared.set_health(LinkHealth::Connected);
                    exit = handle_datagram(&datagram, &mut assembler, &shared, &inbound_tx, &clock);
                }
                Err(e) if e.is_closed() => exit = Some(IoExit::Lost("link closed".into())),
                Err(e) => {
                    inc(&shared.stats.send_failures);
                    debug!(error = %e, "receive failed");
                    if state.on_failure(Instant::now()) {
                        exit = Some(IoExit::Lost(format!("receive failed: {e}")));
                    }
                }
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                match state.evaluate(now) {
                    LinkHealth::Lost => {
                        exit = Some(IoExit::Lost(format!(
                            "no traffic for {} ms",
                            config.disconnect_timeout_ms
                        )));
                    }
                    health => shared.set_health(health),
                }
                if exit.is_none() && now.duration_since(last_heartbeat) >= heartbeat_interval {
                    last_heartbeat = now;
                    let heartbeat = WireMessage::Heartbeat { sent_at: clock.now() };
                    exit = send_control(&link, &heartbeat, &mut state, &shared).await;
                    if exit.is_none() {
                        inc(&shared.stats.heartbeats_sent);
                    }
                }
            }
        }

        if exit.is_none() {
            exit = flush_pending(&link, &mut state, &shared).await;
        }
    }

    match exit {
        Some(IoExit::Lost(reason)) => {
            error!(reason = %reason, "transport link lost");
            counter!("cloudar_link_lost_total").increment(1);
            shared.mark_lost(reason);
        }
        _ => {
            let bye = WireMessage::Goodbye {
                reason: "client shutdown".into(),
            };
            if let Ok(bytes) = wire::encode(&bye) {
                let _ = link.send(&bytes).await;
            }
            info!("transport I/O loop stopped");
        }
    }
    inbound_tx.close();
}

/// Send the latest pending pose if backoff allows
async fn flush_pending<L: FrameLink>(link: &L, state: &mut LinkState, shared: &Shared) -> Option<IoExit> {
    let now = Instant::now();
    if !state.can_send(now) {
        return None;
    }
    let bytes = state.pending.take()?;
    match link.send(&bytes).await {
        Ok(()) => {
            state.on_send_ok();
            inc(&shared.stats.poses_sent);
            counter!("cloudar_poses_sent_total").increment(1);
            None
        }
        Err(e) if e.is_closed() => Some(IoExit::Lost("link closed".into())),
        Err(e) => {
            inc(&shared.stats.send_failures);
            // Retried after backoff unless a newer pose supersedes it.
            state.pending = Some(bytes);
            let exhausted = state.on_failure(now);
            warn!(error = %e, failures = state.failures, backoff_ms = state.backoff.as_millis() as u64, "pose send failed");
            exhausted.then(|| IoExit::Lost(format!("{} consecutive send failures", state.failures)))
        }
    }
}

async fn send_control<L: FrameLink>(
    link: &L,
    message: &WireMessage,
    state: &mut LinkState,
    shared: &Shared,
) -> Option<IoExit> {
    let bytes = match wire::encode(message) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "control encode failed");
            return None;
        }
    };
    match link.send(&bytes).await {
        Ok(()) => None,
        Err(e) if e.is_closed() => Some(IoExit::Lost("link closed".into())),
        Err(e) => {
            inc(&shared.stats.send_failures);
            debug!(error = %e, "control send failed");
            state
                .on_failure(Instant::now())
                .then(|| IoExit::Lost(format!("{} consecutive send failures", state.failures)))
        }
    }
}

fn handle_datagram(
    datagram: &[u8],
    assembler: &mut FragmentAssembler,
    shared: &Shared,
    inbound_tx: &Sender<InboundFrame>,
    clock: &SharedClock,
) -> Option<IoExit> {
    let message = match wire::decode(datagram) {
        Ok(m) => m,
        Err(e) => {
            inc(&shared.stats.decode_errors);
            debug!(error = %e, len = datagram.len(), "malformed datagram");
            return None;
        }
    };

    match message {
        WireMessage::Frame(frame) => {
            assembler.note_complete(frame.sequence);
            deliver(frame, shared, inbound_tx, clock);
        }
        WireMessage::Fragment(fragment) => match assembler.insert(fragment) {
            Ok(Some(bytes)) => match wire::decode(&bytes) {
                Ok(WireMessage::Frame(frame)) => deliver(frame, shared, inbound_tx, clock),
                Ok(_) => {
                    inc(&shared.stats.decode_errors);
                    warn!("reassembled message is not a frame");
                }
                Err(e) => {
                    inc(&shared.stats.decode_errors);
                    debug!(error = %e, "reassembled frame malformed");
                }
            },
            Ok(None) => {}
            Err(e) => {
                inc(&shared.stats.fragments_dropped);
                debug!(error = %e, "fragment rejected");
            }
        },
        WireMessage::Goodbye { reason } => {
            return Some(IoExit::Lost(format!("server goodbye: {reason}")));
        }
        WireMessage::Hello(hello) => debug!(version = hello.version, "server hello"),
        WireMessage::Heartbeat { .. } => {}
        WireMessage::Pose(_) => debug!("unexpected pose message from server"),
    }
    None
}

fn deliver(frame: WireFrame, shared: &Shared, inbound_tx: &Sender<InboundFrame>, clock: &SharedClock) {
    if !shared.delivering.load(Ordering::Acquire) {
        inc(&shared.stats.frames_discarded_paused);
        return;
    }
    inc(&shared.stats.frames_received);
    counter!("cloudar_frames_received_total").increment(1);

    let inbound = frame.into_inbound(clock.now());
    match inbound_tx.force_send(inbound) {
        Ok(Some(displaced)) => {
            inc(&shared.stats.frames_displaced);
            debug!(sequence = displaced.sequence, "undelivered frame displaced");
        }
        Ok(None) => {}
        Err(_) => {}
    }
}
