//! Loopback renderer
//!
//! Stand-in for the remote renderer. Every pose message is answered with a
//! synthetic frame rendered "against" that pose and sent after a configurable
//! latency plus random jitter, so frames can overtake each other on the way
//! back. Timestamps are reported in a server clock shifted by
//! `clock_offset_s` from the local one.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::io::Cursor;
use std::thread::JoinHandle;
use std::time::Duration;

use contracts::{CodecKind, OutboundPoseMessage, SharedClock, StereoLayout};
use image::{DynamicImage, ImageFormat, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::wire::{self, Hello, WireFrame, WireMessage};
use crate::{FrameLink, TransportError};

/// Loopback renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Simulated render + network latency
    pub latency_ms: u64,
    /// Uniform random extra latency in `[0, jitter_ms]`
    pub jitter_ms: u64,
    pub width: u32,
    pub height: u32,
    pub stereo_layout: StereoLayout,
    /// Forces a codec; otherwise the client's `Hello` decides
    pub codec: Option<CodecKind>,
    /// Server clock minus local clock
    pub clock_offset_s: f64,
    /// Every n-th frame carries a garbage payload
    pub corrupt_every: Option<u64>,
    /// Say goodbye after this many frames
    pub goodbye_after: Option<u64>,
    /// Fixed jitter seed
    pub seed: Option<u64>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            latency_ms: 20,
            jitter_ms: 0,
            width: 64,
            height: 32,
            stereo_layout: StereoLayout::Mono,
            codec: None,
            clock_offset_s: 0.0,
            corrupt_every: None,
            goodbye_after: None,
            seed: None,
        }
    }
}

/// What a renderer run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackSummary {
    pub poses_received: u64,
    pub frames_sent: u64,
    pub heartbeats_echoed: u64,
    pub corrupted: u64,
}

struct Scheduled {
    due: Instant,
    frame: WireFrame,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then(self.frame.sequence.cmp(&other.frame.sequence))
    }
}

/// Synthetic remote renderer
pub struct LoopbackRenderer {
    config: LoopbackConfig,
    clock: SharedClock,
}

impl LoopbackRenderer {
    pub fn new(config: LoopbackConfig, clock: SharedClock) -> Self {
        Self { config, clock }
    }

    fn server_now(&self) -> f64 {
        self.clock.now() + self.config.clock_offset_s
    }

    /// Serve one client until `shutdown` resolves, the link closes or
    /// `goodbye_after` frames have been sent
    pub async fn run<L, S>(&self, link: L, shutdown: S) -> Result<LoopbackSummary, TransportError>
    where
        L: FrameLink,
        S: Future<Output = ()>,
    {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut queue: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
        let mut summary = LoopbackSummary::default();
        let mut next_sequence = 1u64;
        let mut codec = self.config.codec.unwrap_or(CodecKind::Raw);
        let mut max_datagram = 1400usize;

        tokio::pin!(shutdown);
        info!(link = link.name(), latency_ms = self.config.latency_ms, "loopback renderer started");

        loop {
            let next_due = queue.peek().map(|Reverse(s)| s.due);
            tokio::select! {
                _ = &mut shutdown => {
                    say_goodbye(&link, "renderer shutdown").await;
                    break;
                }
                res = link.recv() => match res {
                    Ok(datagram) => match wire::decode(&datagram) {
                        Ok(WireMessage::Hello(Hello { codec: requested, max_datagram_bytes, .. })) => {
                            codec = self.config.codec.unwrap_or(requested);
                            max_datagram = max_datagram_bytes as usize;
                            debug!(?codec, max_datagram, "client hello");
                            let reply = WireMessage::Hello(Hello {
                                version: wire::PROTOCOL_VERSION,
                                codec,
                                max_datagram_bytes,
                            });
                            link.send(&wire::encode(&reply)?).await?;
                        }
                        Ok(WireMessage::Pose(message)) => {
                            summary.poses_received += 1;
                            let sequence = next_sequence;
                            next_sequence += 1;
                            let frame = self.render(sequence, &message, codec, &mut summary)?;
                            let jitter = if self.config.jitter_ms > 0 {
                                rng.random_range(0..=self.config.jitter_ms)
                            } else {
                                0
                            };
                            let due = Instant::now() + Duration::from_millis(self.config.latency_ms + jitter);
                            queue.push(Reverse(Scheduled { due, frame }));
                        }
                        Ok(WireMessage::Heartbeat { sent_at }) => {
                            link.send(&wire::encode(&WireMessage::Heartbeat { sent_at })?).await?;
                            summary.heartbeats_echoed += 1;
                        }
                        Ok(WireMessage::Goodbye { reason }) => {
                            info!(%reason, "client said goodbye");
                            break;
                        }
                        Ok(_) => debug!("ignoring unexpected message"),
                        Err(e) => warn!(error = %e, "malformed datagram from client"),
                    },
                    Err(e) if e.is_closed() => break,
                    Err(e) => warn!(error = %e, "receive failed"),
                },
                _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    let now = Instant::now();
                    while queue.peek().is_some_and(|Reverse(s)| s.due <= now) {
                        let Some(Reverse(Scheduled { frame, .. })) = queue.pop() else {
                            break;
                        };
                        let mut frame = frame;
                        frame.server_timestamp = self.server_now();
                        for datagram in wire::encode_frame(frame, max_datagram)? {
                            link.send(&datagram).await?;
                        }
                        summary.frames_sent += 1;
                    }
                    if self.config.goodbye_after.is_some_and(|n| summary.frames_sent >= n) {
                        say_goodbye(&link, "frame budget reached").await;
                        break;
                    }
                }
            }
        }

        info!(
            poses = summary.poses_received,
            frames = summary.frames_sent,
            "loopback renderer stopped"
        );
        Ok(summary)
    }

    fn render(
        &self,
        sequence: u64,
        message: &OutboundPoseMessage,
        codec: CodecKind,
        summary: &mut LoopbackSummary,
    ) -> Result<WireFrame, TransportError> {
        let (width, height) = (self.config.width, self.config.height);
        let arrived = self.server_now();

        let payload = if self.config.corrupt_every.is_some_and(|n| n > 0 && sequence % n == 0) {
            summary.corrupted += 1;
            vec![0xde, 0xad, 0xbe, 0xef]
        } else {
            encode_pixels(test_pattern(width, height, sequence), width, height, codec)?
        };

        let mut render_pose = message.pose;
        render_pose.timestamp += self.config.clock_offset_s;

        Ok(WireFrame {
            sequence,
            server_timestamp: arrived,
            pose_sequence: message.sequence,
            render_pose,
            server_received_at: arrived,
            width,
            height,
            stereo_layout: self.config.stereo_layout,
            codec,
            payload,
        })
    }

    /// Run on a dedicated thread with its own runtime
    pub fn spawn_thread<L>(self, link: L) -> Result<LoopbackHandle, TransportError>
    where
        L: FrameLink + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("cloudar-loopback".into())
            .spawn(move || -> Result<LoopbackSummary, TransportError> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(self.run(link, async move {
                    let _ = stop_rx.await;
                }))
            })?;
        Ok(LoopbackHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

async fn say_goodbye<L: FrameLink>(link: &L, reason: &str) {
    let bye = WireMessage::Goodbye {
        reason: reason.to_string(),
    };
    if let Ok(bytes) = wire::encode(&bye) {
        let _ = link.send(&bytes).await;
    }
}

/// Gradient tinted by the frame sequence
fn test_pattern(width: u32, height: u32, sequence: u64) -> Vec<u8> {
    let tint = (sequence % 256) as u8;
    let mut pixels = Vec::with_capacity(contracts::Surface::rgba_len(width, height));
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                tint,
                255,
            ]);
        }
    }
    pixels
}

fn encode_pixels(pixels: Vec<u8>, width: u32, height: u32, codec: CodecKind) -> Result<Vec<u8>, TransportError> {
    let format = match codec {
        CodecKind::Raw => return Ok(pixels),
        CodecKind::Png => ImageFormat::Png,
        CodecKind::Jpeg => ImageFormat::Jpeg,
    };
    let image = RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| TransportError::encode("pixel buffer does not match frame size"))?;

    let mut out = Cursor::new(Vec::new());
    let written = match codec {
        // JPEG has no alpha channel
        CodecKind::Jpeg => DynamicImage::ImageRgba8(image).to_rgb8().write_to(&mut out, format),
        _ => image.write_to(&mut out, format),
    };
    written.map_err(|e| TransportError::encode(format!("{} encode: {e}", codec.as_str())))?;
    Ok(out.into_inner())
}

/// Handle to a renderer running on its own thread
pub struct LoopbackHandle {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<LoopbackSummary, TransportError>>>,
}

impl LoopbackHandle {
    /// Stop the renderer and wait for its summary
    pub fn stop(mut self) -> Result<LoopbackSummary, TransportError> {
        self.finish()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    fn finish(&mut self) -> Result<LoopbackSummary, TransportError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(Err(TransportError::Closed)),
            None => Ok(LoopbackSummary::default()),
        }
    }
}

impl Drop for LoopbackHandle {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
