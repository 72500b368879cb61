//! Frame Decoder
//!
//! Decoding runs on its own thread, fed through a bounded queue. Freshness
//! wins over completeness at every stage:
//! - `submit` displaces the oldest undecoded frame when the queue is full
//! - the worker skips to the newest queued frame before decoding
//! - `try_take_decoded` hands out the newest decoded frame and recycles the rest

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_channel::{Receiver, Sender};
use contracts::{DecodedFrame, DecoderConfig, InboundFrame, SharedClock, StreamError};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::{CodecSet, DecodeError, SurfacePool};

/// Shared decoder counters
#[derive(Debug, Default)]
pub struct DecoderStats {
    pub submitted: AtomicU64,
    pub decoded: AtomicU64,
    pub dropped_backpressure: AtomicU64,
    pub dropped_corrupt: AtomicU64,
    pub dropped_exhausted: AtomicU64,
    pub cancelled: AtomicU64,
    /// Decoded but replaced by a newer frame before the render thread took it
    pub superseded: AtomicU64,
}

/// Point-in-time copy of the decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStatsSnapshot {
    pub submitted: u64,
    pub decoded: u64,
    pub dropped_backpressure: u64,
    pub dropped_corrupt: u64,
    pub dropped_exhausted: u64,
    pub cancelled: u64,
    pub superseded: u64,
}

impl DecoderStats {
    pub fn snapshot(&self) -> DecoderStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DecoderStatsSnapshot {
            submitted: load(&self.submitted),
            decoded: load(&self.decoded),
            dropped_backpressure: load(&self.dropped_backpressure),
            dropped_corrupt: load(&self.dropped_corrupt),
            dropped_exhausted: load(&self.dropped_exhausted),
            cancelled: load(&self.cancelled),
            superseded: load(&self.superseded),
        }
    }
}

fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

fn record_drop(reason: &'static str, n: u64) {
    counter!("cloudar_decode_dropped_total", "reason" => reason).increment(n);
}

#[derive(Debug, Default)]
struct Shared {
    stats: DecoderStats,
    epoch: AtomicU64,
}

struct Job {
    epoch: u64,
    frame: InboundFrame,
}

/// Worker-side ends, held until the thread starts
struct WorkerParts {
    input_rx: Receiver<Job>,
    output_tx: Sender<DecodedFrame>,
    codecs: CodecSet,
}

/// Frame Decoder handle (render-thread side)
pub struct FrameDecoder {
    input_tx: Sender<Job>,
    output_rx: Receiver<DecodedFrame>,
    pool: Arc<SurfacePool>,
    shared: Arc<Shared>,
    clock: SharedClock,
    parts: Option<WorkerParts>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("queued", &self.input_tx.len())
            .field("ready", &self.output_rx.len())
            .field("running", &self.worker.is_some())
            .finish()
    }
}

impl FrameDecoder {
    /// Build a decoder without starting its worker
    ///
    /// Frames submitted before [`start`](Self::start) queue up subject to the
    /// same backpressure bound.
    pub fn new(config: &DecoderConfig, codecs: CodecSet, clock: SharedClock) -> Self {
        let (input_tx, input_rx) = async_channel::bounded(config.queue_depth.max(1));
        let (output_tx, output_rx) = async_channel::bounded(config.output_depth.max(1));
        Self {
            input_tx,
            output_rx,
            pool: Arc::new(SurfacePool::new(config.pool_size)),
            shared: Arc::new(Shared::default()),
            clock,
            parts: Some(WorkerParts {
                input_rx,
                output_tx,
                codecs,
            }),
            worker: None,
        }
    }

    /// Build and start a decoder with the default codecs
    pub fn spawn(config: &DecoderConfig, clock: SharedClock) -> Result<Self, StreamError> {
        let mut decoder = Self::new(config, CodecSet::default(), clock);
        decoder.start()?;
        Ok(decoder)
    }

    /// Start the worker thread (no-op once started)
    pub fn start(&mut self) -> Result<(), StreamError> {
        let Some(parts) = self.parts.take() else {
            return Ok(());
        };
        let worker = Worker {
            parts,
            pool: Arc::clone(&self.pool),
            shared: Arc::clone(&self.shared),
            clock: Arc::clone(&self.clock),
        };
        let handle = std::thread::Builder::new()
            .name("cloudar-decode".into())
            .spawn(move || worker.run())?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Enqueue a frame (non-blocking)
    ///
    /// When the queue is at its bound the oldest undecoded frame is dropped.
    pub fn submit(&self, frame: InboundFrame) {
        add(&self.shared.stats.submitted, 1);
        let job = Job {
            epoch: self.shared.epoch.load(Ordering::Acquire),
            frame,
        };
        match self.input_tx.force_send(job) {
            Ok(Some(displaced)) => {
                add(&self.shared.stats.dropped_backpressure, 1);
                record_drop("backpressure", 1);
                debug!(sequence = displaced.frame.sequence, "undecoded frame dropped");
            }
            Ok(None) => {}
            Err(_) => debug!("decoder closed, frame dropped"),
        }
    }

    /// Newest decoded frame, if any; older ready frames are recycled
    pub fn try_take_decoded(&self) -> Option<DecodedFrame> {
        let mut newest: Option<DecodedFrame> = None;
        while let Ok(frame) = self.output_rx.try_recv() {
            if let Some(older) = newest.replace(frame) {
                add(&self.shared.stats.superseded, 1);
                self.recycle(older);
            }
        }
        newest
    }

    /// Discard queued and decoded-but-untaken work; frames being decoded
    /// right now are discarded by the worker when it finishes them
    #[instrument(name = "decoder_cancel", skip(self))]
    pub fn cancel_in_flight(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        let mut cancelled = 0;
        if let Some(parts) = &self.parts {
            while parts.input_rx.try_recv().is_ok() {
                cancelled += 1;
            }
        }
        // A running worker skips older-epoch jobs on its own.
        while let Ok(frame) = self.output_rx.try_recv() {
            self.recycle(frame);
            cancelled += 1;
        }
        if cancelled > 0 {
            add(&self.shared.stats.cancelled, cancelled);
            debug!(cancelled, "in-flight decode work cancelled");
        }
    }

    /// Undecoded frames waiting for the worker
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.input_tx.len()
    }

    #[inline]
    pub fn pool(&self) -> &Arc<SurfacePool> {
        &self.pool
    }

    pub fn stats(&self) -> DecoderStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn recycle(&self, frame: DecodedFrame) {
        if let Err(e) = self.pool.release_frame(frame) {
            warn!(error = %e, "failed to recycle decoded frame");
        }
    }

    /// Cancel pending work, stop the worker and join it
    #[instrument(name = "decoder_shutdown", skip(self))]
    pub fn shutdown(&mut self) {
        self.cancel_in_flight();
        self.input_tx.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("decode worker panicked");
            }
        }
        while let Ok(frame) = self.output_rx.try_recv() {
            self.recycle(frame);
        }
        self.output_rx.close();
        self.parts = None;
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    parts: WorkerParts,
    pool: Arc<SurfacePool>,
    shared: Arc<Shared>,
    clock: SharedClock,
}

impl Worker {
    fn run(self) {
        info!("decode worker started");
        let stats = &self.shared.stats;

        while let Ok(mut job) = self.parts.input_rx.recv_blocking() {
            // Skip to the newest queued frame.
            let mut skipped = 0;
            while let Ok(newer) = self.parts.input_rx.try_recv() {
                job = newer;
                skipped += 1;
            }
            if skipped > 0 {
                add(&stats.dropped_backpressure, skipped);
                record_drop("backpressure", skipped);
            }

            if self.is_cancelled(&job) {
                add(&stats.cancelled, 1);
                continue;
            }

            match self.decode(&job) {
                Ok(decoded) => self.publish(&job, decoded),
                Err(e) => {
                    match &e {
                        DecodeError::Pool(_) => add(&stats.dropped_exhausted, 1),
                        _ => add(&stats.dropped_corrupt, 1),
                    }
                    record_drop(e.reason(), 1);
                    warn!(sequence = job.frame.sequence, error = %e, "frame dropped");
                }
            }
        }

        info!("decode worker stopped");
    }

    fn is_cancelled(&self, job: &Job) -> bool {
        job.epoch < self.shared.epoch.load(Ordering::Acquire)
    }

    #[instrument(name = "decode_frame", skip_all, fields(sequence = job.frame.sequence))]
    fn decode(&self, job: &Job) -> Result<DecodedFrame, DecodeError> {
        let frame = &job.frame;
        self.parts.codecs.precheck(frame)?;
        let mut surface = self.pool.acquire(frame.width, frame.height)?;

        if let Err(e) = self.parts.codecs.decode_into(frame, &mut surface.pixels) {
            if let Err(pool_err) = self.pool.recycle(surface) {
                warn!(error = %pool_err, "failed to recycle surface");
            }
            return Err(e);
        }

        Ok(DecodedFrame {
            surface,
            sequence: frame.sequence,
            pose_sequence: frame.pose_sequence,
            render_pose: frame.render_pose,
            server_timestamp: frame.server_timestamp,
            server_received_at: frame.server_received_at,
            received_at: frame.received_at,
            decode_timestamp: self.clock.now(),
            stereo_layout: frame.stereo_layout,
            last_fence: None,
        })
    }

    fn publish(&self, job: &Job, decoded: DecodedFrame) {
        let stats = &self.shared.stats;
        if self.is_cancelled(job) {
            add(&stats.cancelled, 1);
            self.recycle(decoded);
            return;
        }

        add(&stats.decoded, 1);
        counter!("cloudar_frames_decoded_total").increment(1);
        match self.parts.output_tx.force_send(decoded) {
            Ok(Some(displaced)) => {
                add(&stats.superseded, 1);
                self.recycle(displaced);
            }
            Ok(None) => {}
            Err(closed) => self.recycle(closed.into_inner()),
        }
    }

    fn recycle(&self, frame: DecodedFrame) {
        if let Err(e) = self.pool.release_frame(frame) {
            warn!(error = %e, "failed to recycle decoded frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{CodecKind, ManualClock, PoseSample, StereoLayout};
    use std::time::{Duration, Instant};

    fn frame(sequence: u64, payload: Vec<u8>) -> InboundFrame {
        InboundFrame {
            sequence,
            server_timestamp: sequence as f64,
            pose_sequence: sequence,
            render_pose: PoseSample::paused(sequence as f64),
            server_received_at: 0.0,
            received_at: 0.0,
            payload: Bytes::from(payload),
            width: 2,
            height: 2,
            stereo_layout: StereoLayout::Mono,
            codec: CodecKind::Raw,
        }
    }

    fn good(sequence: u64) -> InboundFrame {
        frame(sequence, vec![sequence as u8; 16])
    }

    fn config() -> DecoderConfig {
        DecoderConfig {
            queue_depth: 3,
            output_depth: 2,
            pool_size: 4,
            preferred_codec: CodecKind::Raw,
        }
    }

    fn clock() -> SharedClock {
        Arc::new(ManualClock::new(5.0))
    }

    fn wait_decoded(decoder: &FrameDecoder) -> Option<DecodedFrame> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(frame) = decoder.try_take_decoded() {
                return Some(frame);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_decodes_and_stamps() {
        let decoder = FrameDecoder::spawn(&config(), clock()).unwrap();
        decoder.submit(good(1));
        let decoded = wait_decoded(&decoder).unwrap();
        assert_eq!(decoded.sequence, 1);
        assert_eq!(decoded.surface.pixels, vec![1; 16]);
        assert_eq!(decoded.decode_timestamp, 5.0);
        assert!(decoded.last_fence.is_none());
        decoder.pool().recycle(decoded.surface).unwrap();
    }

    #[test]
    fn test_burst_keeps_only_newest() {
        let mut decoder = FrameDecoder::new(&config(), CodecSet::default(), clock());
        for seq in 1..=5 {
            decoder.submit(good(seq));
        }
        decoder.start().unwrap();

        let decoded = wait_decoded(&decoder).unwrap();
        assert_eq!(decoded.sequence, 5);
        assert_eq!(decoder.queue_len(), 0);

        let stats = decoder.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.dropped_backpressure, 4);
        assert_eq!(stats.decoded, 1);
    }

    #[test]
    fn test_corrupt_frame_then_recovery() {
        let decoder = FrameDecoder::spawn(&config(), clock()).unwrap();
        decoder.submit(frame(1, vec![0xde, 0xad]));
        std::thread::sleep(Duration::from_millis(20));
        decoder.submit(good(2));

        let decoded = wait_decoded(&decoder).unwrap();
        assert_eq!(decoded.sequence, 2);
        assert_eq!(decoder.stats().dropped_corrupt, 1);
        // only the decoded frame holds a surface
        assert_eq!(decoder.pool().stats().leased, 1);
    }

    #[test]
    fn test_pool_exhaustion_drops_frame() {
        let mut cfg = config();
        cfg.pool_size = 2;
        cfg.output_depth = 1;
        let decoder = FrameDecoder::spawn(&cfg, clock()).unwrap();

        let held: Vec<_> = (0..2).map(|_| decoder.pool().acquire(2, 2).unwrap()).collect();
        decoder.submit(good(1));
        let deadline = Instant::now() + Duration::from_secs(2);
        while decoder.stats().dropped_exhausted == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(decoder.stats().dropped_exhausted, 1);

        for surface in held {
            decoder.pool().recycle(surface).unwrap();
        }
        decoder.submit(good(2));
        assert_eq!(wait_decoded(&decoder).unwrap().sequence, 2);
    }

    #[test]
    fn test_cancel_discards_queued_work() {
        let decoder = FrameDecoder::new(&config(), CodecSet::default(), clock());
        decoder.submit(good(1));
        decoder.submit(good(2));
        decoder.cancel_in_flight();
        assert_eq!(decoder.queue_len(), 0);
        assert!(decoder.try_take_decoded().is_none());
    }

    #[test]
    fn test_cancel_skips_work_submitted_before() {
        let mut decoder = FrameDecoder::new(&config(), CodecSet::default(), clock());
        decoder.start().unwrap();
        decoder.cancel_in_flight();
        decoder.submit(good(3));
        assert_eq!(wait_decoded(&decoder).unwrap().sequence, 3);
    }

    #[test]
    fn test_shutdown_joins_worker() {
        let mut decoder = FrameDecoder::spawn(&config(), clock()).unwrap();
        decoder.submit(good(1));
        decoder.shutdown();
        assert!(!decoder.is_running());
        assert_eq!(decoder.pool().stats().leased, 0);
        // submissions after shutdown are ignored
        decoder.submit(good(2));
        assert!(decoder.try_take_decoded().is_none());
    }

    #[test]
    fn test_lying_header_never_leases_a_surface() {
        let mut cfg = config();
        cfg.pool_size = 1;
        cfg.output_depth = 1;
        let decoder = FrameDecoder::spawn(&cfg, clock()).unwrap();

        let mut huge = good(1);
        huge.width = 8192;
        huge.height = 8192;
        decoder.submit(huge);

        let deadline = Instant::now() + Duration::from_secs(2);
        while decoder.stats().dropped_corrupt == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(decoder.stats().dropped_corrupt, 1);
        assert_eq!(decoder.pool().stats().allocated, 0);

        let surface = decoder.pool().acquire(1, 1).unwrap();
        assert!(surface.pixels.capacity() < 1024);
        decoder.pool().recycle(surface).unwrap();
    }
}
