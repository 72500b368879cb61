//! Session run statistics.

use std::time::Duration;

use compensator::CompensatorStats;
use contracts::DrawStatus;
use decoder::DecoderStatsSnapshot;
use observability::SessionMetricsAggregator;
use session::SessionStats;
use transport::{LoopbackSummary, TransportStatsSnapshot};

/// Statistics from a session run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Wall time of the draw loop
    pub duration: Duration,

    /// Status of the last draw
    pub final_status: Option<DrawStatus>,

    /// Why the link was lost, if it was
    pub disconnect_reason: Option<String>,

    pub session: SessionStats,

    /// Captured before teardown; `None` if the pipeline never came up
    pub transport: Option<TransportStatsSnapshot>,

    pub decoder: Option<DecoderStatsSnapshot>,

    pub compensator: CompensatorStats,

    /// In-process renderer, when one was used
    pub renderer: Option<LoopbackSummary>,

    /// Per-draw aggregate
    pub session_metrics: SessionMetricsAggregator,
}

impl PipelineStats {
    /// Display refreshes per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.session.draws as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Remote frames per second that reached the display for the first time
    pub fn remote_fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.session.frames_new as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of submitted frames that never got a new presentation (%)
    pub fn drop_rate(&self) -> f64 {
        let submitted = self.session.frames_submitted;
        if submitted > 0 {
            submitted.saturating_sub(self.session.frames_new) as f64 / submitted as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Session Statistics ===\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Draws: {} ({:.2} fps)", self.session.draws, self.fps());
        println!(
            "   ├─ Remote frames presented: {} new, {} total ({:.2} fps)",
            self.session.frames_new,
            self.session.frames_presented,
            self.remote_fps()
        );
        println!("   ├─ Local-only frames: {}", self.session.local_frames);
        println!("   ├─ Poses sent: {}", self.session.poses_sent);
        println!("   ├─ Frame drop rate: {:.2}%", self.drop_rate());
        match self.final_status {
            Some(status) => println!("   └─ Final status: {}", status),
            None => println!("   └─ Final status: (no draws)"),
        }
        if let Some(reason) = &self.disconnect_reason {
            println!("      Disconnected: {}", reason);
        }

        if let Some(transport) = &self.transport {
            println!("\nTransport");
            println!("   ├─ Frames received: {}", transport.frames_received);
            println!("   ├─ Frames displaced: {}", transport.frames_displaced);
            println!("   ├─ Poses superseded: {}", transport.poses_superseded);
            println!("   ├─ Fragments dropped: {}", transport.fragments_dropped);
            println!("   ├─ Send failures: {}", transport.send_failures);
            println!("   └─ Heartbeats sent: {}", transport.heartbeats_sent);
        }

        if let Some(decoder) = &self.decoder {
            println!("\nDecoder");
            println!("   ├─ Decoded: {}/{}", decoder.decoded, decoder.submitted);
            println!(
                "   ├─ Dropped: {} backpressure, {} corrupt, {} pool exhausted",
                decoder.dropped_backpressure, decoder.dropped_corrupt, decoder.dropped_exhausted
            );
            println!("   └─ Cancelled: {}", decoder.cancelled);
        }

        println!("\nCompensator");
        println!("   ├─ Accepted: {}", self.compensator.accepted);
        println!("   ├─ Stale: {}", self.compensator.stale);
        println!("   ├─ Unknown pose: {}", self.compensator.unknown_pose);
        println!(
            "   └─ Warped / unwarped: {} / {}",
            self.compensator.warped, self.compensator.unwarped
        );

        if let Some(renderer) = &self.renderer {
            println!("\nLoopback renderer");
            println!("   ├─ Poses received: {}", renderer.poses_received);
            println!("   ├─ Frames sent: {}", renderer.frames_sent);
            println!("   └─ Corrupted: {}", renderer.corrupted);
        }

        println!("\n{}", self.session_metrics.summary());
    }
}
