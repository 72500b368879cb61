//! `serve` command implementation.

use anyhow::Result;
use contracts::MonotonicClock;
use tokio::sync::watch;
use tracing::{info, warn};
use transport::{LoopbackConfig, LoopbackRenderer, LoopbackSummary, UdpLink};

use super::shutdown_signal;
use crate::cli::ServeArgs;
use crate::error::CliError;

/// Execute the `serve` command
///
/// Serves one client at a time; after a client leaves the socket is bound
/// again for the next one unless `--once` is given.
pub async fn run_serve(args: &ServeArgs) -> Result<()> {
    let renderer = LoopbackRenderer::new(loopback_config(args), MonotonicClock::shared());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let mut total = LoopbackSummary::default();
    let mut clients = 0u64;

    loop {
        let link = UdpLink::listen(&args.bind)
            .await
            .map_err(|e| CliError::renderer(&args.bind, e.to_string()))?;
        info!(bind = %args.bind, "Waiting for a client");

        let mut rx = stop_rx.clone();
        let stop = async move {
            let _ = rx.wait_for(|stop| *stop).await;
        };
        let summary = renderer
            .run(link, stop)
            .await
            .map_err(|e| CliError::renderer(&args.bind, e.to_string()))?;

        if summary.poses_received > 0 {
            clients += 1;
        }
        total.poses_received += summary.poses_received;
        total.frames_sent += summary.frames_sent;
        total.heartbeats_echoed += summary.heartbeats_echoed;
        total.corrupted += summary.corrupted;

        if *stop_rx.borrow() {
            warn!("Shutdown requested, renderer stopping");
            break;
        }
        if args.once {
            break;
        }
    }

    println!("\n=== Renderer Statistics ===\n");
    println!("   ├─ Clients served: {}", clients);
    println!("   ├─ Poses received: {}", total.poses_received);
    println!("   ├─ Frames sent: {}", total.frames_sent);
    println!("   ├─ Heartbeats echoed: {}", total.heartbeats_echoed);
    println!("   └─ Corrupted: {}", total.corrupted);

    Ok(())
}

fn loopback_config(args: &ServeArgs) -> LoopbackConfig {
    LoopbackConfig {
        latency_ms: args.latency_ms,
        jitter_ms: args.jitter_ms,
        width: args.width,
        height: args.height,
        codec: args.codec,
        clock_offset_s: args.clock_offset_ms / 1000.0,
        corrupt_every: args.corrupt_every,
        goodbye_after: args.goodbye_after,
        seed: args.seed,
        ..LoopbackConfig::default()
    }
}
