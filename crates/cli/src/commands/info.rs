//! `info` command implementation.

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::SessionConfig;
use serde::Serialize;
use tracing::info;

use super::load_config;
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    source: String,
    server: ServerInfo,
    pose_window_ms: u64,
    transport: TransportInfo,
    decoder: DecoderInfo,
    compensator: CompensatorInfo,
}

#[derive(Serialize)]
struct ServerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    bind: String,
    max_datagram_bytes: usize,
}

#[derive(Serialize)]
struct TransportInfo {
    send_queue: usize,
    recv_queue: usize,
    heartbeat_interval_ms: u64,
    stall_timeout_ms: u64,
    disconnect_timeout_ms: u64,
}

#[derive(Serialize)]
struct DecoderInfo {
    codec: String,
    queue_depth: usize,
    pool_size: usize,
}

#[derive(Serialize)]
struct CompensatorInfo {
    max_correction_deg: f64,
    max_correction_m: f64,
    max_extrapolation_ms: f64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let source = match &args.config {
        Some(path) => path.display().to_string(),
        None => "(defaults)".to_string(),
    };
    info!(config = %source, "Loading configuration info");

    let config = load_config(args.config.as_deref())?;

    if args.full {
        let rendered = ConfigLoader::to_toml(&config).context("Failed to render configuration")?;
        println!("{}", rendered);
    } else if args.json {
        let info = build_config_info(&config, source);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, &source);
    }

    Ok(())
}

fn build_config_info(config: &SessionConfig, source: String) -> ConfigInfo {
    ConfigInfo {
        source,
        server: ServerInfo {
            address: config.server.address(),
            bind: config.server.bind.clone(),
            max_datagram_bytes: config.server.max_datagram_bytes,
        },
        pose_window_ms: config.pose.window_ms,
        transport: TransportInfo {
            send_queue: config.transport.send_queue,
            recv_queue: config.transport.recv_queue,
            heartbeat_interval_ms: config.transport.heartbeat_interval_ms,
            stall_timeout_ms: config.transport.stall_timeout_ms,
            disconnect_timeout_ms: config.transport.disconnect_timeout_ms,
        },
        decoder: DecoderInfo {
            codec: config.decoder.preferred_codec.as_str().to_string(),
            queue_depth: config.decoder.queue_depth,
            pool_size: config.decoder.pool_size,
        },
        compensator: CompensatorInfo {
            max_correction_deg: config.compensator.max_correction_deg,
            max_correction_m: config.compensator.max_correction_m,
            max_extrapolation_ms: config.compensator.max_extrapolation_ms,
        },
    }
}

fn print_config_info(config: &SessionConfig, source: &str) {
    println!("=== cloudar configuration ({}) ===\n", source);

    println!("Server");
    match config.server.address() {
        Some(address) => println!("   ├─ Address: {}", address),
        None => println!("   ├─ Address: (from launch options)"),
    }
    println!("   ├─ Bind: {}", config.server.bind);
    println!("   └─ Max datagram: {} bytes", config.server.max_datagram_bytes);

    println!("\nPose");
    println!("   ├─ Window: {} ms", config.pose.window_ms);
    println!("   └─ Capacity: {} samples", config.pose.capacity);

    let transport = &config.transport;
    println!("\nTransport");
    println!(
        "   ├─ Queues: {} out / {} in (reorder {})",
        transport.send_queue, transport.recv_queue, transport.reorder_depth
    );
    println!("   ├─ Heartbeat: {} ms", transport.heartbeat_interval_ms);
    println!(
        "   └─ Stall / disconnect: {} ms / {} ms",
        transport.stall_timeout_ms, transport.disconnect_timeout_ms
    );

    let decoder = &config.decoder;
    println!("\nDecoder");
    println!("   ├─ Codec: {}", decoder.preferred_codec.as_str());
    println!("   ├─ Queue depth: {}", decoder.queue_depth);
    println!("   └─ Surface pool: {}", decoder.pool_size);

    let compensator = &config.compensator;
    println!("\nCompensator");
    println!(
        "   ├─ Max correction: {}° / {} m",
        compensator.max_correction_deg, compensator.max_correction_m
    );
    println!("   └─ Max extrapolation: {} ms", compensator.max_extrapolation_ms);

    println!();
}
