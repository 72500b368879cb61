//! `run` command implementation.

use anyhow::{Context, Result};
use pose_source::SimulatedTrackerConfig;
use std::time::Duration;
use tracing::info;
use transport::LoopbackConfig;

use super::{load_config, shutdown_signal};
use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(ref server) = args.server {
        info!(server = %server, "Overriding renderer host from CLI");
        config.server.host = server.clone();
    }
    if let Some(port) = args.port {
        info!(port = %port, "Overriding renderer port from CLI");
        config.server.port = port;
    }
    config_loader::ConfigLoader::validate(&config).context("Invalid configuration after overrides")?;

    info!(
        server = ?config.server.address(),
        codec = config.decoder.preferred_codec.as_str(),
        pose_window_ms = config.pose.window_ms,
        loopback = args.loopback,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        let rendered = config_loader::ConfigLoader::to_toml(&config)?;
        println!("{}", rendered);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        session: config,
        launch_args: args.launch_args.clone(),
        max_frames: if args.frames == 0 {
            None
        } else {
            Some(args.frames)
        },
        display_hz: args.display_hz,
        timeout: if args.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.timeout))
        },
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        loopback: args.loopback.then(|| LoopbackConfig {
            latency_ms: args.loopback_latency_ms,
            ..LoopbackConfig::default()
        }),
        tracker: SimulatedTrackerConfig {
            loss_intervals: args.lose_tracking.clone(),
            ..SimulatedTrackerConfig::default()
        },
        fence_latency: args.fence_latency,
    };

    info!("Starting session...");

    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Session run failed")?;

    info!(
        draws = stats.session.draws,
        frames_new = stats.session.frames_new,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Session finished"
    );
    stats.print_summary();

    Ok(())
}
