//! Launch options
//!
//! The outer binding forwards an opaque command line (intent extras or a
//! `setArgs` string). It is parsed with the same grammar as a CLI and then
//! layered on top of the loaded configuration.

use clap::Parser;
use contracts::{CodecKind, SessionConfig, StreamError};
use tracing::debug;

/// Options accepted in a launch command line
#[derive(Debug, Clone, Default, PartialEq, Parser)]
#[command(
    name = "launch",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
pub struct LaunchOptions {
    /// Remote renderer IP or host
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    /// Remote renderer port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Pose retention window (ms)
    #[arg(long = "pose-window-ms")]
    pub pose_window_ms: Option<u64>,

    /// Decode queue backpressure threshold
    #[arg(long = "decode-queue")]
    pub decode_queue: Option<usize>,

    /// Maximum reprojection angle (degrees)
    #[arg(long = "max-correction-deg")]
    pub max_correction_deg: Option<f64>,

    /// Preferred payload codec
    #[arg(long = "codec")]
    pub codec: Option<CodecKind>,
}

impl LaunchOptions {
    /// Parse a whitespace-separated command line
    pub fn parse_cmdline(cmdline: &str) -> Result<Self, StreamError> {
        Self::try_parse_from(cmdline.split_whitespace()).map_err(|e| {
            StreamError::config_parse_with(format!("launch options: {}", e.kind()), e)
        })
    }

    /// Whether no option was given
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Layer the options over `config`
    pub fn apply(&self, config: &mut SessionConfig) {
        if let Some(server) = &self.server {
            debug!(server = %server, "launch option: server");
            config.server.host = server.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(window) = self.pose_window_ms {
            config.pose.window_ms = window;
        }
        if let Some(depth) = self.decode_queue {
            config.decoder.queue_depth = depth;
        }
        if let Some(deg) = self.max_correction_deg {
            config.compensator.max_correction_deg = deg;
        }
        if let Some(codec) = self.codec {
            config.decoder.preferred_codec = codec;
        }
    }
}
