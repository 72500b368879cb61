//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::CodecKind;
use std::path::PathBuf;

/// cloudar - cloud AR stream client
#[derive(Parser, Debug)]
#[command(
    name = "cloudar",
    author,
    version,
    about = "Cloud AR stream client",
    long_about = "Streams local AR poses to a remote renderer and presents the returned \n\
                  frames with latency compensation.\n\n\
                  `run` drives a headless session, `serve` runs a loopback renderer \n\
                  for it to talk to."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CLOUDAR_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CLOUDAR_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a headless session against a remote renderer
    Run(RunArgs),

    /// Serve a loopback renderer over UDP
    Serve(ServeArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display the effective configuration
    Info(InfoArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Serve(_) => "serve",
            Commands::Validate(_) => "validate",
            Commands::Info(_) => "info",
        }
    }
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults apply without one
    #[arg(short, long, env = "CLOUDAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the renderer host from configuration
    #[arg(short, long, env = "CLOUDAR_SERVER")]
    pub server: Option<String>,

    /// Override the renderer port from configuration
    #[arg(short, long, env = "CLOUDAR_PORT")]
    pub port: Option<u16>,

    /// Launch command line forwarded to the session (e.g. "--codec raw")
    #[arg(long, env = "CLOUDAR_LAUNCH_ARGS", allow_hyphen_values = true)]
    pub launch_args: Option<String>,

    /// Number of display refreshes to run (0 = until interrupted)
    #[arg(long, default_value = "600", env = "CLOUDAR_FRAMES")]
    pub frames: u64,

    /// Display refresh rate (Hz)
    #[arg(long, default_value = "60", env = "CLOUDAR_DISPLAY_HZ")]
    pub display_hz: f64,

    /// Session timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "CLOUDAR_TIMEOUT")]
    pub timeout: u64,

    /// Run an in-process loopback renderer instead of connecting over UDP
    #[arg(long)]
    pub loopback: bool,

    /// Simulated render latency of the in-process renderer (ms)
    #[arg(long, default_value = "40", requires = "loopback")]
    pub loopback_latency_ms: u64,

    /// Scripted tracking loss `start:end` in seconds (repeatable)
    #[arg(long = "lose-tracking", value_parser = parse_interval)]
    pub lose_tracking: Vec<(f64, f64)>,

    /// Ticks before a presentation fence signals
    #[arg(long, default_value = "1")]
    pub fence_latency: u64,

    /// Validate configuration and exit without running the session
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value_t = observability::DEFAULT_METRICS_PORT, env = "CLOUDAR_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `serve` command
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Local address to listen on
    #[arg(short, long, default_value = "0.0.0.0:48010", env = "CLOUDAR_SERVE_BIND")]
    pub bind: String,

    /// Render latency (ms)
    #[arg(long, default_value = "30")]
    pub latency_ms: u64,

    /// Uniform extra latency up to this many ms
    #[arg(long, default_value = "0")]
    pub jitter_ms: u64,

    /// Frame width (px)
    #[arg(long, default_value = "640")]
    pub width: u32,

    /// Frame height (px)
    #[arg(long, default_value = "360")]
    pub height: u32,

    /// Force a payload codec instead of the one the client asks for
    #[arg(long)]
    pub codec: Option<CodecKind>,

    /// Renderer clock offset from the local clock (ms)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub clock_offset_ms: f64,

    /// Corrupt every Nth frame payload
    #[arg(long)]
    pub corrupt_every: Option<u64>,

    /// Say goodbye after this many frames
    #[arg(long)]
    pub goodbye_after: Option<u64>,

    /// Jitter RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Exit after the first client leaves
    #[arg(long)]
    pub once: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "cloudar.toml")]
    pub config: PathBuf,

    /// Launch command line to layer over the file before validating
    #[arg(long, allow_hyphen_values = true)]
    pub launch_args: Option<String>,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; defaults are shown without one
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the complete effective configuration as TOML
    #[arg(long, conflicts_with = "json")]
    pub full: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

/// Parse `start:end` seconds
fn parse_interval(value: &str) -> Result<(f64, f64), String> {
    let (start, end) = value
        .split_once(':')
        .ok_or_else(|| format!("expected start:end, got '{value}'"))?;
    let start: f64 = start.trim().parse().map_err(|e| format!("start: {e}"))?;
    let end: f64 = end.trim().parse().map_err(|e| format!("end: {e}"))?;
    if end <= start {
        return Err(format!("interval end {end} must be after start {start}"));
    }
    Ok((start, end))
}
