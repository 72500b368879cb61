//! # cloudar
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 无头会话驱动与回环渲染器
//! - 优雅关闭处理

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_serve, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    observability::init_with_config(
        ObservabilityConfig::verbosity(cli.verbose, cli.quiet).with_format(cli.log_format.into()),
    )?;

    info!(version = env!("CARGO_PKG_VERSION"), command = cli.command.name(), "cloudar starting");

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Serve(args) => run_serve(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}
