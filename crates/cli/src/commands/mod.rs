//! Command implementations.

mod info;
mod run;
mod serve;
mod validate;

pub use info::run_info;
pub use run::run_pipeline;
pub use serve::run_serve;
pub use validate::run_validate;

use std::path::Path;

use contracts::SessionConfig;
use tracing::{error, info};

use crate::error::CliError;

/// Load a configuration file, or the defaults when no path is given
fn load_config(path: Option<&Path>) -> Result<SessionConfig, CliError> {
    let Some(path) = path else {
        info!("No configuration file given, using defaults");
        return Ok(SessionConfig::default());
    };
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    config_loader::ConfigLoader::load_from_path(path)
        .map_err(|e| CliError::config_invalid(format!("{}: {e}", path.display())))
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
