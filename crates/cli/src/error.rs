//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// No renderer address configured for a UDP session
    #[error("No renderer host configured; pass --server, set server.host or use --loopback")]
    MissingServer,

    /// Session lifecycle error
    #[error("Session failed: {message}")]
    Session { message: String },

    /// Renderer error
    #[error("Renderer failed on {bind}: {message}")]
    Renderer { bind: String, message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    pub fn renderer(bind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Renderer {
            bind: bind.into(),
            message: message.into(),
        }
    }
}
