//! # Config Loader
//!
//! Session configuration loading and parsing.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Parse launch options and layer them over the loaded configuration
//!
//! # Example
//!
//! ```no_run
//! use config_loader::{ConfigLoader, LaunchOptions};
//! use std::path::Path;
//!
//! let mut config = ConfigLoader::load_from_path(Path::new("session.toml")).unwrap();
//! LaunchOptions::parse_cmdline("-s 192.168.1.20").unwrap().apply(&mut config);
//! println!("Server: {:?}", config.server.address());
//! ```

mod launch;
mod parser;
mod validator;

pub use contracts::SessionConfig;
pub use launch::LaunchOptions;
pub use parser::ConfigFormat;

use contracts::StreamError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<SessionConfig, StreamError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<SessionConfig, StreamError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }

    /// Validate an already-built configuration (e.g. after launch overrides)
    pub fn validate(config: &SessionConfig) -> Result<(), StreamError> {
        validator::validate(config)
    }

    /// Serialize SessionConfig to TOML string
    pub fn to_toml(config: &SessionConfig) -> Result<String, StreamError> {
        toml::to_string_pretty(config)
            .map_err(|e| StreamError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize SessionConfig to JSON string
    pub fn to_json(config: &SessionConfig) -> Result<String, StreamError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| StreamError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, StreamError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            StreamError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext)
            .ok_or_else(|| StreamError::config_parse(format!("unsupported config format: .{ext}")))
    }

    fn read_file(path: &Path) -> Result<String, StreamError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SESSION_TOML: &str = r#"
[server]
host = "10.1.2.3"
port = 48010

[pose]
window_ms = 600
capacity = 128

[transport]
stall_timeout_ms = 200
disconnect_timeout_ms = 3000

[decoder]
queue_depth = 3
output_depth = 2
pool_size = 6
"#;

    #[test]
    fn test_load_from_str_toml() {
        let config = ConfigLoader::load_from_str(SESSION_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(config.server.host, "10.1.2.3");
        assert_eq!(config.pose.window_ms, 600);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = ConfigLoader::load_from_str(SESSION_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&config).unwrap();
        let back = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_toml_to_json() {
        let config = ConfigLoader::load_from_str(SESSION_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&config).unwrap();
        let back = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = "[transport]\nstall_timeout_ms = 9000\n";
        let err = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap_err();
        assert!(matches!(err, StreamError::ConfigValidation { .. }));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SESSION_TOML.as_bytes()).unwrap();
        let config = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(config.pose.capacity, 128);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, StreamError::ConfigParse { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ConfigLoader::load_from_path(Path::new("/nonexistent/session.toml")).unwrap_err();
        assert!(matches!(err, StreamError::Io(_)));
    }
}
