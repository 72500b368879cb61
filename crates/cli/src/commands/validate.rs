//! `validate` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigLoader, LaunchOptions};
use contracts::SessionConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    server: Option<String>,
    codec: String,
    pose_window_ms: u64,
    decode_queue: usize,
    pool_size: usize,
    max_correction_deg: f64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();
    let invalid = |error: String| ValidationResult {
        valid: false,
        config_path: config_path.clone(),
        error: Some(error),
        warnings: None,
        summary: None,
    };

    if !args.config.exists() {
        return invalid(format!("File not found: {}", args.config.display()));
    }

    let mut config = match ConfigLoader::load_from_path(&args.config) {
        Ok(config) => config,
        Err(e) => return invalid(e.to_string()),
    };

    if let Some(cmdline) = &args.launch_args {
        match LaunchOptions::parse_cmdline(cmdline) {
            Ok(options) => options.apply(&mut config),
            Err(e) => return invalid(e.to_string()),
        }
        if let Err(e) = ConfigLoader::validate(&config) {
            return invalid(format!("after launch options: {e}"));
        }
    }

    let warnings = collect_warnings(&config);
    ValidationResult {
        valid: true,
        config_path: config_path.clone(),
        error: None,
        warnings: if warnings.is_empty() {
            None
        } else {
            Some(warnings)
        },
        summary: Some(ConfigSummary {
            server: config.server.address(),
            codec: config.decoder.preferred_codec.as_str().to_string(),
            pose_window_ms: config.pose.window_ms,
            decode_queue: config.decoder.queue_depth,
            pool_size: config.decoder.pool_size,
            max_correction_deg: config.compensator.max_correction_deg,
        }),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &SessionConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.server.host.is_empty() {
        warnings.push("server.host is empty - it must come from launch options".to_string());
    }

    // The pose window has to cover a round trip or late frames lose their pose
    let window_ms = config.pose.window_ms;
    if window_ms < config.transport.stall_timeout_ms {
        warnings.push(format!(
            "pose.window_ms ({window_ms}) is shorter than transport.stall_timeout_ms ({}); \
             frames arriving late will not be reprojected",
            config.transport.stall_timeout_ms
        ));
    }

    if config.compensator.max_correction_deg == 0.0 {
        warnings.push("compensator.max_correction_deg is 0 - reprojection is disabled".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!(
                "\n  Server: {}",
                summary.server.as_deref().unwrap_or("(from launch options)")
            );
            println!("  Codec: {}", summary.codec);
            println!("  Pose window: {} ms", summary.pose_window_ms);
            println!("  Decode queue: {}", summary.decode_queue);
            println!("  Surface pool: {}", summary.pool_size);
            println!("  Max correction: {}°", summary.max_correction_deg);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn args(path: PathBuf, launch_args: Option<&str>) -> ValidateArgs {
        ValidateArgs {
            config: path,
            launch_args: launch_args.map(str::to_string),
            json: true,
        }
    }

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let file = config_file("[pose]\nwindow_ms = 300\n");
        let result = validate_config(&args(file.path().to_path_buf(), None));

        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("server.host"));
    }

    #[test]
    fn test_launch_options_are_layered() {
        let file = config_file("");
        let result = validate_config(&args(file.path().to_path_buf(), Some("-s 10.0.0.4 -p 9000")));

        assert!(result.valid);
        assert!(result.warnings.is_none());
        assert_eq!(result.summary.unwrap().server.as_deref(), Some("10.0.0.4:9000"));
    }

    #[test]
    fn test_launch_options_can_invalidate() {
        let file = config_file("");
        let result = validate_config(&args(file.path().to_path_buf(), Some("--decode-queue 0")));

        assert!(!result.valid);
        assert!(result.error.unwrap().starts_with("after launch options"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&args(PathBuf::from("/nonexistent/cloudar.toml"), None));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
