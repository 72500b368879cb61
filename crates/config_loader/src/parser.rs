//! 配置解析
//!
//! 支持 TOML（主要）和 JSON 格式。

use contracts::{SessionConfig, StreamError};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML（推荐）
    Toml,
    Json,
}

impl ConfigFormat {
    /// 根据文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 文档
pub fn parse_toml(content: &str) -> Result<SessionConfig, StreamError> {
    toml::from_str(content)
        .map_err(|e| StreamError::config_parse_with(format!("TOML parse error: {e}"), e))
}

/// 解析 JSON 文档
pub fn parse_json(content: &str) -> Result<SessionConfig, StreamError> {
    serde_json::from_str(content)
        .map_err(|e| StreamError::config_parse_with(format!("JSON parse error: {e}"), e))
}

/// 按格式解析
pub fn parse(content: &str, format: ConfigFormat) -> Result<SessionConfig, StreamError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::CodecKind;

    #[test]
    fn test_parse_toml_sections() {
        let content = r#"
[server]
host = "192.168.1.20"
port = 47999

[pose]
window_ms = 750

[decoder]
queue_depth = 2
preferred_codec = "jpeg"

[compensator]
max_correction_deg = 10.0
"#;
        let config = parse_toml(content).unwrap();
        assert_eq!(config.server.host, "192.168.1.20");
        assert_eq!(config.server.port, 47999);
        assert_eq!(config.pose.window_ms, 750);
        assert_eq!(config.decoder.queue_depth, 2);
        assert_eq!(config.decoder.preferred_codec, CodecKind::Jpeg);
        assert_eq!(config.compensator.max_correction_deg, 10.0);
        // untouched sections keep defaults
        assert_eq!(config.transport.stall_timeout_ms, 250);
    }

    #[test]
    fn test_parse_json_minimal() {
        let config = parse_json(r#"{ "transport": { "recv_queue": 16 } }"#).unwrap();
        assert_eq!(config.transport.recv_queue, 16);
        assert_eq!(config.pose.window_ms, 500);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(matches!(err, StreamError::ConfigParse { source: Some(_), .. }));
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        let err = parse_toml("[pose]\nwindow_ms = \"long\"\n").unwrap_err();
        assert!(matches!(err, StreamError::ConfigParse { .. }));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
