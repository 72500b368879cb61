//! 配置验证
//!
//! 验证规则：
//! - 契约结构体上声明的字段范围（`validator` derive）
//! - stall_timeout_ms < disconnect_timeout_ms
//! - heartbeat_interval_ms < disconnect_timeout_ms
//! - backoff_initial_ms <= backoff_max_ms
//! - pool_size 至少为 output_depth + 2（一个在屏、一个解码中）
//! - bind 可解析为 socket 地址
//! - host 若已设置，不得包含空白字符

use std::net::SocketAddr;

use contracts::{SessionConfig, StreamError};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 验证 SessionConfig
///
/// 返回遇到的第一个错误，或 Ok(())。
pub fn validate(config: &SessionConfig) -> Result<(), StreamError> {
    validate_ranges(config)?;
    validate_timeouts(config)?;
    validate_backoff(config)?;
    validate_pool(config)?;
    validate_server(config)?;
    Ok(())
}

/// 字段范围
fn validate_ranges(config: &SessionConfig) -> Result<(), StreamError> {
    match config.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let (field, message) = first_violation(&errors, "")
                .unwrap_or_else(|| ("<root>".to_string(), errors.to_string()));
            Err(StreamError::config_validation(field, message))
        }
    }
}

/// Depth-first, alphabetical, so the reported field is deterministic
fn first_violation(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut entries: Vec<_> = errors.errors().iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in entries {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(err) = list.first() {
                    let message = match err.params.get("value") {
                        Some(value) => format!("{} (got {value})", err.code),
                        None => err.code.to_string(),
                    };
                    return Some((path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_violation(inner, &path) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    if let Some(found) = first_violation(inner, &format!("{path}[{idx}]")) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

/// 链路健康超时
fn validate_timeouts(config: &SessionConfig) -> Result<(), StreamError> {
    let transport = &config.transport;

    if transport.stall_timeout_ms >= transport.disconnect_timeout_ms {
        return Err(StreamError::config_validation(
            "transport.stall_timeout_ms / transport.disconnect_timeout_ms",
            format!(
                "stall_timeout_ms ({}) must be < disconnect_timeout_ms ({})",
                transport.stall_timeout_ms, transport.disconnect_timeout_ms
            ),
        ));
    }

    if transport.heartbeat_interval_ms >= transport.disconnect_timeout_ms {
        return Err(StreamError::config_validation(
            "transport.heartbeat_interval_ms",
            format!(
                "heartbeat_interval_ms ({}) must be < disconnect_timeout_ms ({})",
                transport.heartbeat_interval_ms, transport.disconnect_timeout_ms
            ),
        ));
    }

    Ok(())
}

/// 发送重试退避
fn validate_backoff(config: &SessionConfig) -> Result<(), StreamError> {
    let transport = &config.transport;
    if transport.backoff_initial_ms > transport.backoff_max_ms {
        return Err(StreamError::config_validation(
            "transport.backoff_initial_ms / transport.backoff_max_ms",
            format!(
                "backoff_initial_ms ({}) must be <= backoff_max_ms ({})",
                transport.backoff_initial_ms, transport.backoff_max_ms
            ),
        ));
    }
    Ok(())
}

/// 表面池容量
fn validate_pool(config: &SessionConfig) -> Result<(), StreamError> {
    let decoder = &config.decoder;
    let required = decoder.output_depth + 2;
    if decoder.pool_size < required {
        return Err(StreamError::config_validation(
            "decoder.pool_size",
            format!(
                "pool_size ({}) must be >= output_depth + 2 ({required})",
                decoder.pool_size
            ),
        ));
    }
    Ok(())
}

/// 服务端地址
fn validate_server(config: &SessionConfig) -> Result<(), StreamError> {
    let server = &config.server;

    if server.bind.parse::<SocketAddr>().is_err() {
        return Err(StreamError::config_validation(
            "server.bind",
            format!("'{}' is not a socket address", server.bind),
        ));
    }

    if server.host.chars().any(char::is_whitespace) {
        return Err(StreamError::config_validation(
            "server.host",
            format!("'{}' contains whitespace", server.host),
        ));
    }

    Ok(())
}
