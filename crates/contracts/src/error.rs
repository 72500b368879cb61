//! Layered error definitions
//!
//! Categorized by source: config / tracking / transport / decode / resources / lifecycle.
//! Only terminal conditions cross the render-thread boundary, as a draw status.

use thiserror::Error;

/// Coarse error category, used for metrics labels and status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Tracking,
    TransportTransient,
    TransportTerminal,
    Decode,
    Resource,
    Lifecycle,
    Platform,
    Io,
}

impl ErrorKind {
    /// Label used in metrics and structured logs
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Tracking => "tracking",
            ErrorKind::TransportTransient => "transport_transient",
            ErrorKind::TransportTerminal => "transport_terminal",
            ErrorKind::Decode => "decode",
            ErrorKind::Resource => "resource",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::Platform => "platform",
            ErrorKind::Io => "io",
        }
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum StreamError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Tracking Errors =====
    /// Local tracking lost localization
    #[error("tracking lost")]
    TrackingLost,

    // ===== Transport Errors =====
    /// Transient stall or send failure; the last good frame stays on screen
    #[error("transport transient: {message}")]
    TransportTransient { message: String },

    /// Underlying network session dropped
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    // ===== Decode Errors =====
    /// Corrupt or undecodable payload
    #[error("decode corruption at frame {sequence}: {message}")]
    DecodeCorruption { sequence: u64, message: String },

    // ===== Resource Errors =====
    /// Surface pool exhausted
    #[error("surface pool exhausted (capacity={capacity})")]
    ResourceExhausted { capacity: usize },

    // ===== Lifecycle Errors =====
    /// Operation not allowed in the current lifecycle state
    #[error("invalid transition: {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    /// Session handle does not name a live session
    #[error("unknown session handle: {handle:#x}")]
    UnknownSession { handle: u64 },

    // ===== Platform Errors =====
    /// Display compositor failure
    #[error("compositor error: {message}")]
    Compositor { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration parse error carrying its cause
    pub fn config_parse_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create transient transport error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransportTransient {
            message: message.into(),
        }
    }

    /// Create terminal connection-lost error
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Create decode corruption error
    pub fn decode_corruption(sequence: u64, message: impl Into<String>) -> Self {
        Self::DecodeCorruption {
            sequence,
            message: message.into(),
        }
    }

    /// Create compositor error
    pub fn compositor(message: impl Into<String>) -> Self {
        Self::Compositor {
            message: message.into(),
        }
    }

    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParse { .. } | Self::ConfigValidation { .. } => ErrorKind::Config,
            Self::TrackingLost => ErrorKind::Tracking,
            Self::TransportTransient { .. } => ErrorKind::TransportTransient,
            Self::ConnectionLost { .. } => ErrorKind::TransportTerminal,
            Self::DecodeCorruption { .. } => ErrorKind::Decode,
            Self::ResourceExhausted { .. } => ErrorKind::Resource,
            Self::InvalidTransition { .. } | Self::UnknownSession { .. } => ErrorKind::Lifecycle,
            Self::Compositor { .. } => ErrorKind::Platform,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the session can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Tracking
                | ErrorKind::TransportTransient
                | ErrorKind::Decode
                | ErrorKind::Resource
        )
    }
}
