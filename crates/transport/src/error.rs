//! Transport error types

use contracts::StreamError;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Wire encoding failed
    #[error("encode error: {message}")]
    Encode { message: String },

    /// Malformed datagram
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Fragment inconsistent with its siblings
    #[error("bad fragment for frame {frame_sequence}: {message}")]
    Fragment { frame_sequence: u64, message: String },

    /// Link closed by the peer or the local side
    #[error("link closed")]
    Closed,

    /// No peer to send to yet
    #[error("no peer address")]
    NoPeer,

    /// Address resolution failed
    #[error("invalid address '{addr}': {message}")]
    Address { addr: String, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create an encode error
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a fragment error
    pub fn fragment(frame_sequence: u64, message: impl Into<String>) -> Self {
        Self::Fragment {
            frame_sequence,
            message: message.into(),
        }
    }

    /// Create an address error
    pub fn address(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Address {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Whether the link can no longer carry traffic
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => StreamError::connection_lost("link closed"),
            TransportError::Address { .. } => StreamError::connection_lost(err.to_string()),
            TransportError::Io(e) => StreamError::Io(e),
            other => StreamError::transient(other.to_string()),
        }
    }
}
