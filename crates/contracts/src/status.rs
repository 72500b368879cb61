//! Status codes returned to the outer binding.

use serde::{Deserialize, Serialize};

/// Result of one draw call
///
/// The integer codes are stable; the binding passes them through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawStatus {
    /// Remote frame composited with a live pose
    Nominal,
    /// No remote frame composited yet, or tracking limited
    Searching,
    /// Local tracking lost localization
    TrackingLost,
    /// Transient transport stall; last good frame kept
    Stalled,
    /// Draw called outside the resumed state
    Inactive,
    /// Terminal disconnect; the session must be destroyed
    Disconnected,
}

impl DrawStatus {
    /// Integer code for the binding
    pub fn code(self) -> i32 {
        match self {
            DrawStatus::Nominal => 0,
            DrawStatus::Searching => 1,
            DrawStatus::TrackingLost => 2,
            DrawStatus::Stalled => 3,
            DrawStatus::Inactive => 4,
            DrawStatus::Disconnected => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DrawStatus::Nominal),
            1 => Some(DrawStatus::Searching),
            2 => Some(DrawStatus::TrackingLost),
            3 => Some(DrawStatus::Stalled),
            4 => Some(DrawStatus::Inactive),
            -1 => Some(DrawStatus::Disconnected),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, DrawStatus::Disconnected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DrawStatus::Nominal => "nominal",
            DrawStatus::Searching => "searching",
            DrawStatus::TrackingLost => "tracking_lost",
            DrawStatus::Stalled => "stalled",
            DrawStatus::Inactive => "inactive",
            DrawStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for DrawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), self.code())
    }
}

/// Transport link health as seen from the render thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    /// No inbound traffic yet
    #[default]
    Connecting,
    Connected,
    /// No inbound traffic for the stall timeout (transient)
    Stalled,
    /// Terminal
    Lost,
}

impl LinkHealth {
    pub fn as_u8(self) -> u8 {
        match self {
            LinkHealth::Connecting => 0,
            LinkHealth::Connected => 1,
            LinkHealth::Stalled => 2,
            LinkHealth::Lost => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LinkHealth::Connecting,
            1 => LinkHealth::Connected,
            2 => LinkHealth::Stalled,
            _ => LinkHealth::Lost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for status in [
            DrawStatus::Nominal,
            DrawStatus::Searching,
            DrawStatus::TrackingLost,
            DrawStatus::Stalled,
            DrawStatus::Inactive,
            DrawStatus::Disconnected,
        ] {
            assert_eq!(DrawStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(DrawStatus::from_code(99), None);
        assert!(DrawStatus::Disconnected.is_terminal());
        assert!(!DrawStatus::Stalled.is_terminal());
    }
}
