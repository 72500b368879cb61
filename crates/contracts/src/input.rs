//! Input events forwarded to the remote renderer with the next pose message.

use serde::{Deserialize, Serialize};

/// Touch or launch event from the outer binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEvent {
    /// Screen touch in surface pixel coordinates
    Touch { x: f32, y: f32, long_press: bool },
    /// Launch options string, forwarded once
    Launch { options: String },
}

impl InputEvent {
    pub fn touch(x: f32, y: f32, long_press: bool) -> Self {
        Self::Touch { x, y, long_press }
    }
}
