//! Frame data model
//!
//! Outbound pose messages, inbound encoded frames and decoded surfaces.
//!
//! ## Ownership
//! - `OutboundPoseMessage`: created per tracking tick, moved into the transport
//! - `InboundFrame`: produced by the transport, consumed exactly once by the decoder
//! - `DecodedFrame`: moved from the decoder to the compensator; its `Surface`
//!   returns to the decoder's pool after composition and is never freed per frame

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{InputEvent, PoseSample};

/// Pose + pending input, sent to the remote renderer once per tracking tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPoseMessage {
    /// Strictly increasing per session
    pub sequence: u64,

    /// Predicted device pose the server should render against
    pub pose: PoseSample,

    /// Ordered input events accumulated since the previous message
    pub input_events: Vec<InputEvent>,

    /// Local clock at hand-off to the transport (seconds)
    pub sent_at: f64,
}

/// How the two eye views are packed in one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoLayout {
    #[default]
    Mono,
    SideBySide,
    TopBottom,
}

impl StereoLayout {
    /// Pixel size of one eye view
    pub fn eye_extent(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            StereoLayout::Mono => (width, height),
            StereoLayout::SideBySide => (width / 2, height),
            StereoLayout::TopBottom => (width, height / 2),
        }
    }
}

/// Payload encoding of an inbound frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// Uncompressed RGBA8, `width * height * 4` bytes
    Raw,
    #[default]
    Png,
    Jpeg,
}

impl CodecKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CodecKind::Raw => "raw",
            CodecKind::Png => "png",
            CodecKind::Jpeg => "jpeg",
        }
    }
}

impl std::str::FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "rgba" => Ok(CodecKind::Raw),
            "png" => Ok(CodecKind::Png),
            "jpeg" | "jpg" => Ok(CodecKind::Jpeg),
            other => Err(format!("unknown codec '{other}'")),
        }
    }
}

/// Encoded frame received from the remote renderer
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Frame sequence number (server side, strictly increasing)
    pub sequence: u64,

    /// Server clock when the frame was rendered (seconds)
    pub server_timestamp: f64,

    /// Sequence of the pose message the server rendered against
    pub pose_sequence: u64,

    /// Pose the server rendered with; timestamp is in the server clock domain
    pub render_pose: PoseSample,

    /// Server clock when the pose message arrived (seconds)
    pub server_received_at: f64,

    /// Local clock when reassembly finished (seconds)
    pub received_at: f64,

    /// Compressed payload
    pub payload: Bytes,

    pub width: u32,
    pub height: u32,
    pub stereo_layout: StereoLayout,
    pub codec: CodecKind,
}

/// Pool slot identity of a surface
///
/// The generation changes every time a slot is reused, so stale handles
/// are detected on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    pub slot: usize,
    pub generation: u64,
}

/// GPU-importable surface: an RGBA8 pixel buffer owned by the decoder's pool
#[derive(Debug)]
pub struct Surface {
    pub handle: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, `width * height * 4` bytes
    pub pixels: Vec<u8>,
}

impl Surface {
    /// Byte length for an RGBA8 image of the given size
    #[inline]
    pub fn rgba_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}

/// GPU fence returned by the compositor for one presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub u64);

/// Decoded frame ready for compensation and composition
#[derive(Debug)]
pub struct DecodedFrame {
    pub surface: Surface,

    /// Frame sequence number
    pub sequence: u64,

    /// Sequence of the pose message the server rendered against
    pub pose_sequence: u64,

    /// Server render pose (server clock domain)
    pub render_pose: PoseSample,

    /// Server clock at render time
    pub server_timestamp: f64,

    /// Server clock when the pose message arrived
    pub server_received_at: f64,

    /// Local clock when the transport delivered the frame
    pub received_at: f64,

    /// Local clock when decoding finished
    pub decode_timestamp: f64,

    pub stereo_layout: StereoLayout,

    /// Fence of the most recent presentation of this surface
    pub last_fence: Option<FenceId>,
}
