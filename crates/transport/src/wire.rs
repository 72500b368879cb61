//! Wire format
//!
//! One `WireMessage` per datagram, bincode-encoded with a size limit so a
//! malformed length prefix cannot trigger a large allocation. Frames that do
//! not fit the datagram budget travel as `Fragment`s of their own encoding.

use bincode::Options;
use bytes::Bytes;
use contracts::{CodecKind, InboundFrame, OutboundPoseMessage, PoseSample, StereoLayout};
use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Upper bound for one reassembled message
pub const MAX_MESSAGE_BYTES: u64 = 32 * 1024 * 1024;

/// Bytes reserved for the fragment envelope inside a datagram
pub const FRAGMENT_OVERHEAD: usize = 32;

/// Protocol version carried in `Hello`
pub const PROTOCOL_VERSION: u16 = 1;

/// Messages exchanged between client and renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Session opening (client → server) and acknowledgement (server → client)
    Hello(Hello),
    /// Predicted pose + input (client → server)
    Pose(OutboundPoseMessage),
    /// Encoded frame (server → client)
    Frame(WireFrame),
    /// Part of an encoded `Frame` message
    Fragment(Fragment),
    /// Liveness probe; the server echoes it
    Heartbeat { sent_at: f64 },
    /// Orderly close
    Goodbye { reason: String },
}

/// Session parameters announced by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub version: u16,
    pub codec: CodecKind,
    pub max_datagram_bytes: u32,
}

/// Encoded frame plus its render metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub sequence: u64,
    pub server_timestamp: f64,
    pub pose_sequence: u64,
    pub render_pose: PoseSample,
    pub server_received_at: f64,
    pub width: u32,
    pub height: u32,
    pub stereo_layout: StereoLayout,
    pub codec: CodecKind,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl WireFrame {
    /// Attach the local arrival time
    pub fn into_inbound(self, received_at: f64) -> InboundFrame {
        InboundFrame {
            sequence: self.sequence,
            server_timestamp: self.server_timestamp,
            pose_sequence: self.pose_sequence,
            render_pose: self.render_pose,
            server_received_at: self.server_received_at,
            received_at,
            payload: Bytes::from(self.payload),
            width: self.width,
            height: self.height,
            stereo_layout: self.stereo_layout,
            codec: self.codec,
        }
    }
}

/// Slice of an encoded frame message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub frame_sequence: u64,
    pub index: u16,
    pub count: u16,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_BYTES)
}

/// Encode a message
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, TransportError> {
    options()
        .serialize(message)
        .map_err(|e| TransportError::encode(e.to_string()))
}

/// Decode a message
pub fn decode(bytes: &[u8]) -> Result<WireMessage, TransportError> {
    options()
        .deserialize(bytes)
        .map_err(|e| TransportError::decode(e.to_string()))
}

/// Encode a frame into one or more datagrams
///
/// Returns a single `Frame` datagram when it fits `max_datagram`, otherwise
/// the `Frame` encoding split into `Fragment` datagrams.
pub fn encode_frame(frame: WireFrame, max_datagram: usize) -> Result<Vec<Vec<u8>>, TransportError> {
    let sequence = frame.sequence;
    let encoded = encode(&WireMessage::Frame(frame))?;
    if encoded.len() <= max_datagram {
        return Ok(vec![encoded]);
    }

    let chunk = max_datagram.saturating_sub(FRAGMENT_OVERHEAD).max(1);
    let count = encoded.len().div_ceil(chunk);
    let count = u16::try_from(count).map_err(|_| {
        TransportError::encode(format!(
            "frame {sequence} needs {count} fragments (max {})",
            u16::MAX
        ))
    })?;

    encoded
        .chunks(chunk)
        .enumerate()
        .map(|(index, bytes)| {
            encode(&WireMessage::Fragment(Fragment {
                frame_sequence: sequence,
                index: index as u16,
                count,
                bytes: bytes.to_vec(),
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{InputEvent, TrackingState};
    use nalgebra::{UnitQuaternion, Vector3};

    fn pose(t: f64) -> PoseSample {
        PoseSample::new(
            t,
            Vector3::new(0.1, 1.5, -0.2),
            UnitQuaternion::from_euler_angles(0.0, 0.3, 0.0),
            TrackingState::Tracking,
        )
    }

    fn frame(sequence: u64, payload_len: usize) -> WireFrame {
        WireFrame {
            sequence,
            server_timestamp: 10.0,
            pose_sequence: sequence,
            render_pose: pose(9.9),
            server_received_at: 9.95,
            width: 4,
            height: 4,
            stereo_layout: StereoLayout::SideBySide,
            codec: CodecKind::Raw,
            payload: (0..payload_len).map(|i| (i % 251) as u8).collect(),
        }
    }

    #[test]
    fn test_pose_message_with_inputs() {
        let msg = WireMessage::Pose(OutboundPoseMessage {
            sequence: 3,
            pose: pose(1.0),
            input_events: vec![
                InputEvent::touch(10.0, 20.0, true),
                InputEvent::Launch {
                    options: "-s 1.2.3.4".into(),
                },
            ],
            sent_at: 1.001,
        });
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_small_frame_is_single_datagram() {
        let datagrams = encode_frame(frame(1, 64), 1400).unwrap();
        assert_eq!(datagrams.len(), 1);
        assert!(matches!(decode(&datagrams[0]).unwrap(), WireMessage::Frame(f) if f.sequence == 1));
    }

    #[test]
    fn test_large_frame_is_fragmented_within_budget() {
        let datagrams = encode_frame(frame(2, 10_000), 1400).unwrap();
        assert!(datagrams.len() > 1);
        for d in &datagrams {
            assert!(d.len() <= 1400, "datagram of {} bytes", d.len());
            assert!(matches!(decode(d).unwrap(), WireMessage::Fragment(_)));
        }
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = decode(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, TransportError::Decode { .. }));
    }
}
