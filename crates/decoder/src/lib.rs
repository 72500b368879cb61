//! Frame Decoder
//!
//! Turns compressed [`InboundFrame`](contracts::InboundFrame)s into RGBA
//! surfaces off the render thread, recycling surfaces through a fence-gated
//! pool.

mod codec;
mod error;
mod pool;
mod worker;

pub use codec::{check_dimensions, CodecSet, FrameCodec, ImageCodec, RawRgbaCodec, MAX_DIMENSION};
pub use error::{DecodeError, PoolError};
pub use pool::{Deferred, PoolStats, SurfacePool};
pub use worker::{DecoderStats, DecoderStatsSnapshot, FrameDecoder};
