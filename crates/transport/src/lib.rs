//! Frame Transport
//!
//! Moves pose messages to the remote renderer and encoded frames back. The
//! render thread talks to [`FrameTransport`]; all socket work happens on a
//! dedicated I/O thread behind a [`FrameLink`].

mod error;
mod fragment;
mod link;
mod loopback;
mod reorder;
mod transport;
pub mod wire;

pub use error::TransportError;
pub use fragment::FragmentAssembler;
pub use link::{FrameLink, MemoryLink, UdpLink};
pub use loopback::{LoopbackConfig, LoopbackHandle, LoopbackRenderer, LoopbackSummary};
pub use reorder::{ReorderBuffer, ReorderStats};
pub use transport::{FrameTransport, TransportStats, TransportStatsSnapshot};
