//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the stream client:
//! the pose/frame data model, status codes, the error taxonomy, session
//! configuration and the traits at the platform seams.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - All timestamps are seconds (`f64`) on the local monotonic clock, except
//!   fields explicitly named `server_*`, which are on the remote renderer's clock
//! - Sequence numbers are `u64` and strictly increasing per direction

mod clock;
mod compositor;
mod error;
mod frame;
mod input;
mod pose;
mod report;
mod session_config;
mod status;
mod tracking;

pub use clock::*;
pub use compositor::*;
pub use error::*;
pub use frame::*;
pub use input::*;
pub use pose::*;
pub use report::*;
pub use session_config::*;
pub use status::*;
pub use tracking::*;
