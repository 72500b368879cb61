//! Latency Compensator
//!
//! Hides the network round trip by reprojecting remote frames from the pose
//! they were rendered with to the pose the display will show them at.

mod clock_filter;
mod compensator;
pub mod kinematics;
mod sync_state;
pub mod warp;

pub use clock_filter::{ClockOffsetFilter, OffsetSample};
pub use compensator::{CompensationOutcome, CompensatorStats, LatencyCompensator};
pub use sync_state::{GoodFrame, SentPose, SyncSnapshot, SyncState, SENT_LEDGER_CAPACITY};
pub use warp::{WarpLimits, WarpSkip};
