//! # Pose Source
//!
//! Wraps the local tracking session and produces timestamped 6-DoF poses at
//! device frame cadence.
//!
//! Responsibilities:
//! - Sample the `TrackingBackend` once per tracking tick
//! - Retain a bounded, timestamp-ordered pose history for later lookup
//! - Provide a deterministic simulated tracker for headless runs
//!
//! ## Usage
//!
//! ```ignore
//! use pose_source::{PoseSource, SimulatedTracker};
//!
//! let mut source = PoseSource::new(Box::new(SimulatedTracker::default()), &config.pose);
//! source.resume()?;
//! let pose = source.sample(clock.now());
//! ```

mod history;
mod simulated;
mod source;

pub use history::{Bracket, PoseHistory};
pub use simulated::{SimulatedTracker, SimulatedTrackerConfig};
pub use source::PoseSource;
