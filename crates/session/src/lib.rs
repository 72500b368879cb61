//! # Session
//!
//! Session Coordinator: the lifecycle and per-display-tick surface consumed
//! by the outer binding.
//!
//! ## Usage
//!
//! ```ignore
//! let mut session = SessionCoordinator::create(config, tracker, compositor, clock)?;
//! session.on_surface_created()?;
//! session.on_resume()?;
//! loop {
//!     match session.draw_frame() {
//!         DrawStatus::Disconnected => break,
//!         _ => {}
//!     }
//! }
//! session.destroy();
//! ```

mod coordinator;
mod error;
mod headless;
mod registry;
mod state;

pub use coordinator::{SessionCoordinator, SessionStats, TransportConnector, MAX_PENDING_INPUT};
pub use error::SessionError;
pub use headless::{CompositorLog, HeadlessCompositor, Presentation, SharedCompositorLog};
pub use registry::{SessionHandle, SessionRegistry};
pub use state::{SessionState, Step, Transition};
