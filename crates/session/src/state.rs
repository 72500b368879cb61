//! Session lifecycle state machine
//!
//! ```text
//! Uninitialized ──resume──▶ Resumed ◀──resume── Paused
//!                              │                  ▲
//!                              └──────pause───────┘
//! (any) ──destroy──▶ Destroyed
//! ```

use std::fmt;

/// Lifecycle state of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created; nothing acquired yet
    #[default]
    Uninitialized,
    /// Per-display-tick pipeline runs
    Resumed,
    /// Tracking and delivery suspended; sync state kept
    Paused,
    /// Everything released (terminal)
    Destroyed,
}

/// Lifecycle operation requested by the binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Resume,
    Pause,
    Destroy,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Resume => "resume",
            Transition::Pause => "pause",
            Transition::Destroy => "destroy",
        }
    }
}

/// What a transition request amounts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Move to the target state
    Enter(SessionState),
    /// Already there; nothing to do
    Stay,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Resumed => "resumed",
            SessionState::Paused => "paused",
            SessionState::Destroyed => "destroyed",
        }
    }

    /// Resolve `transition` from this state
    ///
    /// Returns `None` for transitions out of `Destroyed`.
    pub fn step(self, transition: Transition) -> Option<Step> {
        use SessionState::*;
        match (self, transition) {
            (Destroyed, Transition::Destroy) => Some(Step::Stay),
            (Destroyed, _) => None,
            (_, Transition::Destroy) => Some(Step::Enter(Destroyed)),
            (Resumed, Transition::Resume) => Some(Step::Stay),
            (Uninitialized | Paused, Transition::Resume) => Some(Step::Enter(Resumed)),
            (Resumed, Transition::Pause) => Some(Step::Enter(Paused)),
            // The binding may pause a session that never resumed
            (Uninitialized | Paused, Transition::Pause) => Some(Step::Stay),
        }
    }

    #[inline]
    pub fn is_resumed(self) -> bool {
        self == SessionState::Resumed
    }

    #[inline]
    pub fn is_destroyed(self) -> bool {
        self == SessionState::Destroyed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let s = SessionState::default();
        assert_eq!(s.step(Transition::Resume), Some(Step::Enter(SessionState::Resumed)));
        let s = SessionState::Resumed;
        assert_eq!(s.step(Transition::Pause), Some(Step::Enter(SessionState::Paused)));
        let s = SessionState::Paused;
        assert_eq!(s.step(Transition::Resume), Some(Step::Enter(SessionState::Resumed)));
        assert_eq!(s.step(Transition::Destroy), Some(Step::Enter(SessionState::Destroyed)));
    }

    #[test]
    fn test_repeated_requests_are_no_ops() {
        assert_eq!(SessionState::Resumed.step(Transition::Resume), Some(Step::Stay));
        assert_eq!(SessionState::Paused.step(Transition::Pause), Some(Step::Stay));
        assert_eq!(SessionState::Uninitialized.step(Transition::Pause), Some(Step::Stay));
        assert_eq!(SessionState::Destroyed.step(Transition::Destroy), Some(Step::Stay));
    }

    #[test]
    fn test_destroyed_is_terminal() {
        assert_eq!(SessionState::Destroyed.step(Transition::Resume), None);
        assert_eq!(SessionState::Destroyed.step(Transition::Pause), None);
        assert!(SessionState::Destroyed.is_destroyed());
    }
}
