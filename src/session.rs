//! Process-wide pipeline state.
//!
//! One `SessionState` is shared by the capture path, the encoder pool, and
//! the upload driver. It carries the cooperative shutdown flag, the
//! server-driven frame-acceptance gate, and the per-session position
//! counter. The upload driver owns the session lifecycle; the capture path
//! only reads the gates and claims positions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct SessionState {
    running: AtomicBool,
    /// Toggled by server START/STOP responses: whether the capture path
    /// may assign positions and submit frames at all.
    post_frames: AtomicBool,
    /// Latest position assigned in the current session (0 = none yet).
    position: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            post_frames: AtomicBool::new(false),
            position: AtomicU64::new(0),
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request cooperative shutdown of every pipeline thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn post_frames(&self) -> bool {
        self.post_frames.load(Ordering::SeqCst)
    }

    pub fn set_post_frames(&self, accept: bool) {
        self.post_frames.store(accept, Ordering::SeqCst);
    }

    /// Claim the next upload position (1-based, dense per session).
    pub fn next_position(&self) -> u64 {
        self.position.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Latest position assigned so far this session.
    pub fn latest_position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Restart position numbering at 1. Only valid while `post_frames` is
    /// disabled, at a session boundary.
    pub fn reset_positions(&self) {
        self.position.store(0, Ordering::SeqCst);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_dense_from_one() {
        let state = SessionState::new();
        assert_eq!(state.latest_position(), 0);
        assert_eq!(state.next_position(), 1);
        assert_eq!(state.next_position(), 2);
        assert_eq!(state.latest_position(), 2);

        state.reset_positions();
        assert_eq!(state.next_position(), 1);
    }

    #[test]
    fn gates_default_closed_then_toggle() {
        let state = SessionState::new();
        assert!(state.running());
        assert!(!state.post_frames());

        state.set_post_frames(true);
        assert!(state.post_frames());

        state.stop();
        assert!(!state.running());
    }
}
