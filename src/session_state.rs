use crate::settings::FrameGate;
use log::info;

/// Where the frame loop is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting, rendering and submitting frames
    Active,
    /// Polling notifications only; the session is not showing anything
    Suspended,
    /// A terminal notification arrived; the current drain finishes, then the loop ends
    Stopping,
    /// The loop has returned
    Exited,
}

/// Tracks the session state reported by the runtime. The runtime only ever tells us about
/// transitions, so this is the single source of truth for gating frame work.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    state: xr::SessionState,
    gate: FrameGate,
    stopping: bool,
}

impl SessionTracker {
    pub fn new(initial: xr::SessionState, gate: FrameGate) -> Self {
        Self {
            state: initial,
            gate,
            stopping: is_terminal(initial),
        }
    }

    /// Record a state-change notification
    pub fn state_changed(&mut self, state: xr::SessionState) {
        info!("Session state changed from {:?} to {:?}", self.state, state);
        self.state = state;
        if is_terminal(state) {
            info!("Session is stopping");
            self.stopping = true;
        }
    }

    /// The instance is about to go away; nothing else can happen on this session
    pub fn instance_loss_pending(&mut self) {
        self.stopping = true;
    }

    /// Force a stop without a runtime notification
    pub fn force_stop(&mut self) {
        self.stopping = true;
    }

    pub fn state(&self) -> xr::SessionState {
        self.state
    }

    /// Whether frame wait/render/submit may happen in the current state
    pub fn visible(&self) -> bool {
        let lowest = match self.gate {
            FrameGate::Visible => xr::SessionState::VISIBLE,
            FrameGate::Synchronized => xr::SessionState::READY,
        };
        let raw = self.state.into_raw();
        raw >= lowest.into_raw() && raw < xr::SessionState::STOPPING.into_raw()
    }

    pub fn loop_state(&self) -> LoopState {
        if self.stopping {
            LoopState::Stopping
        } else if self.visible() {
            LoopState::Active
        } else {
            LoopState::Suspended
        }
    }
}

/// STOPPING, LOSS_PENDING and EXITING all end the frame loop
fn is_terminal(state: xr::SessionState) -> bool {
    state.into_raw() >= xr::SessionState::STOPPING.into_raw()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_happy_path() {
        let mut tracker = SessionTracker::new(xr::SessionState::READY, FrameGate::Visible);
        assert_eq!(tracker.loop_state(), LoopState::Suspended);

        tracker.state_changed(xr::SessionState::SYNCHRONIZED);
        assert_eq!(tracker.loop_state(), LoopState::Suspended);

        tracker.state_changed(xr::SessionState::VISIBLE);
        assert_eq!(tracker.loop_state(), LoopState::Active);

        tracker.state_changed(xr::SessionState::FOCUSED);
        assert_eq!(tracker.loop_state(), LoopState::Active);

        tracker.state_changed(xr::SessionState::VISIBLE);
        assert_eq!(tracker.loop_state(), LoopState::Active);

        tracker.state_changed(xr::SessionState::STOPPING);
        assert_eq!(tracker.loop_state(), LoopState::Stopping);
        assert!(!tracker.visible());
    }

    #[test]
    fn stopping_is_sticky() {
        let mut tracker = SessionTracker::new(xr::SessionState::FOCUSED, FrameGate::Visible);
        tracker.state_changed(xr::SessionState::EXITING);
        tracker.state_changed(xr::SessionState::IDLE);
        assert_eq!(tracker.loop_state(), LoopState::Stopping);
    }

    #[test]
    fn loss_pending_threshold() {
        let mut tracker = SessionTracker::new(xr::SessionState::FOCUSED, FrameGate::Visible);
        tracker.state_changed(xr::SessionState::LOSS_PENDING);
        assert_eq!(tracker.loop_state(), LoopState::Stopping);
    }

    #[test]
    fn instance_loss_stops() {
        let mut tracker = SessionTracker::new(xr::SessionState::VISIBLE, FrameGate::Visible);
        tracker.instance_loss_pending();
        assert_eq!(tracker.loop_state(), LoopState::Stopping);
    }

    #[test]
    fn synchronized_gate_admits_ready() {
        let mut tracker = SessionTracker::new(xr::SessionState::IDLE, FrameGate::Synchronized);
        assert!(!tracker.visible());
        tracker.state_changed(xr::SessionState::READY);
        assert!(tracker.visible());
        tracker.state_changed(xr::SessionState::SYNCHRONIZED);
        assert!(tracker.visible());
        tracker.state_changed(xr::SessionState::STOPPING);
        assert!(!tracker.visible());
    }

    #[test]
    fn visible_gate_holds_ready() {
        let tracker = SessionTracker::new(xr::SessionState::READY, FrameGate::Visible);
        assert!(!tracker.visible());
    }
}
