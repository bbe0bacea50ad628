//! Eye-closure debounce state

use serde::{Deserialize, Serialize};

/// Debounce phase after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyePhase {
    /// Eyes open, counter at zero
    Open,
    /// Eyes closed for this many consecutive frames, not yet confirmed
    Closing(u32),
    /// Closure sustained for the required run; fires once, counter resets
    Confirmed,
}

/// Consecutive below-threshold frame counter.
///
/// Owned by the detection loop; frames without a usable face must not call
/// [`DebounceState::step`], so they neither advance nor reset the count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceState {
    pub counter: u32,
}

impl DebounceState {
    /// Advance by one frame.
    ///
    /// Reaching `required_frames` yields [`EyePhase::Confirmed`] and a fresh
    /// state, so another full run is needed to confirm again.
    pub fn step(self, eyes_closed: bool, required_frames: u32) -> (Self, EyePhase) {
        if !eyes_closed {
            return (Self::default(), EyePhase::Open);
        }

        let counter = self.counter.saturating_add(1);
        if counter >= required_frames.max(1) {
            (Self::default(), EyePhase::Confirmed)
        } else {
            (Self { counter }, EyePhase::Closing(counter))
        }
    }

    pub fn phase(&self) -> EyePhase {
        if self.counter == 0 {
            EyePhase::Open
        } else {
            EyePhase::Closing(self.counter)
        }
    }
}
