//! Engine state
//!
//! The state cell is shared between the tap callback (which drives the
//! transitions) and the playback worker (which polls it as its cancellation
//! signal and writes Idle on natural completion), so it lives in an atomic.

use std::sync::atomic::{AtomicU8, Ordering};

/// Operating state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    /// Resting state; hotkeys are armed
    Idle = 0,
    /// Capturing events into the active recording
    Recording = 1,
    /// Replaying the current recording
    Playing = 2,
}

impl EngineState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Recording,
            2 => EngineState::Playing,
            _ => EngineState::Idle,
        }
    }
}

/// Atomic wrapper for EngineState
#[derive(Debug)]
pub struct AtomicEngineState(AtomicU8);

impl AtomicEngineState {
    pub const fn new(state: EngineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self, ordering: Ordering) -> EngineState {
        EngineState::from_u8(self.0.load(ordering))
    }

    pub fn store(&self, state: EngineState, ordering: Ordering) {
        self.0.store(state as u8, ordering);
    }

    pub fn compare_exchange(
        &self,
        current: EngineState,
        new: EngineState,
        success: Ordering,
        failure: Ordering,
    ) -> Result<EngineState, EngineState> {
        self.0
            .compare_exchange(current as u8, new as u8, success, failure)
            .map(EngineState::from_u8)
            .map_err(EngineState::from_u8)
    }
}

impl Default for AtomicEngineState {
    fn default() -> Self {
        Self::new(EngineState::Idle)
    }
}
