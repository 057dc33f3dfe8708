//! Recording buffer
//!
//! An append-only ordered sequence of captured events plus the timestamp of
//! the hotkey event that opened it. While the engine is in the Recording
//! state the buffer is mutable; sealing hands it out behind an `Arc` and it
//! is never touched again. Dropping a recording releases every retained
//! platform event it holds.

use crate::capture::types::KeyEvent;
use crate::time::timebase::Timestamp;

/// An ordered capture of timestamped key events.
///
/// Invariant: event timestamps are non-decreasing in insertion order
/// (events are appended in capture order and the source clock is
/// monotonic).
#[derive(Debug, Clone, Default)]
pub struct Recording {
    events: Vec<KeyEvent>,
    base_timestamp: Timestamp,
}

impl Recording {
    /// Create an empty recording opened at `base_timestamp` (the timestamp
    /// of the BeginRecord hotkey event).
    pub fn begin(base_timestamp: Timestamp) -> Self {
        Self {
            events: Vec::new(),
            base_timestamp,
        }
    }

    /// Append a captured event.
    pub fn push(&mut self, event: KeyEvent) {
        debug_assert!(
            self.events
                .last()
                .map(|last| event.timestamp >= last.timestamp)
                .unwrap_or(true),
            "event timestamps must be non-decreasing"
        );
        self.events.push(event);
    }

    /// Timestamp the recording was opened at.
    pub fn base_timestamp(&self) -> Timestamp {
        self.base_timestamp
    }

    /// Number of captured events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if no events were captured.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate the captured events in capture order.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyEvent> {
        self.events.iter()
    }

    /// Captured events as a slice.
    pub fn events(&self) -> &[KeyEvent] {
        &self.events
    }

    /// Seconds between the recording's base timestamp and its last event
    /// (0 when empty).
    pub fn span_seconds(&self) -> f32 {
        self.events
            .last()
            .map(|last| last.timestamp.seconds_since(self.base_timestamp))
            .unwrap_or(0.0)
    }
}
