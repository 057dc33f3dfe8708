//! Event capture and injection
//!
//! The engine never talks to the OS directly. It receives decoded
//! [`types::KeyEvent`]s from the tap adapter and injects replayed events
//! through the [`EventSink`] seam, so the whole engine runs against a mock
//! sink in tests.

pub mod types;

#[cfg(target_os = "macos")]
pub mod event_tap;

pub use types::{KeyEvent, KeyEventKind, ModifierFlags};

#[cfg(target_os = "macos")]
pub use event_tap::{is_trusted, request_trust, EventTap, HidEventSink};

/// Sink for events injected back into the system input stream.
///
/// Injection is fire-and-forget with no delivery confirmation. The posted
/// event re-enters the system stream indistinguishable from real input
/// except for its originating pid, which the engine uses to filter out its
/// own playback.
pub trait EventSink: Send + Sync {
    /// Post one event.
    fn post(&self, event: &KeyEvent);
}
