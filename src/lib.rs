//! # macrotap
//!
//! A system-wide keyboard macro recorder and player for macOS.
//!
//! ## Overview
//!
//! The process installs a Quartz event tap over keyboard events and watches
//! for three control hotkeys: Command+R begins a recording, Command+S ends
//! it (or cancels playback), and Command+P replays the last recording with
//! its original inter-event timing. Captured events keep a retained handle
//! to the underlying platform event so replay re-posts the exact keystroke
//! the operator produced.
//!
//! ## Architecture
//!
//! - [`time`]: monotonic timebase over `mach_absolute_time` (a portable
//!   fallback keeps the engine buildable and testable off-platform)
//! - [`capture`]: the event model, the injection seam, and the macOS
//!   Quartz event tap adapter
//! - [`engine`]: the Idle/Recording/Playing state machine, the recording
//!   buffer, and the timing-accurate playback scheduler
//!
//! ## Event flow
//!
//! ```text
//! ┌──────────┐    ┌────────────────┐    ┌───────────────────┐
//! │ EventTap │───▶│ Engine::handle │───▶│ Recording buffer  │
//! │ (macOS)  │    │ (hotkeys + FSM)│    │ or playback ctl   │
//! └──────────┘    └────────────────┘    └───────────────────┘
//!       ▲                                        │
//!       │         ┌────────────────┐             │
//!       └─────────│ PlaybackWorker │◀────────────┘
//!     (injection) │ (wait + post)  │
//!                 └────────────────┘
//! ```
//!
//! The tap callback runs on the main run loop and never blocks; playback
//! sleeps happen on a dedicated worker thread. Events injected by the
//! worker carry this process's pid and are filtered out on re-entry, so
//! playback can never re-record or re-trigger itself.
//!
//! ## Permissions
//!
//! Requires Accessibility permissions on macOS:
//! System Settings → Privacy & Security → Accessibility

pub mod capture;
pub mod engine;
pub mod time;

pub use capture::types::{KeyEvent, KeyEventKind, ModifierFlags};
pub use capture::EventSink;
pub use engine::hotkeys::{Command, HotkeyMatcher};
pub use engine::recording::Recording;
pub use engine::state::EngineState;
pub use engine::Engine;
pub use time::timebase::{Timebase, Timestamp};

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the macro engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("event tap error: {0}")]
    Tap(String),

    #[error("playback error: {0}")]
    Playback(String),
}
