//! Event model for capture and replay
//!
//! A [`KeyEvent`] is what the tap hands to the engine: the decoded keycode,
//! the exact modifier set, the monotonic timestamp, the pid of the process
//! that produced the event, and (on macOS) a retained handle to the
//! underlying platform event so replay can re-post the original keystroke.

use crate::time::timebase::Timestamp;

// CGEventFlags masks
const CG_EVENT_FLAG_MASK_SHIFT: u64 = 0x00020000;
const CG_EVENT_FLAG_MASK_CONTROL: u64 = 0x00040000;
const CG_EVENT_FLAG_MASK_ALTERNATE: u64 = 0x00080000;
const CG_EVENT_FLAG_MASK_COMMAND: u64 = 0x00100000;
const CG_EVENT_FLAG_MASK_FN: u64 = 0x00800000;

/// Keyboard event direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEventKind {
    /// Key pressed
    Down,
    /// Key released
    Up,
}

impl KeyEventKind {
    /// Check if this is a key-down event
    pub fn is_down(&self) -> bool {
        matches!(self, KeyEventKind::Down)
    }
}

/// Keyboard modifier set derived per-event from the platform flag bits.
///
/// Hotkey matching compares two of these for equality, so the set is exact:
/// a hotkey held with an extra modifier produces a different value and does
/// not match. Caps lock is deliberately not part of the set so an engaged
/// caps lock cannot defeat hotkey matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModifierFlags {
    pub alt: bool,
    pub shift: bool,
    pub command: bool,
    pub control: bool,
    pub function: bool,
}

impl ModifierFlags {
    /// Create from a CGEventFlags bitmask
    pub fn from_cg_flags(flags: u64) -> Self {
        Self {
            alt: (flags & CG_EVENT_FLAG_MASK_ALTERNATE) != 0,
            shift: (flags & CG_EVENT_FLAG_MASK_SHIFT) != 0,
            command: (flags & CG_EVENT_FLAG_MASK_COMMAND) != 0,
            control: (flags & CG_EVENT_FLAG_MASK_CONTROL) != 0,
            function: (flags & CG_EVENT_FLAG_MASK_FN) != 0,
        }
    }

    /// Convert back to a CGEventFlags bitmask (for synthesized events)
    pub fn to_cg_flags(&self) -> u64 {
        let mut flags = 0u64;
        if self.alt {
            flags |= CG_EVENT_FLAG_MASK_ALTERNATE;
        }
        if self.shift {
            flags |= CG_EVENT_FLAG_MASK_SHIFT;
        }
        if self.command {
            flags |= CG_EVENT_FLAG_MASK_COMMAND;
        }
        if self.control {
            flags |= CG_EVENT_FLAG_MASK_CONTROL;
        }
        if self.function {
            flags |= CG_EVENT_FLAG_MASK_FN;
        }
        flags
    }

    /// Modifier set containing only the Command key
    pub fn command_only() -> Self {
        Self {
            command: true,
            ..Self::default()
        }
    }

    /// Check if any modifier is active
    pub fn any_active(&self) -> bool {
        self.alt || self.shift || self.command || self.control || self.function
    }
}

/// A retained handle to an OS-owned `CGEvent`.
///
/// Retains on clone, releases on drop, so a recording slot owns exactly one
/// reference per stored event and all references are released in bulk when
/// the recording is dropped or superseded.
#[cfg(target_os = "macos")]
pub struct RetainedEvent(core_foundation::base::CFTypeRef);

#[cfg(target_os = "macos")]
impl RetainedEvent {
    /// Retain a borrowed event reference (e.g. the callback argument, which
    /// the OS owns for the duration of the call).
    ///
    /// # Safety
    /// `event` must be a valid `CGEventRef`.
    pub unsafe fn from_borrowed(event: core_foundation::base::CFTypeRef) -> Self {
        core_foundation::base::CFRetain(event);
        Self(event)
    }

    /// Raw pointer for FFI calls such as `CGEventPost`.
    pub fn as_ptr(&self) -> core_foundation::base::CFTypeRef {
        self.0
    }
}

#[cfg(target_os = "macos")]
impl Clone for RetainedEvent {
    fn clone(&self) -> Self {
        // Safety: self.0 is a valid retained CFType
        unsafe {
            core_foundation::base::CFRetain(self.0);
        }
        Self(self.0)
    }
}

#[cfg(target_os = "macos")]
impl Drop for RetainedEvent {
    fn drop(&mut self) {
        // Safety: balances the retain taken at construction/clone
        unsafe {
            core_foundation::base::CFRelease(self.0);
        }
    }
}

#[cfg(target_os = "macos")]
impl std::fmt::Debug for RetainedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RetainedEvent").field(&self.0).finish()
    }
}

// Safety: CFRetain/CFRelease are thread-safe, the wrapped CGEvent is never
// mutated after capture, and CGEventPost may be called from any thread (the
// playback worker posts events the tap captured on the main run loop).
#[cfg(target_os = "macos")]
unsafe impl Send for RetainedEvent {}
#[cfg(target_os = "macos")]
unsafe impl Sync for RetainedEvent {}

/// A captured keyboard event
#[derive(Debug, Clone)]
pub struct KeyEvent {
    /// Down or up
    pub kind: KeyEventKind,
    /// Virtual keycode
    pub key_code: u16,
    /// Exact modifier set at the time of the event
    pub modifiers: ModifierFlags,
    /// Monotonic timestamp (raw ticks)
    pub timestamp: Timestamp,
    /// Pid of the process the event originated from
    pub source_pid: i32,
    /// Retained platform event, present for tapped events
    #[cfg(target_os = "macos")]
    raw: Option<RetainedEvent>,
}

impl KeyEvent {
    /// Create an event from decoded fields, without a platform handle.
    pub fn new(
        kind: KeyEventKind,
        key_code: u16,
        modifiers: ModifierFlags,
        timestamp: Timestamp,
        source_pid: i32,
    ) -> Self {
        Self {
            kind,
            key_code,
            modifiers,
            timestamp,
            source_pid,
            #[cfg(target_os = "macos")]
            raw: None,
        }
    }

    /// Attach the retained platform event.
    #[cfg(target_os = "macos")]
    pub fn with_raw(mut self, raw: RetainedEvent) -> Self {
        self.raw = Some(raw);
        self
    }

    /// The retained platform event, when present.
    #[cfg(target_os = "macos")]
    pub fn raw(&self) -> Option<&RetainedEvent> {
        self.raw.as_ref()
    }
}
