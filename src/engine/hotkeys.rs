//! Hotkey classification
//!
//! Three fixed bindings control the engine: Command+R begins a recording,
//! Command+P plays the last one, Command+S stops whatever is in flight.
//! Matching requires exact modifier-mask equality, so Command+Shift+R is
//! ordinary input, not a sloppy BeginRecord.

use crate::capture::types::{KeyEvent, ModifierFlags};

/// ANSI-layout virtual keycodes for the bound keys
pub mod keycodes {
    pub const ANSI_S: u16 = 0x01;
    pub const ANSI_R: u16 = 0x0F;
    pub const ANSI_P: u16 = 0x23;
}

/// Engine control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Start capturing (Command+R)
    BeginRecord,
    /// Replay the current recording (Command+P)
    Play,
    /// End the recording or cancel playback (Command+S)
    Stop,
}

/// One (modifier set, keycode) -> command binding
#[derive(Debug, Clone, Copy)]
struct Hotkey {
    modifiers: ModifierFlags,
    key_code: u16,
    command: Command,
}

/// Classifies incoming events against the fixed binding table.
///
/// Pure classification; no side effects. Hotkeys are recognized on
/// key-down only.
#[derive(Debug, Clone)]
pub struct HotkeyMatcher {
    bindings: [Hotkey; 3],
}

impl HotkeyMatcher {
    pub fn new() -> Self {
        let command = ModifierFlags::command_only();
        Self {
            bindings: [
                Hotkey {
                    modifiers: command,
                    key_code: keycodes::ANSI_R,
                    command: Command::BeginRecord,
                },
                Hotkey {
                    modifiers: command,
                    key_code: keycodes::ANSI_P,
                    command: Command::Play,
                },
                Hotkey {
                    modifiers: command,
                    key_code: keycodes::ANSI_S,
                    command: Command::Stop,
                },
            ],
        }
    }

    /// Classify an event as a command, or `None` for ordinary input.
    pub fn classify(&self, event: &KeyEvent) -> Option<Command> {
        if !event.kind.is_down() {
            return None;
        }
        self.bindings
            .iter()
            .find(|b| b.modifiers == event.modifiers && b.key_code == event.key_code)
            .map(|b| b.command)
    }
}

impl Default for HotkeyMatcher {
    fn default() -> Self {
        Self::new()
    }
}
