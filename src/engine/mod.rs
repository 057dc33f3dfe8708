//! Capture/playback engine
//!
//! [`Engine`] is the composition root: it owns the state machine, the
//! active recording buffer, the last sealed recording, and the single
//! playback worker handle. The tap adapter funnels every keyboard event
//! into [`Engine::handle`], which classifies it against the hotkey table
//! and applies the transition for the current state:
//!
//! ```text
//! Idle      --Command+R--> Recording --Command+S--> Idle
//! Idle      --Command+P--> Playing   --Command+S--> Idle
//! Playing   --(replay finished)----------------->  Idle
//! ```
//!
//! There is no Recording -> Playing transition. Hotkeys with no defined
//! transition in the current state are ignored (the keystroke is still
//! treated as ordinary input for that state). Ordinary input always passes
//! through to the OS unmodified; while Recording it is also appended to the
//! active buffer.

pub mod hotkeys;
pub mod playback;
pub mod recording;
pub mod state;

use crate::capture::types::{KeyEvent, KeyEventKind};
use crate::capture::EventSink;
use crate::time::timebase::Timestamp;
use hotkeys::{Command, HotkeyMatcher};
use playback::PlaybackHandle;
use recording::Recording;
use state::{AtomicEngineState, EngineState};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The capture/playback engine.
///
/// All mutation funnels through [`Engine::handle`], which the tap adapter
/// calls from the main event loop. The state cell is shared with the
/// playback worker; everything else is owned.
pub struct Engine {
    state: Arc<AtomicEngineState>,
    matcher: HotkeyMatcher,
    /// Mutable buffer while in the Recording state
    active: Option<Recording>,
    /// Last sealed recording, replayable until superseded
    current: Option<Arc<Recording>>,
    playback: Option<PlaybackHandle>,
    sink: Arc<dyn EventSink>,
    pid: i32,
}

impl Engine {
    /// Create an engine injecting through `sink`, guarding feedback against
    /// this process's own pid.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_pid(sink, std::process::id() as i32)
    }

    /// Create an engine with an explicit own-pid for the feedback guard.
    pub fn with_pid(sink: Arc<dyn EventSink>, pid: i32) -> Self {
        Self {
            state: Arc::new(AtomicEngineState::default()),
            matcher: HotkeyMatcher::new(),
            active: None,
            current: None,
            playback: None,
            sink,
            pid,
        }
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.state.load(Ordering::SeqCst)
    }

    /// The last sealed recording, if any.
    pub fn current_recording(&self) -> Option<&Arc<Recording>> {
        self.current.as_ref()
    }

    /// Handle one incoming keyboard event.
    ///
    /// Must stay fast: the caller is the tap callback, and a slow callback
    /// gets the tap disabled by the OS. The only blocking path is the
    /// defined Stop-while-Playing cancellation, which performs a bounded
    /// join. The caller always passes the event through to the OS
    /// afterwards; this method never suppresses input.
    pub fn handle(&mut self, event: &KeyEvent) {
        // Events this process injected must not be re-recorded or
        // re-trigger hotkeys.
        if event.source_pid == self.pid {
            return;
        }

        match event.kind {
            KeyEventKind::Down => self.handle_key_down(event),
            KeyEventKind::Up => {
                // Key-up events are captured while recording and carry no
                // hotkey meaning anywhere else.
                if self.state() == EngineState::Recording {
                    if let Some(recording) = self.active.as_mut() {
                        recording.push(event.clone());
                    }
                }
            }
        }
    }

    fn handle_key_down(&mut self, event: &KeyEvent) {
        let command = self.matcher.classify(event);
        match self.state() {
            EngineState::Idle => match command {
                Some(Command::BeginRecord) => self.begin_recording(event.timestamp),
                Some(Command::Play) => self.play(),
                _ => {}
            },
            EngineState::Recording => match command {
                Some(Command::Stop) => self.end_recording(),
                // Any other key-down is ordinary input for the recording,
                // including redundant BeginRecord/Play chords.
                _ => {
                    if let Some(recording) = self.active.as_mut() {
                        recording.push(event.clone());
                    }
                }
            },
            EngineState::Playing => match command {
                Some(Command::Stop) => self.stop_playback(),
                _ => {}
            },
        }
    }

    fn begin_recording(&mut self, timestamp: Timestamp) {
        tracing::info!(base_ticks = timestamp.ticks(), "recording started");
        self.active = Some(Recording::begin(timestamp));
        self.state.store(EngineState::Recording, Ordering::SeqCst);
    }

    fn end_recording(&mut self) {
        self.state.store(EngineState::Idle, Ordering::SeqCst);
        if let Some(recording) = self.active.take() {
            tracing::info!(events = recording.len(), "recording sealed");
            // Supersedes the previous recording, releasing its events.
            self.current = Some(Arc::new(recording));
        }
    }

    fn play(&mut self) {
        let Some(recording) = self.current.as_ref().cloned() else {
            tracing::debug!("play requested with no recording, ignoring");
            return;
        };
        if recording.is_empty() {
            tracing::debug!("play requested with empty recording, ignoring");
            return;
        }

        // Only one playback worker may exist. Play is only reachable from
        // Idle, so a previous handle is already finished or cancelled;
        // reap it before spawning the next.
        if let Some(handle) = self.playback.take() {
            handle.join();
        }

        tracing::info!(events = recording.len(), "playback starting");
        self.state.store(EngineState::Playing, Ordering::SeqCst);
        match playback::spawn(recording, Arc::clone(&self.sink), Arc::clone(&self.state)) {
            Ok(handle) => self.playback = Some(handle),
            Err(e) => {
                self.state.store(EngineState::Idle, Ordering::SeqCst);
                tracing::error!(error = %e, "failed to start playback");
            }
        }
    }

    fn stop_playback(&mut self) {
        tracing::info!("playback cancelled by operator");
        // Flipping the state away from Playing is the cancellation signal;
        // the join guarantees no events are injected after this returns.
        self.state.store(EngineState::Idle, Ordering::SeqCst);
        if let Some(handle) = self.playback.take() {
            handle.join();
        }
    }

    /// Cancel any in-flight playback and return to Idle. Used at teardown.
    pub fn shutdown(&mut self) {
        self.state.store(EngineState::Idle, Ordering::SeqCst);
        if let Some(handle) = self.playback.take() {
            handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::ModifierFlags;
    use crate::engine::hotkeys::keycodes;
    use crate::time::timebase::Timebase;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    const OWN_PID: i32 = 100;
    const USER_PID: i32 = 200;

    struct CollectingSink {
        posted: Mutex<Vec<u16>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                posted: Mutex::new(Vec::new()),
            })
        }

        fn posted(&self) -> Vec<u16> {
            self.posted.lock().clone()
        }
    }

    impl EventSink for CollectingSink {
        fn post(&self, event: &KeyEvent) {
            self.posted.lock().push(event.key_code);
        }
    }

    fn engine(sink: Arc<CollectingSink>) -> Engine {
        Timebase::init();
        Engine::with_pid(sink, OWN_PID)
    }

    fn key_down(key_code: u16, modifiers: ModifierFlags, ticks: u64) -> KeyEvent {
        KeyEvent::new(
            KeyEventKind::Down,
            key_code,
            modifiers,
            Timestamp::from_ticks(ticks),
            USER_PID,
        )
    }

    fn key_up(key_code: u16, ticks: u64) -> KeyEvent {
        KeyEvent::new(
            KeyEventKind::Up,
            key_code,
            ModifierFlags::default(),
            Timestamp::from_ticks(ticks),
            USER_PID,
        )
    }

    fn hotkey(key_code: u16, ticks: u64) -> KeyEvent {
        key_down(key_code, ModifierFlags::command_only(), ticks)
    }

    fn wait_for_idle(engine: &Engine, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if engine.state() == EngineState::Idle {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_initial_state_is_idle() {
        let engine = engine(CollectingSink::new());
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.current_recording().is_none());
    }

    #[test]
    fn test_begin_record_transition() {
        let mut engine = engine(CollectingSink::new());
        engine.handle(&hotkey(keycodes::ANSI_R, 1000));
        assert_eq!(engine.state(), EngineState::Recording);
    }

    #[test]
    fn test_record_and_seal() {
        let mut engine = engine(CollectingSink::new());

        engine.handle(&hotkey(keycodes::ANSI_R, 1000));
        engine.handle(&key_down(10, ModifierFlags::default(), 1000));
        engine.handle(&key_down(11, ModifierFlags::default(), 1500));
        engine.handle(&key_down(12, ModifierFlags::default(), 2600));
        engine.handle(&hotkey(keycodes::ANSI_S, 2700));

        assert_eq!(engine.state(), EngineState::Idle);
        let recording = engine.current_recording().expect("recording sealed");
        assert_eq!(recording.len(), 3);
        assert_eq!(recording.base_timestamp().ticks(), 1000);
        let ticks: Vec<u64> = recording.iter().map(|e| e.timestamp.ticks()).collect();
        assert_eq!(ticks, vec![1000, 1500, 2600]);
    }

    #[test]
    fn test_key_up_recorded_only_while_recording() {
        let mut engine = engine(CollectingSink::new());

        // Key-up in Idle is dropped.
        engine.handle(&key_up(10, 500));
        assert_eq!(engine.state(), EngineState::Idle);

        engine.handle(&hotkey(keycodes::ANSI_R, 1000));
        engine.handle(&key_down(10, ModifierFlags::default(), 1100));
        engine.handle(&key_up(10, 1200));
        engine.handle(&hotkey(keycodes::ANSI_S, 1300));

        let recording = engine.current_recording().expect("recording sealed");
        assert_eq!(recording.len(), 2);
        let kinds: Vec<KeyEventKind> = recording.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![KeyEventKind::Down, KeyEventKind::Up]);
    }

    #[test]
    fn test_ordinary_events_in_idle_are_not_recorded() {
        let mut engine = engine(CollectingSink::new());
        engine.handle(&key_down(10, ModifierFlags::default(), 1000));
        engine.handle(&key_down(11, ModifierFlags::default(), 1100));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.current_recording().is_none());
    }

    #[test]
    fn test_stop_in_idle_is_noop() {
        let mut engine = engine(CollectingSink::new());
        engine.handle(&hotkey(keycodes::ANSI_S, 1000));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.current_recording().is_none());
    }

    #[test]
    fn test_play_without_recording_is_noop() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());
        engine.handle(&hotkey(keycodes::ANSI_P, 1000));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(sink.posted().is_empty());
    }

    #[test]
    fn test_play_with_empty_recording_is_noop() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());

        engine.handle(&hotkey(keycodes::ANSI_R, 1000));
        engine.handle(&hotkey(keycodes::ANSI_S, 1100));
        assert!(engine.current_recording().is_some());

        engine.handle(&hotkey(keycodes::ANSI_P, 1200));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(sink.posted().is_empty());
    }

    #[test]
    fn test_redundant_begin_record_keeps_recording() {
        let mut engine = engine(CollectingSink::new());

        engine.handle(&hotkey(keycodes::ANSI_R, 1000));
        engine.handle(&key_down(10, ModifierFlags::default(), 1100));
        // Redundant chord: state unchanged, keystroke treated as input.
        engine.handle(&hotkey(keycodes::ANSI_R, 1200));
        assert_eq!(engine.state(), EngineState::Recording);
        engine.handle(&key_down(11, ModifierFlags::default(), 1300));
        engine.handle(&hotkey(keycodes::ANSI_S, 1400));

        let recording = engine.current_recording().expect("recording sealed");
        let codes: Vec<u16> = recording.iter().map(|e| e.key_code).collect();
        assert_eq!(codes, vec![10, keycodes::ANSI_R, 11]);
        assert_eq!(recording.base_timestamp().ticks(), 1000);
    }

    #[test]
    fn test_feedback_guard_blocks_own_events() {
        let mut engine = engine(CollectingSink::new());

        // A hotkey-shaped event from our own pid must not transition.
        let own_hotkey = KeyEvent::new(
            KeyEventKind::Down,
            keycodes::ANSI_R,
            ModifierFlags::command_only(),
            Timestamp::from_ticks(1000),
            OWN_PID,
        );
        engine.handle(&own_hotkey);
        assert_eq!(engine.state(), EngineState::Idle);

        // An ordinary own-pid event must not be recorded.
        engine.handle(&hotkey(keycodes::ANSI_R, 2000));
        let own_key = KeyEvent::new(
            KeyEventKind::Down,
            10,
            ModifierFlags::default(),
            Timestamp::from_ticks(2100),
            OWN_PID,
        );
        engine.handle(&own_key);
        engine.handle(&hotkey(keycodes::ANSI_S, 2200));

        let recording = engine.current_recording().expect("recording sealed");
        assert!(recording.is_empty());
    }

    #[test]
    fn test_exact_modifier_match_required() {
        let mut engine = engine(CollectingSink::new());
        let command_shift = ModifierFlags {
            command: true,
            shift: true,
            ..Default::default()
        };
        engine.handle(&key_down(keycodes::ANSI_R, command_shift, 1000));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_playback_runs_to_completion() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());

        let base = Timebase::now_ticks();
        let step = Timebase::nanos_to_ticks(10_000_000); // 10ms
        engine.handle(&hotkey(keycodes::ANSI_R, base));
        engine.handle(&key_down(10, ModifierFlags::default(), base + step));
        engine.handle(&key_down(11, ModifierFlags::default(), base + 2 * step));
        engine.handle(&hotkey(keycodes::ANSI_S, base + 3 * step));

        engine.handle(&hotkey(keycodes::ANSI_P, base + 4 * step));
        assert_eq!(engine.state(), EngineState::Playing);

        assert!(wait_for_idle(&engine, Duration::from_secs(2)));
        assert_eq!(sink.posted(), vec![10, 11]);
    }

    #[test]
    fn test_stop_cancels_playback() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());

        let base = Timebase::now_ticks();
        let far = Timebase::nanos_to_ticks(500_000_000); // 500ms out
        engine.handle(&hotkey(keycodes::ANSI_R, base));
        engine.handle(&key_down(10, ModifierFlags::default(), base + far));
        engine.handle(&hotkey(keycodes::ANSI_S, base + far));

        engine.handle(&hotkey(keycodes::ANSI_P, base + far));
        assert_eq!(engine.state(), EngineState::Playing);

        engine.handle(&hotkey(keycodes::ANSI_S, base + far));
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(sink.posted().is_empty());
    }

    #[test]
    fn test_hotkeys_ignored_while_playing() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());

        let base = Timebase::now_ticks();
        let far = Timebase::nanos_to_ticks(2_000_000_000);
        engine.handle(&hotkey(keycodes::ANSI_R, base));
        engine.handle(&key_down(10, ModifierFlags::default(), base + far));
        engine.handle(&hotkey(keycodes::ANSI_S, base + far));
        engine.handle(&hotkey(keycodes::ANSI_P, base + far));
        assert_eq!(engine.state(), EngineState::Playing);

        // BeginRecord and Play have no transition while Playing.
        engine.handle(&hotkey(keycodes::ANSI_R, base + far));
        assert_eq!(engine.state(), EngineState::Playing);
        engine.handle(&hotkey(keycodes::ANSI_P, base + far));
        assert_eq!(engine.state(), EngineState::Playing);

        // Ordinary input passes through without being captured anywhere.
        engine.handle(&key_down(42, ModifierFlags::default(), base + far));
        assert_eq!(engine.current_recording().map(|r| r.len()), Some(1));

        engine.handle(&hotkey(keycodes::ANSI_S, base + far));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_new_recording_supersedes_old() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());

        let base = Timebase::now_ticks();
        let step = Timebase::nanos_to_ticks(5_000_000);

        engine.handle(&hotkey(keycodes::ANSI_R, base));
        engine.handle(&key_down(10, ModifierFlags::default(), base + step));
        engine.handle(&hotkey(keycodes::ANSI_S, base + step));

        engine.handle(&hotkey(keycodes::ANSI_R, base + 2 * step));
        engine.handle(&key_down(20, ModifierFlags::default(), base + 3 * step));
        engine.handle(&key_down(21, ModifierFlags::default(), base + 4 * step));
        engine.handle(&hotkey(keycodes::ANSI_S, base + 4 * step));

        engine.handle(&hotkey(keycodes::ANSI_P, base + 5 * step));
        assert!(wait_for_idle(&engine, Duration::from_secs(2)));

        assert_eq!(sink.posted(), vec![20, 21]);
    }

    #[test]
    fn test_play_after_completed_playback_replays_again() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());

        let base = Timebase::now_ticks();
        let step = Timebase::nanos_to_ticks(5_000_000);
        engine.handle(&hotkey(keycodes::ANSI_R, base));
        engine.handle(&key_down(10, ModifierFlags::default(), base + step));
        engine.handle(&hotkey(keycodes::ANSI_S, base + step));

        engine.handle(&hotkey(keycodes::ANSI_P, base + 2 * step));
        assert!(wait_for_idle(&engine, Duration::from_secs(2)));
        engine.handle(&hotkey(keycodes::ANSI_P, base + 3 * step));
        assert!(wait_for_idle(&engine, Duration::from_secs(2)));

        assert_eq!(sink.posted(), vec![10, 10]);
    }

    #[test]
    fn test_shutdown_cancels_playback() {
        let sink = CollectingSink::new();
        let mut engine = engine(sink.clone());

        let base = Timebase::now_ticks();
        let far = Timebase::nanos_to_ticks(500_000_000);
        engine.handle(&hotkey(keycodes::ANSI_R, base));
        engine.handle(&key_down(10, ModifierFlags::default(), base + far));
        engine.handle(&hotkey(keycodes::ANSI_S, base + far));
        engine.handle(&hotkey(keycodes::ANSI_P, base + far));
        assert_eq!(engine.state(), EngineState::Playing);

        engine.shutdown();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(sink.posted().is_empty());
    }

    #[test]
    fn test_no_direct_recording_to_playing_transition() {
        let mut engine = engine(CollectingSink::new());

        let base = Timebase::now_ticks();
        engine.handle(&hotkey(keycodes::ANSI_R, base));
        assert_eq!(engine.state(), EngineState::Recording);

        // Play while Recording is ordinary input, not a transition.
        engine.handle(&hotkey(keycodes::ANSI_P, base + 1));
        assert_eq!(engine.state(), EngineState::Recording);

        engine.handle(&hotkey(keycodes::ANSI_S, base + 2));
        assert_eq!(engine.state(), EngineState::Idle);
    }
}
