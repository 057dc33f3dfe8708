//! Playback scheduler
//!
//! Replays a sealed recording on a dedicated worker thread, reconstructing
//! the original inter-event spacing and injecting each event through the
//! sink. The engine state doubles as the cancellation signal: the worker
//! checks it before every event and every sleep slice, and a canceller that
//! flips the state away from Playing owns the resulting transition.
//!
//! Waits use a sample/sleep/recompute loop rather than one blocking sleep.
//! OS sleep granularity is coarse; re-sampling the clock after every slice
//! and shrinking the remaining wait keeps drift from accumulating across
//! hundreds of events.

use crate::capture::EventSink;
use crate::engine::state::{AtomicEngineState, EngineState};
use crate::engine::recording::Recording;
use crate::time::timebase::Timebase;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Fraction of the remaining delay slept per correction-loop iteration.
/// Smaller values re-sample the clock more often and track the original
/// spacing more tightly at the cost of extra wakeups.
const SLEEP_SLICE_RATIO: f32 = 0.5;

/// Floor for a single sleep slice. Below scheduler granularity there is
/// nothing to gain from shorter naps.
const MIN_SLICE_SECS: f32 = 0.000_1;

/// Ceiling for a single sleep slice. Bounds how long a cancellation can go
/// unobserved during a long inter-event gap.
const MAX_SLICE_SECS: f32 = 0.02;

/// How long a cancelling join waits for the worker to exit before giving
/// up and detaching it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a running playback worker.
pub struct PlaybackHandle {
    thread: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

impl PlaybackHandle {
    /// Wait for the worker to exit, bounded by [`JOIN_TIMEOUT`].
    ///
    /// The worker drops its side of the channel on exit; once that is
    /// observed the thread join itself cannot block. On timeout the worker
    /// is detached with a warning rather than blocking the event loop
    /// indefinitely.
    pub(crate) fn join(self) {
        match self.done.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = self.thread.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = JOIN_TIMEOUT.as_millis() as u64,
                    "playback worker did not stop in time, detaching"
                );
            }
        }
    }
}

/// Spawn the playback worker over a sealed recording.
///
/// The worker injects every event in order with the original spacing, then
/// transitions the engine to Idle. The caller keeps the handle so a Stop
/// can cancel and join.
///
/// # Errors
/// Returns an error if the worker thread cannot be spawned.
pub(crate) fn spawn(
    recording: Arc<Recording>,
    sink: Arc<dyn EventSink>,
    state: Arc<AtomicEngineState>,
) -> crate::Result<PlaybackHandle> {
    let (done_tx, done_rx) = mpsc::channel();

    let thread = thread::Builder::new()
        .name("playback".into())
        .spawn(move || {
            // Dropped on every exit path, which signals the bounded join.
            let _done = done_tx;
            replay(&recording, sink.as_ref(), &state);
        })
        .map_err(|e| crate::Error::Playback(format!("failed to spawn playback worker: {e}")))?;

    Ok(PlaybackHandle {
        thread,
        done: done_rx,
    })
}

fn replay(recording: &Recording, sink: &dyn EventSink, state: &AtomicEngineState) {
    tracing::debug!(events = recording.len(), "playback started");

    let mut last = recording.base_timestamp();
    for event in recording.iter() {
        if state.load(Ordering::SeqCst) != EngineState::Playing {
            tracing::debug!("playback cancelled");
            return;
        }

        let mut wait = event.timestamp.seconds_since(last);
        while wait > 0.0 {
            if state.load(Ordering::SeqCst) != EngineState::Playing {
                tracing::debug!("playback cancelled during wait");
                return;
            }
            let sampled = Timebase::now_ticks();
            let slice = (wait * SLEEP_SLICE_RATIO).clamp(MIN_SLICE_SECS, MAX_SLICE_SECS);
            thread::sleep(Duration::from_secs_f32(slice));
            wait -= Timebase::elapsed_seconds(sampled, Timebase::now_ticks());
        }

        sink.post(event);
        last = event.timestamp;
    }

    // A cancel that won the race already owns the state transition.
    match state.compare_exchange(
        EngineState::Playing,
        EngineState::Idle,
        Ordering::SeqCst,
        Ordering::SeqCst,
    ) {
        Ok(_) => tracing::debug!(events = recording.len(), "playback complete"),
        Err(_) => tracing::debug!("playback finished after cancellation"),
    }
}
