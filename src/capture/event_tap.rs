//! Quartz Event Tap adapter
//!
//! Installs a CGEventTap over keyboard-down/up events at the HID tap point
//! and forwards each decoded event to the engine. The callback runs on the
//! main run loop and must return quickly; a slow callback gets the tap
//! disabled by the OS. When the OS does disable the tap (timeout or
//! user-input heuristics) the callback observes the disable notification
//! and re-enables the tap synchronously.
//!
//! # Permissions
//!
//! Requires Accessibility permissions in System Settings > Privacy &
//! Security > Accessibility. Without them tap creation fails and the
//! process cannot operate.

use crate::capture::types::{KeyEvent, KeyEventKind, ModifierFlags, RetainedEvent};
use crate::capture::EventSink;
use crate::engine::Engine;
use crate::time::timebase::Timestamp;
use core_foundation::base::{CFRelease, CFTypeRef, TCFType};
use core_foundation::runloop::kCFRunLoopCommonModes;
use parking_lot::Mutex;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use tracing::{debug, error, info};

// Core Graphics event types
type CGEventRef = CFTypeRef;
type CGEventTapProxy = *const c_void;
type CGEventMask = u64;

// CGEventTap location
#[repr(u32)]
#[derive(Copy, Clone)]
#[allow(dead_code, clippy::enum_variant_names)]
enum CGEventTapLocation {
    HidEventTap = 0,
    SessionEventTap = 1,
    AnnotatedSessionEventTap = 2,
}

// CGEventTap placement
#[repr(u32)]
#[derive(Copy, Clone)]
#[allow(dead_code, clippy::enum_variant_names)]
enum CGEventTapPlacement {
    HeadInsertEventTap = 0,
    TailAppendEventTap = 1,
}

// CGEventTap options
#[repr(u32)]
#[derive(Copy, Clone)]
#[allow(dead_code)]
enum CGEventTapOptions {
    DefaultTap = 0,
    ListenOnly = 1,
}

// macOS CoreGraphics event constants
mod cg_constants {
    // CGEventType values
    pub const CG_EVENT_KEY_DOWN: u32 = 10;
    pub const CG_EVENT_KEY_UP: u32 = 11;
    pub const CG_EVENT_TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFF_FFFE;
    pub const CG_EVENT_TAP_DISABLED_BY_USER_INPUT: u32 = 0xFFFF_FFFF;

    // CGEventField values for querying event data
    pub const CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;
    pub const CG_EVENT_SOURCE_UNIX_PROCESS_ID: u32 = 41;
}
use cg_constants::*;

/// Event mask covering the keyboard events we intercept
fn key_event_mask() -> CGEventMask {
    (1 << CG_EVENT_KEY_DOWN) | (1 << CG_EVENT_KEY_UP)
}

// FFI declarations for Core Graphics
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: CGEventTapLocation,
        place: CGEventTapPlacement,
        options: CGEventTapOptions,
        events_of_interest: CGEventMask,
        callback: extern "C" fn(CGEventTapProxy, u32, CGEventRef, *mut c_void) -> CGEventRef,
        user_info: *mut c_void,
    ) -> CFTypeRef;

    fn CGEventTapEnable(tap: CFTypeRef, enable: bool);
    fn CGEventTapIsEnabled(tap: CFTypeRef) -> bool;

    fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
    fn CGEventGetFlags(event: CGEventRef) -> u64;
    fn CGEventGetTimestamp(event: CGEventRef) -> u64;

    fn CGEventPost(tap_location: u32, event: CGEventRef);
    fn CGEventCreateKeyboardEvent(source: CFTypeRef, keycode: u16, keydown: bool) -> CGEventRef;
    fn CGEventSetFlags(event: CGEventRef, flags: u64);

    fn CGSetLocalEventsSuppressionInterval(seconds: f64) -> i32;
    fn CGEnableEventStateCombining(combine: bool) -> i32;
}

// FFI declarations for Core Foundation
#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFMachPortCreateRunLoopSource(
        allocator: CFTypeRef,
        port: CFTypeRef,
        order: i64,
    ) -> CFTypeRef;
    fn CFMachPortInvalidate(port: CFTypeRef);

    fn CFRunLoopGetMain() -> CFTypeRef;
    fn CFRunLoopAddSource(rl: CFTypeRef, source: CFTypeRef, mode: CFTypeRef);
    fn CFRunLoopRemoveSource(rl: CFTypeRef, source: CFTypeRef, mode: CFTypeRef);
    fn CFRunLoopRun();
    fn CFRunLoopStop(rl: CFTypeRef);
}

// FFI declarations for Accessibility
extern "C" {
    fn AXIsProcessTrusted() -> bool;
    fn AXIsProcessTrustedWithOptions(options: CFTypeRef) -> bool;
}

/// Context handed to the tap callback.
///
/// The engine sits behind a mutex so the callback thread is the only
/// mutator; the lock is uncontended in steady state. The port pointer is
/// kept here so the callback can re-enable the tap after an OS-initiated
/// disable without reaching back into the owning struct.
struct TapContext {
    engine: Mutex<Engine>,
    port: AtomicPtr<c_void>,
}

/// The tap callback, invoked once per matching event on the main run loop.
extern "C" fn key_handler(
    _proxy: CGEventTapProxy,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    if user_info.is_null() {
        return event;
    }
    // Safety: user_info is the TapContext box installed by begin(), alive
    // until end() invalidates the port.
    let context = unsafe { &*(user_info as *const TapContext) };

    match event_type {
        CG_EVENT_TAP_DISABLED_BY_TIMEOUT | CG_EVENT_TAP_DISABLED_BY_USER_INPUT => {
            let port = context.port.load(Ordering::SeqCst);
            if !port.is_null() {
                debug!("event tap disabled by the OS, re-enabling");
                // Safety: port is the live tap mach port
                unsafe { CGEventTapEnable(port as CFTypeRef, true) };
            }
        }
        CG_EVENT_KEY_DOWN | CG_EVENT_KEY_UP => {
            let kind = if event_type == CG_EVENT_KEY_DOWN {
                KeyEventKind::Down
            } else {
                KeyEventKind::Up
            };
            // Safety: event is a valid CGEventRef for the duration of the
            // callback; the retained handle keeps it alive beyond it.
            let key_event = unsafe {
                let key_code =
                    CGEventGetIntegerValueField(event, CG_KEYBOARD_EVENT_KEYCODE) as u16;
                let modifiers = ModifierFlags::from_cg_flags(CGEventGetFlags(event));
                let timestamp = Timestamp::from_ticks(CGEventGetTimestamp(event));
                let source_pid =
                    CGEventGetIntegerValueField(event, CG_EVENT_SOURCE_UNIX_PROCESS_ID) as i32;

                KeyEvent::new(kind, key_code, modifiers, timestamp, source_pid)
                    .with_raw(RetainedEvent::from_borrowed(event))
            };
            context.engine.lock().handle(&key_event);
        }
        _ => {}
    }

    // Always hand the event back unmodified; hotkeys are not suppressed.
    event
}

/// Quartz event tap over system-wide keyboard events.
pub struct EventTap {
    port: CFTypeRef,
    runloop_source: CFTypeRef,
    context: Option<Box<TapContext>>,
}

impl EventTap {
    /// Install the tap and wire its run-loop source into the main run
    /// loop. The engine is consumed; the callback owns it from here on.
    ///
    /// # Errors
    /// Fails when the accessibility permission is missing (the system
    /// prompt is requested once), when tap creation is rejected, or when
    /// the created tap is not enabled.
    pub fn begin(engine: Engine) -> crate::Result<Self> {
        if !is_trusted() {
            request_trust();
            return Err(crate::Error::Tap(
                "accessibility permission not granted; enable it in System Settings > Privacy & Security > Accessibility".into(),
            ));
        }

        let context = Box::new(TapContext {
            engine: Mutex::new(engine),
            port: AtomicPtr::new(ptr::null_mut()),
        });
        let context_ptr = Box::into_raw(context);

        // Safety: callback and context stay alive until end() tears the
        // tap down; on every failure path the box is reclaimed here.
        let port = unsafe {
            CGEventTapCreate(
                CGEventTapLocation::HidEventTap,
                CGEventTapPlacement::HeadInsertEventTap,
                CGEventTapOptions::DefaultTap,
                key_event_mask(),
                key_handler,
                context_ptr as *mut c_void,
            )
        };
        if port.is_null() {
            unsafe { drop(Box::from_raw(context_ptr)) };
            return Err(crate::Error::Tap(
                "failed to create event tap; check accessibility permissions".into(),
            ));
        }
        if !unsafe { CGEventTapIsEnabled(port) } {
            unsafe {
                CFMachPortInvalidate(port);
                CFRelease(port);
                drop(Box::from_raw(context_ptr));
            }
            return Err(crate::Error::Tap("event tap created but not enabled".into()));
        }

        let runloop_source = unsafe { CFMachPortCreateRunLoopSource(ptr::null(), port, 0) };
        if runloop_source.is_null() {
            unsafe {
                CFMachPortInvalidate(port);
                CFRelease(port);
                drop(Box::from_raw(context_ptr));
            }
            return Err(crate::Error::Tap("failed to create run loop source".into()));
        }

        unsafe {
            CFRunLoopAddSource(
                CFRunLoopGetMain(),
                runloop_source,
                kCFRunLoopCommonModes as CFTypeRef,
            );
            // Injected playback must reach the stream with original
            // fidelity: no local suppression window, no state combining.
            let _ = CGSetLocalEventsSuppressionInterval(0.0);
            let _ = CGEnableEventStateCombining(false);
        }

        // Safety: reclaim ownership of the box; its heap address is stable,
        // so the pointer handed to the callback stays valid.
        let context = unsafe { Box::from_raw(context_ptr) };
        context.port.store(port as *mut c_void, Ordering::SeqCst);

        info!("event tap installed");
        Ok(Self {
            port,
            runloop_source,
            context: Some(context),
        })
    }

    /// Run the main run loop until [`EventTap::stop_main_loop`] is called.
    pub fn run(&self) {
        info!("event loop running");
        // Safety: CFRunLoopRun is always safe to call
        unsafe { CFRunLoopRun() };
    }

    /// Stop the main run loop. Safe to call from any thread (used by the
    /// signal handler).
    pub fn stop_main_loop() {
        // Safety: CFRunLoopStop on the main run loop is thread-safe
        unsafe { CFRunLoopStop(CFRunLoopGetMain()) };
    }

    /// Tear the tap down. Idempotent; also cancels in-flight playback.
    pub fn end(&mut self) {
        if self.port.is_null() {
            return;
        }

        // Safety: port and source are the live handles created in begin()
        unsafe {
            CGEventTapEnable(self.port, false);
            CFMachPortInvalidate(self.port);
            CFRunLoopRemoveSource(
                CFRunLoopGetMain(),
                self.runloop_source,
                kCFRunLoopCommonModes as CFTypeRef,
            );
            CFRelease(self.runloop_source);
            CFRelease(self.port);
        }
        self.port = ptr::null();
        self.runloop_source = ptr::null();

        // The port is invalidated, so the callback can no longer fire and
        // the context can be dropped after stopping playback.
        if let Some(context) = self.context.take() {
            context.engine.lock().shutdown();
        }

        info!("event tap removed");
    }
}

impl Drop for EventTap {
    fn drop(&mut self) {
        self.end();
    }
}

/// Injects events into the system input stream at the HID tap point.
///
/// Posted events carry this process's pid as their source, which is what
/// lets the engine filter its own playback out of the capture stream.
pub struct HidEventSink;

impl EventSink for HidEventSink {
    fn post(&self, event: &KeyEvent) {
        match event.raw() {
            Some(raw) => {
                // Safety: raw is a valid retained CGEvent
                unsafe { CGEventPost(CGEventTapLocation::HidEventTap as u32, raw.as_ptr()) };
            }
            None => {
                // No retained platform event; synthesize one from the
                // decoded fields.
                // Safety: created event is released after posting
                unsafe {
                    let synthetic = CGEventCreateKeyboardEvent(
                        ptr::null(),
                        event.key_code,
                        event.kind.is_down(),
                    );
                    if synthetic.is_null() {
                        error!("failed to synthesize keyboard event");
                        return;
                    }
                    CGEventSetFlags(synthetic, event.modifiers.to_cg_flags());
                    CGEventPost(CGEventTapLocation::HidEventTap as u32, synthetic);
                    CFRelease(synthetic);
                }
            }
        }
    }
}

/// Check if accessibility permissions are granted
pub fn is_trusted() -> bool {
    // Safety: AXIsProcessTrusted is always safe to call
    unsafe { AXIsProcessTrusted() }
}

/// Request accessibility permissions (shows the system dialog)
pub fn request_trust() -> bool {
    use core_foundation::boolean::CFBoolean;
    use core_foundation::dictionary::CFDictionary;
    use core_foundation::string::CFString;

    let key = CFString::new("AXTrustedCheckOptionPrompt");
    let value = CFBoolean::true_value();
    let options = CFDictionary::from_CFType_pairs(&[(key.as_CFType(), value.as_CFType())]);

    // Safety: options is a valid CFDictionary for the duration of the call
    unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef() as CFTypeRef) }
}
