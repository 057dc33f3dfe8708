//! Monotonic timebase
//!
//! On macOS this wraps `mach_absolute_time`, the only reliable monotonic
//! high-resolution source that is consistent across Apple Silicon and
//! Intel. Tick-to-nanosecond conversion goes through the factors reported
//! by `mach_timebase_info`, which vary by hardware, so they are sampled at
//! runtime and cached.
//!
//! On other targets a process-local `Instant` epoch stands in with a 1:1
//! conversion factor. The engine and its tests only ever deal in raw ticks,
//! so they build and run unchanged on any platform.

use std::sync::OnceLock;

/// Cached tick-to-nanosecond conversion factors
#[derive(Debug, Clone, Copy)]
struct TimebaseInfo {
    numer: u32,
    denom: u32,
}

static TIMEBASE_INFO: OnceLock<TimebaseInfo> = OnceLock::new();

#[cfg(not(target_os = "macos"))]
static EPOCH: OnceLock<std::time::Instant> = OnceLock::new();

/// Monotonic high-resolution time source.
///
/// Provides:
/// - Raw tick sampling with zero conversion overhead in the hot path
/// - Monotonic guarantees (time never goes backward)
/// - Hardware-correct tick-to-nanosecond conversion
#[derive(Debug, Clone, Copy)]
pub struct Timebase;

impl Timebase {
    /// Warm the conversion-factor cache. Called once at startup; every
    /// accessor also initializes lazily, so this is a latency optimization
    /// rather than a requirement.
    pub fn init() {
        let _ = Self::info();
        #[cfg(not(target_os = "macos"))]
        {
            let _ = EPOCH.get_or_init(std::time::Instant::now);
        }
    }

    fn info() -> TimebaseInfo {
        *TIMEBASE_INFO.get_or_init(|| {
            #[cfg(target_os = "macos")]
            {
                let mut info = mach2::mach_time::mach_timebase_info_data_t {
                    numer: 0,
                    denom: 0,
                };
                // Safety: mach_timebase_info is always safe to call
                unsafe {
                    mach2::mach_time::mach_timebase_info(&mut info);
                }
                TimebaseInfo {
                    numer: info.numer,
                    denom: info.denom,
                }
            }
            #[cfg(not(target_os = "macos"))]
            {
                TimebaseInfo { numer: 1, denom: 1 }
            }
        })
    }

    /// Current monotonic tick count. Raw hardware counter value on macOS.
    #[inline]
    pub fn now_ticks() -> u64 {
        #[cfg(target_os = "macos")]
        {
            // Safety: mach_absolute_time is always safe to call
            unsafe { mach2::mach_time::mach_absolute_time() }
        }
        #[cfg(not(target_os = "macos"))]
        {
            EPOCH
                .get_or_init(std::time::Instant::now)
                .elapsed()
                .as_nanos() as u64
        }
    }

    /// Convert raw ticks to nanoseconds.
    ///
    /// On Apple Silicon numer/denom is typically 1/1 (ticks == nanos); on
    /// Intel it varies with CPU frequency. u128 intermediate math prevents
    /// overflow on large tick counts.
    #[inline]
    pub fn ticks_to_nanos(ticks: u64) -> u64 {
        let info = Self::info();
        ((ticks as u128 * info.numer as u128) / info.denom as u128) as u64
    }

    /// Convert nanoseconds to raw ticks (inverse of [`Self::ticks_to_nanos`]).
    #[inline]
    pub fn nanos_to_ticks(nanos: u64) -> u64 {
        let info = Self::info();
        ((nanos as u128 * info.denom as u128) / info.numer as u128) as u64
    }

    /// Elapsed time between two tick values in nanoseconds.
    /// Returns 0 if end < start.
    #[inline]
    pub fn elapsed_nanos(start_ticks: u64, end_ticks: u64) -> u64 {
        if end_ticks >= start_ticks {
            Self::ticks_to_nanos(end_ticks - start_ticks)
        } else {
            0
        }
    }

    /// Elapsed time between two tick values in seconds.
    #[inline]
    pub fn elapsed_seconds(start_ticks: u64, end_ticks: u64) -> f32 {
        Self::elapsed_nanos(start_ticks, end_ticks) as f32 / 1_000_000_000.0
    }
}

/// A timestamp holding raw monotonic ticks. Conversion to human-readable
/// units is deferred until needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from raw ticks.
    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Capture the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self(Timebase::now_ticks())
    }

    /// Raw tick value.
    #[inline]
    pub const fn ticks(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to this timestamp (0 when earlier
    /// is actually later).
    #[inline]
    pub fn seconds_since(&self, earlier: Timestamp) -> f32 {
        Timebase::elapsed_seconds(earlier.0, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonicity() {
        Timebase::init();
        let t1 = Timebase::now_ticks();
        for _ in 0..1000 {
            std::hint::black_box(0);
        }
        let t2 = Timebase::now_ticks();
        assert!(t2 >= t1, "timestamps must be monotonic");
    }

    #[test]
    fn test_elapsed_saturates_on_wraparound() {
        Timebase::init();
        assert_eq!(Timebase::elapsed_nanos(1000, 500), 0);
        assert_eq!(Timebase::elapsed_seconds(1000, 500), 0.0);
    }

    #[test]
    fn test_conversion_round_trip() {
        Timebase::init();
        let nanos = 1_500_000_000u64;
        let ticks = Timebase::nanos_to_ticks(nanos);
        let back = Timebase::ticks_to_nanos(ticks);
        // Integer division may shave at most one tick's worth of nanos.
        assert!(nanos.abs_diff(back) < 1_000, "expected ~{nanos}, got {back}");
    }

    #[test]
    fn test_elapsed_seconds_tracks_sleep() {
        Timebase::init();
        let start = Timebase::now_ticks();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let end = Timebase::now_ticks();

        let secs = Timebase::elapsed_seconds(start, end);
        assert!(secs >= 0.02, "expected at least 20ms, got {secs}s");
        assert!(secs < 1.0, "expected well under a second, got {secs}s");
    }

    #[test]
    fn test_timestamp_ordering() {
        let t1 = Timestamp::from_ticks(1000);
        let t2 = Timestamp::from_ticks(2000);
        let t3 = Timestamp::from_ticks(1000);

        assert!(t1 < t2);
        assert_eq!(t1, t3);
        assert_eq!(t2.ticks(), 2000);
    }

    #[test]
    fn test_timestamp_seconds_since() {
        Timebase::init();
        let base = Timestamp::from_ticks(0);
        let later = Timestamp::from_ticks(Timebase::nanos_to_ticks(500_000_000));
        let secs = later.seconds_since(base);
        assert!((secs - 0.5).abs() < 0.001, "expected ~0.5s, got {secs}");

        // Reversed order saturates to zero.
        assert_eq!(base.seconds_since(later), 0.0);
    }

    #[test]
    fn test_timestamp_now_advances() {
        Timebase::init();
        let t1 = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_micros(100));
        let t2 = Timestamp::now();
        assert!(t2 > t1);
    }
}
