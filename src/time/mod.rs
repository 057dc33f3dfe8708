//! Monotonic timing module
//!
//! Raw hardware ticks are stored everywhere and converted lazily, so the
//! capture path never pays for unit conversion.

pub mod timebase;

pub use timebase::{Timebase, Timestamp};
