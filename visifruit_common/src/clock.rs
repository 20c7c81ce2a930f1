//! Monotonic process clock.
//!
//! Every timestamp in the engine (frame capture, fire-at, creation) is a
//! [`TimestampUs`]: microseconds since the first call into this module.
//! Wall-clock time is never used for scheduling.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// Microseconds on the process monotonic clock.
pub type TimestampUs = u64;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Current monotonic timestamp.
#[inline]
pub fn now_us() -> TimestampUs {
    EPOCH.elapsed().as_micros() as TimestampUs
}

/// Convert a millisecond quantity to whole microseconds (rounded).
#[inline]
pub fn ms_to_us(ms: f64) -> u64 {
    (ms * 1_000.0).round().max(0.0) as u64
}

/// Convert seconds to whole microseconds (rounded).
#[inline]
pub fn secs_to_us(secs: f64) -> u64 {
    (secs * 1_000_000.0).round().max(0.0) as u64
}

/// Duration as fractional milliseconds.
#[inline]
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(ms_to_us(1.5), 1_500);
        assert_eq!(secs_to_us(4.0), 4_000_000);
        assert_eq!(ms_to_us(-3.0), 0);
        assert!((duration_ms(Duration::from_micros(2_500)) - 2.5).abs() < 1e-9);
    }
}
