//! # Tick Arithmetic
//!
//! The kernel's clock is a free-running 32-bit tick counter. Absolute
//! instants (`delay_until`, timer expiry) are stored modulo 2^32 and
//! compared through the signed difference, so all timing logic stays
//! correct across the counter wrap as long as no single interval exceeds
//! 2^31 ticks.

/// System tick counter type. One unit is one period of the tick interrupt.
pub type Tick = u32;

/// Returns true if instant `a` lies strictly before instant `b`.
#[inline]
pub(crate) fn tick_before(a: Tick, b: Tick) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Returns true once `now` has reached (or passed) `deadline`.
#[inline]
pub(crate) fn tick_reached(now: Tick, deadline: Tick) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// Converts milliseconds to ticks, rounding down but never below one tick
/// for a nonzero request.
pub fn ms_to_ticks(ms: u32) -> Tick {
    let ticks = ms / crate::config::TICK_PERIOD_MS;
    if ticks == 0 && ms > 0 {
        1
    } else {
        ticks
    }
}
