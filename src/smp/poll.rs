//! Bounded-wait primitive.
//!
//! Every wait in this subsystem is a polling loop with a deadline; none may
//! block indefinitely. This is the single place that owns the timing logic.

use super::platform::Clock;

/// Poll `pred` until it holds or `timeout_us` elapses. Returns whether the
/// predicate held. The predicate is evaluated one final time after the
/// deadline so a success that lands exactly on it is not misreported.
pub fn poll_until(clock: &dyn Clock, timeout_us: u64, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = clock.now_us().saturating_add(timeout_us);
    loop {
        if pred() {
            return true;
        }
        if clock.now_us() >= deadline {
            return pred();
        }
        clock.relax();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
