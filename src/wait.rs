//! Wait/Poll Utility
//!
//! Bridges event-driven hardware callbacks into sequential operations:
//! callbacks mutate shared state from their own execution context, and
//! open/read logic polls that state here until a condition holds or the
//! timeout elapses.

use std::time::{Duration, Instant};

/// Repeatedly evaluate `condition` until it returns true or `timeout`
/// elapses, sleeping `interval` between polls so the calling task never
/// busy-spins. The condition is checked once before the first sleep.
///
/// Returns true on success, false on timeout. Callers decide what a
/// timeout means (cleanup plus a typed error).
pub async fn wait_for<F>(mut condition: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
