//! Reconnect delays: exponential growth, capped, with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retrying after failed attempt number `attempt` (1-based).
///
/// Doubles from `base` up to `max`, then picks uniformly from the upper half
/// of that window so many clients don't retry in lockstep.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let ceiling = base
        .checked_mul(1u32 << exp)
        .unwrap_or(max)
        .min(max);

    let ceiling_ms = ceiling.as_millis() as u64;
    if ceiling_ms < 2 {
        return ceiling;
    }
    let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
    Duration::from_millis(jittered)
}
