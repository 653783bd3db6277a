//! Reconnect delay calculation.
//!
//! `delay = min(base * 2^attempt, max)`, then a uniform random addition of up
//! to `jitter_ratio * delay`. The jittered value never exceeds
//! `max * (1 + jitter_ratio)`.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Capped exponential delay for a zero-based `attempt`, without jitter.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Add `delay * ratio * random` to `delay`.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG; it is clamped so a
/// bad source can never push the result past `delay * (1 + ratio)`.
#[must_use]
pub fn with_jitter(delay: Duration, ratio: f64, random: f64) -> Duration {
    let scale = ratio.clamp(0.0, 1.0) * random.clamp(0.0, 1.0);
    delay + delay.mul_f64(scale)
}

/// Jittered delay for `attempt` under `config`.
pub fn reconnect_delay<R: Rng + ?Sized>(attempt: u32, config: &ReconnectConfig, rng: &mut R) -> Duration {
    let base = backoff_delay(attempt, config.reconnect_delay, config.max_reconnect_delay);
    with_jitter(base, config.jitter_ratio, rng.random_range(0.0..1.0))
}
