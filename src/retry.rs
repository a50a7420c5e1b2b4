//! Exponential backoff with jitter, shared by every retry loop in the
//! system: organize-service LLM retries (§4.G), entity-publisher CAS
//! retries (§4.I), and batch-processor callback retries (§4.J).
//!
//! All three reuse the same shape (full-jitter exponential backoff up to a
//! capped delay) rather than hand-rolling their own, so operators see one
//! consistent retry rhythm in the logs regardless of which subsystem is
//! retrying.

use std::time::Duration;

use rand::Rng;

const BASE_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 5_000;

/// Delay before attempt number `attempt` (0-indexed: the delay before the
/// *second* call, since the first call never waits). Full jitter: uniform
/// in `[0, min(MAX_DELAY_MS, BASE_DELAY_MS * 2^attempt))`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(16));
    let cap = exp.min(MAX_DELAY_MS);
    let jittered = rand::thread_rng().gen_range(0..=cap.max(1));
    Duration::from_millis(jittered)
}
