use std::time::Duration;

const INITIAL_DELAY_S: u64 = 1;
const MAX_DELAY_S: u64 = 60;

/// Delay before retry number `attempt` (0-based): 1s, 2s, 4s, ... capped at
/// one minute.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    let delay = INITIAL_DELAY_S.saturating_mul(1u64 << attempt.min(6));
    Duration::from_secs(delay.min(MAX_DELAY_S))
}
