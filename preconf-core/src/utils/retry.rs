/// Default cap on the backoff exponent (2^6 = 64 seconds).
pub const DEFAULT_MAX_RETRY_EXPONENT: u32 = 6;

/// Largest backoff exponent a configuration may set (2^20 seconds is about 12 days).
pub const MAX_RETRY_EXPONENT: u32 = 20;

/// Calculate the delay before the next attempt after `failures` consecutive failures.
///
/// Uses exponential backoff: 2^failures seconds, with the exponent capped at `max_exponent`.
pub fn retry_delay(failures: u32, max_exponent: u32) -> std::time::Duration {
    let seconds = 2u64.saturating_pow(failures.min(max_exponent));
    std::time::Duration::from_secs(seconds)
}
