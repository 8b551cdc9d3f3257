//! Updater configuration.

use crate::utils::retry::DEFAULT_MAX_RETRY_EXPONENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Cap on the backoff exponent after failed winners (delay is 2^n seconds).
    pub max_retry_exponent: u32,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            max_retry_exponent: DEFAULT_MAX_RETRY_EXPONENT,
        }
    }
}
