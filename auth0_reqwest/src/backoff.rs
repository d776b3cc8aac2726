//! Error backoff handling

use std::time::Duration;

/// Configuration for how to manage backoff when a request fails transiently
#[derive(Clone, Debug)]
pub struct ErrorBackoffConfig {
    initial_error_delay: Duration,
    max_error_delay: Duration,
    multiplier: u32,
}

impl Default for ErrorBackoffConfig {
    /// Default backoff configuration
    ///
    /// Uses an initial error delay of 2 seconds with a multiplier of 2. Maximum delay is
    /// capped at 30 seconds.
    fn default() -> Self {
        Self {
            initial_error_delay: Duration::from_secs(2),
            max_error_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// When encountering an error for the first time, the backoff will be `initial_error_delay`.
    /// On subsequent errors, the backoff should be multiplied by `multiplier`, with a cap of
    /// `max_error_delay`.
    pub fn new(initial_error_delay: Duration, max_error_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_error_delay,
            max_error_delay,
            multiplier,
        }
    }
}

/// A stateful handler that manages error backoff state
#[derive(Debug)]
pub(crate) struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
}

impl ErrorBackoffHandler {
    pub(crate) fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
        }
    }

    /// Reports a failure and returns the expected backoff delay
    pub(crate) fn error(&mut self) -> Duration {
        let new_delay = self
            .last_delay
            .map(|s| {
                s.saturating_mul(self.config.multiplier)
                    .min(self.config.max_error_delay)
            })
            .unwrap_or(self.config.initial_error_delay);
        self.last_delay = Some(new_delay);
        new_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_until_capped() {
        let mut handler = ErrorBackoffHandler::new(ErrorBackoffConfig::default());

        let delays: Vec<_> = (0..6).map(|_| handler.error().as_secs()).collect();
        assert_eq!(delays, [2, 4, 8, 16, 30, 30]);
    }
}
