use std::time::Duration;

use aliri_clock::{Clock, DurationSecs, System, UnixTime};

use super::AccessTokenRef;

/// An access token as returned by Auth0 with the lifetime the cache assigned it
#[derive(Debug)]
pub struct TokenWithLifetime {
    access_token: Box<AccessTokenRef>,
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
    cache_duration: Duration,
}

/// A token's lifecycle status
#[derive(Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and may be served from the cache
    Fresh,
    /// The token is still accepted by Auth0, but falls inside the safety
    /// buffer and must be renewed before use
    Stale,
    /// The token is no longer valid
    Expired,
}

impl TokenWithLifetime {
    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the token's lifetime as reported by Auth0
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time after which the cache will no longer serve the token
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the time that Auth0 will stop accepting the token
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets how long the token may be served from the cache
    ///
    /// Always strictly shorter than [`lifetime()`][Self::lifetime()] for
    /// tokens with a non-zero lifetime.
    #[inline]
    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// Gets the token's current lifetime status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_with_clock(&System)
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token would be served
    /// from the cache as of the provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        if time < self.stale {
            self.stale - time
        } else {
            DurationSecs(0)
        }
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        if time < self.expiry {
            self.expiry - time
        } else {
            DurationSecs(0)
        }
    }
}

/// Configuration for the safety buffer subtracted from a token's lifetime
///
/// The buffer is the larger of `expiry_buffer_ratio` (a fraction of the
/// reported lifetime) and `min_expiry_buffer`, never exceeding the lifetime
/// itself.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    expiry_buffer_ratio: f64,
    min_expiry_buffer: Duration,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a buffer of 1% of the token's lifetime, with a minimum of 1 second,
    /// and the system clock.
    fn default() -> Self {
        Self {
            expiry_buffer_ratio: 0.01,
            min_expiry_buffer: Duration::from_secs(1),
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// `expiry_buffer_ratio` is clamped to `0.0..=1.0`.
    pub fn new(expiry_buffer_ratio: f64, min_expiry_buffer: Duration) -> Self {
        let expiry_buffer_ratio = if expiry_buffer_ratio.is_finite() {
            expiry_buffer_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            expiry_buffer_ratio,
            min_expiry_buffer,
            clock: System,
        }
    }

    /// Constructs a lifetime configuration with a fixed buffer
    pub fn fixed(expiry_buffer: Duration) -> Self {
        Self::new(0.0, expiry_buffer)
    }

    /// Uses the default ratio with a different minimum buffer
    pub fn with_min_expiry_buffer(self, min_expiry_buffer: Duration) -> Self {
        Self {
            min_expiry_buffer,
            ..self
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            expiry_buffer_ratio: self.expiry_buffer_ratio,
            min_expiry_buffer: self.min_expiry_buffer,
            clock,
        }
    }

    /// Computes the safety buffer for a token with the given lifetime
    pub fn expiry_buffer(&self, lifetime: DurationSecs) -> Duration {
        let lifetime = Duration::from(lifetime);
        let proportional = lifetime.mul_f64(self.expiry_buffer_ratio);
        proportional.max(self.min_expiry_buffer).min(lifetime)
    }

    /// Computes how long a token with the given lifetime may be cached
    pub fn cache_duration(&self, lifetime: DurationSecs) -> Duration {
        Duration::from(lifetime) - self.expiry_buffer(lifetime)
    }
}

/// Reported lifetimes are capped at one year
const MAX_LIFETIME: DurationSecs = DurationSecs(365 * 24 * 60 * 60);

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Given an access token and the lifetime reported by Auth0, constructs a
    /// token with a lifetime
    ///
    /// Lifetimes longer than a year are treated as a year.
    pub fn create_token<A>(&self, access_token: A, lifetime: DurationSecs) -> TokenWithLifetime
    where
        A: AsRef<AccessTokenRef>,
    {
        let lifetime = DurationSecs(lifetime.0.min(MAX_LIFETIME.0));
        let issued = self.clock.now();
        let cache_duration = self.cache_duration(lifetime);
        TokenWithLifetime {
            access_token: access_token.as_ref().to_owned().into_boxed_ref(),
            lifetime,
            issued,
            stale: UnixTime(issued.0.saturating_add(cache_duration.as_secs())),
            expiry: UnixTime(issued.0.saturating_add(lifetime.0)),
            cache_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;

    use super::*;
    use crate::AccessToken;

    #[test]
    fn cached_for_strictly_less_than_lifetime() {
        let config = TokenLifetimeConfig::default();
        for secs in [1, 2, 60, 3600, 86400] {
            let lifetime = DurationSecs(secs);
            let token = config.create_token(AccessToken::from_static("token"), lifetime);
            assert!(
                token.cache_duration() < Duration::from(lifetime),
                "lifetime {} cached for {:?}",
                secs,
                token.cache_duration()
            );
        }
    }

    #[test]
    fn proportional_buffer_wins_for_long_lifetimes() {
        let config = TokenLifetimeConfig::default();
        assert_eq!(
            config.expiry_buffer(DurationSecs(86400)),
            Duration::from_secs(864)
        );
        assert_eq!(
            config.cache_duration(DurationSecs(86400)),
            Duration::from_secs(85536)
        );
    }

    #[test]
    fn minimum_buffer_wins_for_short_lifetimes() {
        let config = TokenLifetimeConfig::default();
        assert_eq!(config.expiry_buffer(DurationSecs(10)), Duration::from_secs(1));
    }

    #[test]
    fn fixed_buffer_is_applied() {
        let config = TokenLifetimeConfig::fixed(Duration::from_millis(500));
        assert_eq!(
            config.cache_duration(DurationSecs(1)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn buffer_never_exceeds_lifetime() {
        let config = TokenLifetimeConfig::fixed(Duration::from_secs(120));
        assert_eq!(config.cache_duration(DurationSecs(60)), Duration::ZERO);
    }

    #[test]
    fn out_of_range_ratio_is_clamped() {
        let config = TokenLifetimeConfig::new(4.0, Duration::ZERO);
        assert_eq!(config.cache_duration(DurationSecs(60)), Duration::ZERO);

        let config = TokenLifetimeConfig::new(f64::NAN, Duration::from_secs(5));
        assert_eq!(config.cache_duration(DurationSecs(60)), Duration::from_secs(55));
    }

    #[test]
    fn status_moves_through_buffer_to_expiry() {
        let clock = TestClock::new(UnixTime(1_000));
        let config = TokenLifetimeConfig::new(0.1, Duration::ZERO).with_clock(clock);
        let token = config.create_token(AccessToken::from_static("token"), DurationSecs(100));

        assert_eq!(token.issued(), UnixTime(1_000));
        assert_eq!(token.stale(), UnixTime(1_090));
        assert_eq!(token.expiry(), UnixTime(1_100));

        assert_eq!(token.token_status_at(UnixTime(1_050)), TokenStatus::Fresh);
        assert_eq!(token.token_status_at(UnixTime(1_095)), TokenStatus::Stale);
        assert_eq!(token.token_status_at(UnixTime(1_100)), TokenStatus::Expired);

        assert_eq!(token.until_stale_at(UnixTime(1_050)), DurationSecs(40));
        assert_eq!(token.until_expired_at(UnixTime(1_095)), DurationSecs(5));
        assert_eq!(token.until_expired_at(UnixTime(1_200)), DurationSecs(0));
    }

    #[test]
    fn absurd_lifetime_is_capped() {
        let clock = TestClock::new(UnixTime(u64::MAX - 10));
        let config = TokenLifetimeConfig::default().with_clock(clock);
        let token = config.create_token(AccessToken::from_static("token"), DurationSecs(u64::MAX));

        assert_eq!(token.lifetime(), MAX_LIFETIME);
        assert_eq!(token.expiry(), UnixTime(u64::MAX));
        assert!(token.cache_duration() < Duration::from(MAX_LIFETIME));
    }
}
