//! Retries for requests that Auth0 rejects transiently
//!
//! Auth0 enforces rate limits on both the authentication and Management APIs.
//! A rate-limited response carries an `x-ratelimit-reset` header holding the
//! Unix time at which the limit resets; [`RateLimitRetryMiddleware`] waits
//! until then before trying again. Other transient failures back off
//! exponentially.

use std::time::Duration;

use aliri_clock::{Clock, System, UnixTime};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};

use crate::backoff::{ErrorBackoffConfig, ErrorBackoffHandler};

/// The header Auth0 uses to report when a rate limit resets
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// A middleware that retries rate-limited and transiently failed requests
#[derive(Clone, Debug)]
pub struct RateLimitRetryMiddleware {
    max_retry_attempts: u32,
    backoff_config: ErrorBackoffConfig,
}

impl Default for RateLimitRetryMiddleware {
    /// Retries up to 10 times with the default backoff
    fn default() -> Self {
        Self::new(10)
    }
}

impl RateLimitRetryMiddleware {
    /// Constructs a middleware that retries up to `max_retry_attempts` times
    pub fn new(max_retry_attempts: u32) -> Self {
        Self {
            max_retry_attempts,
            backoff_config: ErrorBackoffConfig::default(),
        }
    }

    /// Replaces the backoff used when no rate limit reset is reported
    pub fn with_backoff(self, backoff_config: ErrorBackoffConfig) -> Self {
        Self {
            backoff_config,
            ..self
        }
    }

    /// The maximum number of retries
    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn rate_limit_reset(response: &Response) -> Option<UnixTime> {
    response
        .headers()
        .get(RATE_LIMIT_RESET)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
        .map(UnixTime)
}

fn until(reset: UnixTime, now: UnixTime) -> Duration {
    if reset > now {
        (reset - now).into()
    } else {
        Duration::ZERO
    }
}

fn retry_delay(outcome: &Result<Response>, backoff: &mut ErrorBackoffHandler) -> Option<Duration> {
    match outcome {
        Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => Some(
            rate_limit_reset(response)
                .map(|reset| until(reset, System.now()))
                .unwrap_or_else(|| backoff.error()),
        ),
        Ok(response) if is_transient(response.status()) => Some(backoff.error()),
        Ok(_) => None,
        Err(reqwest_middleware::Error::Reqwest(error))
            if error.is_connect() || error.is_timeout() =>
        {
            Some(backoff.error())
        }
        Err(_) => None,
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitRetryMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let mut backoff = ErrorBackoffHandler::new(self.backoff_config.clone());
        let mut attempt = 0;

        loop {
            let duplicate = if attempt < self.max_retry_attempts {
                req.try_clone()
            } else {
                None
            };

            let Some(duplicate) = duplicate else {
                if attempt == 0 {
                    tracing::trace!("request body cannot be cloned, sending without retries");
                }
                return next.run(req, extensions).await;
            };

            let outcome = next.clone().run(duplicate, extensions).await;

            let Some(delay) = retry_delay(&outcome, &mut backoff) else {
                return outcome;
            };

            attempt += 1;
            tracing::warn!(
                attempt,
                max_attempts = self.max_retry_attempts,
                delay_ms = delay.as_millis() as u64,
                status = outcome.as_ref().ok().map(|r| r.status().as_u16()),
                "transient failure from Auth0, retrying"
            );

            drop(outcome);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    use super::*;

    /// Responds with each status in turn, then with 200
    struct Scripted {
        statuses: Vec<(u16, Option<String>)>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(statuses: Vec<(u16, Option<String>)>) -> Self {
            Self {
                statuses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for Scripted {
        async fn handle(
            &self,
            _: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let (status, reset) = self.statuses.get(n).cloned().unwrap_or((200, None));

            let mut builder = http::Response::builder().status(status);
            if let Some(reset) = reset {
                builder = builder.header(RATE_LIMIT_RESET, reset);
            }
            Ok(builder.body(&b""[..]).unwrap().into())
        }
    }

    fn fast_retries(max: u32) -> RateLimitRetryMiddleware {
        RateLimitRetryMiddleware::new(max).with_backoff(ErrorBackoffConfig::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            2,
        ))
    }

    fn now_header() -> Option<String> {
        Some(System.now().0.to_string())
    }

    #[tokio::test]
    async fn retries_rate_limited_request_after_reset() {
        let scripted = Arc::new(Scripted::new(vec![(429, now_header()), (429, now_header())]));
        let client = ClientBuilder::new(Client::default())
            .with(fast_retries(10))
            .with_arc(scripted.clone())
            .build();

        let resp = client.get("https://example.com").send().await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_server_errors_with_backoff() {
        let scripted = Arc::new(Scripted::new(vec![(503, None), (500, None)]));
        let client = ClientBuilder::new(Client::default())
            .with(fast_retries(10))
            .with_arc(scripted.clone())
            .build();

        let resp = client.get("https://example.com").send().await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let scripted = Arc::new(Scripted::new(vec![(429, None); 10]));
        let client = ClientBuilder::new(Client::default())
            .with(fast_retries(2))
            .with_arc(scripted.clone())
            .build();

        let resp = client.get("https://example.com").send().await.unwrap();

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let scripted = Arc::new(Scripted::new(vec![(404, None)]));
        let client = ClientBuilder::new(Client::default())
            .with(fast_retries(10))
            .with_arc(scripted.clone())
            .build();

        let resp = client.get("https://example.com").send().await.unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_in_the_past_means_no_wait() {
        assert_eq!(until(UnixTime(100), UnixTime(200)), Duration::ZERO);
        assert_eq!(until(UnixTime(205), UnixTime(200)), Duration::from_secs(5));
    }
}
