//! Middleware to automatically attach Auth0 access tokens to outgoing requests
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to obtain a
//! token from an [`Auth0TokenCache`](auth0_tokens::Auth0TokenCache) for each
//! outbound request. Tokens are cached per audience, so most requests never
//! reach Auth0.
//!
//! The audience is either fixed or resolved from each request. A middleware
//! with neither is rejected when it is constructed.
//!
//! ```
//! use std::sync::Arc;
//!
//! use auth0_reqwest::{AccessTokenConfig, AccessTokenMiddleware};
//! use auth0_tokens::{Auth0Configuration, Auth0TokenCache};
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Auth0Configuration::new("my-tenant.au.auth0.com")
//!     .with_client_credentials("client-id", "client-secret");
//! let cache = Arc::new(Auth0TokenCache::from_configuration(Client::default(), &config)?);
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(
//!         cache,
//!         AccessTokenConfig::with_audience("https://api.example.com/"),
//!     )?)
//!     .build();
//!
//! let req = client.get("https://api.example.com/users");
//! # Ok(())
//! # }
//! ```
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. This can be useful in the event that you want to
//! use a single common middleware stack with multiple potential backends
//! and want to ensure that specific tokens are used for specific backends.
//!
//! ```
//! use auth0_reqwest::{
//!     AccessTokenConfig, AccessTokenMiddleware, AudienceResolver, ExactHostMatch, HttpsOnly
//! };
//! use predicates::prelude::PredicateBooleanExt;
//! # use std::sync::Arc;
//! # use auth0_tokens::{Auth0Configuration, Auth0TokenCache};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let config = Auth0Configuration::new("my-tenant.au.auth0.com")
//! #     .with_client_credentials("client-id", "client-secret");
//! # let cache = Arc::new(Auth0TokenCache::from_configuration(reqwest::Client::default(), &config)?);
//!
//! AccessTokenMiddleware::new(
//!     cache,
//!     AccessTokenConfig::with_audience_resolver(AudienceResolver::request_origin()),
//! )?
//! .with_predicate(HttpsOnly.and(ExactHostMatch::new("example.com")));
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{borrow::Cow, fmt, sync::Arc};

use aliri_clock::Clock;
use auth0_tokens::{
    uri, Audience, AudienceRef, ConfigurationError, ManagementTokenConfig, TokenCache,
    TokenCacheError,
};
use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use thiserror::Error;

mod backoff;
mod clients;
pub mod retry;

pub use backoff::ErrorBackoffConfig;
pub use clients::{Auth0Clients, AuthenticationApiClient, ManagementApiClient};
pub use retry::RateLimitRetryMiddleware;

/// Computes the audience of a request
#[derive(Clone)]
pub struct AudienceResolver(Arc<dyn Fn(&Request) -> Option<Audience> + Send + Sync>);

impl AudienceResolver {
    /// Constructs a resolver from a function of the outgoing request
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(&Request) -> Option<Audience> + Send + Sync + 'static,
    {
        Self(Arc::new(resolve))
    }

    /// Uses the origin of the request URL, such as `https://api.example.com/`,
    /// as the audience
    pub fn request_origin() -> Self {
        Self::new(|req| {
            let origin = req.url().origin();
            if origin.is_tuple() {
                Some(Audience::from(format!("{}/", origin.ascii_serialization())))
            } else {
                None
            }
        })
    }

    /// Resolves the audience for `req`, if possible
    pub fn resolve(&self, req: &Request) -> Option<Audience> {
        (self.0)(req)
    }
}

impl fmt::Debug for AudienceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AudienceResolver(..)")
    }
}

/// Configuration for an [`AccessTokenMiddleware`]
///
/// A static audience takes precedence over the resolver.
#[derive(Clone, Debug, Default)]
pub struct AccessTokenConfig {
    /// The audience requested for every token
    pub audience: Option<Audience>,
    /// Computes the audience from each request
    pub audience_resolver: Option<AudienceResolver>,
}

impl AccessTokenConfig {
    /// Requests tokens for a fixed audience
    pub fn with_audience(audience: impl Into<Audience>) -> Self {
        Self {
            audience: Some(audience.into()),
            audience_resolver: None,
        }
    }

    /// Requests tokens for the audience computed from each request
    pub fn with_audience_resolver(resolver: AudienceResolver) -> Self {
        Self {
            audience: None,
            audience_resolver: Some(resolver),
        }
    }
}

#[derive(Clone, Debug)]
enum AudienceSource {
    Static(Audience),
    Resolver(AudienceResolver),
}

/// Unable to attach an access token to a request
#[derive(Debug, Error)]
pub enum AccessTokenError {
    /// The audience resolver produced no audience for the request
    #[error("audience cannot be computed for request to {url}")]
    UnresolvedAudience {
        /// The URL of the request
        url: reqwest::Url,
    },
    /// The token cache could not provide a token
    #[error("unable to obtain access token")]
    Token(#[from] TokenCacheError),
    /// The access token cannot be sent as a header value
    #[error("access token contains characters not permitted in a header")]
    InvalidToken(#[from] header::InvalidHeaderValue),
}

/// A middleware that injects an access token into outgoing requests
#[derive(Clone)]
pub struct AccessTokenMiddleware<P = AllRequests> {
    cache: Arc<dyn TokenCache>,
    audience: AudienceSource,
    predicate: P,
}

impl AccessTokenMiddleware<AllRequests> {
    /// Construct a new middleware from a token cache
    ///
    /// Fails unless `config` has a non-empty audience or an audience resolver.
    ///
    /// By default, this middleware attaches a token to every request. To
    /// change this behavior, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(
        cache: Arc<dyn TokenCache>,
        config: AccessTokenConfig,
    ) -> std::result::Result<Self, ConfigurationError> {
        let audience = match config {
            AccessTokenConfig {
                audience: Some(audience),
                ..
            } if !audience.as_str().trim().is_empty() => AudienceSource::Static(audience),
            AccessTokenConfig {
                audience_resolver: Some(resolver),
                ..
            } => AudienceSource::Resolver(resolver),
            _ => return Err(ConfigurationError::MissingAudience),
        };

        Ok(Self {
            cache,
            audience,
            predicate: AllRequests,
        })
    }

    /// Construct a new middleware that attaches Management API tokens
    ///
    /// The audience is derived from the tenant domain the cache was configured
    /// with, unless `config` overrides it.
    pub fn management(
        cache: Arc<dyn TokenCache>,
        config: &ManagementTokenConfig,
    ) -> std::result::Result<Self, ConfigurationError> {
        let audience = match &config.audience {
            Some(domain) => Audience::from(String::from(uri::valid_management_uri(domain)?)),
            None => cache.management_audience().to_owned(),
        };

        Ok(Self {
            cache,
            audience: AudienceSource::Static(audience),
            predicate: AllRequests,
        })
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            cache: self.cache,
            audience: self.audience,
            predicate,
        }
    }
}

impl<P> AccessTokenMiddleware<P> {
    fn audience_for<'a>(
        &'a self,
        req: &Request,
    ) -> std::result::Result<Cow<'a, AudienceRef>, AccessTokenError> {
        match &self.audience {
            AudienceSource::Static(audience) => Ok(Cow::Borrowed(&**audience)),
            AudienceSource::Resolver(resolver) => resolver
                .resolve(req)
                .map(Cow::Owned)
                .ok_or_else(|| AccessTokenError::UnresolvedAudience {
                    url: req.url().clone(),
                }),
        }
    }

    async fn get_token_from_cache(
        &self,
        req: &Request,
    ) -> std::result::Result<header::HeaderValue, AccessTokenError> {
        let audience = self.audience_for(req)?;
        let token = self.cache.token(&audience).await?;

        if tracing::enabled!(tracing::Level::TRACE) {
            let now = aliri_clock::System.now();

            tracing::trace!(
                %audience,
                token.status = ?token.token_status_at(now),
                token.lifetime = token.lifetime().0,
                token.issued = token.issued().0,
                token.stale = token.stale().0,
                token.until_stale = token.until_stale_at(now).0,
                token.expiry = token.expiry().0,
                token.until_expired = token.until_expired_at(now).0,
                "obtained access token"
            );
        }

        let mut header_value = BytesMut::with_capacity(token.access_token().as_str().len() + 7);
        header_value.put_slice(b"Bearer ");
        header_value.put_slice(token.access_token().as_str().as_bytes());
        let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl<P: fmt::Debug> fmt::Debug for AccessTokenMiddleware<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenMiddleware")
            .field("audience", &self.audience)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            let value = self
                .get_token_from_cache(&req)
                .await
                .map_err(reqwest_middleware::Error::middleware)?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

/// Attach an access token to every request
#[derive(Clone, Copy, Debug, Default)]
pub struct AllRequests;

impl Predicate<Request> for AllRequests {
    #[inline]
    fn eval(&self, _: &Request) -> bool {
        true
    }
}

impl reflection::PredicateReflection for AllRequests {}
impl fmt::Display for AllRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any request")
    }
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url()
                        .host_str()
                        .unwrap_or("<value not valid utf-8>")
                        .to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}
