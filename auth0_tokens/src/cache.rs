//! An in-memory cache of access tokens, keyed by audience
//!
//! Tokens are held until the safety buffer configured by
//! [`TokenLifetimeConfig`] is reached. Once a token has been cached for the
//! eager refresh fraction of that time, the next request for its audience
//! still receives it, but also starts a single background refresh that
//! replaces the entry when it completes. A token that reaches the safety
//! buffer without having been replaced is evicted, and the next request
//! fetches a replacement in the foreground.
//!
//! Concurrent requests for an audience without a valid token share a single
//! fetch; the first caller drives it and the rest wait for its result. If the
//! driving caller is dropped, its fetch is abandoned and one of the remaining
//! waiters starts another.

use std::{
    error, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use moka::{future::Cache, Expiry};
use reqwest_middleware::ClientWithMiddleware;
use thiserror::Error;

use crate::{
    sources::{oauth2::ClientCredentialsTokenSource, AsyncTokenSource},
    uri, Audience, AudienceRef, Auth0Configuration, ConfigurationError, ManagementTokenConfig,
    TokenLifetimeConfig, TokenWithLifetime,
};

const CACHE_NAME: &str = "auth0-token-cache";
const DEFAULT_EAGER_REFRESH: f64 = 0.95;

struct CachedToken {
    token: Arc<TokenWithLifetime>,
    refresh_at: Instant,
    refreshing: AtomicBool,
}

impl CachedToken {
    fn new(token: TokenWithLifetime, eager_refresh: f64) -> Self {
        let refresh_at = Instant::now() + token.cache_duration().mul_f64(eager_refresh);
        Self {
            token: Arc::new(token),
            refresh_at,
            refreshing: AtomicBool::new(false),
        }
    }

    /// Claims the refresh of this entry, if it is due and nobody else has
    fn claim_refresh(&self) -> bool {
        Instant::now() >= self.refresh_at && !self.refreshing.swap(true, Ordering::AcqRel)
    }
}

struct TokenExpiry;

impl Expiry<Audience, Arc<CachedToken>> for TokenExpiry {
    fn expire_after_create(
        &self,
        _audience: &Audience,
        cached: &Arc<CachedToken>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(cached.token.cache_duration())
    }

    fn expire_after_update(
        &self,
        _audience: &Audience,
        cached: &Arc<CachedToken>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(cached.token.cache_duration())
    }
}

/// Caches and renews Auth0 access tokens
pub struct Auth0TokenCache<S = ClientCredentialsTokenSource> {
    source: Arc<S>,
    tokens: Cache<Audience, Arc<CachedToken>>,
    lifetime_config: TokenLifetimeConfig,
    eager_refresh: f64,
    management_audience: Audience,
}

impl Auth0TokenCache {
    /// Constructs a cache that requests tokens from the tenant described by
    /// `config`
    ///
    /// Missing or empty configuration values are reported here rather than
    /// on the first token request. Token requests are sent through `client`,
    /// including any middleware it carries.
    pub fn from_configuration(
        client: impl Into<ClientWithMiddleware>,
        config: &Auth0Configuration,
    ) -> Result<Self, ConfigurationError> {
        let source = ClientCredentialsTokenSource::from_configuration(client, config)?;
        let management_audience = management_audience(config, &ManagementTokenConfig::default())?;

        let mut lifetime_config = TokenLifetimeConfig::default();
        if let Some(buffer) = config.token_expiry_buffer {
            lifetime_config = lifetime_config.with_min_expiry_buffer(buffer.into());
        }

        Ok(Self::new(source, management_audience).with_lifetime_config(lifetime_config))
    }
}

impl<S> Auth0TokenCache<S> {
    /// Constructs a new cache over `source`
    ///
    /// `management_audience` is the audience used by
    /// [`get_management_token()`][Self::get_management_token()].
    pub fn new(source: S, management_audience: Audience) -> Self {
        Self {
            source: Arc::new(source),
            tokens: Cache::builder()
                .name(CACHE_NAME)
                .expire_after(TokenExpiry)
                .build(),
            lifetime_config: TokenLifetimeConfig::default(),
            eager_refresh: DEFAULT_EAGER_REFRESH,
            management_audience,
        }
    }

    /// Replaces the default token lifetime configuration
    pub fn with_lifetime_config(mut self, lifetime_config: TokenLifetimeConfig) -> Self {
        self.lifetime_config = lifetime_config;
        self
    }

    /// Sets the fraction of a token's cache duration after which it is
    /// refreshed in the background
    ///
    /// Defaults to `0.95`. The fraction is clamped to `0.0..=1.0`; `1.0`
    /// disables background refresh.
    pub fn with_eager_refresh(mut self, fraction: f64) -> Self {
        self.eager_refresh = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            DEFAULT_EAGER_REFRESH
        };
        self
    }

    /// The audience of Management API tokens
    pub fn management_audience(&self) -> &AudienceRef {
        &self.management_audience
    }
}

async fn fetch_token<S: AsyncTokenSource + ?Sized>(
    source: &S,
    lifetime_config: &TokenLifetimeConfig,
    eager_refresh: f64,
    audience: &AudienceRef,
) -> Result<Arc<CachedToken>, S::Error> {
    let issued = source.request_token(audience).await?;
    let token = lifetime_config.create_token(&issued.access_token, issued.expires_in);

    tracing::info!(
        %audience,
        lifetime = token.lifetime().0,
        stale = token.stale().0,
        expiry = token.expiry().0,
        cache_ms = token.cache_duration().as_millis() as u64,
        "caching new access token"
    );

    Ok(Arc::new(CachedToken::new(token, eager_refresh)))
}

impl<S: AsyncTokenSource + 'static> Auth0TokenCache<S> {
    /// Gets an access token for the requested audience
    ///
    /// Returns the cached token if it has not yet reached its computed expiry,
    /// otherwise requests a new one from the token source. A cached token
    /// past its eager refresh point is still returned, and a background
    /// refresh is started for it. Errors from the source are handed to every
    /// caller waiting on the same fetch and are never cached.
    pub async fn get_token(
        &self,
        audience: &AudienceRef,
    ) -> Result<Arc<TokenWithLifetime>, Arc<S::Error>> {
        tracing::trace!(%audience, "access token requested");

        if let Some(cached) = self.tokens.get(audience).await {
            if cached.claim_refresh() {
                self.spawn_refresh(audience, cached.clone());
            }
            return Ok(cached.token.clone());
        }

        let cached = self
            .tokens
            .try_get_with(audience.to_owned(), async {
                tracing::debug!(%audience, "token cache missed, fetching new token");
                fetch_token(&*self.source, &self.lifetime_config, self.eager_refresh, audience)
                    .await
            })
            .await?;

        Ok(cached.token.clone())
    }

    fn spawn_refresh(&self, audience: &AudienceRef, current: Arc<CachedToken>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(%audience, "no runtime for background refresh");
            current.refreshing.store(false, Ordering::Release);
            return;
        };

        let source = self.source.clone();
        let tokens = self.tokens.clone();
        let lifetime_config = self.lifetime_config.clone();
        let eager_refresh = self.eager_refresh;
        let audience = audience.to_owned();

        tracing::debug!(%audience, "refreshing access token in the background");
        runtime.spawn(async move {
            let fetched = fetch_token(&*source, &lifetime_config, eager_refresh, &audience).await;
            match fetched {
                Ok(fresh) => tokens.insert(audience, fresh).await,
                Err(error) => {
                    tracing::warn!(
                        %audience,
                        error = &error as &dyn error::Error,
                        "background token refresh failed"
                    );
                    current.refreshing.store(false, Ordering::Release);
                }
            }
        });
    }

    /// Gets an access token for an audience expressed as a URL
    pub async fn get_token_for_url(
        &self,
        audience: &url::Url,
    ) -> Result<Arc<TokenWithLifetime>, Arc<S::Error>> {
        self.get_token(AudienceRef::from_str(audience.as_str())).await
    }

    /// Gets an access token for the Auth0 Management API
    pub async fn get_management_token(&self) -> Result<Arc<TokenWithLifetime>, Arc<S::Error>> {
        self.get_token(&self.management_audience).await
    }
}

impl<S: fmt::Debug> fmt::Debug for Auth0TokenCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Auth0TokenCache")
            .field("source", &self.source)
            .field("cached_tokens", &self.tokens.entry_count())
            .field("lifetime_config", &self.lifetime_config)
            .field("eager_refresh", &self.eager_refresh)
            .field("management_audience", &self.management_audience)
            .finish()
    }
}

/// Computes the Management API audience for a tenant, honouring any override
pub fn management_audience(
    config: &Auth0Configuration,
    management: &ManagementTokenConfig,
) -> Result<Audience, ConfigurationError> {
    let domain = management.audience.as_deref().unwrap_or(&config.domain);
    let url = uri::valid_management_uri(domain)?;
    Ok(Audience::from(String::from(url)))
}

/// An access token provider, as consumed by request middleware
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Gets an access token for the requested audience
    async fn token(
        &self,
        audience: &AudienceRef,
    ) -> Result<Arc<TokenWithLifetime>, TokenCacheError>;

    /// The audience of Management API tokens
    fn management_audience(&self) -> &AudienceRef;
}

#[async_trait]
impl<S> TokenCache for Auth0TokenCache<S>
where
    S: AsyncTokenSource + 'static,
{
    async fn token(
        &self,
        audience: &AudienceRef,
    ) -> Result<Arc<TokenWithLifetime>, TokenCacheError> {
        self.get_token(audience).await.map_err(|source| TokenCacheError {
            audience: audience.to_owned(),
            source,
        })
    }

    fn management_audience(&self) -> &AudienceRef {
        &self.management_audience
    }
}

/// Unable to obtain an access token for an audience
#[derive(Debug, Error)]
#[error("unable to obtain access token for audience `{audience}`")]
pub struct TokenCacheError {
    audience: Audience,
    source: Arc<dyn error::Error + Send + Sync + 'static>,
}

impl TokenCacheError {
    /// Constructs a new error for `audience`
    pub fn new(
        audience: impl Into<Audience>,
        source: Arc<dyn error::Error + Send + Sync + 'static>,
    ) -> Self {
        Self {
            audience: audience.into(),
            source,
        }
    }

    /// The audience that a token was requested for
    pub fn audience(&self) -> &AudienceRef {
        &self.audience
    }
}
