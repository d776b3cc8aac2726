//! Wiring of the Auth0 HTTP clients around a single token cache

use std::{fmt, sync::Arc, time::Duration};

use auth0_tokens::{
    uri, Auth0Configuration, Auth0TokenCache, ConfigurationError, ManagementTokenConfig,
    TokenCache,
};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};

use crate::{retry::RateLimitRetryMiddleware, AccessTokenConfig, AccessTokenMiddleware};

/// Pooled connections left idle this long are closed
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// The Auth0 clients used by a process
///
/// Holds the one token cache that every middleware handed out by this value
/// draws from. Construct it once on start-up and share it.
#[derive(Clone)]
pub struct Auth0Clients {
    configuration: Arc<Auth0Configuration>,
    http_client: reqwest::Client,
    authentication: AuthenticationApiClient,
    token_cache: Option<Arc<Auth0TokenCache>>,
    rate_limit_retry: RateLimitRetryMiddleware,
}

impl Auth0Clients {
    /// Validates `configuration` and constructs the shared HTTP client and token cache
    pub fn new(configuration: Auth0Configuration) -> Result<Self, ConfigurationError> {
        Self::with_http_client(configuration, pooled_client()?)
    }

    /// Like [`new()`][Self::new()], but sends every request through `http_client`
    pub fn with_http_client(
        configuration: Auth0Configuration,
        http_client: reqwest::Client,
    ) -> Result<Self, ConfigurationError> {
        Self::assemble(
            Arc::new(configuration),
            http_client,
            RateLimitRetryMiddleware::default(),
            true,
        )
    }

    /// Constructs clients that only talk to the authentication API
    ///
    /// Only the domain is required. Client credentials are ignored, and every
    /// method that needs an access token fails with
    /// [`ConfigurationError::MissingClientCredentials`].
    pub fn authentication_only(
        configuration: Auth0Configuration,
    ) -> Result<Self, ConfigurationError> {
        Self::assemble(
            Arc::new(configuration),
            pooled_client()?,
            RateLimitRetryMiddleware::default(),
            false,
        )
    }

    fn assemble(
        configuration: Arc<Auth0Configuration>,
        http_client: reqwest::Client,
        rate_limit_retry: RateLimitRetryMiddleware,
        with_tokens: bool,
    ) -> Result<Self, ConfigurationError> {
        let authentication_url = uri::valid_uri(configuration.validate_domain()?)?;
        let authentication = AuthenticationApiClient::new(
            ClientBuilder::new(http_client.clone())
                .with(rate_limit_retry.clone())
                .build(),
            authentication_url,
        );

        let token_cache = if with_tokens {
            let cache =
                Auth0TokenCache::from_configuration(authentication.client.clone(), &configuration)?;
            tracing::debug!(
                authentication_url = %authentication.base_url,
                management_audience = %cache.management_audience(),
                "configured Auth0 clients"
            );
            Some(Arc::new(cache))
        } else {
            tracing::debug!(
                authentication_url = %authentication.base_url,
                "configured Auth0 authentication client"
            );
            None
        };

        Ok(Self {
            configuration,
            http_client,
            authentication,
            token_cache,
            rate_limit_retry,
        })
    }

    /// Replaces the retry policy used for token requests and Management API calls
    ///
    /// The token cache is rebuilt, so call this before handing out any middleware.
    pub fn with_rate_limit_retry(
        self,
        rate_limit_retry: RateLimitRetryMiddleware,
    ) -> Result<Self, ConfigurationError> {
        let with_tokens = self.token_cache.is_some();
        Self::assemble(
            self.configuration,
            self.http_client,
            rate_limit_retry,
            with_tokens,
        )
    }

    /// The configuration these clients were built from
    pub fn configuration(&self) -> &Auth0Configuration {
        &self.configuration
    }

    /// The token cache shared by every middleware, if credentials were configured
    pub fn token_cache(&self) -> Option<&Arc<Auth0TokenCache>> {
        self.token_cache.as_ref()
    }

    /// A client for the tenant's authentication API
    pub fn authentication_client(&self) -> &AuthenticationApiClient {
        &self.authentication
    }

    /// The root URL of the tenant's authentication API
    pub fn authentication_url(&self) -> &Url {
        self.authentication.base_url()
    }

    /// A middleware attaching tokens for the audience described by `config`
    pub fn access_token_middleware(
        &self,
        config: AccessTokenConfig,
    ) -> Result<AccessTokenMiddleware, ConfigurationError> {
        AccessTokenMiddleware::new(self.shared_cache()?, config)
    }

    /// A middleware attaching Management API tokens
    pub fn management_token_middleware(
        &self,
        config: &ManagementTokenConfig,
    ) -> Result<AccessTokenMiddleware, ConfigurationError> {
        AccessTokenMiddleware::management(self.shared_cache()?, config)
    }

    /// An HTTP client that attaches tokens for the audience described by `config`
    ///
    /// Rate-limited requests are retried before the token is attached, so a
    /// retried request reuses the cached token.
    pub fn client_with_access_token(
        &self,
        config: AccessTokenConfig,
    ) -> Result<ClientWithMiddleware, ConfigurationError> {
        Ok(ClientBuilder::new(self.http_client.clone())
            .with(self.rate_limit_retry.clone())
            .with(self.access_token_middleware(config)?)
            .build())
    }

    /// A client for the tenant's Management API
    pub fn management_client(
        &self,
        config: &ManagementTokenConfig,
    ) -> Result<ManagementApiClient, ConfigurationError> {
        let base_url = uri::valid_management_uri(&self.configuration.domain)?;
        let client = ClientBuilder::new(self.http_client.clone())
            .with(self.rate_limit_retry.clone())
            .with(self.management_token_middleware(config)?)
            .build();

        Ok(ManagementApiClient::new(client, base_url))
    }

    fn shared_cache(&self) -> Result<Arc<dyn TokenCache>, ConfigurationError> {
        match &self.token_cache {
            Some(cache) => Ok(cache.clone()),
            None => Err(ConfigurationError::MissingClientCredentials),
        }
    }
}

fn pooled_client() -> Result<reqwest::Client, ConfigurationError> {
    reqwest::Client::builder()
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build()
        .map_err(ConfigurationError::HttpClient)
}

impl fmt::Debug for Auth0Clients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth0Clients")
            .field("domain", &self.configuration.domain)
            .field("authentication_url", &self.authentication_url().as_str())
            .field("has_token_cache", &self.token_cache.is_some())
            .field("rate_limit_retry", &self.rate_limit_retry)
            .finish_non_exhaustive()
    }
}

/// A client for the Auth0 authentication API
///
/// Paths are resolved against the root URL of the tenant. Rate-limited
/// requests are retried.
#[derive(Clone)]
pub struct AuthenticationApiClient {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl AuthenticationApiClient {
    /// Wraps a client for the authentication API rooted at `base_url`
    pub fn new(client: ClientWithMiddleware, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// The base URL that paths are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Starts a request to `path`, relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, url::ParseError> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        Ok(self.client.request(method, url))
    }

    /// Starts a `GET` request to `path`, relative to the base URL
    pub fn get(&self, path: &str) -> Result<RequestBuilder, url::ParseError> {
        self.request(Method::GET, path)
    }

    /// Starts a `POST` request to `path`, relative to the base URL
    pub fn post(&self, path: &str) -> Result<RequestBuilder, url::ParseError> {
        self.request(Method::POST, path)
    }
}

impl fmt::Debug for AuthenticationApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// A client for the Auth0 Management API
///
/// Paths are resolved against the `/api/v2/` base URL of the tenant.
#[derive(Clone)]
pub struct ManagementApiClient {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl ManagementApiClient {
    /// Wraps a client that already attaches Management API tokens
    pub fn new(client: ClientWithMiddleware, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// The base URL that paths are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Starts a request to `path`, relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, url::ParseError> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        Ok(self.client.request(method, url))
    }

    /// Starts a `GET` request to `path`, relative to the base URL
    pub fn get(&self, path: &str) -> Result<RequestBuilder, url::ParseError> {
        self.request(Method::GET, path)
    }
}

impl fmt::Debug for ManagementApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
