//! Configuration for the Auth0 token cache and clients

use std::sync::Arc;

use aliri_clock::DurationSecs;
use serde::Deserialize;
use thiserror::Error;

use crate::{sources::oauth2::dto::ClientCredentials, ClientId, ClientSecret};

/// Configuration for the Auth0 clients and the Auth0 token cache
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Auth0Configuration {
    /// The default or custom root domain for your Auth0 tenant
    pub domain: String,

    /// The client ID of the Auth0 machine-to-machine application
    #[serde(default)]
    pub client_id: Option<ClientId>,

    /// The client secret of the Auth0 machine-to-machine application
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,

    /// The minimum time before a token's reported expiry at which it
    /// is dropped from the cache
    #[serde(default)]
    pub token_expiry_buffer: Option<DurationSecs>,
}

impl Auth0Configuration {
    /// Constructs a configuration for a tenant domain without any credentials
    ///
    /// Sufficient for talking to the authentication API, but the token cache
    /// requires [`with_client_credentials()`][Self::with_client_credentials()].
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Sets the machine-to-machine application credentials
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<ClientId>,
        client_secret: impl Into<ClientSecret>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the minimum expiry buffer applied to cached tokens
    pub fn with_token_expiry_buffer(mut self, buffer: DurationSecs) -> Self {
        self.token_expiry_buffer = Some(buffer);
        self
    }

    /// Checks that the tenant domain is present
    pub fn validate_domain(&self) -> Result<&str, ConfigurationError> {
        let domain = self.domain.trim();
        if domain.is_empty() {
            Err(ConfigurationError::MissingDomain)
        } else {
            Ok(domain)
        }
    }

    /// Checks the domain and credentials, returning the credentials to be
    /// shared by every token request
    pub fn client_credentials(&self) -> Result<Arc<ClientCredentials>, ConfigurationError> {
        self.validate_domain()?;

        let client_id = self
            .client_id
            .as_ref()
            .filter(|id| !id.as_str().trim().is_empty())
            .ok_or(ConfigurationError::MissingClientId)?;

        let client_secret = self
            .client_secret
            .as_ref()
            .filter(|secret| !secret.as_str().trim().is_empty())
            .ok_or(ConfigurationError::MissingClientSecret)?;

        Ok(Arc::new(ClientCredentials {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        }))
    }
}

/// Configuration for tokens sent to the Auth0 Management API
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ManagementTokenConfig {
    /// Replaces [`Auth0Configuration::domain`] when computing the Management API
    /// audience
    ///
    /// Useful when the tenant is reached through a custom domain.
    #[serde(default)]
    pub audience: Option<String>,
}

impl ManagementTokenConfig {
    /// Overrides the domain used for the Management API audience
    pub fn with_audience(audience: impl Into<String>) -> Self {
        Self {
            audience: Some(audience.into()),
        }
    }
}

/// An invalid configuration, detected while wiring up clients
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The tenant domain is empty
    #[error("Auth0 domain cannot be empty")]
    MissingDomain,
    /// The tenant domain could not be turned into a URL
    #[error("Auth0 domain `{domain}` is not a valid host")]
    InvalidDomain {
        /// The offending domain
        domain: String,
    },
    /// The client ID is empty
    #[error("Auth0 client ID cannot be empty")]
    MissingClientId,
    /// The client secret is empty
    #[error("Auth0 client secret cannot be empty")]
    MissingClientSecret,
    /// Access tokens were requested from clients built without credentials
    #[error("Auth0 client credentials are required to obtain access tokens")]
    MissingClientCredentials,
    /// Neither a static audience nor an audience resolver was provided
    #[error("an audience or an audience resolver must be set")]
    MissingAudience,
    /// The HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    HttpClient(#[source] reqwest::Error),
}
