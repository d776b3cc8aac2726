//! A token source that uses the Auth0 authentication API as an authority

use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use thiserror::Error;

use super::{AsyncTokenSource, IssuedToken};
use crate::{uri, Auth0Configuration, AudienceRef, ConfigurationError};

pub mod dto;

const GRANT_TYPE: &str = "client_credentials";

/// A token source for the client credentials flow
///
/// Each request exchanges the application's client ID and secret for an
/// access token scoped to the requested audience. Requests pass through the
/// client's middleware, so a retry policy installed there also covers the
/// token endpoint.
#[derive(Debug)]
pub struct ClientCredentialsTokenSource<T = JsonBody> {
    client: ClientWithMiddleware,
    token_url: reqwest::Url,
    credentials: Arc<dto::ClientCredentials>,
    content_type: PhantomData<fn() -> T>,
}

impl ClientCredentialsTokenSource<JsonBody> {
    /// Constructs a new client credentials source
    pub fn new(
        client: impl Into<ClientWithMiddleware>,
        token_url: reqwest::Url,
        credentials: Arc<dto::ClientCredentials>,
    ) -> Self {
        Self {
            client: client.into(),
            token_url,
            credentials,
            content_type: PhantomData,
        }
    }

    /// Constructs a client credentials source for the tenant described by
    /// `config`
    ///
    /// Fails if the domain or credentials are missing.
    pub fn from_configuration(
        client: impl Into<ClientWithMiddleware>,
        config: &Auth0Configuration,
    ) -> Result<Self, ConfigurationError> {
        let credentials = config.client_credentials()?;
        let token_url = uri::token_uri(&config.domain)?;
        Ok(Self::new(client, token_url, credentials))
    }
}

impl<T> ClientCredentialsTokenSource<T> {
    /// Configures the token source to send credentials to
    /// the authority as form data
    pub fn using_form_data(self) -> ClientCredentialsTokenSource<FormBody> {
        ClientCredentialsTokenSource {
            client: self.client,
            token_url: self.token_url,
            credentials: self.credentials,
            content_type: PhantomData,
        }
    }

    /// The URL that token requests are sent to
    pub fn token_url(&self) -> &reqwest::Url {
        &self.token_url
    }
}

#[async_trait]
impl<T: RequestType> AsyncTokenSource for ClientCredentialsTokenSource<T> {
    type Error = TokenRequestError;

    async fn request_token(&self, audience: &AudienceRef) -> Result<IssuedToken, Self::Error> {
        request_token::<T>(
            &self.client,
            self.token_url.clone(),
            &self.credentials,
            audience,
        )
        .await
    }
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest_middleware::Error),
}

#[tracing::instrument(
    err,
    skip(client, token_url, credentials, audience),
    fields(
        token_url = %token_url,
        credentials.grant_type = GRANT_TYPE,
        credentials.client_id = %credentials.client_id,
        audience = %audience,
    ),
)]
async fn request_token<T: RequestType>(
    client: &ClientWithMiddleware,
    token_url: reqwest::Url,
    credentials: &dto::ClientCredentials,
    audience: &AudienceRef,
) -> Result<IssuedToken, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let payload = dto::ClientCredentialsRequest::new(credentials, audience);
    let req = T::attach_payload(client.post(token_url), &payload);
    let resp = req.send().await.map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(lifetime = resp.expires_in.0, "received new access token");

    Ok(IssuedToken {
        access_token: resp.access_token,
        expires_in: resp.expires_in,
    })
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType: Send + Sync {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: RequestBuilder,
        payload: &S,
    ) -> RequestBuilder;
}

/// Attaches credentials to the request body as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Attaches credentials to the request body as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: RequestBuilder,
        payload: &S,
    ) -> RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: RequestBuilder,
        payload: &S,
    ) -> RequestBuilder {
        request.form(payload)
    }
}
