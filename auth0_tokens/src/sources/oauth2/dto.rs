//! DTOs for interacting with the Auth0 token endpoint

use aliri_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AudienceRef, ClientId, ClientSecret};

/// Client credentials of a machine-to-machine application
#[derive(Debug, Serialize)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,
}

/// A client credentials grant for a single audience
#[derive(Debug, Serialize)]
pub(super) struct ClientCredentialsRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientId,
    pub client_secret: &'a ClientSecret,
    pub audience: &'a AudienceRef,
}

impl<'a> ClientCredentialsRequest<'a> {
    pub(super) fn new(credentials: &'a ClientCredentials, audience: &'a AudienceRef) -> Self {
        Self {
            grant_type: super::GRANT_TYPE,
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            audience,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    pub expires_in: DurationSecs,
}
