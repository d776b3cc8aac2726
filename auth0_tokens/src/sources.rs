//! Token sources

use crate::{AccessToken, AudienceRef};
use aliri_clock::DurationSecs;
use async_trait::async_trait;
use std::{error, sync::Arc};

pub mod oauth2;

/// A token freshly issued by an authority, before any caching decisions
#[derive(Debug)]
pub struct IssuedToken {
    /// The access token
    pub access_token: AccessToken,
    /// The lifetime reported by the authority
    pub expires_in: DurationSecs,
}

/// An asynchronous source for tokens, keyed by audience
#[async_trait]
pub trait AsyncTokenSource: Send + Sync {
    /// The error type returned in the event that retrieving a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a token for `audience` from an asynchronous source
    async fn request_token(&self, audience: &AudienceRef) -> Result<IssuedToken, Self::Error>;
}

#[async_trait]
impl<T> AsyncTokenSource for Arc<T>
where
    T: AsyncTokenSource + ?Sized,
{
    type Error = T::Error;

    async fn request_token(&self, audience: &AudienceRef) -> Result<IssuedToken, Self::Error> {
        (**self).request_token(audience).await
    }
}
