//! Cached Auth0 machine-to-machine access tokens
//!
//! Services calling APIs protected by Auth0 obtain access tokens through the
//! OAuth2 _client credentials_ grant. Those tokens are comparatively expensive
//! to issue and Auth0 rate limits the token endpoint, so they should be reused
//! for as long as they remain valid.
//!
//! [`Auth0TokenCache`] keeps one token per audience. A token is served from the
//! cache until it comes within a small safety buffer of its reported expiry, so
//! a request is never sent with a token that lapses mid-flight. The next
//! request for that audience then fetches a replacement. Concurrent requests
//! for an audience that has no valid token share a single fetch.
//!
//! # General flow
//!
//! On application start-up, load the tenant configuration and construct the
//! cache once. Configuration problems are reported immediately.
//!
//! ```
//! use auth0_tokens::{Auth0Configuration, Auth0TokenCache, Audience};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Auth0Configuration::new("my-tenant.au.auth0.com")
//!     .with_client_credentials("client-id", "client-secret");
//!
//! let cache = Auth0TokenCache::from_configuration(reqwest::Client::new(), &config)?;
//!
//! assert_eq!(
//!     cache.management_audience().as_str(),
//!     "https://my-tenant.au.auth0.com/api/v2/"
//! );
//!
//! let audience = Audience::from_static("https://api.example.com/");
//! # /* Commented out due to this trying to interact with the world.
//! let token = cache.get_token(&audience).await?;
//!
//! tracing::info!(
//!     token = format_args!("{:#?}", token.access_token()),
//!     expires = token.expiry().0,
//!     "obtained access token"
//! );
//! # */
//! # Ok(())
//! # }
//! ```
//!
//! The `auth0_reqwest` crate builds on this cache to attach tokens to outgoing
//! requests automatically.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod cache;
pub mod config;
pub mod sources;
mod tokens;
pub mod uri;

pub use braids::*;
pub use cache::{Auth0TokenCache, TokenCache, TokenCacheError};
pub use config::{Auth0Configuration, ConfigurationError, ManagementTokenConfig};
pub use tokens::{TokenLifetimeConfig, TokenStatus, TokenWithLifetime};
