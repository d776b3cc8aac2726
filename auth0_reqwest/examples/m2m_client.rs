use std::time::Duration;

use auth0_reqwest::{AccessTokenConfig, Auth0Clients};
use auth0_tokens::{Auth0Configuration, Audience, ClientId, ClientSecret, ManagementTokenConfig};
use clap::Parser;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The Auth0 tenant domain, such as `my-tenant.au.auth0.com`
    #[clap(short, long, env = "AUTH0_DOMAIN")]
    domain: String,

    /// The client ID of the machine-to-machine application
    #[clap(short, long, env = "AUTH0_CLIENT_ID")]
    client_id: ClientId,

    /// The client secret of the machine-to-machine application
    #[clap(short = 's', long, env = "AUTH0_CLIENT_SECRET", hide_env_values = true)]
    client_secret: ClientSecret,

    /// An API to call with an access token for its own origin
    #[clap(short, long, env = "API_URL")]
    api_url: Option<reqwest::Url>,

    /// The audience of the API, if different from its origin
    #[clap(long, env = "API_AUDIENCE")]
    audience: Option<Audience>,

    /// Seconds between calls
    #[clap(short, long, env, default_value_t = 30)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let configuration = Auth0Configuration::new(opts.domain)
        .with_client_credentials(opts.client_id, opts.client_secret);
    let clients = Auth0Clients::new(configuration)?;

    let management = clients.management_client(&ManagementTokenConfig::default())?;

    let api = match (&opts.api_url, opts.audience) {
        (Some(_), Some(audience)) => {
            Some(clients.client_with_access_token(AccessTokenConfig::with_audience(audience))?)
        }
        (Some(_), None) => Some(clients.client_with_access_token(
            AccessTokenConfig::with_audience_resolver(
                auth0_reqwest::AudienceResolver::request_origin(),
            ),
        )?),
        (None, _) => None,
    };

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let resp = management.get("clients?fields=name&include_fields=true")?.send().await?;
        tracing::info!(status = %resp.status(), "called Management API");

        if let (Some(api), Some(url)) = (&api, &opts.api_url) {
            let resp = api.get(url.clone()).send().await?;
            tracing::info!(status = %resp.status(), %url, "called API");
        }

        if let Some(cache) = clients.token_cache() {
            let token = cache.get_management_token().await?;
            tracing::debug!(
                status = ?token.token_status(),
                stale = token.stale().0,
                expiry = token.expiry().0,
                "current management token"
            );
        }
    }
}
