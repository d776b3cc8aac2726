//! Helpers that ensure Auth0 URLs are structured correctly
//!
//! Tenant domains are accepted in whatever shape they are configured with and
//! normalized to an `https` URL on the default port.
//!
//! ```
//! use auth0_tokens::uri;
//!
//! let url = uri::valid_management_uri("http://my-tenant.au.auth0.com").unwrap();
//! assert_eq!(url.as_str(), "https://my-tenant.au.auth0.com/api/v2/");
//! ```

use url::Url;

use crate::ConfigurationError;

const MANAGEMENT_API_PATH: &str = "/api/v2/";
const TOKEN_PATH: &str = "/oauth/token";

fn with_path(domain: &str, path: &str) -> Result<Url, ConfigurationError> {
    let domain = domain.trim();
    if domain.is_empty() {
        return Err(ConfigurationError::MissingDomain);
    }

    let invalid = || ConfigurationError::InvalidDomain {
        domain: domain.to_owned(),
    };

    let parsed = if domain.contains("://") {
        Url::parse(domain)
    } else {
        Url::parse(&format!("https://{}", domain))
    }
    .map_err(|_| invalid())?;

    let host = parsed.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
    let mut url = Url::parse(&format!("https://{}/", host)).map_err(|_| invalid())?;
    url.set_path(path);
    Ok(url)
}

/// Converts a domain into the tenant's root URL
///
/// `my-tenant.au.auth0.com` becomes `https://my-tenant.au.auth0.com/`.
pub fn valid_uri(domain: &str) -> Result<Url, ConfigurationError> {
    with_path(domain, "/")
}

/// Converts a domain into the tenant's Management API URL
///
/// The result doubles as the audience of Management API tokens.
pub fn valid_management_uri(domain: &str) -> Result<Url, ConfigurationError> {
    with_path(domain, MANAGEMENT_API_PATH)
}

/// Converts a domain into the tenant's token endpoint
pub fn token_uri(domain: &str) -> Result<Url, ConfigurationError> {
    with_path(domain, TOKEN_PATH)
}

/// Converts a naked domain into an `https` URL in string form
pub fn to_https_url(domain: &str) -> Result<String, ConfigurationError> {
    valid_uri(domain).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAINS: &[&str] = &[
        "hawxy.au.auth0.com",
        "hawxy.au.auth0.com/",
        "http://hawxy.au.auth0.com/",
        "https://hawxy.au.auth0.com/",
    ];

    #[test]
    fn management_uri_is_normalized() {
        for domain in DOMAINS {
            assert_eq!(
                valid_management_uri(domain).unwrap().as_str(),
                "https://hawxy.au.auth0.com/api/v2/",
                "domain: {}",
                domain
            );
        }
    }

    #[test]
    fn root_uri_is_normalized() {
        for domain in DOMAINS {
            assert_eq!(
                valid_uri(domain).unwrap().as_str(),
                "https://hawxy.au.auth0.com/",
                "domain: {}",
                domain
            );
        }
    }

    #[test]
    fn port_and_path_are_replaced() {
        let url = valid_management_uri("http://hawxy.au.auth0.com:8080/some/path?q=1").unwrap();
        assert_eq!(url.as_str(), "https://hawxy.au.auth0.com/api/v2/");
    }

    #[test]
    fn token_uri_points_at_oauth_endpoint() {
        assert_eq!(
            token_uri("hawxy.au.auth0.com").unwrap().as_str(),
            "https://hawxy.au.auth0.com/oauth/token"
        );
    }

    #[test]
    fn naked_domain_becomes_https_url() {
        assert_eq!(
            to_https_url("my-auth0-tenant.au.auth0.com").unwrap(),
            "https://my-auth0-tenant.au.auth0.com/"
        );
    }

    #[test]
    fn empty_domain_is_missing() {
        assert!(matches!(valid_uri(""), Err(ConfigurationError::MissingDomain)));
    }

    #[test]
    fn hostless_domain_is_invalid() {
        assert!(matches!(
            valid_uri("https://"),
            Err(ConfigurationError::InvalidDomain { .. })
        ));
    }
}
