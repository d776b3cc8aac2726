use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The client ID of an Auth0 machine-to-machine application
#[braid(serde)]
pub struct ClientId;

/// The client secret of an Auth0 machine-to-machine application
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// An access token issued by Auth0
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// The identifier of the API that a token grants access to
///
/// Tokens are cached per audience.
#[braid(serde)]
pub struct Audience;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_secret_is_hidden_by_default() {
        let secret = ClientSecret::from_static("super-secret-value");
        assert_eq!(format!("{:?}", secret), "***CLIENT SECRET***");
        assert_eq!(format!("{}", secret), "***CLIENT SECRET***");
    }

    #[test]
    fn access_token_reveals_a_prefix_when_asked() {
        let token = AccessToken::from_static("eyJhbGciOiJSUzI1NiJ9.payload.signature");
        assert_eq!(format!("{:#?}", token), "\"eyJhbGciOiJSUz…\"");
        assert_eq!(format!("{:#6}", token), "eyJhb…");
    }

    #[test]
    fn short_secrets_are_revealed_whole_in_alternate_mode() {
        let secret = ClientSecretRef::from_str("abc");
        assert_eq!(format!("{:#}", secret), "abc");
    }
}
