//! Identity broker client: OAuth2 authorization-code flow against a
//! trusted issuer, and resolution of the resulting access token into an
//! [`Identity`].
//!
//! The flow only depends on the [`IdentityBroker`] trait; [`HttpIdentityBroker`]
//! is the production implementation.

mod http;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::catalog::TrustedIssuer;
use crate::{Error, Result};

pub use http::HttpIdentityBroker;

/// Canonical identity resolved from an upstream access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Token id (`jti`) of the upstream token, when present
    #[serde(default)]
    pub id: String,
    /// Issuer URL
    pub issuer: String,
    /// Subject at the issuer
    pub subject: String,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,
    /// Linked identities: identity name -> issuers asserting it
    #[serde(default)]
    pub identities: BTreeMap<String, Vec<String>>,
}

/// OAuth2 identity broker operations used by the token flow.
#[async_trait::async_trait]
pub trait IdentityBroker: Send + Sync + 'static {
    /// Build the URL the caller is redirected to for authorization.
    fn authorization_url(
        &self,
        issuer: &TrustedIssuer,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
    ) -> Result<Url> {
        let mut url = Url::parse(&issuer.auth_url).map_err(|e| {
            Error::internal(format!("invalid authorization endpoint {:?}: {e}", issuer.auth_url))
        })?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &issuer.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("state", state);
            if !scopes.is_empty() {
                params.append_pair("scope", &scopes.join(" "));
            }
        }
        Ok(url)
    }

    /// Exchange an authorization code for an upstream access token.
    async fn exchange_code(
        &self,
        issuer: &TrustedIssuer,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String>;

    /// Resolve an upstream access token into an identity.
    async fn resolve_identity(&self, issuer: &TrustedIssuer, access_token: &str) -> Result<Identity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopBroker;

    #[async_trait::async_trait]
    impl IdentityBroker for NoopBroker {
        async fn exchange_code(&self, _: &TrustedIssuer, _: &str, _: &str, _: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn resolve_identity(&self, _: &TrustedIssuer, _: &str) -> Result<Identity> {
            Ok(Identity::default())
        }
    }

    #[test]
    fn authorization_url_carries_oauth_parameters() {
        let issuer = TrustedIssuer {
            issuer: "https://ic.example.org".to_string(),
            client_id: "dam-client".to_string(),
            auth_url: "https://ic.example.org/authorize".to_string(),
            token_url: "https://ic.example.org/token".to_string(),
            userinfo_url: None,
        };

        let url = NoopBroker
            .authorization_url(
                &issuer,
                &["openid".to_string(), "identities".to_string()],
                "https://dam.example.org/dam/oauth/v1alpha/loggedin",
                "state-123",
            )
            .unwrap();

        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "dam-client");
        assert_eq!(pairs["state"], "state-123");
        assert_eq!(pairs["scope"], "openid identities");
        assert_eq!(
            pairs["redirect_uri"],
            "https://dam.example.org/dam/oauth/v1alpha/loggedin"
        );
    }

    #[test]
    fn invalid_auth_url_is_internal() {
        let issuer = TrustedIssuer {
            auth_url: "not a url".to_string(),
            ..TrustedIssuer::default()
        };
        let err = NoopBroker.authorization_url(&issuer, &[], "x", "y").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }
}
