//! reqwest-backed identity broker.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{Identity, IdentityBroker};
use crate::catalog::TrustedIssuer;
use crate::{Error, Result};

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Claims returned by the userinfo endpoint
#[derive(Debug, Deserialize)]
struct UserinfoClaims {
    sub: String,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    identities: BTreeMap<String, Vec<String>>,
}

/// Identity broker speaking OAuth2 over HTTP.
pub struct HttpIdentityBroker {
    http_client: Client,
}

impl HttpIdentityBroker {
    /// Broker using `http_client` for all requests.
    #[must_use]
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Broker with a default client (10s timeout).
    pub fn with_defaults() -> Result<Self> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self::new(http_client))
    }
}

#[async_trait::async_trait]
impl IdentityBroker for HttpIdentityBroker {
    async fn exchange_code(
        &self,
        issuer: &TrustedIssuer,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", issuer.client_id.as_str()),
            ("client_secret", client_secret),
        ];

        let response = self
            .http_client
            .post(&issuer.token_url)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::unavailable(format!(
                "token exchange failed: HTTP {status} - {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::unavailable(format!("failed to parse token response: {e}")))?;

        debug!(issuer = %issuer.issuer, "Exchanged authorization code");
        Ok(token.access_token)
    }

    async fn resolve_identity(&self, issuer: &TrustedIssuer, access_token: &str) -> Result<Identity> {
        let response = self
            .http_client
            .get(issuer.userinfo_endpoint())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Unauthenticated(format!("userinfo request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Unauthenticated(format!(
                "userinfo rejected the access token: HTTP {}",
                response.status()
            )));
        }

        let claims: UserinfoClaims = response
            .json()
            .await
            .map_err(|e| Error::Unauthenticated(format!("invalid userinfo response: {e}")))?;
        if claims.sub.is_empty() {
            return Err(Error::Unauthenticated("userinfo has no subject".to_string()));
        }

        if let Some(iss) = claims.iss.as_deref() {
            if iss != issuer.issuer {
                return Err(Error::Unauthenticated(format!(
                    "userinfo issuer {iss:?} does not match broker {:?}",
                    issuer.issuer
                )));
            }
        }

        Ok(Identity {
            id: claims.jti.unwrap_or_default(),
            issuer: issuer.issuer.clone(),
            subject: claims.sub,
            email: claims.email,
            groups: claims.groups,
            identities: claims.identities,
        })
    }
}
