//! Persisted authorization request record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::locator::ResourceViewRole;
use crate::store::{RESOURCE_TOKEN_REQUEST_STATE, StoreKey};

/// Kind of authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    /// Scoped access to named resources; policy checked at callback
    Dataset,
    /// Identity assertion only; consumed by its single callback
    Endpoint,
}

impl TokenType {
    /// Scopes requested from the identity broker.
    #[must_use]
    pub fn scopes(self) -> Vec<String> {
        let scopes: &[&str] = match self {
            Self::Dataset => &["openid", "ga4gh_passport_v1", "identities", "account_admin"],
            Self::Endpoint => &["openid", "identities"],
        };
        scopes.iter().map(|s| (*s).to_string()).collect()
    }
}

/// An in-flight authorization request.
///
/// Created by `begin_auth`, authorized (dataset) or consumed (endpoint) by
/// `complete_auth`, and deleted by `redeem`. `issuer` and `subject` are set
/// together and only once the identity passed every policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTokenRequestState {
    /// Request kind
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Client application
    pub client_id: String,
    /// Caller correlation token, echoed back after the callback
    #[serde(default)]
    pub state: String,
    /// Trusted issuer acting as identity broker
    pub broker: String,
    /// Client return URL
    #[serde(default)]
    pub redirect: String,
    /// Consent flow token
    #[serde(default)]
    pub challenge: String,
    /// Whether credentials are requested as a key file
    #[serde(default)]
    pub response_key_file: bool,
    /// Requested credential lifetime in seconds
    pub ttl_secs: u64,
    /// Resolved resources, in request order
    #[serde(default)]
    pub resources: Vec<ResourceViewRole>,
    /// Realm shared by all resources
    pub realm: String,
    /// Creation time (unix seconds)
    pub epoch_seconds: i64,
    /// Identity issuer, set once authorized
    #[serde(default)]
    pub issuer: String,
    /// Identity subject, set once authorized
    #[serde(default)]
    pub subject: String,
}

impl ResourceTokenRequestState {
    /// Store key of the record with id `state_id`.
    #[must_use]
    pub fn key(state_id: &str) -> StoreKey {
        StoreKey::service(RESOURCE_TOKEN_REQUEST_STATE, state_id)
    }

    /// Requested TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Whether an identity has been bound to the request.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        !self.issuer.is_empty() && !self.subject.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ResourceTokenRequestState {
        ResourceTokenRequestState {
            token_type: TokenType::Dataset,
            client_id: "client".to_string(),
            state: "xyz".to_string(),
            broker: "default_ic".to_string(),
            redirect: "https://client/cb".to_string(),
            challenge: String::new(),
            response_key_file: false,
            ttl_secs: 3600,
            resources: Vec::new(),
            realm: "master".to_string(),
            epoch_seconds: 1_700_000_000,
            issuer: String::new(),
            subject: String::new(),
        }
    }

    #[test]
    fn authorized_requires_issuer_and_subject() {
        let mut r = record();
        assert!(!r.is_authorized());
        r.issuer = "https://ic".to_string();
        assert!(!r.is_authorized());
        r.subject = "alice".to_string();
        assert!(r.is_authorized());
    }

    #[test]
    fn token_type_serializes_upper_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["type"], "DATASET");
    }

    #[test]
    fn scopes_depend_on_token_type() {
        assert!(TokenType::Dataset.scopes().contains(&"ga4gh_passport_v1".to_string()));
        assert_eq!(
            TokenType::Endpoint.scopes(),
            vec!["openid".to_string(), "identities".to_string()]
        );
    }
}
