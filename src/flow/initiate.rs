//! Authorization initiation.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ResourceTokenRequestState, TokenFlow, TokenType};
use crate::locator::{self, ResourceViewRole};
use crate::store::Revision;
use crate::{Error, Result};

/// A request to start authorization.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Dataset or endpoint
    pub token_type: TokenType,
    /// Realm of an endpoint request (empty: the default realm)
    pub realm: String,
    /// Resource URLs of a dataset request
    pub resources: Vec<String>,
    /// Requested credential lifetime
    pub ttl: Duration,
    /// Client application
    pub client_id: String,
    /// Deliver credentials as a key file
    pub response_key_file: bool,
    /// Consent flow token
    pub challenge: String,
    /// Client return URL
    pub redirect: String,
    /// Caller correlation token
    pub state: String,
}

/// Where to send the caller next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthRedirect {
    /// Broker authorization URL with all query parameters
    pub authorization_url: String,
    /// Broker client id
    pub client_id: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Callback URL on this service
    pub redirect_uri: String,
    /// Id of the persisted request, sent as the OAuth2 `state`
    pub state_id: String,
}

impl TokenFlow {
    /// Persist a new authorization request and build the broker redirect.
    ///
    /// Fails with `InvalidArgument` on bad input, `Conflict` when resources
    /// span realms, `NotFound` on unknown resources, and
    /// `FailedPrecondition` when the default broker is not usable.
    pub async fn begin_auth(&self, req: AuthRequest) -> Result<AuthRedirect> {
        let mut tx = self.store.begin(true).await?;

        if req.client_id.is_empty() {
            return Err(Error::invalid_argument("client_id is required"));
        }
        if req.ttl.is_zero() || req.ttl > self.service.max_ttl {
            return Err(Error::invalid_argument(format!(
                "ttl {} is outside (0, {}]",
                humantime::format_duration(req.ttl),
                humantime::format_duration(self.service.max_ttl)
            )));
        }

        let secrets = self.load_secrets().await?;

        let parsed = match req.token_type {
            TokenType::Dataset => {
                locator::parse_resource_urls(&req.resources, &self.service.domain_url)?
            }
            TokenType::Endpoint => Vec::new(),
        };
        let realm = match parsed.first() {
            Some(first) => first.realm.clone(),
            None if req.realm.is_empty() => self.default_realm.clone(),
            None => req.realm.clone(),
        };
        check_same_realm(&parsed, &realm)?;

        let cfg = self.catalog.load_config(&realm).await?;

        let broker_name = &self.service.default_broker;
        let issuer = cfg.trusted_issuers.get(broker_name).ok_or_else(|| {
            Error::FailedPrecondition(format!(
                "default broker {broker_name:?} is not a trusted issuer of realm {realm:?}"
            ))
        })?;
        if secrets.for_client(&issuer.client_id).is_none() {
            return Err(Error::FailedPrecondition(format!(
                "default broker {broker_name:?} has no client secret"
            )));
        }

        let resources = parsed
            .iter()
            .map(|rvr| locator::resolve(rvr, &cfg))
            .collect::<Result<Vec<_>>>()?;

        let scopes = req.token_type.scopes();
        let state_id = Uuid::new_v4().to_string();
        let redirect_uri = self.redirect_uri();
        let authorization_url =
            self.broker
                .authorization_url(issuer, &scopes, &redirect_uri, &state_id)?;

        let record = ResourceTokenRequestState {
            token_type: req.token_type,
            client_id: req.client_id,
            state: req.state,
            broker: broker_name.clone(),
            redirect: req.redirect,
            challenge: req.challenge,
            response_key_file: req.response_key_file,
            ttl_secs: req.ttl.as_secs(),
            resources,
            realm,
            epoch_seconds: self.clock.now_unix(),
            issuer: String::new(),
            subject: String::new(),
        };
        tx.write(
            &ResourceTokenRequestState::key(&state_id),
            Revision::Latest,
            &record,
        )?;
        tx.commit().await?;

        info!(
            state_id = %state_id,
            realm = %record.realm,
            token_type = ?record.token_type,
            resources = record.resources.len(),
            "Authorization request created"
        );

        Ok(AuthRedirect {
            authorization_url: authorization_url.to_string(),
            client_id: issuer.client_id.clone(),
            scopes,
            redirect_uri,
            state_id,
        })
    }
}

fn check_same_realm(resources: &[ResourceViewRole], realm: &str) -> Result<()> {
    if let Some(other) = resources.iter().find(|r| r.realm != realm) {
        warn!(realm = %realm, other = %other.realm, "Resources span realms");
        return Err(Error::Conflict(format!(
            "resource {:?} is in realm {:?}, not {realm:?}",
            other.url, other.realm
        )));
    }
    Ok(())
}
