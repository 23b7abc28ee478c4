//! Identity broker callback.

use serde::Serialize;
use tracing::{info, warn};

use super::{ResourceTokenRequestState, TokenFlow, TokenType};
use crate::audit::PolicyDecisionLog;
use crate::broker::Identity;
use crate::catalog::RealmConfig;
use crate::policy;
use crate::store::Revision;
use crate::{Error, Result};

/// Outcome of a successful callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedIn {
    /// Request kind
    pub token_type: TokenType,
    /// Id to redeem credentials with (dataset requests only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_id: Option<String>,
    /// Authenticated subject
    pub subject: String,
    /// Consent flow token of the request
    pub challenge: String,
    /// Subject followed by linked identity names (endpoint requests only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
    /// Client return URL
    pub redirect: String,
    /// Caller correlation token
    pub state: String,
}

impl TokenFlow {
    /// Finish authorization for request `state_id` with the broker's code.
    ///
    /// Dataset requests are authorized only if every resource passes policy;
    /// endpoint requests are consumed.
    pub async fn complete_auth(&self, code: &str, state_id: &str) -> Result<LoggedIn> {
        if code.is_empty() {
            return Err(Error::invalid_argument("authorization code is required"));
        }
        if state_id.is_empty() {
            return Err(Error::invalid_argument("state is required"));
        }

        let mut tx = self.store.begin(true).await?;
        let key = ResourceTokenRequestState::key(state_id);
        let mut record: ResourceTokenRequestState = tx.read(&key, Revision::Latest).await?;
        if record.is_authorized() {
            warn!(state_id = %state_id, "Callback for an already authorized request");
            return Err(Error::Conflict("request already authorized".to_string()));
        }

        let secrets = self.load_secrets().await?;
        let cfg = self.catalog.load_config(&record.realm).await?;
        let issuer = cfg.trusted_issuers.get(&record.broker).ok_or_else(|| {
            Error::invalid_argument(format!("broker {:?} is not a trusted issuer", record.broker))
        })?;
        let secret = secrets.for_client(&issuer.client_id).ok_or_else(|| {
            Error::invalid_argument(format!("broker {:?} has no client secret", record.broker))
        })?;

        let access_token = self
            .broker
            .exchange_code(issuer, secret, code, &self.redirect_uri())
            .await
            .map_err(Error::into_unavailable)?;
        let identity = self
            .broker
            .resolve_identity(issuer, &access_token)
            .await
            .map_err(|e| match e {
                Error::Unauthenticated(_) => e,
                other => Error::Unauthenticated(format!("resolving identity: {other}")),
            })?;

        match record.token_type {
            TokenType::Dataset => {
                self.authorize_resources(&identity, &record, &cfg)?;
                record.issuer.clone_from(&identity.issuer);
                record.subject.clone_from(&identity.subject);
                tx.write(&key, Revision::Latest, &record)?;
                tx.commit().await?;

                info!(state_id = %state_id, subject = %identity.subject, realm = %record.realm, "Dataset request authorized");
                Ok(LoggedIn {
                    token_type: record.token_type,
                    state_id: Some(state_id.to_string()),
                    subject: identity.subject,
                    challenge: record.challenge,
                    identities: Vec::new(),
                    redirect: record.redirect,
                    state: record.state,
                })
            }
            TokenType::Endpoint => {
                tx.delete(&key, Revision::Latest)?;
                tx.commit().await?;

                let identities = std::iter::once(identity.subject.clone())
                    .chain(identity.identities.keys().cloned())
                    .collect();
                info!(state_id = %state_id, subject = %identity.subject, "Endpoint request consumed");
                Ok(LoggedIn {
                    token_type: record.token_type,
                    state_id: None,
                    subject: identity.subject,
                    challenge: record.challenge,
                    identities,
                    redirect: record.redirect,
                    state: record.state,
                })
            }
        }
    }

    /// Check policy for every resource in order, auditing each decision and
    /// stopping at the first denial. A resource outside the request's realm
    /// fails the whole request before any policy is evaluated.
    fn authorize_resources(
        &self,
        identity: &Identity,
        record: &ResourceTokenRequestState,
        cfg: &RealmConfig,
    ) -> Result<()> {
        if let Some(rvr) = record.resources.iter().find(|r| r.realm != record.realm) {
            return Err(Error::Conflict(format!(
                "resource {:?} is in realm {:?}, not {:?}",
                rvr.url, rvr.realm, record.realm
            )));
        }

        let ttl = record.ttl();
        for rvr in &record.resources {
            let decision = policy::check_authorization(
                identity,
                ttl,
                &rvr.resource,
                &rvr.view,
                &rvr.role,
                cfg,
                &record.client_id,
            );
            self.audit.write_policy_decision(&PolicyDecisionLog::new(
                identity,
                rvr.canonical(),
                ttl,
                decision.as_ref().map(|_| ()),
            ));

            if let Err(e) = decision {
                warn!(subject = %identity.subject, resource = %rvr.canonical(), error = %e, "Policy check failed");
                return Err(e);
            }
        }
        Ok(())
    }
}
