//! Credential redemption.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use super::{ResourceTokenRequestState, TokenFlow};
use crate::adapter::{
    self, AdapterAction, InterfaceUris, JSON_TOKEN_FORMAT, MintResult, resolve_aggregates,
    resolve_service_role,
};
use crate::broker::Identity;
use crate::locator;
use crate::store::Revision;
use crate::{Error, Result};

/// Credential entry produced for a key-file request.
pub const KEY_FILE_CREDENTIAL: &str = "key_file";

/// What a granted resource exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    /// Interface name -> URIs
    pub interfaces: BTreeMap<String, InterfaceUris>,
    /// Permission categories of the granted role
    pub permissions: Vec<String>,
    /// Key of the matching entry in [`ResourceResults::access`]
    pub access: String,
}

/// Credentials minted for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAccess {
    /// Credential values by name
    pub credentials: BTreeMap<String, String>,
    /// Informational labels
    pub labels: BTreeMap<String, String>,
    /// Seconds until the credentials expire
    pub expires_in: u64,
}

/// Redemption response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceResults {
    /// Resource URL -> descriptor
    pub resources: BTreeMap<String, ResourceDescriptor>,
    /// Request order index -> credentials
    pub access: BTreeMap<String, ResourceAccess>,
    /// Creation time of the redeemed request
    pub epoch_seconds: i64,
}

impl TokenFlow {
    /// Mint credentials for every resource of an authorized request.
    ///
    /// Redemption is single use: the request is deleted in the same
    /// transaction, which commits only once every credential is minted.
    pub async fn redeem(&self, state_id: &str) -> Result<ResourceResults> {
        if state_id.is_empty() {
            return Err(Error::Unauthenticated("bearer token is required".to_string()));
        }

        let mut tx = self.store.begin(true).await?;
        let key = ResourceTokenRequestState::key(state_id);
        let record: ResourceTokenRequestState = tx.read(&key, Revision::Latest).await?;

        if !record.is_authorized() {
            return Err(Error::Unauthenticated("unauthorized".to_string()));
        }
        let age = self.clock.now_unix() - record.epoch_seconds;
        if age > self.service.max_request_age_secs {
            warn!(state_id = %state_id, age, "Redemption after authorization window");
            tx.delete(&key, Revision::Latest)?;
            if let Err(e) = tx.commit().await {
                warn!(state_id = %state_id, error = %e, "Failed to remove expired request");
            }
            return Err(Error::DeadlineExceeded("authorization expired".to_string()));
        }

        let realm = record
            .resources
            .first()
            .map(|r| r.realm.clone())
            .ok_or_else(|| Error::internal("authorized request names no resources"))?;
        if let Some(other) = record.resources.iter().find(|r| r.realm != realm) {
            return Err(Error::Conflict(format!(
                "resource {:?} is in realm {:?}, not {realm:?}",
                other.url, other.realm
            )));
        }
        let cfg = self.catalog.load_config(&realm).await?;

        let identity = Identity {
            issuer: record.issuer.clone(),
            subject: record.subject.clone(),
            ..Identity::default()
        };
        let issuer = self.service.issuer_string();
        let ttl = record.ttl().min(self.service.max_ttl);
        let token_format = record.response_key_file.then_some(JSON_TOKEN_FORMAT);

        let mut results = ResourceResults {
            resources: BTreeMap::new(),
            access: BTreeMap::new(),
            epoch_seconds: record.epoch_seconds,
        };
        for (index, stored) in record.resources.iter().enumerate() {
            let rvr = locator::resolve(stored, &cfg)?;
            let (resource, view) = cfg.resource_view(&rvr.resource, &rvr.view)?;
            let template = cfg.view_template(&rvr.view, view)?;
            let service_adapter = self.adapters.by_service_name(&template.service_name)?;
            let aggregates = if service_adapter.supports_aggregation() {
                resolve_aggregates(&rvr.resource, &rvr.view, view, &cfg, &self.adapters)?
            } else {
                Vec::new()
            };

            let action = AdapterAction {
                aggregates,
                identity: &identity,
                issuer: &issuer,
                client_id: &record.client_id,
                config: &cfg,
                grant_role: &rvr.role,
                max_ttl: self.service.max_ttl,
                resource_name: &rvr.resource,
                resource,
                service_role: resolve_service_role(&rvr.role, &rvr.view, view, &cfg)?,
                service_template: template,
                ttl,
                view_name: &rvr.view,
                view,
                token_format,
            };
            let mut minted = service_adapter.mint(&action).await.map_err(|e| {
                Error::unavailable(format!("minting credentials for {:?}: {e}", rvr.url))
            })?;

            let labels = std::mem::take(&mut minted.labels);
            let credentials = normalize_credentials(minted, record.response_key_file, &rvr.url)?;

            let access_key = index.to_string();
            results.resources.insert(
                rvr.url.clone(),
                ResourceDescriptor {
                    interfaces: adapter::view_interfaces(view, template),
                    permissions: adapter::role_categories(view, &rvr.role, &cfg),
                    access: access_key.clone(),
                },
            );
            results.access.insert(
                access_key,
                ResourceAccess {
                    credentials,
                    labels,
                    expires_in: ttl.as_secs(),
                },
            );
        }

        tx.delete(&key, Revision::Latest)?;
        tx.commit().await?;

        info!(
            state_id = %state_id,
            subject = %record.subject,
            realm = %realm,
            resources = results.access.len(),
            "Credentials redeemed"
        );
        Ok(results)
    }
}

/// Shape adapter output for the caller.
///
/// A key-file request needs a JSON document from the adapter, which is then
/// the only credential, under [`KEY_FILE_CREDENTIAL`].
fn normalize_credentials(
    minted: MintResult,
    key_file: bool,
    url: &str,
) -> Result<BTreeMap<String, String>> {
    if !key_file {
        return Ok(minted.credentials);
    }
    if !minted.token_format.as_deref().is_some_and(adapter::is_json) {
        return Err(Error::invalid_argument(format!(
            "resource {url:?} cannot be delivered as a key file"
        )));
    }
    let mut credentials = minted.credentials;
    let doc = credentials
        .remove("json")
        .ok_or_else(|| Error::internal(format!("adapter for {url:?} returned JSON without a document")))?;
    Ok(BTreeMap::from([(KEY_FILE_CREDENTIAL.to_string(), doc)]))
}
