//! Adapters shipped with the broker.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use serde_json::json;
use tracing::debug;

use super::{AdapterAction, JSON_TOKEN_FORMAT, MintResult, ServiceAdapter, resolve_service_role};
use crate::Result;

/// Mints random opaque bearer tokens.
///
/// Format: `abt_<43-char URL-safe base64>` (256 bits of entropy). When a key
/// file is requested the token is wrapped in a JSON document under the
/// `json` credential.
#[derive(Debug, Default)]
pub struct OpaqueTokenAdapter {
    _priv: (),
}

impl OpaqueTokenAdapter {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a random bearer value.
    #[must_use]
    pub fn generate_bearer() -> String {
        let random_bytes: [u8; 32] = rand::rng().random();
        format!("abt_{}", URL_SAFE_NO_PAD.encode(random_bytes))
    }
}

#[async_trait::async_trait]
impl ServiceAdapter for OpaqueTokenAdapter {
    fn name(&self) -> &str {
        "opaque_token"
    }

    async fn mint(&self, action: &AdapterAction<'_>) -> Result<MintResult> {
        let token = Self::generate_bearer();
        let ttl = action.ttl.as_secs();

        let mut labels = BTreeMap::from([
            ("resource".to_string(), action.resource_name.to_string()),
            ("view".to_string(), action.view_name.to_string()),
            ("role".to_string(), action.grant_role.to_string()),
        ]);
        if let Some(scopes) = action.service_role.service_args.get("scopes") {
            labels.insert("scopes".to_string(), scopes.join(" "));
        }

        debug!(
            resource = %action.resource_name,
            view = %action.view_name,
            subject = %action.identity.subject,
            ttl,
            "Minted opaque token"
        );

        if action.token_format == Some(JSON_TOKEN_FORMAT) {
            let key_file = json!({
                "type": "opaque_token",
                "token": token,
                "issuer": action.issuer,
                "subject": action.identity.subject,
                "client_id": action.client_id,
                "expires_in": ttl,
            });
            return Ok(MintResult {
                credentials: BTreeMap::from([("json".to_string(), key_file.to_string())]),
                labels,
                token_format: Some(JSON_TOKEN_FORMAT.to_string()),
            });
        }

        Ok(MintResult {
            credentials: BTreeMap::from([
                ("access_token".to_string(), token),
                ("token_type".to_string(), "Bearer".to_string()),
            ]),
            labels,
            token_format: None,
        })
    }
}

/// Serves aggregated views by minting one credential per sub-view.
///
/// Sub-view credentials are merged under `<resource>/<view>/<name>` keys. The
/// merged result is never a single document, so key files are not offered.
#[derive(Debug, Default)]
pub struct AggregateAdapter;

#[async_trait::async_trait]
impl ServiceAdapter for AggregateAdapter {
    fn name(&self) -> &str {
        "aggregate"
    }

    fn supports_aggregation(&self) -> bool {
        true
    }

    async fn mint(&self, action: &AdapterAction<'_>) -> Result<MintResult> {
        let mut out = MintResult::default();

        for agg in &action.aggregates {
            let service_role =
                resolve_service_role(action.grant_role, &agg.view_name, agg.view, action.config)?;
            let sub_action = AdapterAction {
                aggregates: Vec::new(),
                resource_name: &agg.resource_name,
                resource: agg.resource,
                service_role,
                service_template: agg.service_template,
                view_name: &agg.view_name,
                view: agg.view,
                token_format: None,
                ..action.clone()
            };
            let result = agg.adapter.mint(&sub_action).await?;

            let prefix = format!("{}/{}", agg.resource_name, agg.view_name);
            for (k, v) in result.credentials {
                out.credentials.insert(format!("{prefix}/{k}"), v);
            }
            for (k, v) in result.labels {
                out.labels.insert(format!("{prefix}/{k}"), v);
            }
        }

        Ok(out)
    }
}
