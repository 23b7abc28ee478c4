//! Service adapters: pluggable backends that mint resource credentials.
//!
//! Every view is served by a service template, and every service template
//! names an adapter by its service name. The token flow looks the adapter up
//! in the [`AdapterRegistry`], assembles an [`AdapterAction`] and calls
//! [`ServiceAdapter::mint`].
//!
//! Aggregating adapters serve views composed of other views. For those the
//! flow first runs [`resolve_aggregates`] and hands the resulting sub-views
//! to the adapter inside the action.

mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::broker::Identity;
use crate::catalog::{RealmConfig, Resource, ServiceRole, ServiceTemplate, View};
use crate::{Error, Result};

pub use builtin::{AggregateAdapter, OpaqueTokenAdapter};

/// Token format requested when the caller wants a key file.
pub const JSON_TOKEN_FORMAT: &str = "application/json";

/// Whether a token format names a JSON document.
#[must_use]
pub fn is_json(format: &str) -> bool {
    let media = format.split(';').next().unwrap_or("").trim();
    media == JSON_TOKEN_FORMAT || media.ends_with("+json")
}

/// One sub-view of an aggregated view, with the adapter that serves it.
#[derive(Clone)]
pub struct AggregateView<'a> {
    /// Position of the item in the aggregating view
    pub index: usize,
    /// Sub-resource name
    pub resource_name: String,
    /// Sub-view name
    pub view_name: String,
    /// Sub-resource
    pub resource: &'a Resource,
    /// Sub-view
    pub view: &'a View,
    /// Service template of the sub-view
    pub service_template: &'a ServiceTemplate,
    /// Adapter serving the sub-view
    pub adapter: Arc<dyn ServiceAdapter>,
}

impl fmt::Debug for AggregateView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateView")
            .field("index", &self.index)
            .field("resource_name", &self.resource_name)
            .field("view_name", &self.view_name)
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

/// Everything an adapter needs to mint one credential.
#[derive(Debug, Clone)]
pub struct AdapterAction<'a> {
    /// Resolved sub-views (aggregating adapters only)
    pub aggregates: Vec<AggregateView<'a>>,
    /// Identity the credential is minted for
    pub identity: &'a Identity,
    /// Issuer URL of this service
    pub issuer: &'a str,
    /// Client the credential is delivered to
    pub client_id: &'a str,
    /// Realm configuration the action was assembled from
    pub config: &'a RealmConfig,
    /// Role granted on the view
    pub grant_role: &'a str,
    /// System maximum TTL
    pub max_ttl: Duration,
    /// Resource name
    pub resource_name: &'a str,
    /// Resource
    pub resource: &'a Resource,
    /// Backend-side meaning of `grant_role`
    pub service_role: &'a ServiceRole,
    /// Service template of the view
    pub service_template: &'a ServiceTemplate,
    /// Requested TTL, already capped at `max_ttl`
    pub ttl: Duration,
    /// View name
    pub view_name: &'a str,
    /// View
    pub view: &'a View,
    /// Requested output format (`Some(JSON_TOKEN_FORMAT)` for key files)
    pub token_format: Option<&'a str>,
}

/// Credentials produced by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MintResult {
    /// Credential values by name
    pub credentials: BTreeMap<String, String>,
    /// Informational labels
    pub labels: BTreeMap<String, String>,
    /// Format of the credentials, when not plain key/value pairs
    pub token_format: Option<String>,
}

/// A credential-minting backend.
#[async_trait::async_trait]
pub trait ServiceAdapter: Send + Sync + 'static {
    /// Service name used by service templates to select this adapter.
    fn name(&self) -> &str;

    /// Whether this adapter serves views composed of other views.
    fn supports_aggregation(&self) -> bool {
        false
    }

    /// Mint credentials for `action`.
    async fn mint(&self, action: &AdapterAction<'_>) -> Result<MintResult>;
}

/// Adapters by service name.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    by_service_name: HashMap<String, Arc<dyn ServiceAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in adapters.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpaqueTokenAdapter::new()));
        registry.register(Arc::new(AggregateAdapter));
        registry
    }

    /// Add or replace an adapter under its own name.
    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        self.by_service_name.insert(adapter.name().to_string(), adapter);
    }

    /// Adapter registered for `service_name`.
    ///
    /// A template naming an unknown adapter is an inconsistent catalog
    /// (`Internal`).
    pub fn by_service_name(&self, service_name: &str) -> Result<Arc<dyn ServiceAdapter>> {
        self.by_service_name
            .get(service_name)
            .cloned()
            .ok_or_else(|| Error::internal(format!("service adapter {service_name:?} is not registered")))
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_service_name.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Backend-side role for `role` on `view`.
pub fn resolve_service_role<'a>(
    role: &str,
    view_name: &str,
    view: &View,
    cfg: &'a RealmConfig,
) -> Result<&'a ServiceRole> {
    let template = cfg.view_template(view_name, view)?;
    template.service_roles.get(role).ok_or_else(|| {
        Error::internal(format!(
            "role {role:?} has no service role in service template {:?}",
            view.service_template
        ))
    })
}

/// Resolve the sub-views named by the items of an aggregating view.
///
/// Each item must carry `resource` and `view` arguments naming a view served
/// by a non-aggregating adapter. Anything else is an inconsistent catalog
/// (`Internal`).
pub fn resolve_aggregates<'a>(
    resource_name: &str,
    view_name: &str,
    view: &View,
    cfg: &'a RealmConfig,
    registry: &AdapterRegistry,
) -> Result<Vec<AggregateView<'a>>> {
    if view.items.is_empty() {
        return Err(Error::internal(format!(
            "aggregate view {resource_name:?}/{view_name:?} has no items"
        )));
    }

    view.items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let arg = |name: &str| {
                item.args.get(name).cloned().ok_or_else(|| {
                    Error::internal(format!(
                        "aggregate view {resource_name:?}/{view_name:?} item {index} is missing {name:?}"
                    ))
                })
            };
            let sub_resource_name = arg("resource")?;
            let sub_view_name = arg("view")?;

            let (sub_resource, sub_view) = cfg
                .resource_view(&sub_resource_name, &sub_view_name)
                .map_err(|e| Error::internal(format!("aggregate view {resource_name:?}/{view_name:?}: {e}")))?;
            let template = cfg.view_template(&sub_view_name, sub_view)?;
            let adapter = registry.by_service_name(&template.service_name)?;
            if adapter.supports_aggregation() {
                return Err(Error::internal(format!(
                    "aggregate view {resource_name:?}/{view_name:?} item {index} is itself an aggregate"
                )));
            }

            Ok(AggregateView {
                index,
                resource_name: sub_resource_name,
                view_name: sub_view_name,
                resource: sub_resource,
                view: sub_view,
                service_template: template,
                adapter,
            })
        })
        .collect()
}

/// URIs and labels exposed by one interface of a view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceUris {
    /// Concrete URIs
    pub uris: Vec<String>,
    /// Labels of the view
    pub labels: BTreeMap<String, String>,
}

/// Expand the interface URI templates of `template` over the items of `view`.
#[must_use]
pub fn view_interfaces(view: &View, template: &ServiceTemplate) -> BTreeMap<String, InterfaceUris> {
    template
        .interfaces
        .iter()
        .map(|(name, uri_template)| {
            let mut uris: Vec<String> = if view.items.is_empty() {
                vec![uri_template.clone()]
            } else {
                view.items
                    .iter()
                    .map(|item| expand_uri(uri_template, &item.args))
                    .collect()
            };
            uris.dedup();
            (
                name.clone(),
                InterfaceUris {
                    uris,
                    labels: view.labels.clone(),
                },
            )
        })
        .collect()
}

fn expand_uri(template: &str, args: &BTreeMap<String, String>) -> String {
    args.iter().fold(template.to_string(), |uri, (k, v)| {
        uri.replace(&format!("${{{k}}}"), v)
    })
}

/// Permission categories of `role` on `view`, sorted.
#[must_use]
pub fn role_categories(view: &View, role: &str, cfg: &RealmConfig) -> Vec<String> {
    let mut categories = cfg
        .service_templates
        .get(&view.service_template)
        .and_then(|t| t.service_roles.get(role))
        .map(|r| r.categories.clone())
        .unwrap_or_default();
    categories.sort();
    categories.dedup();
    categories
}
