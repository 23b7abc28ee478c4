//! Resource catalog: the per-realm configuration consumed by the token flow.
//!
//! A realm configuration declares:
//!
//! | Section | Meaning |
//! |---------|---------|
//! | `resources` | protected resources, each with named views |
//! | `service_templates` | how a view is served: adapter name, interfaces, service roles |
//! | `trusted_issuers` | identity brokers this realm accepts |
//!
//! The catalog is administered elsewhere; this crate only reads it. Every
//! load returns an owned snapshot so a request phase never observes a
//! configuration change halfway through.

mod lint;
mod provider;

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use lint::lint_realm;
pub use provider::{
    BrokerSecrets, CatalogProvider, FileCatalog, MemoryCatalog, SecretsProvider, StaticSecrets,
};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").unwrap()
});

/// Validate a resource or view name.
pub fn check_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!("invalid name {name:?}")))
    }
}

/// Configuration of a single realm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RealmConfig {
    /// Protected resources by name
    pub resources: BTreeMap<String, Resource>,
    /// Service templates by name
    pub service_templates: BTreeMap<String, ServiceTemplate>,
    /// Identity brokers by name
    pub trusted_issuers: BTreeMap<String, TrustedIssuer>,
}

/// A protected resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    /// Views of the resource by name
    pub views: BTreeMap<String, View>,
    /// Client ids allowed to request this resource (empty = any client)
    pub clients: Vec<String>,
    /// Informational labels
    pub labels: BTreeMap<String, String>,
}

/// One way of accessing a resource, bound to a service template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct View {
    /// Name of the service template serving this view
    pub service_template: String,
    /// Role granted when the request names none
    pub default_role: String,
    /// Roles by name
    pub roles: BTreeMap<String, ViewRole>,
    /// Concrete items (buckets, datasets, sub-views) the view covers
    pub items: Vec<ViewItem>,
    /// Informational labels
    pub labels: BTreeMap<String, String>,
}

impl View {
    /// Whether `role` is declared on this view
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }
}

/// Access policy attached to a view role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewRole {
    /// Rules granting this role; any matching rule grants it
    pub policies: Vec<PolicyRule>,
}

/// A single policy rule. All present criteria must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRule {
    /// Exact identity issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Exact identity subject
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Email domain (e.g. `"example.org"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_domain: Option<String>,
    /// Required group membership
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Longest TTL this rule grants
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_ttl: Option<Duration>,
}

/// An item of a view: template arguments plus labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewItem {
    /// Arguments substituted into interface URIs and handed to adapters
    pub args: BTreeMap<String, String>,
    /// Informational labels
    pub labels: BTreeMap<String, String>,
}

/// How a class of views is served.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceTemplate {
    /// Adapter service name
    pub service_name: String,
    /// Interface name -> URI template with `${arg}` placeholders
    pub interfaces: BTreeMap<String, String>,
    /// Role name -> service-side role
    pub service_roles: BTreeMap<String, ServiceRole>,
}

/// Backend-side meaning of a role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRole {
    /// Adapter-specific arguments (e.g. IAM roles, scopes)
    pub service_args: HashMap<String, Vec<String>>,
    /// Permission categories reported to clients
    pub categories: Vec<String>,
}

/// An OAuth2 identity broker trusted by the realm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustedIssuer {
    /// Issuer URL
    pub issuer: String,
    /// Client id this service is registered with at the broker
    pub client_id: String,
    /// Authorization endpoint
    pub auth_url: String,
    /// Token endpoint
    pub token_url: String,
    /// Userinfo endpoint (defaults to `<issuer>/userinfo`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_url: Option<String>,
}

impl TrustedIssuer {
    /// Effective userinfo endpoint
    #[must_use]
    pub fn userinfo_endpoint(&self) -> String {
        self.userinfo_url
            .clone()
            .unwrap_or_else(|| format!("{}/userinfo", self.issuer.trim_end_matches('/')))
    }
}

impl RealmConfig {
    /// Look up a resource and one of its views.
    ///
    /// Fails with `NotFound` when either is missing.
    pub fn resource_view(&self, resource: &str, view: &str) -> Result<(&Resource, &View)> {
        let res = self
            .resources
            .get(resource)
            .ok_or_else(|| Error::not_found(format!("resource not found: {resource:?}")))?;
        let v = res.views.get(view).ok_or_else(|| {
            Error::not_found(format!("view {view:?} not found for resource {resource:?}"))
        })?;
        Ok((res, v))
    }

    /// Service template of a view.
    ///
    /// A view naming an undefined template is an inconsistent catalog
    /// (`Internal`).
    pub fn view_template(&self, view_name: &str, view: &View) -> Result<&ServiceTemplate> {
        self.service_templates
            .get(&view.service_template)
            .ok_or_else(|| {
                Error::internal(format!(
                    "view {view_name:?} service template {:?} is not defined",
                    view.service_template
                ))
            })
    }
}
