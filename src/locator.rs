//! Resource locator. Turns resource URLs into validated references.
//!
//! Accepted paths, relative to `<domain_url>/dam/`:
//!
//! ```text
//! <realm>/resources/<resource>/views/<view>/roles/<role>/interfaces/<interface>
//! <realm>/resources/<resource>/views/<view>/roles/<role>             (legacy)
//! ```
//!
//! Parsing is grammar-only; [`resolve`] checks the reference against a realm
//! configuration and fills in defaults.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::{self, RealmConfig};
use crate::{Error, Result};

static RESOURCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"^([^\s/]*)/resources/([^\s/]+)/views/([^\s/]+)/roles/([^\s/]+)/interfaces/([^\s/]+)$",
    )
    .unwrap()
});

static LEGACY_RESOURCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^([^\s/]*)/resources/([^\s/]+)/views/([^\s/]+)/roles/([^\s/]+)$").unwrap()
});

/// A reference to one role on one view of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceViewRole {
    /// Realm the resource lives in
    pub realm: String,
    /// Resource name
    pub resource: String,
    /// View name
    pub view: String,
    /// Role name (empty until resolved when the URL names none)
    pub role: String,
    /// Interface name (empty until resolved for legacy URLs)
    pub interface: String,
    /// The URL as supplied by the caller
    pub url: String,
}

impl ResourceViewRole {
    /// Canonical `realm/resource/view/role` string
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}/{}/{}/{}", self.realm, self.resource, self.view, self.role)
    }
}

/// Parse resource URLs issued by the service at `domain_url`.
///
/// Fails with `InvalidArgument` on an empty list, a URL belonging to another
/// service, or a path matching neither grammar.
pub fn parse_resource_urls(list: &[String], domain_url: &str) -> Result<Vec<ResourceViewRole>> {
    if list.is_empty() {
        return Err(Error::invalid_argument("resource parameter not found"));
    }
    let base = domain_url.trim_end_matches('/');
    list.iter().map(|url| parse_one(url, base)).collect()
}

fn parse_one(url: &str, base: &str) -> Result<ResourceViewRole> {
    let rest = url
        .strip_prefix(base)
        .ok_or_else(|| Error::invalid_argument(format!("requested resource {url:?} not in this service")))?;
    let path = rest
        .strip_prefix("/dam/")
        .ok_or_else(|| Error::invalid_argument(format!("resource {url:?} has invalid format")))?;

    let (caps, interface) = if let Some(caps) = RESOURCE_PATH.captures(path) {
        let interface = caps[5].to_string();
        (caps, interface)
    } else if let Some(caps) = LEGACY_RESOURCE_PATH.captures(path) {
        (caps, String::new())
    } else {
        return Err(Error::invalid_argument(format!(
            "resource {url:?} has invalid format"
        )));
    };

    if caps[1].is_empty() {
        return Err(Error::invalid_argument(format!(
            "resource {url:?} does not name a realm"
        )));
    }

    Ok(ResourceViewRole {
        realm: caps[1].to_string(),
        resource: caps[2].to_string(),
        view: caps[3].to_string(),
        role: caps[4].to_string(),
        interface,
        url: url.to_string(),
    })
}

/// Validate a parsed reference against `cfg` and fill in defaults.
///
/// - empty role: the view's default role
/// - empty interface: the only interface of the view's service template, or
///   the lexicographically smallest one when several are declared
///
/// Unknown resources and views fail with `NotFound`; undeclared roles and
/// interfaces with `InvalidArgument`; a view pointing at a missing service
/// template with `Internal`.
pub fn resolve(rvr: &ResourceViewRole, cfg: &RealmConfig) -> Result<ResourceViewRole> {
    catalog::check_name(&rvr.resource)?;
    catalog::check_name(&rvr.view)?;

    let (_, view) = cfg.resource_view(&rvr.resource, &rvr.view)?;

    let role = if rvr.role.is_empty() {
        view.default_role.clone()
    } else {
        rvr.role.clone()
    };
    if !view.has_role(&role) {
        return Err(Error::invalid_argument(format!(
            "role {role:?} is not defined on resource {:?} view {:?}",
            rvr.resource, rvr.view
        )));
    }

    let template = cfg.view_template(&rvr.view, view)?;
    let interface = if rvr.interface.is_empty() {
        template.interfaces.keys().next().cloned().ok_or_else(|| {
            Error::invalid_argument(format!(
                "resource {:?} view {:?} declares no interfaces",
                rvr.resource, rvr.view
            ))
        })?
    } else {
        rvr.interface.clone()
    };
    if !template.interfaces.contains_key(&interface) {
        return Err(Error::invalid_argument(format!(
            "interface {interface:?} is not defined on resource {:?} view {:?} service template {:?}",
            rvr.resource, rvr.view, view.service_template
        )));
    }

    Ok(ResourceViewRole {
        role,
        interface,
        ..rvr.clone()
    })
}
