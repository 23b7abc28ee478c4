//! Access policy evaluation for dataset requests.
//!
//! # Design
//!
//! Each view role carries an ordered list of policy rules. A role is granted
//! when **any** rule matches the identity and allows the requested TTL. A
//! role without rules grants nothing.
//!
//! ## Match criteria
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `issuer` | Exact identity issuer |
//! | `subject` | Exact identity subject |
//! | `email_domain` | Email domain suffix (e.g., `"example.org"`) |
//! | `group` | Any group in the identity's `groups` list |
//! | `max_ttl` | Longest TTL the rule grants |
//!
//! All present fields must match for the rule to fire.
//!
//! Before any rule is consulted the identity's issuer must be one of the
//! realm's trusted issuers, and the client must be allowed on the resource.

use std::time::Duration;

use tracing::debug;

use crate::broker::Identity;
use crate::catalog::{PolicyRule, RealmConfig};
use crate::{Error, Result};

/// Decide whether `identity` may hold `role` on `resource`/`view` for `ttl`.
///
/// Missing resources, views or roles fail with `NotFound`; every other
/// rejection is `PermissionDenied`.
pub fn check_authorization(
    identity: &Identity,
    ttl: Duration,
    resource_name: &str,
    view_name: &str,
    role: &str,
    cfg: &RealmConfig,
    client_id: &str,
) -> Result<()> {
    let (resource, view) = cfg.resource_view(resource_name, view_name)?;
    let view_role = view.roles.get(role).ok_or_else(|| {
        Error::not_found(format!(
            "role {role:?} not found on resource {resource_name:?} view {view_name:?}"
        ))
    })?;

    if !resource.clients.is_empty() && !resource.clients.iter().any(|c| c == client_id) {
        return Err(Error::PermissionDenied(format!(
            "client {client_id:?} may not request resource {resource_name:?}"
        )));
    }

    if !is_trusted_issuer(&identity.issuer, cfg) {
        return Err(Error::PermissionDenied(format!(
            "identity issuer {:?} is not trusted",
            identity.issuer
        )));
    }

    let mut ttl_rejected = false;
    for rule in &view_role.policies {
        if !matches_rule(rule, identity) {
            continue;
        }
        if rule.max_ttl.is_some_and(|max| ttl > max) {
            ttl_rejected = true;
            continue;
        }
        debug!(
            subject = %identity.subject,
            resource = %resource_name,
            view = %view_name,
            role = %role,
            "Policy rule matched"
        );
        return Ok(());
    }

    if ttl_rejected {
        return Err(Error::PermissionDenied(format!(
            "requested TTL {} exceeds the policy maximum for role {role:?} on resource {resource_name:?} view {view_name:?}",
            humantime::format_duration(ttl)
        )));
    }
    Err(Error::PermissionDenied(format!(
        "identity {:?} does not satisfy the policy for role {role:?} on resource {resource_name:?} view {view_name:?}",
        identity.subject
    )))
}

fn is_trusted_issuer(issuer: &str, cfg: &RealmConfig) -> bool {
    let issuer = issuer.trim_end_matches('/');
    cfg.trusted_issuers
        .values()
        .any(|t| t.issuer.trim_end_matches('/') == issuer)
}

/// Evaluate whether an identity matches a rule's criteria.
fn matches_rule(rule: &PolicyRule, identity: &Identity) -> bool {
    if let Some(ref issuer) = rule.issuer {
        if identity.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return false;
        }
    }

    if let Some(ref subject) = rule.subject {
        if &identity.subject != subject {
            return false;
        }
    }

    if let Some(ref domain) = rule.email_domain {
        let email_domain = identity
            .email
            .as_deref()
            .and_then(|e| e.rsplit_once('@'))
            .map_or("", |(_, d)| d);
        if !email_domain.eq_ignore_ascii_case(domain) {
            return false;
        }
    }

    if let Some(ref group) = rule.group {
        if !identity.groups.iter().any(|g| g == group) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Resource, TrustedIssuer, View, ViewRole};
    use crate::error::ErrorKind;
    use std::collections::BTreeMap;

    const ISSUER: &str = "https://ic.example.org";

    fn config(rules: Vec<PolicyRule>, clients: Vec<String>) -> RealmConfig {
        let mut cfg = RealmConfig::default();
        cfg.trusted_issuers.insert(
            "default_ic".to_string(),
            TrustedIssuer {
                issuer: ISSUER.to_string(),
                ..TrustedIssuer::default()
            },
        );
        let view = View {
            roles: BTreeMap::from([("viewer".to_string(), ViewRole { policies: rules })]),
            ..View::default()
        };
        cfg.resources.insert(
            "ds".to_string(),
            Resource {
                views: BTreeMap::from([("files".to_string(), view)]),
                clients,
                ..Resource::default()
            },
        );
        cfg
    }

    fn alice() -> Identity {
        Identity {
            issuer: ISSUER.to_string(),
            subject: "alice".to_string(),
            email: Some("alice@example.org".to_string()),
            groups: vec!["researchers".to_string()],
            ..Identity::default()
        }
    }

    fn check(cfg: &RealmConfig, id: &Identity, ttl_secs: u64) -> Result<()> {
        check_authorization(id, Duration::from_secs(ttl_secs), "ds", "files", "viewer", cfg, "client-1")
    }

    #[test]
    fn domain_rule_grants_access() {
        let cfg = config(
            vec![PolicyRule { email_domain: Some("example.org".to_string()), ..PolicyRule::default() }],
            Vec::new(),
        );
        assert!(check(&cfg, &alice(), 3600).is_ok());
    }

    #[test]
    fn any_matching_rule_is_enough() {
        let cfg = config(
            vec![
                PolicyRule { subject: Some("bob".to_string()), ..PolicyRule::default() },
                PolicyRule { group: Some("researchers".to_string()), ..PolicyRule::default() },
            ],
            Vec::new(),
        );
        assert!(check(&cfg, &alice(), 60).is_ok());
    }

    #[test]
    fn all_criteria_of_a_rule_must_match() {
        let cfg = config(
            vec![PolicyRule {
                group: Some("researchers".to_string()),
                email_domain: Some("other.org".to_string()),
                ..PolicyRule::default()
            }],
            Vec::new(),
        );
        let err = check(&cfg, &alice(), 60).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn role_without_rules_denies() {
        let cfg = config(Vec::new(), Vec::new());
        assert_eq!(check(&cfg, &alice(), 60).unwrap_err().kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn ttl_above_rule_maximum_denies() {
        let cfg = config(
            vec![PolicyRule {
                subject: Some("alice".to_string()),
                max_ttl: Some(Duration::from_secs(3600)),
                ..PolicyRule::default()
            }],
            Vec::new(),
        );
        assert!(check(&cfg, &alice(), 3600).is_ok());
        let err = check(&cfg, &alice(), 3601).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn untrusted_issuer_denies() {
        let cfg = config(vec![PolicyRule::default()], Vec::new());
        let id = Identity { issuer: "https://evil.example".to_string(), ..alice() };
        assert_eq!(check(&cfg, &id, 60).unwrap_err().kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn client_allow_list_is_enforced() {
        let cfg = config(vec![PolicyRule::default()], vec!["other-client".to_string()]);
        let err = check(&cfg, &alice(), 60).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("client-1"));
    }

    #[test]
    fn unknown_role_or_resource_is_not_found() {
        let cfg = config(vec![PolicyRule::default()], Vec::new());
        let id = alice();
        let err = check_authorization(&id, Duration::from_secs(1), "ds", "files", "owner", &cfg, "c")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = check_authorization(&id, Duration::from_secs(1), "nope", "files", "viewer", &cfg, "c")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
