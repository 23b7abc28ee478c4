//! Static consistency checks for a realm configuration.

use super::{RealmConfig, check_name};
use crate::adapter::{AdapterRegistry, resolve_aggregates};

/// Problems found in `cfg`, one message per problem.
///
/// Checks what the token flow would otherwise only report at request time:
/// names, service templates, adapters, default roles, service roles,
/// aggregate items and the default broker.
#[must_use]
pub fn lint_realm(cfg: &RealmConfig, registry: &AdapterRegistry, default_broker: &str) -> Vec<String> {
    let mut problems = Vec::new();

    match cfg.trusted_issuers.get(default_broker) {
        None => problems.push(format!("default broker {default_broker:?} is not a trusted issuer")),
        Some(issuer) if issuer.auth_url.is_empty() || issuer.token_url.is_empty() => {
            problems.push(format!("trusted issuer {default_broker:?} lacks auth_url or token_url"));
        }
        Some(_) => {}
    }

    for (resource_name, resource) in &cfg.resources {
        if let Err(e) = check_name(resource_name) {
            problems.push(format!("resource {resource_name:?}: {e}"));
        }
        for (view_name, view) in &resource.views {
            let at = format!("{resource_name}/{view_name}");
            if let Err(e) = check_name(view_name) {
                problems.push(format!("{at}: {e}"));
            }
            if !view.default_role.is_empty() && !view.has_role(&view.default_role) {
                problems.push(format!("{at}: default role {:?} is not declared", view.default_role));
            }

            let template = match cfg.view_template(view_name, view) {
                Ok(t) => t,
                Err(e) => {
                    problems.push(format!("{at}: {e}"));
                    continue;
                }
            };
            for role in view.roles.keys() {
                if !template.service_roles.contains_key(role) {
                    problems.push(format!(
                        "{at}: role {role:?} has no service role in template {:?}",
                        view.service_template
                    ));
                }
            }

            match registry.by_service_name(&template.service_name) {
                Ok(adapter) if adapter.supports_aggregation() => {
                    if let Err(e) = resolve_aggregates(resource_name, view_name, view, cfg, registry) {
                        problems.push(format!("{at}: {e}"));
                    }
                }
                Ok(_) => {}
                Err(e) => problems.push(format!("{at}: {e}")),
            }
        }
    }

    problems
}
