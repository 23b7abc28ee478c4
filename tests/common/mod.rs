//! Shared fixtures: a realm catalog, a scripted identity broker and a flow
//! wired to in-memory collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use access_broker::adapter::{AdapterAction, AdapterRegistry, MintResult, ServiceAdapter};
use access_broker::audit::RecordingAuditSink;
use access_broker::broker::{Identity, IdentityBroker};
use access_broker::catalog::{
    MemoryCatalog, PolicyRule, RealmConfig, Resource, ServiceRole, ServiceTemplate, StaticSecrets,
    TrustedIssuer, View, ViewItem, ViewRole,
};
use access_broker::clock::ManualClock;
use access_broker::config::ServiceConfig;
use access_broker::flow::{AuthRequest, ResourceTokenRequestState, TokenFlow, TokenType};
use access_broker::store::{MemoryBackend, Revision, Store};
use access_broker::{Error, Result};

pub const DOMAIN: &str = "https://dam.example.org";
pub const IC_ISSUER: &str = "https://ic.example.org";
pub const BROKER_CLIENT: &str = "dam-client";
pub const CLIENT_ID: &str = "client-app";
pub const START: i64 = 1_700_000_000;

/// Resource URL on this service. `interface: None` gives the legacy form.
pub fn resource_url(realm: &str, resource: &str, view: &str, role: &str, interface: Option<&str>) -> String {
    let base = format!("{DOMAIN}/dam/{realm}/resources/{resource}/views/{view}/roles/{role}");
    match interface {
        Some(i) => format!("{base}/interfaces/{i}"),
        None => base,
    }
}

/// `ds*/files/viewer` over the `http:api` interface.
pub fn files_url(resource: &str) -> String {
    resource_url("master", resource, "files", "viewer", Some("http:api"))
}

fn viewer_role(rules: Vec<PolicyRule>) -> BTreeMap<String, ViewRole> {
    BTreeMap::from([("viewer".to_string(), ViewRole { policies: rules })])
}

fn domain_rule() -> PolicyRule {
    PolicyRule {
        email_domain: Some("example.org".to_string()),
        ..PolicyRule::default()
    }
}

fn template(service_name: &str, interfaces: &[(&str, &str)]) -> ServiceTemplate {
    ServiceTemplate {
        service_name: service_name.to_string(),
        interfaces: interfaces
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        service_roles: BTreeMap::from([(
            "viewer".to_string(),
            ServiceRole {
                service_args: HashMap::from([("scopes".to_string(), vec!["read".to_string()])]),
                categories: vec!["metadata".to_string(), "list".to_string()],
            },
        )]),
    }
}

fn view(template: &str, rules: Vec<PolicyRule>, items: Vec<ViewItem>) -> View {
    View {
        service_template: template.to_string(),
        default_role: "viewer".to_string(),
        roles: viewer_role(rules),
        items,
        ..View::default()
    }
}

fn item(args: &[(&str, &str)]) -> ViewItem {
    ViewItem {
        args: args.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        ..ViewItem::default()
    }
}

fn resource(views: Vec<(&str, View)>) -> Resource {
    Resource {
        views: views.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        ..Resource::default()
    }
}

/// The `master` realm.
///
/// - `ds1`, `ds3`: open to `@example.org`
/// - `ds2`: restricted to group `admins`
/// - `multi`: template with interfaces `b` and `a`
/// - `bare`: template without interfaces
/// - `bundle/all`: aggregate over `ds1/files`
/// - `flaky/files`: served by the `flaky` adapter
pub fn realm() -> RealmConfig {
    let mut cfg = RealmConfig::default();
    cfg.trusted_issuers.insert(
        "default_ic".to_string(),
        TrustedIssuer {
            issuer: IC_ISSUER.to_string(),
            client_id: BROKER_CLIENT.to_string(),
            auth_url: format!("{IC_ISSUER}/authorize"),
            token_url: format!("{IC_ISSUER}/token"),
            userinfo_url: None,
        },
    );

    cfg.service_templates.insert(
        "api".to_string(),
        template("opaque_token", &[("http:api", "https://api.example.org/${dataset}")]),
    );
    cfg.service_templates.insert(
        "multi".to_string(),
        template("opaque_token", &[("b", "https://b"), ("a", "https://a")]),
    );
    cfg.service_templates.insert("bare".to_string(), template("opaque_token", &[]));
    cfg.service_templates.insert("bundle".to_string(), template("aggregate", &[]));
    cfg.service_templates.insert(
        "flaky".to_string(),
        template("flaky", &[("http:api", "https://flaky.example.org")]),
    );

    for name in ["ds1", "ds3"] {
        cfg.resources.insert(
            name.to_string(),
            resource(vec![(
                "files",
                view("api", vec![domain_rule()], vec![item(&[("dataset", name)])]),
            )]),
        );
    }
    cfg.resources.insert(
        "ds2".to_string(),
        resource(vec![(
            "files",
            view(
                "api",
                vec![PolicyRule {
                    group: Some("admins".to_string()),
                    ..PolicyRule::default()
                }],
                vec![item(&[("dataset", "ds2")])],
            ),
        )]),
    );
    cfg.resources.insert(
        "multi".to_string(),
        resource(vec![
            ("files", view("multi", vec![domain_rule()], Vec::new())),
            ("bare", view("bare", vec![domain_rule()], Vec::new())),
        ]),
    );
    cfg.resources.insert(
        "bundle".to_string(),
        resource(vec![(
            "all",
            view(
                "bundle",
                vec![domain_rule()],
                vec![item(&[("resource", "ds1"), ("view", "files")])],
            ),
        )]),
    );
    cfg.resources.insert(
        "flaky".to_string(),
        resource(vec![("files", view("flaky", vec![domain_rule()], Vec::new()))]),
    );
    cfg
}

/// The identity the scripted broker resolves every token to.
pub fn alice() -> Identity {
    Identity {
        id: "upstream-jti".to_string(),
        issuer: IC_ISSUER.to_string(),
        subject: "alice".to_string(),
        email: Some("alice@example.org".to_string()),
        groups: vec!["researchers".to_string()],
        identities: BTreeMap::from([(
            "alice@university.edu".to_string(),
            vec!["https://idp.university.edu".to_string()],
        )]),
    }
}

/// Broker that accepts any code except `bad`, and resolves every token to
/// [`alice`].
pub struct ScriptedBroker;

#[async_trait::async_trait]
impl IdentityBroker for ScriptedBroker {
    async fn exchange_code(
        &self,
        issuer: &TrustedIssuer,
        client_secret: &str,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<String> {
        assert_eq!(issuer.client_id, BROKER_CLIENT);
        assert_eq!(client_secret, "s3cret");
        if code == "bad" {
            return Err(Error::Unavailable("invalid_grant".to_string()));
        }
        Ok(format!("at-{code}"))
    }

    async fn resolve_identity(&self, _issuer: &TrustedIssuer, access_token: &str) -> Result<Identity> {
        if access_token == "at-anonymous" {
            return Err(Error::internal("token has no subject"));
        }
        Ok(alice())
    }
}

/// Adapter failing its first `failures` mints.
pub struct FlakyAdapter {
    failures: AtomicUsize,
}

#[async_trait::async_trait]
impl ServiceAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn mint(&self, _action: &AdapterAction<'_>) -> Result<MintResult> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::internal("backend quota exceeded"));
        }
        Ok(MintResult {
            credentials: BTreeMap::from([("api_key".to_string(), "flaky-key".to_string())]),
            ..MintResult::default()
        })
    }
}

pub struct Harness {
    pub flow: TokenFlow,
    pub catalog: MemoryCatalog,
    pub audit: RecordingAuditSink,
    pub clock: ManualClock,
    pub backend: Arc<MemoryBackend>,
    pub store: Store,
}

pub fn service_config() -> ServiceConfig {
    ServiceConfig {
        domain_url: DOMAIN.to_string(),
        default_broker: "default_ic".to_string(),
        ..ServiceConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with_secrets(HashMap::from([(BROKER_CLIENT.to_string(), "s3cret".to_string())]))
}

pub fn harness_with_secrets(secrets: HashMap<String, String>) -> Harness {
    let catalog = MemoryCatalog::new("master");
    catalog.put_realm("master", realm());
    let audit = RecordingAuditSink::new();
    let clock = ManualClock::new(START);
    let backend = Arc::new(MemoryBackend::new());
    let store = Store::new(backend.clone());

    let mut adapters = AdapterRegistry::with_builtins();
    adapters.register(Arc::new(FlakyAdapter {
        failures: AtomicUsize::new(1),
    }));

    let flow = TokenFlow::new(
        service_config(),
        store.clone(),
        Arc::new(catalog.clone()),
        Arc::new(StaticSecrets::new(secrets)),
        Arc::new(ScriptedBroker),
    )
    .with_adapters(adapters)
    .with_audit_sink(Arc::new(audit.clone()))
    .with_clock(Arc::new(clock.clone()));

    Harness {
        flow,
        catalog,
        audit,
        clock,
        backend,
        store,
    }
}

pub fn dataset_request(resources: Vec<String>) -> AuthRequest {
    AuthRequest {
        token_type: TokenType::Dataset,
        realm: String::new(),
        resources,
        ttl: Duration::from_secs(3600),
        client_id: CLIENT_ID.to_string(),
        response_key_file: false,
        challenge: "challenge-1".to_string(),
        redirect: "https://client.example.org/cb".to_string(),
        state: "caller-state".to_string(),
    }
}

pub fn endpoint_request() -> AuthRequest {
    AuthRequest {
        token_type: TokenType::Endpoint,
        realm: "master".to_string(),
        ..dataset_request(Vec::new())
    }
}

impl Harness {
    /// Begin and complete a dataset request; returns the state id.
    pub async fn authorize(&self, req: AuthRequest) -> String {
        let redirect = self.flow.begin_auth(req).await.unwrap();
        self.flow
            .complete_auth("code-1", &redirect.state_id)
            .await
            .unwrap();
        redirect.state_id
    }

    /// Stored request record.
    pub async fn record(&self, state_id: &str) -> Result<ResourceTokenRequestState> {
        let mut tx = self.store.begin(false).await?;
        tx.read(&ResourceTokenRequestState::key(state_id), Revision::Latest)
            .await
    }
}
