//! Resource token authorization flow.
//!
//! # Phases
//!
//! ```text
//! begin_auth ──► identity broker ──► complete_auth ──► redeem
//!  (persist,       (user login)      (exchange code,    (mint credentials,
//!   redirect)                         check policy)      delete record)
//! ```
//!
//! Each phase runs in its own store transaction and re-reads the realm
//! configuration, so a catalog change between phases is always observed.
//! Endpoint requests end at `complete_auth`, which consumes the record.

mod callback;
mod initiate;
mod redeem;
mod state;
mod ttl;

use std::sync::Arc;

use crate::adapter::AdapterRegistry;
use crate::audit::{AuditSink, TracingAuditSink};
use crate::broker::IdentityBroker;
use crate::catalog::{BrokerSecrets, CatalogProvider, SecretsProvider};
use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::store::{DEFAULT_REALM, Store};
use crate::{Error, Result};

pub use callback::LoggedIn;
pub use initiate::{AuthRedirect, AuthRequest};
pub use redeem::{ResourceAccess, ResourceDescriptor, ResourceResults};
pub use state::{ResourceTokenRequestState, TokenType};
pub use ttl::parse_ttl;

/// Callback path registered with identity brokers.
pub const LOGGED_IN_PATH: &str = "/dam/oauth/v1alpha/loggedin";

/// The authorization state machine and its collaborators.
#[derive(Clone)]
pub struct TokenFlow {
    service: ServiceConfig,
    store: Store,
    catalog: Arc<dyn CatalogProvider>,
    secrets: Arc<dyn SecretsProvider>,
    broker: Arc<dyn IdentityBroker>,
    adapters: AdapterRegistry,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    default_realm: String,
}

impl TokenFlow {
    /// Flow with the built-in adapters, the tracing audit sink and the
    /// system clock.
    #[must_use]
    pub fn new(
        service: ServiceConfig,
        store: Store,
        catalog: Arc<dyn CatalogProvider>,
        secrets: Arc<dyn SecretsProvider>,
        broker: Arc<dyn IdentityBroker>,
    ) -> Self {
        Self {
            service,
            store,
            catalog,
            secrets,
            broker,
            adapters: AdapterRegistry::with_builtins(),
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            default_realm: DEFAULT_REALM.to_string(),
        }
    }

    /// Replace the adapter registry.
    #[must_use]
    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Replace the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Realm of endpoint requests that name none.
    #[must_use]
    pub fn with_default_realm(mut self, realm: impl Into<String>) -> Self {
        self.default_realm = realm.into();
        self
    }

    /// Service settings.
    #[must_use]
    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    /// Current Unix time by the flow's clock.
    #[must_use]
    pub fn now_unix(&self) -> i64 {
        self.clock.now_unix()
    }

    /// Absolute URL of the broker callback.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("{}{LOGGED_IN_PATH}", self.service.domain_url.trim_end_matches('/'))
    }

    async fn load_secrets(&self) -> Result<BrokerSecrets> {
        self.secrets
            .load_secrets()
            .await
            .map_err(|e| Error::unavailable(format!("loading broker secrets: {e}")))
    }
}
