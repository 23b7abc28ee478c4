//! Catalog and secrets sources.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use super::RealmConfig;
use crate::{Error, Result};

/// Read-only source of realm configuration.
///
/// Called once per request phase; implementations must not hand out state
/// shared with a later phase.
#[async_trait::async_trait]
pub trait CatalogProvider: Send + Sync + 'static {
    /// Load the configuration that applies to `realm`.
    async fn load_config(&self, realm: &str) -> Result<RealmConfig>;
}

/// Client secrets for the identity brokers, keyed by broker client id.
#[derive(Debug, Clone, Default)]
pub struct BrokerSecrets {
    /// Client id -> client secret
    pub client_secrets: HashMap<String, String>,
}

impl BrokerSecrets {
    /// Secret registered for `client_id`
    #[must_use]
    pub fn for_client(&self, client_id: &str) -> Option<&str> {
        self.client_secrets.get(client_id).map(String::as_str)
    }
}

/// Source of broker client secrets.
#[async_trait::async_trait]
pub trait SecretsProvider: Send + Sync + 'static {
    /// Load the current broker secrets.
    async fn load_secrets(&self) -> Result<BrokerSecrets>;
}

/// Secrets fixed at startup.
pub struct StaticSecrets {
    secrets: BrokerSecrets,
}

impl StaticSecrets {
    /// Wrap a client id -> secret map.
    #[must_use]
    pub fn new(client_secrets: HashMap<String, String>) -> Self {
        Self {
            secrets: BrokerSecrets { client_secrets },
        }
    }
}

#[async_trait::async_trait]
impl SecretsProvider for StaticSecrets {
    async fn load_secrets(&self) -> Result<BrokerSecrets> {
        Ok(self.secrets.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    realms: BTreeMap<String, RealmConfig>,
}

fn pick_realm(
    mut realms: BTreeMap<String, RealmConfig>,
    realm: &str,
    default_realm: &str,
) -> Result<RealmConfig> {
    if let Some(cfg) = realms.remove(realm) {
        return Ok(cfg);
    }
    realms
        .remove(default_realm)
        .ok_or_else(|| Error::not_found(format!("configuration for realm {realm:?} not found")))
}

/// Catalog read from a YAML file on every load.
///
/// Edits to the file take effect on the next request phase without restart.
pub struct FileCatalog {
    path: PathBuf,
    default_realm: String,
}

impl FileCatalog {
    /// Catalog backed by `path`; realms without an entry use `default_realm`.
    #[must_use]
    pub fn new(path: PathBuf, default_realm: impl Into<String>) -> Self {
        Self {
            path,
            default_realm: default_realm.into(),
        }
    }

    /// Every realm declared in the file.
    pub async fn load_all(&self) -> Result<BTreeMap<String, RealmConfig>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::unavailable(format!("reading catalog {}: {e}", self.path.display())))?;
        let file: CatalogFile = serde_yaml::from_str(&raw)
            .map_err(|e| Error::internal(format!("parsing catalog {}: {e}", self.path.display())))?;
        Ok(file.realms)
    }
}

#[async_trait::async_trait]
impl CatalogProvider for FileCatalog {
    async fn load_config(&self, realm: &str) -> Result<RealmConfig> {
        let realms = self.load_all().await?;
        debug!(realm = %realm, path = %self.path.display(), "Loaded catalog");
        pick_realm(realms, realm, &self.default_realm)
    }
}

/// In-memory catalog that can be edited while the service runs.
#[derive(Clone)]
pub struct MemoryCatalog {
    realms: Arc<RwLock<BTreeMap<String, RealmConfig>>>,
    default_realm: String,
}

impl MemoryCatalog {
    /// Empty catalog; realms without an entry use `default_realm`.
    #[must_use]
    pub fn new(default_realm: impl Into<String>) -> Self {
        Self {
            realms: Arc::new(RwLock::new(BTreeMap::new())),
            default_realm: default_realm.into(),
        }
    }

    /// Replace the configuration of `realm`.
    pub fn put_realm(&self, realm: impl Into<String>, cfg: RealmConfig) {
        self.realms.write().insert(realm.into(), cfg);
    }

    /// Edit the configuration of `realm` in place.
    pub fn update_realm(&self, realm: &str, f: impl FnOnce(&mut RealmConfig)) {
        if let Some(cfg) = self.realms.write().get_mut(realm) {
            f(cfg);
        }
    }
}

#[async_trait::async_trait]
impl CatalogProvider for MemoryCatalog {
    async fn load_config(&self, realm: &str) -> Result<RealmConfig> {
        let snapshot = self.realms.read().clone();
        pick_realm(snapshot, realm, &self.default_realm)
    }
}
