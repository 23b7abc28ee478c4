//! Configuration management

use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// `${VAR}` or `${VAR:-default}`
static ENV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap()
});

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Token flow configuration
    pub service: ServiceConfig,
    /// Resource catalog location
    pub catalog: CatalogConfig,
    /// Broker client secrets
    pub secrets: SecretsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Token flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Public base URL of this service; resource URLs must start with it
    pub domain_url: String,
    /// Issuer URL handed to adapters (defaults to `domain_url`)
    pub issuer: Option<String>,
    /// Trusted issuer used as the identity broker for new requests
    pub default_broker: String,
    /// TTL used when the caller does not ask for one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Upper bound for requested and minted TTLs
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
    /// Seconds an authorized request stays redeemable
    pub max_request_age_secs: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            domain_url: "http://localhost:8081".to_string(),
            issuer: None,
            default_broker: "default_ic".to_string(),
            default_ttl: Duration::from_secs(60 * 60),
            max_ttl: Duration::from_secs(90 * 24 * 60 * 60),
            max_request_age_secs: 300,
        }
    }
}

impl ServiceConfig {
    /// Issuer string passed to adapters
    #[must_use]
    pub fn issuer_string(&self) -> String {
        self.issuer
            .clone()
            .unwrap_or_else(|| self.domain_url.trim_end_matches('/').to_string())
    }
}

/// Resource catalog location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// YAML file with `realms: { <name>: <realm config> }`
    pub path: Option<PathBuf>,
    /// Realm whose configuration applies when a realm has no entry of its own
    pub default_realm: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            default_realm: "master".to_string(),
        }
    }
}

/// Broker client secrets
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecretsConfig {
    /// Broker client id -> client secret (supports `env:VAR_NAME`)
    pub broker_client_secrets: HashMap<String, String>,
}

impl SecretsConfig {
    /// Resolve every secret, expanding `env:VAR_NAME` references
    #[must_use]
    pub fn resolve(&self) -> HashMap<String, String> {
        self.broker_client_secrets
            .iter()
            .map(|(client_id, secret)| {
                let value = if let Some(var_name) = secret.strip_prefix("env:") {
                    env::var(var_name).unwrap_or_else(|_| secret.clone())
                } else {
                    secret.clone()
                };
                (client_id.clone(), value)
            })
            .collect()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("ACCESS_BROKER_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let svc = &self.service;
        if svc.domain_url.trim().is_empty() {
            return Err(Error::Config("service.domain_url must be set".to_string()));
        }
        if svc.default_broker.trim().is_empty() {
            return Err(Error::Config(
                "service.default_broker must be set".to_string(),
            ));
        }
        if svc.default_ttl > svc.max_ttl {
            return Err(Error::Config(format!(
                "service.default_ttl ({}) exceeds service.max_ttl ({})",
                humantime::format_duration(svc.default_ttl),
                humantime::format_duration(svc.max_ttl)
            )));
        }
        if svc.max_request_age_secs <= 0 {
            return Err(Error::Config(
                "service.max_request_age_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in URL values
    fn expand_env_vars(&mut self) {
        self.service.domain_url = expand_string(&ENV_PATTERN, &self.service.domain_url);
        if let Some(issuer) = self.service.issuer.as_mut() {
            *issuer = expand_string(&ENV_PATTERN, issuer);
        }
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}
