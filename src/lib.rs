//! Access Broker Library
//!
//! Resource access token broker: lets a client obtain short-lived, scoped
//! credentials for protected resources by sending the user through an OAuth2
//! identity broker, checking per-resource policy against the resulting
//! identity, and delegating credential minting to pluggable service adapters.
//!
//! # Features
//!
//! - **Persisted flow**: every request is a versioned record in a transactional store
//! - **Policy + audit**: each resource is checked, and each decision is logged
//! - **Adapters**: built-in opaque-token and aggregating adapters, pluggable registry
//! - **Single-use redemption**: credentials are minted once per authorization
//!
//! # Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`flow`] | the state machine (`begin_auth`, `complete_auth`, `redeem`) |
//! | [`locator`] | resource URL parsing and resolution |
//! | [`policy`] / [`audit`] | access decisions and their audit trail |
//! | [`adapter`] | credential minting backends |
//! | [`server`] | axum HTTP front-end |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod audit;
pub mod broker;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod flow;
pub mod locator;
pub mod policy;
pub mod server;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Config(format!("tracing already initialized: {e}")))
}
