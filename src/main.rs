//! Access Broker - resource access token broker
//!
//! OAuth2 identity brokering, per-resource policy and adapter-minted
//! short-lived credentials.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use access_broker::{
    adapter::AdapterRegistry,
    catalog::{FileCatalog, lint_realm},
    cli::{Cli, Command},
    config::Config,
    server::{build_flow, run_server},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckCatalog { realm }) => run_check_catalog(&config, realm.as_deref()).await,
        Some(Command::Serve) | None => run_broker(config).await,
    }
}

/// Run the HTTP server
async fn run_broker(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        domain_url = %config.service.domain_url,
        "Starting access broker"
    );

    let flow = match build_flow(&config) {
        Ok(flow) => flow,
        Err(e) => {
            error!("Failed to create token flow: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run_server(config, flow).await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Lint the catalog file and print every problem found
async fn run_check_catalog(config: &Config, realm: Option<&str>) -> ExitCode {
    let Some(path) = config.catalog.path.clone() else {
        eprintln!("catalog.path is not configured");
        return ExitCode::FAILURE;
    };
    let catalog = FileCatalog::new(path, config.catalog.default_realm.clone());

    let realms = match catalog.load_all().await {
        Ok(realms) => realms,
        Err(e) => {
            eprintln!("Failed to load catalog: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(r) = realm {
        if !realms.contains_key(r) {
            eprintln!("realm {r:?} is not declared in the catalog");
            return ExitCode::FAILURE;
        }
    }

    let registry = AdapterRegistry::with_builtins();
    let secrets = config.secrets.resolve();
    let mut failed = false;
    for (name, cfg) in realms.iter().filter(|(name, _)| realm.is_none_or(|r| r == name.as_str())) {
        let mut problems = lint_realm(cfg, &registry, &config.service.default_broker);
        if let Some(issuer) = cfg.trusted_issuers.get(&config.service.default_broker) {
            if !secrets.contains_key(&issuer.client_id) {
                problems.push(format!(
                    "no client secret for broker client {:?}",
                    issuer.client_id
                ));
            }
        }

        if problems.is_empty() {
            println!("realm {name}: ok ({} resources)", cfg.resources.len());
        } else {
            failed = true;
            println!("realm {name}: {} problem(s)", problems.len());
            for problem in &problems {
                println!("  - {problem}");
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
