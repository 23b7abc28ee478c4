//! HTTP front-end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness |
//! | `GET` | `/dam` | Service name, API versions, start time |
//! | `GET` | `/dam/checkout/auth` | Start a dataset request, 307 to the identity broker |
//! | `GET` | `/dam/endpoint/auth` | Start an endpoint request, 307 to the identity broker |
//! | `GET` | `/dam/oauth/v1alpha/loggedin` | Identity broker callback |
//! | `POST` | `/dam/checkout` | Redeem credentials (`Authorization: Bearer <state id>`) |
//!
//! Errors are returned as `{"code": "<KIND>", "message": "..."}` with the
//! kind's HTTP status.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, RawQuery, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::broker::HttpIdentityBroker;
use crate::catalog::{FileCatalog, StaticSecrets};
use crate::config::Config;
use crate::flow::{
    AuthRequest, LOGGED_IN_PATH, LoggedIn, ResourceResults, TokenFlow, TokenType, parse_ttl,
};
use crate::store::Store;
use crate::{Error, Result};

/// Response type requesting credentials as a key file.
pub const KEY_FILE_RESPONSE_TYPE: &str = "key-file-type";

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = ?kind, error = %self, "Request failed");
        }
        (status, Json(json!({"code": kind, "message": self.to_string()}))).into_response()
    }
}

/// Build the flow from configuration: file catalog, static secrets, HTTP
/// identity broker and an in-memory store.
pub fn build_flow(config: &Config) -> Result<TokenFlow> {
    let path = config
        .catalog
        .path
        .clone()
        .ok_or_else(|| Error::Config("catalog.path must be set".to_string()))?;
    Ok(TokenFlow::new(
        config.service.clone(),
        Store::memory(),
        Arc::new(FileCatalog::new(path, config.catalog.default_realm.clone())),
        Arc::new(StaticSecrets::new(config.secrets.resolve())),
        Arc::new(HttpIdentityBroker::with_defaults()?),
    )
    .with_default_realm(config.catalog.default_realm.clone()))
}

/// API versions served under `/dam`.
pub const API_VERSIONS: &[&str] = &["v1alpha"];

/// Body of `GET /dam`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Service name
    pub name: &'static str,
    /// Supported API versions
    pub versions: Vec<&'static str>,
    /// Unix time the router was built
    pub start_time: i64,
}

/// Router serving `flow`.
pub fn create_router(flow: TokenFlow, request_timeout: Duration) -> Router {
    let info = ServiceInfo {
        name: "Access Broker",
        versions: API_VERSIONS.to_vec(),
        start_time: flow.now_unix(),
    };
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/dam",
            get(move || {
                let info = info.clone();
                async move { Json(info) }
            }),
        )
        .route("/dam/checkout/auth", get(dataset_auth_handler))
        .route("/dam/endpoint/auth", get(endpoint_auth_handler))
        .route(LOGGED_IN_PATH, get(logged_in_handler))
        .route("/dam/checkout", post(checkout_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::GATEWAY_TIMEOUT,
                    request_timeout,
                )),
        )
        .with_state(Arc::new(flow))
}

/// Serve until SIGINT/SIGTERM.
pub async fn run_server(config: Config, flow: TokenFlow) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid listen address: {e}")))?;
    let app = create_router(flow, config.server.request_timeout);

    let listener = TcpListener::bind(addr).await?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        domain_url = %config.service.domain_url,
        broker = %config.service.default_broker,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

/// Query parameters of the auth endpoints. `resource` may repeat.
#[derive(Debug, Default)]
struct AuthParams {
    resources: Vec<String>,
    realm: String,
    ttl: Option<String>,
    max_age: Option<String>,
    client_id: String,
    redirect_uri: String,
    state: String,
    response_type: String,
    login_challenge: String,
}

impl AuthParams {
    fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();
        for (k, v) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            let v = v.into_owned();
            match k.as_ref() {
                "resource" => params.resources.push(v),
                "realm" => params.realm = v,
                "ttl" => params.ttl = Some(v),
                "max_age" => params.max_age = Some(v),
                "client_id" => params.client_id = v,
                "redirect_uri" => params.redirect_uri = v,
                "state" => params.state = v,
                "response_type" => params.response_type = v,
                "login_challenge" => params.login_challenge = v,
                _ => {}
            }
        }
        params
    }

    fn into_request(self, token_type: TokenType, flow: &TokenFlow) -> Result<AuthRequest> {
        let service = flow.service();
        let ttl = parse_ttl(
            self.max_age.as_deref(),
            self.ttl.as_deref(),
            service.default_ttl,
            service.max_ttl,
        )?;
        Ok(AuthRequest {
            token_type,
            realm: self.realm,
            resources: self.resources,
            ttl,
            client_id: self.client_id,
            response_key_file: self.response_type == KEY_FILE_RESPONSE_TYPE,
            challenge: self.login_challenge,
            redirect: self.redirect_uri,
            state: self.state,
        })
    }
}

async fn dataset_auth_handler(
    State(flow): State<Arc<TokenFlow>>,
    RawQuery(query): RawQuery,
) -> Result<Redirect> {
    begin(&flow, TokenType::Dataset, query.as_deref()).await
}

async fn endpoint_auth_handler(
    State(flow): State<Arc<TokenFlow>>,
    RawQuery(query): RawQuery,
) -> Result<Redirect> {
    begin(&flow, TokenType::Endpoint, query.as_deref()).await
}

async fn begin(flow: &TokenFlow, token_type: TokenType, query: Option<&str>) -> Result<Redirect> {
    let req = AuthParams::parse(query).into_request(token_type, flow)?;
    let redirect = flow.begin_auth(req).await?;
    Ok(Redirect::temporary(&redirect.authorization_url))
}

#[derive(Debug, Deserialize)]
struct LoggedInParams {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
}

async fn logged_in_handler(
    State(flow): State<Arc<TokenFlow>>,
    Query(params): Query<LoggedInParams>,
) -> Result<Json<LoggedIn>> {
    Ok(Json(flow.complete_auth(&params.code, &params.state).await?))
}

async fn checkout_handler(
    State(flow): State<Arc<TokenFlow>>,
    headers: HeaderMap,
) -> Result<Json<ResourceResults>> {
    let state_id = bearer_token(&headers)?;
    Ok(Json(flow.redeem(state_id).await?))
}

/// Token of an `Authorization: Bearer <token>` header.
///
/// The header must split on a single space into exactly two parts; the
/// scheme is case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthenticated("authorization header is required".to_string()))?;
    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => Ok(*token),
        _ => Err(Error::Unauthenticated(
            "authorization header must be \"Bearer <token>\"".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers("bEaReR abc")).unwrap(), "abc");
    }

    #[test]
    fn malformed_authorization_is_unauthenticated() {
        for value in ["abc", "Bearer", "Bearer a b", "Basic abc", "Bearer  abc"] {
            let err = bearer_token(&headers(value)).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Unauthenticated, "{value}");
        }
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn auth_params_collect_repeated_resources() {
        let params = AuthParams::parse(Some(
            "resource=https%3A%2F%2Fdam%2Fa&resource=https%3A%2F%2Fdam%2Fb&ttl=1h&response_type=key-file-type",
        ));
        assert_eq!(params.resources, vec!["https://dam/a".to_string(), "https://dam/b".to_string()]);
        assert_eq!(params.ttl.as_deref(), Some("1h"));
        assert_eq!(params.response_type, KEY_FILE_RESPONSE_TYPE);
    }

    #[test]
    fn build_flow_requires_catalog_path() {
        let err = build_flow(&Config::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn build_flow_uses_configured_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.catalog.path = Some(dir.path().join("catalog.yaml"));
        config.catalog.default_realm = "staging".to_string();

        let flow = build_flow(&config).unwrap();

        assert_eq!(flow.service().domain_url, config.service.domain_url);
    }

    #[test]
    fn error_response_carries_kind_and_status() {
        let response = Error::PermissionDenied("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = Error::DeadlineExceeded("late".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
