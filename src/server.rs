//! HTTP endpoints for health checks, service info, and Nostr login.

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};

use crate::config::Settings;
use crate::directory::FileDirectory;
use crate::identity::{Identity, IdentityResolver, ProfileMetadata};
use crate::verify::{self, unix_now, VerificationContext};

struct HttpState {
    resolver: IdentityResolver<FileDirectory>,
    auth_url: String,
    relays: Vec<String>,
    verbose: bool,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Start an HTTP server exposing `/`, `/healthz`, and `POST /login`.
pub async fn serve_http(
    addr: SocketAddr,
    directory: FileDirectory,
    cfg: Settings,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let state = Arc::new(HttpState {
        resolver: IdentityResolver::new(directory),
        auth_url: cfg.auth_url,
        relays: cfg.relays,
        verbose: cfg.verbose,
    });
    let app = Router::new()
        .route("/", get(service_info))
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .with_state(state);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Health check endpoint.
async fn healthz(State(state): State<Arc<HttpState>>) -> Json<Health> {
    if state.verbose {
        println!("[http] GET /healthz");
    }
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Service information served to login clients.
#[derive(Serialize, Deserialize)]
struct ServiceInfo {
    name: String,
    software: String,
    /// Semantic version string such as "0.1.0".
    version: String,
    /// Trusted relay endpoints clients may use for profile lookups.
    relays: Vec<String>,
}

async fn service_info(State(state): State<Arc<HttpState>>) -> Json<ServiceInfo> {
    if state.verbose {
        println!("[http] GET /");
    }
    Json(ServiceInfo {
        name: "authstr".into(),
        software: "authstr".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        relays: state.relays.clone(),
    })
}

/// Request body for `POST /login`.
#[derive(Serialize, Deserialize)]
struct LoginRequest {
    /// Raw serialized NIP-98 event, exactly as signed.
    event: String,
    /// Optional profile metadata accompanying the login.
    metadata: Option<ProfileMetadata>,
}

/// Response body for `POST /login`.
#[derive(Serialize, Deserialize)]
struct LoginResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// One generic rejection body for every failure mode, so the response does
/// not reveal which verification stage failed.
fn login_failed() -> Json<LoginResponse> {
    Json(LoginResponse {
        success: false,
        identity: None,
        message: Some("Login failed. Please try again.".into()),
    })
}

/// Verify a NIP-98 login event and establish or refresh the identity bound
/// to its pubkey. Session establishment is left to the caller of this
/// service; the response only carries the resolved identity.
async fn login(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<LoginRequest>,
) -> (StatusCode, Json<LoginResponse>) {
    let ctx = VerificationContext {
        expected_url: state.auth_url.clone(),
        expected_method: "POST".into(),
        now: unix_now(),
    };
    let claim = match verify::verify(&req.event, &ctx) {
        Ok(claim) => claim,
        Err(e) => {
            if e.is_integrity_failure() {
                // Broken id or signature on an otherwise well-formed claim.
                eprintln!("[auth] integrity failure, possible forgery: {e}");
            } else if state.verbose {
                println!("[auth] rejected login: {e}");
            }
            return (StatusCode::UNAUTHORIZED, login_failed());
        }
    };

    let metadata = req
        .metadata
        .or(claim.metadata_hint)
        .unwrap_or_default();
    match state.resolver.resolve_or_create(&claim.pubkey, &metadata) {
        Ok(identity) => {
            if state.verbose {
                println!("[auth] login ok: {} -> {}", claim.pubkey, identity.handle);
            }
            (
                StatusCode::OK,
                Json(LoginResponse {
                    success: true,
                    identity: Some(identity),
                    message: None,
                }),
            )
        }
        Err(e) => {
            eprintln!("[auth] identity resolution failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, login_failed())
        }
    }
}
