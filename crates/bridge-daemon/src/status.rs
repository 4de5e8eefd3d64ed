//! Read-only status endpoint.
//!
//! - `GET /health` - liveness and version
//! - `GET /routes` - presence of every route
//! - `GET /sockets` - connection state of every socket

use crate::settings::StatusSettings;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use slobridge_core::{EndpointPresence, RouterHandle};
use slobridge_endpoint::{SocketDirectory, SocketStatus};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct StatusState {
    /// Query access to the router.
    pub router: RouterHandle,
    /// Socket states.
    pub directory: SocketDirectory,
}

/// One route as reported by `/routes`.
#[derive(Debug, Serialize)]
pub struct RouteView {
    pub route: String,
    pub listing: String,
    pub endpoints: Vec<EndpointPresence>,
}

/// Build the HTTP router.
pub fn app(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/routes", get(routes_handler))
        .route("/sockets", get(sockets_handler))
        .with_state(state)
}

/// Bind the status listener.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(settings: &StatusSettings) -> Result<TcpListener> {
    let addr = format!("{}:{}", settings.host, settings.port);
    TcpListener::bind(addr.as_str())
        .await
        .with_context(|| format!("Failed to bind status endpoint on {addr}"))
}

/// Serve until shutdown is signalled.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: StatusState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Status endpoint listening");
    }

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("Status endpoint failed")
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn routes_handler(
    State(state): State<StatusState>,
) -> Result<Json<Vec<RouteView>>, StatusCode> {
    let snapshots = state.router.snapshots().await.map_err(|e| {
        warn!(error = %e, "Route query failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(
        snapshots
            .into_iter()
            .map(|snapshot| RouteView {
                listing: snapshot.listing(),
                route: snapshot.route,
                endpoints: snapshot.endpoints,
            })
            .collect(),
    ))
}

async fn sockets_handler(State(state): State<StatusState>) -> Json<Vec<SocketStatus>> {
    Json(state.directory.statuses())
}
