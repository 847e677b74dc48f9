//! HTTP status API
//!
//! Health check and online-user count, served next to the WebSocket
//! listener with permissive CORS so browser front-ends can poll it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderName, Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::registry::ConnectionRegistry;

/// Body of `GET /online-users`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUsers {
    #[serde(rename = "onlineUsers")]
    pub online_users: usize,
}

/// Build the status router
pub fn router(registry: Arc<ConnectionRegistry>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/online-users", get(online_users))
        .layer(cors())
        .with_state(registry)
}

/// Serve the status API until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> StatusCode {
    debug!("Health check");
    StatusCode::OK
}

async fn online_users(State(registry): State<Arc<ConnectionRegistry>>) -> Json<OnlineUsers> {
    Json(OnlineUsers {
        online_users: registry.count(),
    })
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::POST,
            Method::GET,
            Method::OPTIONS,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            HeaderName::from_static("x-csrf-token"),
            header::AUTHORIZATION,
        ])
}
