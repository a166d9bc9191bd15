//! HTTP server assembly using Axum.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use courtline_core::audience::Audience;
use courtline_sms::webhook;

use super::hub::Hub;

/// Shared state for the gateway server.
pub struct AppState {
    pub hub: Arc<Hub>,
    /// Shared secret for provider status callbacks; empty disables the route.
    pub status_secret: String,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(super::ws::ws_handler))
        .route("/api/v1/sms/status", post(sms_status_callback))
        .route("/api/v1/announce", post(announce))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn run(state: Arc<AppState>, host: &str, port: u16) -> courtline_core::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on {addr}");
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| courtline_core::CourtlineError::channel(format!("server error: {e}")))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "connections": state.hub.connection_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Provider delivery-status callback. The body is only trusted after its
/// HMAC signature verifies; a bad signature mutates nothing.
async fn sms_status_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !webhook::verify_signature(&state.status_secret, &body, signature) {
        tracing::warn!("Rejected SMS status callback with bad signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"ok": false, "error": "invalid signature"})),
        );
    }

    match webhook::parse_status(&body) {
        Ok(status) => {
            tracing::info!(
                "Delivery status from {}: {} → {} ({})",
                status.provider,
                status.message_id,
                status.address,
                status.status
            );
            (StatusCode::OK, Json(serde_json::json!({"ok": true})))
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

/// Fire an ad-hoc announcement into the hub.
///
/// Body: {"event": "announcement", "data": {...}, "audience": {...}}
async fn announce(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let event = body["event"].as_str().unwrap_or("announcement").to_string();
    let audience: Audience = match serde_json::from_value(body["audience"].clone()) {
        Ok(a) => a,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"ok": false, "error": format!("bad audience: {e}")})),
            )
        }
    };
    let delivered = state.hub.broadcast(&event, body["data"].clone(), &audience);
    (
        StatusCode::OK,
        Json(serde_json::json!({"ok": true, "delivered": delivered})),
    )
}
