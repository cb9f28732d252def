//! HTTP surface: the WebSocket upgrade endpoint, health check, CORS, and
//! the API-key gate.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::pipeline::SearchPipeline;
use crate::session::handle_socket;

/// Shared state for the search endpoints.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SearchPipeline>,
    pub api_key: String,
}

/// Build the axum router. `OPTIONS` preflights are answered by the CORS
/// layer; unknown methods on the routes fall out as 405.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/ws/search", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Upgrade to a search session after the API key checks out. Rejections
/// happen before the upgrade so the client sees a plain 401.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(status) = authorize(&params, &state.api_key) {
        tracing::warn!("websocket upgrade rejected: bad or missing API key");
        return (status, "Invalid API key").into_response();
    }

    tracing::info!("websocket upgrade accepted");
    let pipeline = Arc::clone(&state.pipeline);
    ws.on_upgrade(move |socket| handle_socket(socket, pipeline))
}

fn authorize(params: &HashMap<String, String>, expected: &str) -> Result<(), StatusCode> {
    match params.get("apiKey") {
        Some(key) if key == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Unauthenticated liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "websocket_support": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_accepts_matching_key() {
        let mut params = HashMap::new();
        params.insert("apiKey".to_string(), "secret".to_string());
        assert!(authorize(&params, "secret").is_ok());
    }

    #[test]
    fn authorize_rejects_missing_key() {
        let params = HashMap::new();
        assert_eq!(
            authorize(&params, "secret"),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn authorize_rejects_wrong_key() {
        let mut params = HashMap::new();
        params.insert("apiKey".to_string(), "guess".to_string());
        assert_eq!(authorize(&params, "secret"), Err(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn health_payload() {
        let response = health_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["websocket_support"], true);
    }
}
