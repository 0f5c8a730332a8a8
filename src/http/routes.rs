//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::game::manager::{Diagnostics, GameError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origin))
        .with_state(state)
}

/// CORS from a comma-separated origin list; "*" allows any origin
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed_origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    #[serde(flatten)]
    simulation: Diagnostics,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let simulation = state.game.diagnostics().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        simulation,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Service unavailable: {0}")]
    Unavailable(#[from] GameError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::{GameHandle, GameManager, MovementTuning, PhysicsWorld};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_config() -> Config {
        let vars: HashMap<&str, &str> = HashMap::new();
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_reports_simulation() {
        let (tx, rx) = mpsc::channel(16);
        let mut physics = PhysicsWorld::new();
        let _ = physics.initialize(false);
        tokio::spawn(GameManager::new(physics, MovementTuning::default(), false, 1).run(rx));

        let router = build_router(AppState::new(test_config(), GameHandle::new(tx)));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["participants"], 0);
        assert_eq!(json["tick_rate"], 60);
        assert_eq!(json["physics_enabled"], false);
        assert_eq!(json["input_connections"], 0);
    }

    #[tokio::test]
    async fn health_is_unavailable_without_loop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let router = build_router(AppState::new(test_config(), GameHandle::new(tx)));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn cors_accepts_origin_lists() {
        // Construction must not panic for either form
        let _ = cors_layer("*");
        let _ = cors_layer("http://localhost:3000, https://arena.example");
    }
}
