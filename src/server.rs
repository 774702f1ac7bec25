// src/server.rs

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::core::error::ScanError;
use crate::core::models::ScanReport;
use crate::core::scanner::Probe;

/// An error rendered as `{"error":{"message","status"}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

// Both variants are configuration problems on the server side.
impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Builds the router with CORS restricted to `origins`.
pub fn router<P: Probe + 'static>(state: AppState<P>, origins: &[String]) -> Router {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "Ignoring invalid CORS origin.");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/configs/checks", get(list_checks::<P>))
        .route("/api/configs/rules", get(list_rules::<P>))
        .route("/api/scan", post(scan::<P>))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_checks<P: Probe + 'static>(State(state): State<AppState<P>>) -> Json<Value> {
    Json(json!({ "checks": state.service.checks() }))
}

async fn list_rules<P: Probe + 'static>(State(state): State<AppState<P>>) -> Json<Value> {
    Json(json!({ "rules": state.config.rules }))
}

async fn scan<P: Probe + 'static>(State(state): State<AppState<P>>) -> Result<Json<ScanReport>, ApiError> {
    info!("Scan requested.");
    match state.service.scan().await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            error!(error = %e, "Scan could not run.");
            Err(e.into())
        }
    }
}
