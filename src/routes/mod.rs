//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Public probes sit outside the auth gate; everything under `/api` is
//! mounted behind `auth::verify_token`. Request logging wraps both.

pub mod auth;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::logging;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/api/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::verify_token));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(protected)
        .layer(middleware::from_fn(logging::log_requests))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Ready once the database answers.
async fn readyz(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(state.db.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "database not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
