//! Auth gate: bearer-token middleware and the verified uid extractor.
//!
//! The middleware runs before any protected handler. A token the verifier
//! rejects ends the request with `400 {"error": ...}`; an accepted one puts
//! `Uid` and the full `VerifiedPrincipal` into the request extensions.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::state::AppState;

const BEARER_PREFIX: &str = "Bearer ";

/// Verified subject id for the current request (the `uid` context key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Uid(pub String);

/// Credential from the `Authorization` header. A missing header yields an
/// empty string and a value without the `Bearer ` prefix is used as-is.
pub(crate) fn bearer_token(headers: &HeaderMap) -> &str {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw)
}

/// Middleware verifying the request's bearer token. Mount with
/// `axum::middleware::from_fn_with_state`.
pub async fn verify_token(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = bearer_token(req.headers()).to_owned();

    let principal = match state.verifier.verify_id_token(&token).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to verify token");
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response();
        }
    };

    tracing::debug!(uid = %principal.uid, "user verified");
    req.extensions_mut().insert(Uid(principal.uid.clone()));
    req.extensions_mut().insert(principal);
    next.run(req).await
}

impl<S> FromRequestParts<S> for Uid
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Only reachable without the gate if a route was mounted outside it.
        parts.extensions.get::<Uid>().cloned().ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// `GET /api/me`: echo the verified uid.
pub async fn me(uid: Uid) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "uid": uid.0 }))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
