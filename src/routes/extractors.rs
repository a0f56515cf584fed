//! Axum extractors.
//!
//! `AuthenticatedUser` pulls the bearer token from the Authorization header
//! and verifies it, so handlers just take the extractor and get a user id.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for AuthenticatedUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = extract_user_id(state, parts).map_err(|e| {
            tracing::warn!(error = %e, "HTTP authentication failed");
            e.into_response()
        })?;

        Ok(AuthenticatedUser(user_id))
    }
}

fn extract_user_id(ctx: &AppContext, parts: &Parts) -> Result<String, AppError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("invalid Authorization header format"))?;

    let claims = ctx
        .auth_manager
        .verify_token(token)
        .map_err(|e| AppError::unauthorized(format!("invalid token: {}", e)))?;

    Ok(claims.sub)
}
