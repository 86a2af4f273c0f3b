//! Minimal `Authorization: Bearer <api_key>` extractor — the smallest
//! implementation of the explicitly-out-of-scope "real" auth middleware
//! that still gives core operations a caller identity to run against. No
//! rate limiting, session management, or key rotation.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use exchange_core::models::User;
use exchange_core::ExchangeError;

use crate::error::ApiError;
use crate::AppState;

pub struct AuthenticatedUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ExchangeError::Authorization)?;

        let raw_key = header
            .strip_prefix("Bearer ")
            .ok_or(ExchangeError::Authorization)?;

        let user = exchange_core::identity::authenticate(&state.ledger, raw_key).await?;
        Ok(AuthenticatedUser(user))
    }
}
