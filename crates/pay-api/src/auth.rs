//! # Bearer Authentication
//!
//! Extractor resolving `Authorization: Bearer <token>` to an `Identity`
//! through the configured `CredentialVerifier`.

use crate::handlers::ApiError;
use crate::state::AppState;
use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use pay_core::{bearer_token, Identity};

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header)?;
        let identity = state.verifier.verify(token).await?;
        Ok(AuthUser(identity))
    }
}
