//! # Identity
//!
//! The core never parses session tokens itself. It asks a
//! `CredentialVerifier` to resolve a bearer credential to a user.

use crate::error::{PaymentError, PaymentResult};
use async_trait::async_trait;
use std::sync::Arc;

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }
}

/// Resolves a bearer credential against the identity provider
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> PaymentResult<Identity>;
}

pub type SharedVerifier = Arc<dyn CredentialVerifier>;

/// Extract the credential from an `Authorization: Bearer <token>` value
pub fn bearer_token(header: Option<&str>) -> PaymentResult<&str> {
    let header = header
        .ok_or_else(|| PaymentError::Authentication("No authorization header".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or_else(|| {
            PaymentError::Authentication("Authorization header is not a bearer token".to_string())
        })?;
    if token.is_empty() {
        return Err(PaymentError::Authentication("Empty bearer token".to_string()));
    }
    Ok(token)
}
