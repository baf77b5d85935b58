//! # pay-supabase
//!
//! Hosted persistence and identity for the storefront payment service.
//!
//! - `SupabaseStore` implements `OrderStore` and `TransactionStore` over
//!   PostgREST with guarded (filtered) updates
//! - `SupabaseAuth` resolves session tokens through GoTrue
//! - `JwtAuth` validates session tokens locally when the JWT secret is known
//!
//! ```rust,ignore
//! use pay_supabase::{SupabaseConfig, SupabaseStore};
//! use std::sync::Arc;
//!
//! let config = SupabaseConfig::from_env()?;
//! let store = Arc::new(SupabaseStore::new(config.clone())?);
//! ```

pub mod auth;
pub mod config;
pub mod store;

pub use auth::{JwtAuth, SupabaseAuth};
pub use config::SupabaseConfig;
pub use store::SupabaseStore;

use pay_core::{PaymentResult, SharedVerifier};
use std::sync::Arc;

/// Local JWT validation when the secret is configured, GoTrue otherwise
pub fn verifier(config: &SupabaseConfig) -> PaymentResult<SharedVerifier> {
    match config.jwt_secret.as_deref() {
        Some(secret) => Ok(Arc::new(JwtAuth::new(secret))),
        None => Ok(Arc::new(SupabaseAuth::new(config.clone())?)),
    }
}
