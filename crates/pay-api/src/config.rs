//! # Application Configuration
//!
//! Server settings read once at startup. Gateway and backend secrets live
//! in their own crates' configs; this covers the HTTP surface and timers.

use pay_core::{PaymentError, DEFAULT_GIVE_UP_SECS, DEFAULT_SESSION_TTL_SECS};
use std::net::SocketAddr;

const DEFAULT_STOREFRONT_DOMAIN: &str = "vedahaircare.in";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_SWEEP_GRACE_SECS: i64 = 300;

/// Where orders and transactions are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Hosted Supabase project (PostgREST + GoTrue)
    Supabase,
    /// Process-local maps, for local development only
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Origins under this domain are echoed back by CORS
    pub storefront_domain: String,
    /// Payment session lifetime
    pub session_ttl: chrono::Duration,
    /// How often the reconciliation sweep runs
    pub sweep_interval: std::time::Duration,
    /// Extra slack past the session lifetime before the sweep acts
    pub sweep_grace: chrono::Duration,
    /// Age after which an attempt the gateway never confirmed is closed
    pub sweep_give_up: chrono::Duration,
    pub storage: StorageBackend,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PaymentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let session_ttl_secs: i64 = parse(&get, "PAYMENT_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        let sweep_interval_secs: u64 = parse(&get, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        let sweep_grace_secs: i64 = parse(&get, "SWEEP_GRACE_SECS", DEFAULT_SWEEP_GRACE_SECS)?;
        let sweep_give_up_secs: i64 = parse(&get, "SWEEP_GIVE_UP_SECS", DEFAULT_GIVE_UP_SECS)?;

        if session_ttl_secs <= 0 {
            return Err(PaymentError::Configuration(
                "PAYMENT_SESSION_TTL_SECS must be positive".to_string(),
            ));
        }
        if sweep_interval_secs == 0 {
            return Err(PaymentError::Configuration(
                "SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        if sweep_grace_secs < 0 {
            return Err(PaymentError::Configuration(
                "SWEEP_GRACE_SECS must not be negative".to_string(),
            ));
        }
        if sweep_give_up_secs < session_ttl_secs + sweep_grace_secs {
            return Err(PaymentError::Configuration(
                "SWEEP_GIVE_UP_SECS must cover the session lifetime plus SWEEP_GRACE_SECS".to_string(),
            ));
        }

        let storage = match get("STORAGE_BACKEND").as_deref() {
            None | Some("supabase") => StorageBackend::Supabase,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(PaymentError::Configuration(format!(
                    "Unknown STORAGE_BACKEND: {}",
                    other
                )))
            }
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse(&get, "PORT", 8080)?,
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            storefront_domain: get("STOREFRONT_DOMAIN")
                .unwrap_or_else(|| DEFAULT_STOREFRONT_DOMAIN.to_string()),
            session_ttl: chrono::Duration::seconds(session_ttl_secs),
            sweep_interval: std::time::Duration::from_secs(sweep_interval_secs),
            sweep_grace: chrono::Duration::seconds(sweep_grace_secs),
            sweep_give_up: chrono::Duration::seconds(sweep_give_up_secs),
            storage,
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<SocketAddr, PaymentError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| PaymentError::Configuration(format!("Invalid HOST/PORT: {}", e)))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T, PaymentError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PaymentError::Configuration(format!("{} is not a valid number", key))),
        None => Ok(default),
    }
}
