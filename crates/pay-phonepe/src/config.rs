//! # PhonePe Configuration
//!
//! Configuration management for the PhonePe integration.
//! All secrets are loaded from environment variables, once, at startup.

use pay_core::PaymentError;
use std::env;
use std::fmt;

/// Production API host
pub const DEFAULT_API_BASE_URL: &str = "https://api.phonepe.com/apis/hermes";

/// PhonePe API configuration
#[derive(Clone)]
pub struct PhonePeConfig {
    /// Merchant id issued by PhonePe
    pub merchant_id: String,

    /// Shared secret used in every X-VERIFY checksum
    pub salt_key: String,

    /// Which of the merchant's salt keys `salt_key` is
    pub salt_index: u32,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,
}

impl PhonePeConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `PHONEPE_MERCHANT_ID`
    /// - `PHONEPE_SALT_KEY`
    ///
    /// Optional: `PHONEPE_SALT_INDEX` (default `1`), `PHONEPE_API_BASE_URL`.
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let merchant_id = required("PHONEPE_MERCHANT_ID")?;
        let salt_key = required("PHONEPE_SALT_KEY")?;

        let salt_index = match env::var("PHONEPE_SALT_INDEX") {
            Ok(raw) => parse_salt_index(&raw)?,
            Err(_) => 1,
        };

        let api_base_url = env::var("PHONEPE_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        Ok(Self {
            merchant_id,
            salt_key,
            salt_index,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        merchant_id: impl Into<String>,
        salt_key: impl Into<String>,
        salt_index: u32,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            salt_key: salt_key.into(),
            salt_index,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

impl fmt::Debug for PhonePeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhonePeConfig")
            .field("merchant_id", &self.merchant_id)
            .field("salt_key", &"<redacted>")
            .field("salt_index", &self.salt_index)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

fn required(name: &str) -> Result<String, PaymentError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::Configuration(format!("{} not set", name)))
}

fn parse_salt_index(raw: &str) -> Result<u32, PaymentError> {
    match raw.trim().parse::<u32>() {
        Ok(index) if index > 0 => Ok(index),
        _ => Err(PaymentError::Configuration(format!(
            "PHONEPE_SALT_INDEX must be a positive integer, got {:?}",
            raw
        ))),
    }
}
