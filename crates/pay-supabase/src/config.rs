//! # Supabase Configuration
//!
//! Project URL and keys for the hosted backend. The service role key
//! bypasses row level security, so it never leaves this process.

use pay_core::PaymentError;
use std::env;
use std::fmt;

#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`
    pub url: String,

    /// Service role key, sent as both `apikey` and bearer token
    pub service_role_key: String,

    /// Project JWT secret; when set, bearer tokens are validated locally
    pub jwt_secret: Option<String>,
}

impl SupabaseConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_SERVICE_ROLE_KEY`
    ///
    /// Optional: `SUPABASE_JWT_SECRET`.
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let url = env::var("SUPABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PaymentError::Configuration("SUPABASE_URL not set".to_string()))?;

        let service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::Configuration("SUPABASE_SERVICE_ROLE_KEY not set".to_string())
            })?;

        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(PaymentError::Configuration(
                "SUPABASE_URL must be an http(s) URL".to_string(),
            ));
        }

        let jwt_secret = env::var("SUPABASE_JWT_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self::new(url, service_role_key).with_jwt_secret(jwt_secret))
    }

    /// Create config with explicit values (for testing)
    pub fn new(url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
            jwt_secret: None,
        }
    }

    pub fn with_jwt_secret(mut self, secret: Option<String>) -> Self {
        self.jwt_secret = secret;
        self
    }

    /// PostgREST endpoint for `table`
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    /// GoTrue endpoint for the current user
    pub fn user_url(&self) -> String {
        format!("{}/auth/v1/user", self.url)
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.service_role_key)
    }
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("service_role_key", &"<redacted>")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
