//! # Identity Verification
//!
//! Two `CredentialVerifier`s for Supabase session tokens:
//!
//! - `SupabaseAuth` asks GoTrue (`/auth/v1/user`) who the token belongs to
//! - `JwtAuth` validates the HS256 signature locally with the project secret
//!
//! Both reject with `PaymentError::Authentication`; a GoTrue outage is
//! a `Storage` error so the caller sees a retryable 503, not a 401.

use crate::config::SupabaseConfig;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use pay_core::{CredentialVerifier, Identity, PaymentError, PaymentResult};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, instrument};

/// Audience Supabase stamps on signed-in user tokens
const AUTHENTICATED_AUDIENCE: &str = "authenticated";

// =============================================================================
// GoTrue lookup
// =============================================================================

pub struct SupabaseAuth {
    config: SupabaseConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl SupabaseAuth {
    pub fn new(config: SupabaseConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| {
                PaymentError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl CredentialVerifier for SupabaseAuth {
    #[instrument(skip_all)]
    async fn verify(&self, credential: &str) -> PaymentResult<Identity> {
        let response = self
            .client
            .get(self.config.user_url())
            .header("apikey", &self.config.service_role_key)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| PaymentError::Storage(format!("Identity lookup failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!("Identity provider rejected token: {}", status);
            return Err(PaymentError::Authentication(
                "Failed to get user information".to_string(),
            ));
        }
        if !status.is_success() {
            error!("Identity provider error: status={}", status);
            return Err(PaymentError::Storage(format!(
                "Identity lookup failed: HTTP {}",
                status
            )));
        }

        let user: UserResponse = response.json().await.map_err(|e| {
            PaymentError::Authentication(format!("Failed to get user information: {}", e))
        })?;

        Ok(Identity {
            user_id: user.id,
            email: user.email,
        })
    }
}

// =============================================================================
// Local JWT validation
// =============================================================================

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

pub struct JwtAuth {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUTHENTICATED_AUDIENCE]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtAuth {
    async fn verify(&self, credential: &str) -> PaymentResult<Identity> {
        let data = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| PaymentError::Authentication(format!("Invalid token: {}", e)))?;

        if data.claims.sub.trim().is_empty() {
            return Err(PaymentError::Authentication("Token has no subject".to_string()));
        }

        Ok(Identity {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token(secret: &str, aud: &str, exp_offset: i64) -> String {
        let claims = json!({
            "sub": "user-1",
            "email": "asha@example.test",
            "aud": aud,
            "role": "authenticated",
            "exp": chrono::Utc::now().timestamp() + exp_offset,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_jwt_accepts_valid_token() {
        let auth = JwtAuth::new("project-secret");
        let identity = auth
            .verify(&token("project-secret", "authenticated", 3600))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.email.as_deref(), Some("asha@example.test"));
    }

    #[tokio::test]
    async fn test_jwt_rejects_bad_tokens() {
        let auth = JwtAuth::new("project-secret");

        for bad in [
            token("other-secret", "authenticated", 3600),
            token("project-secret", "anon", 3600),
            token("project-secret", "authenticated", -3600),
            "not-a-jwt".to_string(),
        ] {
            assert!(matches!(
                auth.verify(&bad).await,
                Err(PaymentError::Authentication(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_gotrue_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "service-key"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-1",
                "email": "asha@example.test",
                "aud": "authenticated"
            })))
            .mount(&server)
            .await;

        let auth = SupabaseAuth::new(SupabaseConfig::new(server.uri(), "service-key")).unwrap();
        let identity = auth.verify("user-token").await.unwrap();
        assert_eq!(identity.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_gotrue_rejection_and_outage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("Authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let auth = SupabaseAuth::new(SupabaseConfig::new(server.uri(), "service-key")).unwrap();
        assert!(matches!(
            auth.verify("expired").await,
            Err(PaymentError::Authentication(_))
        ));
        assert!(matches!(
            auth.verify("anything").await,
            Err(PaymentError::Storage(_))
        ));
    }
}
