//! # Payment Error Types
//!
//! Typed error handling for the storefront payment core.
//! All ledger, initiation and verification operations return `Result<T, PaymentError>`.

use thiserror::Error;

/// Core error type for all payment operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing secrets, invalid values). Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bad or missing input. Never forwarded to the gateway.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No credential, or the identity provider rejected it
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credential is valid but does not own the resource
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Unknown order or transaction
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Payment provider unreachable or returned a failure
    #[error("Gateway error [{provider}]: {message}")]
    Gateway { provider: String, message: String },

    /// A multi-step write committed some effects but not all
    #[error("Partial failure on order {order_id} (compensated: {compensated}): {message}")]
    PartialFailure {
        order_id: i64,
        compensated: bool,
        message: String,
    },

    /// A guarded write lost a race with a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence layer unreachable or rejected the request
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Shorthand for a gateway failure
    pub fn gateway(provider: impl Into<String>, message: impl Into<String>) -> Self {
        PaymentError::Gateway {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing record
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PaymentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Gateway { .. } | PaymentError::Storage(_) | PaymentError::Conflict(_)
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Configuration(_) => 500,
            PaymentError::Validation(_) => 400,
            PaymentError::Authentication(_) => 401,
            PaymentError::Authorization(_) => 403,
            PaymentError::NotFound { .. } => 404,
            PaymentError::Gateway { .. } => 502,
            PaymentError::PartialFailure { .. } => 500,
            PaymentError::Conflict(_) => 409,
            PaymentError::Storage(_) => 503,
            PaymentError::Serialization(_) => 500,
            PaymentError::Internal(_) => 500,
        }
    }

    /// Message safe to show an end user.
    ///
    /// Gateway and storage internals are collapsed into generic retry hints;
    /// the raw details stay in the logs and on the transaction record.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Validation(msg) => msg.clone(),
            PaymentError::Authentication(_) => "Authentication required".to_string(),
            PaymentError::Authorization(_) => {
                "You do not have access to this resource".to_string()
            }
            PaymentError::NotFound { entity, .. } => format!("{} not found", entity),
            PaymentError::Gateway { .. } => {
                "Payment provider is unavailable, please retry".to_string()
            }
            PaymentError::PartialFailure { .. } => {
                "Order could not be completed, please retry".to_string()
            }
            PaymentError::Conflict(_) => {
                "The order changed while processing, please retry".to_string()
            }
            PaymentError::Storage(_) => "Temporary failure, please retry".to_string(),
            PaymentError::Configuration(_)
            | PaymentError::Serialization(_)
            | PaymentError::Internal(_) => "Internal error".to_string(),
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Serialization(err.to_string())
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
