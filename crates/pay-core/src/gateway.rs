//! # Payment Gateway Trait
//!
//! Strategy trait for payment providers. The order/transaction state
//! machine only talks to gateways through this trait, so a second provider
//! is one more implementation registered in the `GatewayRegistry`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   PaymentGateway (trait)                    │
//! │  ├── pay_payload() / create_payment()                       │
//! │  ├── check_status()                                         │
//! │  └── parse_callback()                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!          ┌─────────────────┴─────────────────┐
//!  ┌───────┴───────┐                   ┌───────┴───────┐
//!  │ PhonePeGateway│                   │  (next PSP)   │
//!  └───────────────┘                   └───────────────┘
//! ```
//!
//! Gateway responses are decoded into small tagged unions. Shapes the
//! decoder does not recognise land in an `Unrecognized` variant, which
//! callers turn into `PaymentError::Gateway` instead of guessing.

use crate::error::PaymentResult;
use crate::transaction::TransactionStatus;
use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a gateway needs to open a payment session
#[derive(Debug, Clone)]
pub struct PayRequest {
    pub merchant_transaction_id: String,
    pub merchant_user_id: String,
    /// Amount in minor units
    pub amount: i64,
    /// Where the gateway sends the shopper afterwards
    pub callback_url: String,
    /// Session lifetime enforced by the gateway
    pub expire_after: Duration,
}

/// Result of a pay call
#[derive(Debug, Clone, PartialEq)]
pub enum PayResponse {
    /// Session opened; send the shopper to `redirect_url`
    Redirect {
        redirect_url: String,
        code: Option<String>,
        raw: Value,
    },
    /// Gateway answered but refused the session
    Declined {
        code: String,
        message: String,
        raw: Value,
    },
    /// Response did not match any known shape
    Unrecognized { raw: Value },
}

impl PayResponse {
    pub fn raw(&self) -> &Value {
        match self {
            PayResponse::Redirect { raw, .. }
            | PayResponse::Declined { raw, .. }
            | PayResponse::Unrecognized { raw } => raw,
        }
    }
}

/// Gateway's view of a payment, reduced to three buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedState {
    Success,
    Failure,
    Pending,
}

impl ReportedState {
    /// Transaction status this report moves a row to
    pub fn transaction_status(&self) -> TransactionStatus {
        match self {
            ReportedState::Success => TransactionStatus::Completed,
            ReportedState::Failure => TransactionStatus::Failed,
            ReportedState::Pending => TransactionStatus::Pending,
        }
    }
}

/// Result of a status call
#[derive(Debug, Clone, PartialEq)]
pub enum StatusResponse {
    /// A well-formed report carrying the gateway's code
    Reported {
        code: String,
        state: ReportedState,
        instrument: Option<Value>,
        raw: Value,
    },
    /// Response did not match any known shape
    Unrecognized { raw: Value },
}

impl StatusResponse {
    pub fn raw(&self) -> &Value {
        match self {
            StatusResponse::Reported { raw, .. } | StatusResponse::Unrecognized { raw } => raw,
        }
    }
}

/// A verified server-to-server notification.
///
/// Only used as a trigger: the claimed code is recorded for logs, but
/// settlement always goes through `check_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackNotice {
    pub merchant_transaction_id: String,
    pub claimed_code: Option<String>,
    pub raw: Value,
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name (registry key, stored on each transaction)
    fn provider_name(&self) -> &'static str;

    /// Merchant id this gateway signs for
    fn merchant_id(&self) -> &str;

    /// Gateway-side user reference for one of our users
    fn merchant_user_id(&self, user_id: &str) -> String {
        format!("MUID{}", user_id)
    }

    /// The request payload exactly as it will be sent.
    ///
    /// Persisted on the transaction row before the gateway is called.
    fn pay_payload(&self, request: &PayRequest) -> Value;

    /// Open a payment session.
    ///
    /// Transport failures and non-success HTTP statuses are errors;
    /// a decodable refusal is `PayResponse::Declined`.
    async fn create_payment(&self, request: &PayRequest) -> PaymentResult<PayResponse>;

    /// Ask the gateway for the authoritative status of a transaction
    async fn check_status(&self, merchant_transaction_id: &str) -> PaymentResult<StatusResponse>;

    /// Verify and decode an asynchronous callback from the gateway
    fn parse_callback(&self, payload: &[u8], signature: &str) -> PaymentResult<CallbackNotice>;

    /// Webhook endpoint path for this provider.
    /// Default: `/payment/webhook/{provider_name}`
    fn webhook_path(&self) -> String {
        format!("/payment/webhook/{}", self.provider_name())
    }
}

/// Type alias for a shared payment gateway (dynamic dispatch)
pub type SharedGateway = Arc<dyn PaymentGateway>;

/// Gateways by provider name, with a default for new payments
#[derive(Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<String, SharedGateway>,
    default_provider: String,
}

impl GatewayRegistry {
    /// Create a new registry with a default provider
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            gateways: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a gateway under its provider name
    pub fn register(&mut self, gateway: SharedGateway) {
        let name = gateway.provider_name().to_string();
        self.gateways.insert(name, gateway);
    }

    /// Register with builder pattern
    pub fn with_gateway(mut self, gateway: SharedGateway) -> Self {
        self.register(gateway);
        self
    }

    /// Gateway used for new payment sessions
    pub fn default_gateway(&self) -> Option<&SharedGateway> {
        self.gateways.get(&self.default_provider)
    }

    /// Get a gateway by provider name
    pub fn get(&self, provider: &str) -> Option<&SharedGateway> {
        self.gateways.get(provider)
    }

    /// List all registered providers
    pub fn providers(&self) -> Vec<&str> {
        self.gateways.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a provider is registered
    pub fn has_provider(&self, provider: &str) -> bool {
        self.gateways.contains_key(provider)
    }
}
