//! # Payment Transactions
//!
//! One row per payment attempt. Status only moves forward:
//!
//! ```text
//! initiated ──► pending ──► completed
//!     │            │
//!     └────────────┴──────► failed
//! ```
//!
//! Once `completed` or `failed`, status and `payment_state` are frozen.
//! Bookkeeping fields (`verification_attempts`, `last_verified_at`,
//! `gateway_response`) keep updating so repeated polls stay observable.

use crate::order::OrderId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a single payment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Row written, gateway not (yet) accepted the session
    Initiated,
    /// Gateway accepted the session, awaiting settlement
    Pending,
    /// Gateway confirmed payment
    Completed,
    /// Gateway reported failure, or the session expired unconfirmed
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initiated" => Some(TransactionStatus::Initiated),
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Forward-only transition check
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (Pending, Initiated) => false,
            _ => true,
        }
    }
}

impl Default for TransactionStatus {
    fn default() -> Self {
        TransactionStatus::Initiated
    }
}

/// Generate a merchant transaction id: `MT` + epoch millis + 6 random digits.
///
/// Unique without a central sequence; the millisecond prefix keeps ids
/// roughly ordered by creation time.
pub fn generate_transaction_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().as_u128() % 1_000_000;
    format!("MT{}{:06}", now.timestamp_millis(), suffix)
}

/// A persisted payment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Merchant-generated id, unique per attempt
    pub merchant_transaction_id: String,

    /// Gateway that issued the session (registry key)
    pub provider: String,

    /// Owning user
    pub user_id: String,

    /// Order this attempt pays for. Absent on rows written before the
    /// column existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,

    /// Amount in minor units
    pub amount: i64,

    /// Gateway merchant id
    pub merchant_id: String,

    /// Gateway-side user reference
    pub merchant_user_id: String,

    /// Outbound request payload as sent to the gateway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_payload: Option<Value>,

    /// Latest raw gateway response (pay or status)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<Value>,

    pub status: TransactionStatus,

    /// Gateway's own status code, stored verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_state: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_instrument: Option<Value>,

    pub verification_attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// A fresh `initiated` row
    pub fn initiated(
        merchant_transaction_id: impl Into<String>,
        provider: impl Into<String>,
        user_id: impl Into<String>,
        order_id: OrderId,
        amount: i64,
        merchant_id: impl Into<String>,
        merchant_user_id: impl Into<String>,
        request_payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            merchant_transaction_id: merchant_transaction_id.into(),
            provider: provider.into(),
            user_id: user_id.into(),
            order_id: Some(order_id),
            amount,
            merchant_id: merchant_id.into(),
            merchant_user_id: merchant_user_id.into(),
            request_payload: Some(request_payload),
            gateway_response: None,
            status: TransactionStatus::Initiated,
            payment_state: None,
            payment_instrument: None,
            verification_attempts: 0,
            last_verified_at: None,
            error_details: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Whether the payment session window has closed
    pub fn is_expired(&self, now: DateTime<Utc>, session_ttl: Duration) -> bool {
        now >= self.created_at + session_ttl
    }

    /// Whether an unconfirmed attempt is past the point of giving up on it
    pub fn is_abandoned(&self, now: DateTime<Utc>, give_up_after: Duration) -> bool {
        now >= self.created_at + give_up_after
    }

    /// Apply one verification round in place.
    ///
    /// Bookkeeping always applies. Status fields change only while the
    /// row is non-terminal. A reported "pending" does not promote an
    /// `initiated` row: only a successful pay call means the gateway
    /// accepted the session. Returns true if the status changed.
    pub fn apply_verification(&mut self, record: &VerificationRecord) -> bool {
        self.verification_attempts = self.verification_attempts.saturating_add(1);
        self.last_verified_at = Some(record.verified_at);
        self.updated_at = record.verified_at;
        if let Some(ref response) = record.response {
            self.gateway_response = Some(response.clone());
        }

        if !self.status.can_transition_to(record.status) {
            return false;
        }

        let next = match (self.status, record.status) {
            (TransactionStatus::Initiated, TransactionStatus::Pending) => TransactionStatus::Initiated,
            (_, reported) => reported,
        };
        let changed = self.status != next;
        self.status = next;
        if record.payment_state.is_some() {
            self.payment_state = record.payment_state.clone();
        }
        if record.payment_instrument.is_some() {
            self.payment_instrument = record.payment_instrument.clone();
        }
        if record.error_details.is_some() {
            self.error_details = record.error_details.clone();
        }
        changed
    }
}

/// The outcome of one status check, as written to the store
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    /// Mapped status to move to, if the row is still non-terminal
    pub status: TransactionStatus,
    pub payment_state: Option<String>,
    pub payment_instrument: Option<Value>,
    pub response: Option<Value>,
    pub error_details: Option<Value>,
    pub verified_at: DateTime<Utc>,
}
