//! # Payment Callback Handler
//!
//! Settles a payment attempt by asking the gateway, never by trusting the
//! shopper's redirect or a webhook body. Each verification round:
//!
//! 1. loads the transaction and checks the caller owns it
//! 2. calls the gateway status API
//! 3. writes the round (attempt count always, status only forward)
//! 4. marks the referencing order paid when the attempt completed

use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{GatewayRegistry, StatusResponse};
use crate::identity::Identity;
use crate::ledger::{OrderLedger, PaymentOutcome};
use crate::store::SharedTransactionStore;
use crate::transaction::{PaymentTransaction, TransactionStatus, VerificationRecord};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

/// What a verification round concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Success,
    Failure,
    StillPending,
}

impl VerificationOutcome {
    fn from_status(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Completed => VerificationOutcome::Success,
            TransactionStatus::Failed => VerificationOutcome::Failure,
            TransactionStatus::Initiated | TransactionStatus::Pending => {
                VerificationOutcome::StillPending
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub outcome: VerificationOutcome,
    /// The row as stored after this round
    pub transaction: PaymentTransaction,
    /// Gateway status response, verbatim
    pub gateway_payload: Value,
}

#[derive(Clone)]
pub struct CallbackHandler {
    ledger: OrderLedger,
    transactions: SharedTransactionStore,
    gateways: GatewayRegistry,
    session_ttl: Duration,
}

impl CallbackHandler {
    pub fn new(
        ledger: OrderLedger,
        transactions: SharedTransactionStore,
        gateways: GatewayRegistry,
        session_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            transactions,
            gateways,
            session_ttl,
        }
    }

    /// Verify a transaction on behalf of the shopper who started it.
    ///
    /// Ownership is checked before anything is written; a mismatch leaves
    /// the row untouched.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn verify(
        &self,
        merchant_transaction_id: &str,
        identity: &Identity,
    ) -> PaymentResult<VerificationResult> {
        let merchant_transaction_id = merchant_transaction_id.trim();
        if merchant_transaction_id.is_empty() {
            return Err(PaymentError::Validation(
                "Transaction id is required".to_string(),
            ));
        }

        let txn = self.load(merchant_transaction_id).await?;
        if !txn.is_owned_by(&identity.user_id) {
            warn!("Verification attempted by non-owner");
            return Err(PaymentError::Authorization(
                "Transaction belongs to another user".to_string(),
            ));
        }

        self.reconcile(txn, Utc::now()).await
    }

    /// Handle a server-to-server notification from `provider`.
    ///
    /// The notice only names the transaction; settlement still goes through
    /// the status API.
    #[instrument(skip(self, body, signature))]
    pub async fn handle_callback(
        &self,
        provider: &str,
        body: &[u8],
        signature: &str,
    ) -> PaymentResult<VerificationResult> {
        let gateway = self
            .gateways
            .get(provider)
            .ok_or_else(|| PaymentError::not_found("Provider", provider))?;
        let notice = gateway.parse_callback(body, signature)?;
        info!(
            transaction_id = %notice.merchant_transaction_id,
            claimed_code = notice.claimed_code.as_deref().unwrap_or("-"),
            "Received gateway callback"
        );

        let txn = self.load(&notice.merchant_transaction_id).await?;
        if txn.provider != provider {
            return Err(PaymentError::Validation(format!(
                "Transaction {} was not started with {}",
                txn.merchant_transaction_id, provider
            )));
        }

        self.reconcile(txn, Utc::now()).await
    }

    /// One verification round for an already-authorized transaction
    pub(crate) async fn reconcile(
        &self,
        txn: PaymentTransaction,
        now: DateTime<Utc>,
    ) -> PaymentResult<VerificationResult> {
        let id = txn.merchant_transaction_id.clone();
        let gateway = self.gateways.get(&txn.provider).ok_or_else(|| {
            PaymentError::Configuration(format!("Provider {} is not configured", txn.provider))
        })?;

        let response = match gateway.check_status(&id).await {
            Ok(response) => response,
            Err(err) => {
                error!(transaction_id = %id, "Status check failed: {}", err);
                self.record_attempt_only(&txn, now).await;
                return Err(err);
            }
        };

        let (code, reported, instrument, raw) = match response {
            StatusResponse::Reported {
                code,
                state,
                instrument,
                raw,
            } => (code, state.transaction_status(), instrument, raw),
            StatusResponse::Unrecognized { raw } => {
                error!(transaction_id = %id, "Unrecognized status response: {}", raw);
                self.record_attempt_only(&txn, now).await;
                return Err(PaymentError::gateway(
                    gateway.provider_name(),
                    "unrecognized status response",
                ));
            }
        };

        let (status, error_details) = match reported {
            TransactionStatus::Pending | TransactionStatus::Initiated
                if txn.is_expired(now, self.session_ttl) =>
            {
                warn!(transaction_id = %id, code = %code, "Payment session expired without confirmation");
                (
                    TransactionStatus::Failed,
                    Some(json!({ "reason": "expired", "code": code })),
                )
            }
            TransactionStatus::Failed => (
                TransactionStatus::Failed,
                Some(json!({ "reason": "declined", "code": code })),
            ),
            other => (other, None),
        };

        let record = VerificationRecord {
            status,
            payment_state: Some(code.clone()),
            payment_instrument: instrument,
            response: Some(raw.clone()),
            error_details,
            verified_at: now,
        };
        let stored = self.transactions.record_verification(&id, &record).await?;
        if stored.status != status {
            info!(
                transaction_id = %id,
                stored = stored.status.as_str(),
                reported = status.as_str(),
                "Transaction already settled; keeping stored status"
            );
        }

        let outcome = VerificationOutcome::from_status(stored.status);
        self.apply_to_order(&stored, outcome).await?;

        info!(
            transaction_id = %id,
            code = %code,
            attempts = stored.verification_attempts,
            "Verification outcome: {:?}",
            outcome
        );

        Ok(VerificationResult {
            outcome,
            transaction: stored,
            gateway_payload: raw,
        })
    }

    /// Close an attempt the gateway never confirmed.
    ///
    /// A status-only write: no verification round is counted. Returns the
    /// row as stored, which may have settled in the meantime.
    pub(crate) async fn expire(
        &self,
        txn: &PaymentTransaction,
        reason: &str,
    ) -> PaymentResult<PaymentTransaction> {
        let id = &txn.merchant_transaction_id;
        match self
            .transactions
            .mark_failed(id, &json!({ "reason": reason }))
            .await?
        {
            Some(stored) => {
                warn!(transaction_id = %id, reason, "Payment attempt closed unconfirmed");
                Ok(stored)
            }
            None => {
                let stored = self.load(id).await?;
                let outcome = VerificationOutcome::from_status(stored.status);
                self.apply_to_order(&stored, outcome).await?;
                Ok(stored)
            }
        }
    }

    async fn load(&self, merchant_transaction_id: &str) -> PaymentResult<PaymentTransaction> {
        self.transactions
            .get_transaction(merchant_transaction_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Transaction", merchant_transaction_id))
    }

    /// Count the round without touching status fields
    async fn record_attempt_only(&self, txn: &PaymentTransaction, now: DateTime<Utc>) {
        let record = VerificationRecord {
            status: txn.status,
            payment_state: None,
            payment_instrument: None,
            response: None,
            error_details: None,
            verified_at: now,
        };
        if let Err(err) = self
            .transactions
            .record_verification(&txn.merchant_transaction_id, &record)
            .await
        {
            error!(
                transaction_id = %txn.merchant_transaction_id,
                "Failed to record verification attempt: {}", err
            );
        }
    }

    /// Only a completed attempt touches the order; a failed one leaves it
    /// payable so the shopper can start a new attempt.
    ///
    /// A completed attempt the order no longer points at still pays for
    /// it: the order is settled by id and re-pointed at that attempt.
    async fn apply_to_order(
        &self,
        txn: &PaymentTransaction,
        outcome: VerificationOutcome,
    ) -> PaymentResult<()> {
        if outcome != VerificationOutcome::Success {
            return Ok(());
        }
        let id = &txn.merchant_transaction_id;
        if self
            .ledger
            .update_payment_outcome(id, PaymentOutcome::Completed)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let Some(order_id) = txn.order_id else {
            warn!(transaction_id = %id, "Completed transaction did not change any order");
            return Ok(());
        };
        if self.ledger.complete_order(order_id, id).await?.is_some() {
            return Ok(());
        }

        let order = self.ledger.get_order(order_id).await?;
        if order.transaction_id.as_deref() != Some(id.as_str()) {
            error!(
                transaction_id = %id,
                order_id,
                paid_by = order.transaction_id.as_deref().unwrap_or("-"),
                "Order already paid by another attempt; this payment needs a refund"
            );
        }
        Ok(())
    }
}
