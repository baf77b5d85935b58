//! # Payment Session Initiator
//!
//! Opens a gateway payment session for an order.
//!
//! Ordering per attempt:
//! 1. validate (nothing reaches the gateway on bad input)
//! 2. write the transaction row as `initiated`
//! 3. call the gateway
//! 4. on success: row → `pending`, then point the order at the row
//!
//! A gateway failure leaves the row `initiated` with the error attached and
//! the order untouched, so a retry is always safe.

use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{GatewayRegistry, PayRequest, PayResponse};
use crate::identity::Identity;
use crate::ledger::OrderLedger;
use crate::order::{Order, OrderId, OrderStatus};
use crate::store::SharedTransactionStore;
use crate::transaction::{generate_transaction_id, PaymentTransaction, TransactionStatus};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

/// Default payment session lifetime (20 minutes)
pub const DEFAULT_SESSION_TTL_SECS: i64 = 1200;

/// Input for one payment attempt
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub order_id: OrderId,
    /// Amount in minor units; must equal the order total
    pub amount: i64,
    pub callback_url: String,
}

/// Where to send the shopper, and the attempt to verify afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub payment_url: String,
    pub merchant_transaction_id: String,
}

#[derive(Clone)]
pub struct PaymentInitiator {
    ledger: OrderLedger,
    transactions: SharedTransactionStore,
    gateways: GatewayRegistry,
    session_ttl: Duration,
}

impl PaymentInitiator {
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

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Start a payment attempt for `request.order_id` on behalf of `identity`.
    ///
    /// Every call creates a new merchant transaction id; the order's
    /// `transaction_id` always points at the latest attempt.
    #[instrument(skip(self, request, identity), fields(order_id = request.order_id, user_id = %identity.user_id))]
    pub async fn initiate(
        &self,
        request: InitiateRequest,
        identity: &Identity,
    ) -> PaymentResult<PaymentSession> {
        validate_callback_url(&request.callback_url)?;
        if request.amount <= 0 {
            return Err(PaymentError::Validation(
                "Amount must be positive".to_string(),
            ));
        }

        let order = self.ledger.get_order(request.order_id).await?;
        if !order.is_owned_by(&identity.user_id) {
            return Err(PaymentError::Authorization(format!(
                "Order {} belongs to another user",
                order.order_id
            )));
        }
        if order.is_paid() {
            return Err(PaymentError::Validation("Order is already paid".to_string()));
        }
        if matches!(
            order.order_status,
            OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Cancelled
        ) {
            return Err(PaymentError::Validation(format!(
                "Order is {} and cannot be paid",
                order.order_status.as_str()
            )));
        }
        if order.line_items.is_empty() {
            return Err(PaymentError::Validation("Order has no items".to_string()));
        }
        order.shipping_address.validate()?;
        if request.amount != order.total_amount {
            return Err(PaymentError::Validation(format!(
                "Amount {} does not match order total {}",
                request.amount, order.total_amount
            )));
        }

        // A settled earlier attempt must not be orphaned by a new one.
        if let Some(paid) = self.completed_attempt(&order).await? {
            warn!(
                transaction_id = %paid.merchant_transaction_id,
                "Order has a completed transaction but is not marked paid; repairing"
            );
            self.ledger
                .complete_order(order.order_id, &paid.merchant_transaction_id)
                .await?;
            return Err(PaymentError::Validation("Order is already paid".to_string()));
        }

        let gateway = self.gateways.default_gateway().ok_or_else(|| {
            PaymentError::Configuration("No payment gateway configured".to_string())
        })?;

        let now = Utc::now();
        let merchant_transaction_id = generate_transaction_id(now);
        let pay_request = PayRequest {
            merchant_transaction_id: merchant_transaction_id.clone(),
            merchant_user_id: gateway.merchant_user_id(&identity.user_id),
            amount: request.amount,
            callback_url: request.callback_url.clone(),
            expire_after: self.session_ttl,
        };

        let transaction = PaymentTransaction::initiated(
            merchant_transaction_id.clone(),
            gateway.provider_name(),
            identity.user_id.clone(),
            order.order_id,
            request.amount,
            gateway.merchant_id(),
            pay_request.merchant_user_id.clone(),
            gateway.pay_payload(&pay_request),
            now,
        );
        self.transactions.insert_transaction(&transaction).await?;
        info!(
            transaction_id = %merchant_transaction_id,
            provider = gateway.provider_name(),
            "Payment transaction initiated"
        );

        let response = match gateway.create_payment(&pay_request).await {
            Ok(response) => response,
            Err(err) => {
                error!(transaction_id = %merchant_transaction_id, "Gateway pay call failed: {}", err);
                self.keep_initiation_error(
                    &merchant_transaction_id,
                    json!({ "stage": "pay", "error": err.to_string() }),
                )
                .await;
                return Err(err);
            }
        };

        let (payment_url, code, raw) = match response {
            PayResponse::Redirect {
                redirect_url,
                code,
                raw,
            } => (redirect_url, code, raw),
            PayResponse::Declined { code, message, raw } => {
                error!(transaction_id = %merchant_transaction_id, code = %code, "Gateway declined payment session: {}", message);
                self.keep_initiation_error(&merchant_transaction_id, raw).await;
                return Err(PaymentError::gateway(
                    gateway.provider_name(),
                    format!("session declined: {}", code),
                ));
            }
            PayResponse::Unrecognized { raw } => {
                error!(transaction_id = %merchant_transaction_id, "Unrecognized pay response: {}", raw);
                self.keep_initiation_error(&merchant_transaction_id, raw).await;
                return Err(PaymentError::gateway(
                    gateway.provider_name(),
                    "unrecognized pay response",
                ));
            }
        };

        let moved = self
            .transactions
            .mark_pending(&merchant_transaction_id, &raw, code.as_deref())
            .await?;
        if !moved {
            // A fast callback already settled the row; leave it alone.
            warn!(transaction_id = %merchant_transaction_id, "Transaction left initiated state before pay response was stored");
        }

        self.ledger
            .attach_transaction(order.order_id, &merchant_transaction_id, gateway.provider_name())
            .await?;

        info!(transaction_id = %merchant_transaction_id, "Payment session opened");

        Ok(PaymentSession {
            payment_url,
            merchant_transaction_id,
        })
    }

    /// Any completed attempt for `order`, including ones recorded before
    /// attempts carried their order id
    async fn completed_attempt(&self, order: &Order) -> PaymentResult<Option<PaymentTransaction>> {
        if let Some(paid) = self.transactions.completed_for_order(order.order_id).await? {
            return Ok(Some(paid));
        }
        let Some(current) = order.transaction_id.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .transactions
            .get_transaction(current)
            .await?
            .filter(|txn| txn.status == TransactionStatus::Completed))
    }

    async fn keep_initiation_error(&self, merchant_transaction_id: &str, details: serde_json::Value) {
        if let Err(err) = self
            .transactions
            .record_initiation_error(merchant_transaction_id, &details)
            .await
        {
            error!(transaction_id = merchant_transaction_id, "Failed to record initiation error: {}", err);
        }
    }
}

fn validate_callback_url(url: &str) -> PaymentResult<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PaymentError::Validation("Callback URL is required".to_string()));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(PaymentError::Validation(
            "Callback URL must be an http(s) URL".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OrderEvents;
    use crate::fixtures::Harness;
    use crate::order::{LineItem, PaymentStatus};
    use crate::store::TransactionStore;
    use crate::testing::PayScript;

    #[tokio::test]
    async fn test_initiate_happy_path() {
        let h = Harness::new();
        let order = h.order("user-1", vec![LineItem::new(1, 2, 500), LineItem::new(2, 1, 300)]).await;
        assert_eq!(order.total_amount, 1300);

        let session = h
            .initiator
            .initiate(h.request(order.order_id, 1300), &Identity::new("user-1"))
            .await
            .unwrap();

        assert_eq!(session.payment_url, "https://pay.example.test/session");
        let txn = h
            .store
            .get_transaction(&session.merchant_transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(txn.status, TransactionStatus::Pending);
        assert_eq!(txn.amount, 1300);
        assert_eq!(txn.merchant_user_id, "MUIDuser-1");
        assert!(txn.request_payload.is_some());

        let snapshot = h.ledger.get_status(order.order_id).await.unwrap();
        assert_eq!(snapshot.order_status, OrderStatus::Processing);
        assert_eq!(snapshot.payment_status, PaymentStatus::Pending);
        assert_eq!(
            snapshot.transaction_id.as_deref(),
            Some(session.merchant_transaction_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_row_written_before_gateway_call() {
        let h = Harness::new();
        h.gateway.observe(h.store.clone());
        h.gateway.set_pay(PayScript::HttpError(503));
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;

        let err = h
            .initiator
            .initiate(h.request(order.order_id, 700), &Identity::new("user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Gateway { .. }));

        assert_eq!(
            h.gateway.observed_at_pay(),
            vec![Some(TransactionStatus::Initiated)]
        );
        assert_eq!(h.store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_gateway_500_leaves_retryable_state() {
        let h = Harness::new();
        h.gateway.set_pay(PayScript::HttpError(500));
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;

        let err = h
            .initiator
            .initiate(h.request(order.order_id, 700), &Identity::new("user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Gateway { .. }));

        let unsettled = h
            .store
            .list_unsettled_before(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(unsettled.len(), 1);
        assert_eq!(unsettled[0].status, TransactionStatus::Initiated);
        assert!(unsettled[0].error_details.is_some());

        let snapshot = h.ledger.get_status(order.order_id).await.unwrap();
        assert_eq!(snapshot.payment_status, PaymentStatus::Pending);
        assert_eq!(snapshot.order_status, OrderStatus::Pending);
        assert!(snapshot.transaction_id.is_none());

        // Retry succeeds once the gateway recovers
        h.gateway
            .set_pay(PayScript::Redirect("https://pay.example.test/retry".into()));
        let session = h
            .initiator
            .initiate(h.request(order.order_id, 700), &Identity::new("user-1"))
            .await
            .unwrap();
        assert_eq!(session.payment_url, "https://pay.example.test/retry");
    }

    #[tokio::test]
    async fn test_declined_and_unrecognized_are_gateway_errors() {
        let h = Harness::new();
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;

        h.gateway.set_pay(PayScript::Declined("BAD_REQUEST".into()));
        let err = h
            .initiator
            .initiate(h.request(order.order_id, 700), &Identity::new("user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Gateway { .. }));

        h.gateway.set_pay(PayScript::Unrecognized);
        let err = h
            .initiator
            .initiate(h.request(order.order_id, 700), &Identity::new("user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Gateway { .. }));
        assert!(h.ledger.get_status(order.order_id).await.unwrap().transaction_id.is_none());
    }

    #[tokio::test]
    async fn test_validation_never_reaches_gateway() {
        let h = Harness::new();
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;
        let who = Identity::new("user-1");

        let mut bad_url = h.request(order.order_id, 700);
        bad_url.callback_url = "".into();
        assert!(matches!(
            h.initiator.initiate(bad_url, &who).await,
            Err(PaymentError::Validation(_))
        ));

        assert!(matches!(
            h.initiator.initiate(h.request(order.order_id, 699), &who).await,
            Err(PaymentError::Validation(_))
        ));

        assert!(matches!(
            h.initiator.initiate(h.request(order.order_id, 0), &who).await,
            Err(PaymentError::Validation(_))
        ));

        assert!(matches!(
            h.initiator.initiate(h.request(9999, 700), &who).await,
            Err(PaymentError::NotFound { .. })
        ));

        assert_eq!(h.gateway.pay_calls(), 0);
        assert_eq!(h.store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_other_users_order_rejected() {
        let h = Harness::new();
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;

        let err = h
            .initiator
            .initiate(h.request(order.order_id, 700), &Identity::new("user-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Authorization(_)));
        assert_eq!(h.gateway.pay_calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_creates_new_transaction_and_repoints_order() {
        let h = Harness::new();
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;
        let who = Identity::new("user-1");

        let first = h
            .initiator
            .initiate(h.request(order.order_id, 700), &who)
            .await
            .unwrap();
        let second = h
            .initiator
            .initiate(h.request(order.order_id, 700), &who)
            .await
            .unwrap();

        assert_ne!(first.merchant_transaction_id, second.merchant_transaction_id);
        let snapshot = h.ledger.get_status(order.order_id).await.unwrap();
        assert_eq!(
            snapshot.transaction_id.as_deref(),
            Some(second.merchant_transaction_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_completed_attempt_is_not_orphaned() {
        let h = Harness::new();
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;
        let who = Identity::new("user-1");
        let first = h
            .initiator
            .initiate(h.request(order.order_id, 700), &who)
            .await
            .unwrap();

        // Transaction settled but the order update was lost
        h.store
            .record_verification(
                &first.merchant_transaction_id,
                &crate::transaction::VerificationRecord {
                    status: TransactionStatus::Completed,
                    payment_state: Some("PAYMENT_SUCCESS".into()),
                    payment_instrument: None,
                    response: None,
                    error_details: None,
                    verified_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let err = h
            .initiator
            .initiate(h.request(order.order_id, 700), &who)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(h.gateway.pay_calls(), 1);

        let snapshot = h.ledger.get_status(order.order_id).await.unwrap();
        assert_eq!(snapshot.payment_status, PaymentStatus::Completed);
        assert_eq!(
            snapshot.transaction_id.as_deref(),
            Some(first.merchant_transaction_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_gateway_is_configuration_error() {
        let h = Harness::new();
        let order = h.order("user-1", vec![LineItem::new(1, 1, 700)]).await;
        let initiator = PaymentInitiator::new(
            OrderLedger::new(h.store.clone(), OrderEvents::default()),
            h.store.clone(),
            GatewayRegistry::new("phonepe"),
            Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        );

        let err = initiator
            .initiate(h.request(order.order_id, 700), &Identity::new("user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Configuration(_)));
    }
}
