//! # Persistence Traits
//!
//! Row-level operations the payment core needs from the persistence layer.
//! No cross-row transactions are assumed. Every status write is a guarded
//! (compare-and-set) update, so concurrent callers can race safely:
//! a guard that does not match is reported as "nothing written", never as
//! an error.

use crate::error::PaymentResult;
use crate::order::{LineItem, NewOrder, Order, OrderId, PaymentStatus};
use crate::transaction::{PaymentTransaction, VerificationRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert the order row. Returns the persisted order with its
    /// ledger-assigned id (and no line items yet).
    async fn insert_order(&self, order: &NewOrder) -> PaymentResult<Order>;

    /// Insert one item row per line item
    async fn insert_order_items(&self, order_id: OrderId, items: &[LineItem]) -> PaymentResult<()>;

    /// Remove an order row and any item rows (compensation path)
    async fn delete_order(&self, order_id: OrderId) -> PaymentResult<()>;

    /// Fresh read of an order and its items
    async fn get_order(&self, order_id: OrderId) -> PaymentResult<Option<Order>>;

    /// Point the order at a new payment attempt and mark it `processing`.
    ///
    /// Guard: `payment_status != completed`. Returns the updated order,
    /// or `None` when the guard did not match.
    async fn attach_transaction(
        &self,
        order_id: OrderId,
        transaction_id: &str,
        payment_method: &str,
    ) -> PaymentResult<Option<Order>>;

    /// Set `payment_status` on the order referencing `transaction_id`.
    ///
    /// Guard: current status is neither `completed` nor `status` already.
    /// Returns the updated order, or `None` when nothing was written.
    async fn set_payment_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> PaymentResult<Option<Order>>;

    /// Mark the order paid by `transaction_id` and point it there.
    ///
    /// Used when a completed attempt is no longer the order's latest one.
    /// Guard: `payment_status != completed`. Returns the updated order, or
    /// `None` when nothing was written.
    async fn complete_payment(
        &self,
        order_id: OrderId,
        transaction_id: &str,
    ) -> PaymentResult<Option<Order>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a fresh `initiated` row
    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> PaymentResult<()>;

    async fn get_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentTransaction>>;

    /// `initiated` → `pending`, storing the gateway's session response.
    ///
    /// Guard: `status == initiated`. Returns whether a row was written.
    async fn mark_pending(
        &self,
        merchant_transaction_id: &str,
        response: &Value,
        payment_state: Option<&str>,
    ) -> PaymentResult<bool>;

    /// Keep the failure of a pay call on the row, leaving its status as is
    async fn record_initiation_error(
        &self,
        merchant_transaction_id: &str,
        error_details: &Value,
    ) -> PaymentResult<()>;

    /// Apply one verification round atomically with respect to other
    /// verifications of the same row (see
    /// [`PaymentTransaction::apply_verification`]). Returns the row as stored.
    async fn record_verification(
        &self,
        merchant_transaction_id: &str,
        record: &VerificationRecord,
    ) -> PaymentResult<PaymentTransaction>;

    /// Close an attempt as `failed` without counting a verification round.
    ///
    /// Guard: status is `initiated` or `pending`. Returns the updated row,
    /// or `None` when it had already settled.
    async fn mark_failed(
        &self,
        merchant_transaction_id: &str,
        error_details: &Value,
    ) -> PaymentResult<Option<PaymentTransaction>>;

    /// Earliest `completed` attempt recorded against `order_id`
    async fn completed_for_order(
        &self,
        order_id: OrderId,
    ) -> PaymentResult<Option<PaymentTransaction>>;

    /// Rows still `initiated`/`pending` created before `cutoff`
    async fn list_unsettled_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<PaymentTransaction>>;
}

pub type SharedOrderStore = Arc<dyn OrderStore>;
pub type SharedTransactionStore = Arc<dyn TransactionStore>;
