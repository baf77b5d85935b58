//! # Order Ledger
//!
//! Owns order records and their status fields. Every read goes to the
//! store; nothing is cached between calls.

use crate::error::{PaymentError, PaymentResult};
use crate::events::{OrderEvents, OrderSubscription};
use crate::order::{Address, LineItem, NewOrder, Order, OrderId, OrderSnapshot, PaymentStatus};
use crate::store::SharedOrderStore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Terminal result of a payment attempt, as applied to its order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Completed,
    Failed,
}

impl PaymentOutcome {
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Completed => PaymentStatus::Completed,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

#[derive(Clone)]
pub struct OrderLedger {
    orders: SharedOrderStore,
    events: OrderEvents,
}

impl OrderLedger {
    pub fn new(orders: SharedOrderStore, events: OrderEvents) -> Self {
        Self { orders, events }
    }

    /// Create an order with its item rows.
    ///
    /// The total is captured from the given unit prices. The order row and
    /// the item rows are separate writes; if the item write fails the order
    /// row is deleted again and `PartialFailure` is returned either way,
    /// since the id was already allocated.
    #[instrument(skip(self, shipping_address, billing_address, line_items), fields(items = line_items.len()))]
    pub async fn create(
        &self,
        user_id: &str,
        shipping_address: Address,
        billing_address: Option<Address>,
        line_items: Vec<LineItem>,
    ) -> PaymentResult<Order> {
        let new_order = NewOrder::new(user_id, shipping_address, billing_address, line_items)?;

        let mut order = self.orders.insert_order(&new_order).await?;
        let order_id = order.order_id;

        if let Err(err) = self
            .orders
            .insert_order_items(order_id, &new_order.line_items)
            .await
        {
            error!(order_id, "Failed to insert order items: {}", err);
            let compensated = match self.orders.delete_order(order_id).await {
                Ok(()) => {
                    warn!(order_id, "Rolled back order row after item insert failure");
                    true
                }
                Err(cleanup_err) => {
                    error!(order_id, "Failed to roll back order row: {}", cleanup_err);
                    false
                }
            };
            return Err(PaymentError::PartialFailure {
                order_id,
                compensated,
                message: err.to_string(),
            });
        }

        order.line_items = new_order.line_items;
        info!(
            order_id,
            total = order.total_amount,
            "Created order with {} items",
            order.line_items.len()
        );
        self.events.publish(order.snapshot());
        Ok(order)
    }

    /// Full order record (fresh read)
    pub async fn get_order(&self, order_id: OrderId) -> PaymentResult<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Order", order_id))
    }

    /// Latest persisted status fields (fresh read)
    pub async fn get_status(&self, order_id: OrderId) -> PaymentResult<OrderSnapshot> {
        Ok(self.get_order(order_id).await?.snapshot())
    }

    /// Apply a payment outcome to the order referencing `transaction_id`.
    ///
    /// Idempotent: repeating an outcome writes nothing, and a `completed`
    /// order is never downgraded. Returns the new snapshot if a write happened.
    #[instrument(skip(self))]
    pub async fn update_payment_outcome(
        &self,
        transaction_id: &str,
        outcome: PaymentOutcome,
    ) -> PaymentResult<Option<OrderSnapshot>> {
        let updated = self
            .orders
            .set_payment_status(transaction_id, outcome.payment_status())
            .await?;

        match updated {
            Some(order) => {
                info!(
                    order_id = order.order_id,
                    "Order payment status -> {}",
                    order.payment_status.as_str()
                );
                let snapshot = order.snapshot();
                self.events.publish(snapshot.clone());
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Mark `order_id` paid by `transaction_id`, re-pointing the order at
    /// that attempt. Never touches an order that is already paid.
    #[instrument(skip(self))]
    pub async fn complete_order(
        &self,
        order_id: OrderId,
        transaction_id: &str,
    ) -> PaymentResult<Option<OrderSnapshot>> {
        let Some(order) = self.orders.complete_payment(order_id, transaction_id).await? else {
            return Ok(None);
        };
        warn!(order_id, transaction_id, "Order settled by an earlier payment attempt");
        let snapshot = order.snapshot();
        self.events.publish(snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Point an order at its latest payment attempt
    #[instrument(skip(self))]
    pub(crate) async fn attach_transaction(
        &self,
        order_id: OrderId,
        transaction_id: &str,
        payment_method: &str,
    ) -> PaymentResult<OrderSnapshot> {
        let order = self
            .orders
            .attach_transaction(order_id, transaction_id, payment_method)
            .await?
            .ok_or_else(|| {
                PaymentError::Conflict(format!("Order {} was paid concurrently", order_id))
            })?;
        let snapshot = order.snapshot();
        self.events.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Listen for changes to one order (best effort)
    pub fn subscribe(&self, order_id: OrderId) -> OrderSubscription {
        self.events.subscribe(order_id)
    }

    pub fn events(&self) -> &OrderEvents {
        &self.events
    }
}
