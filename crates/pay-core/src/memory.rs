//! # In-Memory Store
//!
//! `OrderStore` + `TransactionStore` backed by a mutex-guarded map.
//! Used for local development and as the test double for the services.
//! Guards behave exactly like the hosted store's filtered updates.

use crate::error::{PaymentError, PaymentResult};
use crate::order::{LineItem, NewOrder, Order, OrderId, OrderStatus, PaymentStatus};
use crate::store::{OrderStore, TransactionStore};
use crate::transaction::{PaymentTransaction, TransactionStatus, VerificationRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    orders: BTreeMap<OrderId, Order>,
    transactions: HashMap<String, PaymentTransaction>,
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    last_order_id: AtomicI64,
    fail_item_inserts: AtomicBool,
    fail_order_deletes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `insert_order_items` fail (fault injection)
    pub fn fail_item_inserts(&self, fail: bool) {
        self.fail_item_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make `delete_order` fail (fault injection)
    pub fn fail_order_deletes(&self, fail: bool) {
        self.fail_order_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn order_count(&self) -> usize {
        self.tables().map(|t| t.orders.len()).unwrap_or(0)
    }

    pub fn transaction_count(&self) -> usize {
        self.tables().map(|t| t.transactions.len()).unwrap_or(0)
    }

    /// Current status of a transaction, if present
    pub fn transaction_status(&self, merchant_transaction_id: &str) -> Option<TransactionStatus> {
        self.tables()
            .ok()?
            .transactions
            .get(merchant_transaction_id)
            .map(|t| t.status)
    }

    /// Change an order's fulfilment status (stands in for external operations)
    pub fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> PaymentResult<()> {
        let mut tables = self.tables()?;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| PaymentError::not_found("Order", order_id))?;
        order.order_status = status;
        order.updated_at = Utc::now();
        Ok(())
    }

    /// Backdate a transaction (for expiry tests and local replay)
    pub fn set_transaction_created_at(
        &self,
        merchant_transaction_id: &str,
        created_at: DateTime<Utc>,
    ) -> PaymentResult<()> {
        let mut tables = self.tables()?;
        let txn = tables
            .transactions
            .get_mut(merchant_transaction_id)
            .ok_or_else(|| PaymentError::not_found("Transaction", merchant_transaction_id))?;
        txn.created_at = created_at;
        Ok(())
    }

    fn tables(&self) -> PaymentResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| PaymentError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, new_order: &NewOrder) -> PaymentResult<Order> {
        let order_id = self.last_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let order = Order {
            order_id,
            user_id: new_order.user_id.clone(),
            shipping_address: new_order.shipping_address.clone(),
            billing_address: new_order.billing_address.clone(),
            line_items: Vec::new(),
            total_amount: new_order.total_amount,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: Some(new_order.payment_method.clone()),
            transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        self.tables()?.orders.insert(order_id, order.clone());
        Ok(order)
    }

    async fn insert_order_items(&self, order_id: OrderId, items: &[LineItem]) -> PaymentResult<()> {
        if self.fail_item_inserts.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("order_items insert rejected".to_string()));
        }
        let mut tables = self.tables()?;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| PaymentError::not_found("Order", order_id))?;
        order.line_items.extend_from_slice(items);
        Ok(())
    }

    async fn delete_order(&self, order_id: OrderId) -> PaymentResult<()> {
        if self.fail_order_deletes.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("orders delete rejected".to_string()));
        }
        self.tables()?.orders.remove(&order_id);
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> PaymentResult<Option<Order>> {
        Ok(self.tables()?.orders.get(&order_id).cloned())
    }

    async fn attach_transaction(
        &self,
        order_id: OrderId,
        transaction_id: &str,
        payment_method: &str,
    ) -> PaymentResult<Option<Order>> {
        let mut tables = self.tables()?;
        let Some(order) = tables.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        if order.payment_status == PaymentStatus::Completed {
            return Ok(None);
        }
        order.transaction_id = Some(transaction_id.to_string());
        order.order_status = OrderStatus::Processing;
        order.payment_method = Some(payment_method.to_string());
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn set_payment_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> PaymentResult<Option<Order>> {
        let mut tables = self.tables()?;
        let Some(order) = tables
            .orders
            .values_mut()
            .find(|o| o.transaction_id.as_deref() == Some(transaction_id))
        else {
            return Ok(None);
        };
        if order.payment_status == PaymentStatus::Completed || order.payment_status == status {
            return Ok(None);
        }
        order.payment_status = status;
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn complete_payment(
        &self,
        order_id: OrderId,
        transaction_id: &str,
    ) -> PaymentResult<Option<Order>> {
        let mut tables = self.tables()?;
        let Some(order) = tables.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        if order.payment_status == PaymentStatus::Completed {
            return Ok(None);
        }
        order.payment_status = PaymentStatus::Completed;
        order.transaction_id = Some(transaction_id.to_string());
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> PaymentResult<()> {
        let mut tables = self.tables()?;
        if tables
            .transactions
            .contains_key(&transaction.merchant_transaction_id)
        {
            return Err(PaymentError::Conflict(format!(
                "Transaction {} already exists",
                transaction.merchant_transaction_id
            )));
        }
        tables.transactions.insert(
            transaction.merchant_transaction_id.clone(),
            transaction.clone(),
        );
        Ok(())
    }

    async fn get_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        Ok(self
            .tables()?
            .transactions
            .get(merchant_transaction_id)
            .cloned())
    }

    async fn mark_pending(
        &self,
        merchant_transaction_id: &str,
        response: &Value,
        payment_state: Option<&str>,
    ) -> PaymentResult<bool> {
        let mut tables = self.tables()?;
        let Some(txn) = tables.transactions.get_mut(merchant_transaction_id) else {
            return Ok(false);
        };
        if txn.status != TransactionStatus::Initiated {
            return Ok(false);
        }
        txn.status = TransactionStatus::Pending;
        txn.gateway_response = Some(response.clone());
        txn.payment_state = payment_state.map(String::from);
        txn.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_initiation_error(
        &self,
        merchant_transaction_id: &str,
        error_details: &Value,
    ) -> PaymentResult<()> {
        let mut tables = self.tables()?;
        if let Some(txn) = tables.transactions.get_mut(merchant_transaction_id) {
            txn.error_details = Some(error_details.clone());
            txn.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_verification(
        &self,
        merchant_transaction_id: &str,
        record: &VerificationRecord,
    ) -> PaymentResult<PaymentTransaction> {
        let mut tables = self.tables()?;
        let txn = tables
            .transactions
            .get_mut(merchant_transaction_id)
            .ok_or_else(|| PaymentError::not_found("Transaction", merchant_transaction_id))?;
        txn.apply_verification(record);
        Ok(txn.clone())
    }

    async fn mark_failed(
        &self,
        merchant_transaction_id: &str,
        error_details: &Value,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        let mut tables = self.tables()?;
        let Some(txn) = tables.transactions.get_mut(merchant_transaction_id) else {
            return Ok(None);
        };
        if txn.status.is_terminal() {
            return Ok(None);
        }
        txn.status = TransactionStatus::Failed;
        txn.error_details = Some(error_details.clone());
        txn.updated_at = Utc::now();
        Ok(Some(txn.clone()))
    }

    async fn completed_for_order(
        &self,
        order_id: OrderId,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        Ok(self
            .tables()?
            .transactions
            .values()
            .filter(|t| t.order_id == Some(order_id) && t.status == TransactionStatus::Completed)
            .min_by_key(|t| t.created_at)
            .cloned())
    }

    async fn list_unsettled_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<PaymentTransaction>> {
        let mut unsettled: Vec<_> = self
            .tables()?
            .transactions
            .values()
            .filter(|t| !t.status.is_terminal() && t.created_at < cutoff)
            .cloned()
            .collect();
        unsettled.sort_by_key(|t| t.created_at);
        Ok(unsettled)
    }
}
