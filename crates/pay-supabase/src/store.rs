//! # PostgREST Store
//!
//! `OrderStore` + `TransactionStore` over the Supabase REST interface.
//!
//! Tables: `orders`, `order_items`, `payment_transactions`. Money columns on
//! `orders`/`order_items` are major units (numeric); `payment_transactions.amount`
//! is minor units, exactly what the gateway was asked to charge.
//!
//! Guarded writes are filtered PATCHes with `Prefer: return=representation`:
//! zero rows back means the guard did not match.

use crate::config::SupabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pay_core::amount;
use pay_core::{
    Address, LineItem, NewOrder, Order, OrderId, OrderStatus, OrderStore, PaymentError,
    PaymentResult, PaymentStatus, PaymentTransaction, TransactionStatus, TransactionStore,
    VerificationRecord,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, instrument, warn};

const ORDERS: &str = "orders";
const ORDER_ITEMS: &str = "order_items";
const TRANSACTIONS: &str = "payment_transactions";

/// Order columns plus embedded items
const ORDER_SELECT: &str = "*,order_items(*)";

/// Attempts at the optimistic verification write before giving up
const MAX_CAS_ATTEMPTS: usize = 3;

pub struct SupabaseStore {
    config: SupabaseConfig,
    client: Client,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                PaymentError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.config.rest_url(table))
            .header("apikey", &self.config.service_role_key)
            .header("Authorization", self.config.auth_header())
    }

    /// Send and decode a JSON body
    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder, context: &str) -> PaymentResult<T> {
        let body = self.execute(builder, context).await?;
        serde_json::from_str(&body).map_err(|e| {
            error!("Unexpected {} response: {}", context, body);
            PaymentError::Serialization(format!("Failed to parse {} response: {}", context, e))
        })
    }

    /// Send, check status, return the raw body
    async fn execute(&self, builder: RequestBuilder, context: &str) -> PaymentResult<String> {
        let response = builder
            .send()
            .await
            .map_err(|e| PaymentError::Storage(format!("{}: {}", context, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Storage(format!("{}: {}", context, e)))?;

        if status == StatusCode::CONFLICT {
            return Err(PaymentError::Conflict(format!("{}: {}", context, body)));
        }
        if !status.is_success() {
            error!("PostgREST error on {}: status={}, body={}", context, status, body);
            return Err(PaymentError::Storage(format!("{}: HTTP {}", context, status)));
        }
        Ok(body)
    }

    async fn fetch_transaction_row(
        &self,
        merchant_transaction_id: &str,
    ) -> PaymentResult<Option<TransactionRow>> {
        let rows: Vec<TransactionRow> = self
            .fetch(
                self.request(Method::GET, TRANSACTIONS)
                    .query(&[("merchant_transaction_id", eq(merchant_transaction_id))]),
                "select payment_transactions",
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

fn minor_from_db(major: f64) -> i64 {
    (major * amount::MINOR_PER_MAJOR as f64).round() as i64
}

/// Addresses are stored as JSON text; older rows may hold a JSON object
fn decode_address(value: Value) -> PaymentResult<Address> {
    match value {
        Value::String(text) => serde_json::from_str(&text).map_err(PaymentError::from),
        other => serde_json::from_value(other).map_err(PaymentError::from),
    }
}

fn encode_address(address: &Address) -> PaymentResult<String> {
    Ok(serde_json::to_string(address)?)
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, Serialize)]
struct NewOrderRow<'a> {
    user_id: &'a str,
    shipping_address: String,
    billing_address: String,
    total_amount: f64,
    order_status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: &'a str,
    order_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct OrderRow {
    order_id: OrderId,
    user_id: String,
    shipping_address: Value,
    #[serde(default)]
    billing_address: Option<Value>,
    total_amount: f64,
    order_status: OrderStatus,
    payment_status: PaymentStatus,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    order_items: Vec<OrderItemRow>,
}

impl OrderRow {
    fn into_order(self) -> PaymentResult<Order> {
        let shipping_address = decode_address(self.shipping_address)?;
        let billing_address = match self.billing_address {
            Some(value) if !value.is_null() => decode_address(value)?,
            _ => shipping_address.clone(),
        };
        let line_items = self
            .order_items
            .into_iter()
            .map(OrderItemRow::into_line_item)
            .collect::<PaymentResult<Vec<_>>>()?;

        Ok(Order {
            order_id: self.order_id,
            user_id: self.user_id,
            shipping_address,
            billing_address,
            line_items,
            total_amount: minor_from_db(self.total_amount),
            order_status: self.order_status,
            payment_status: self.payment_status,
            payment_method: self.payment_method,
            transaction_id: self.transaction_id,
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderItemRow {
    #[serde(default)]
    order_id: OrderId,
    product_id: i64,
    quantity: i64,
    price: f64,
}

impl OrderItemRow {
    fn into_line_item(self) -> PaymentResult<LineItem> {
        let quantity = u32::try_from(self.quantity).map_err(|_| {
            PaymentError::Storage(format!(
                "order_items row for product {} has quantity {}",
                self.product_id, self.quantity
            ))
        })?;
        Ok(LineItem::new(self.product_id, quantity, minor_from_db(self.price)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TransactionRow {
    merchant_transaction_id: String,
    #[serde(default = "default_provider")]
    provider: String,
    user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    order_id: Option<OrderId>,
    amount: i64,
    merchant_id: String,
    merchant_user_id: String,
    status: TransactionStatus,
    #[serde(default)]
    phonepe_payload: Option<Value>,
    #[serde(default)]
    phonepe_response: Option<Value>,
    #[serde(default)]
    payment_state: Option<String>,
    #[serde(default)]
    payment_instrument_details: Option<Value>,
    #[serde(default)]
    verification_attempts: Option<i64>,
    #[serde(default)]
    last_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    error_details: Option<Value>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Rows written before the provider column existed all came from PhonePe
fn default_provider() -> String {
    "phonepe".to_string()
}

impl TransactionRow {
    fn from_domain(txn: &PaymentTransaction) -> Self {
        Self {
            merchant_transaction_id: txn.merchant_transaction_id.clone(),
            provider: txn.provider.clone(),
            user_id: txn.user_id.clone(),
            order_id: txn.order_id,
            amount: txn.amount,
            merchant_id: txn.merchant_id.clone(),
            merchant_user_id: txn.merchant_user_id.clone(),
            status: txn.status,
            phonepe_payload: txn.request_payload.clone(),
            phonepe_response: txn.gateway_response.clone(),
            payment_state: txn.payment_state.clone(),
            payment_instrument_details: txn.payment_instrument.clone(),
            verification_attempts: Some(i64::from(txn.verification_attempts)),
            last_verified_at: txn.last_verified_at,
            error_details: txn.error_details.clone(),
            created_at: txn.created_at,
            updated_at: Some(txn.updated_at),
        }
    }

    fn into_domain(self) -> PaymentTransaction {
        let attempts = self.verification_attempts.unwrap_or(0).max(0);
        PaymentTransaction {
            merchant_transaction_id: self.merchant_transaction_id,
            provider: self.provider,
            user_id: self.user_id,
            order_id: self.order_id,
            amount: self.amount,
            merchant_id: self.merchant_id,
            merchant_user_id: self.merchant_user_id,
            request_payload: self.phonepe_payload,
            gateway_response: self.phonepe_response,
            status: self.status,
            payment_state: self.payment_state,
            payment_instrument: self.payment_instrument_details,
            verification_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            last_verified_at: self.last_verified_at,
            error_details: self.error_details,
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
        }
    }
}

/// Columns a verification round may write
#[derive(Debug, Serialize)]
struct VerificationPatch {
    status: TransactionStatus,
    payment_state: Option<String>,
    payment_instrument_details: Option<Value>,
    phonepe_response: Option<Value>,
    error_details: Option<Value>,
    verification_attempts: i64,
    last_verified_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl VerificationPatch {
    fn from_domain(txn: &PaymentTransaction) -> Self {
        Self {
            status: txn.status,
            payment_state: txn.payment_state.clone(),
            payment_instrument_details: txn.payment_instrument.clone(),
            phonepe_response: txn.gateway_response.clone(),
            error_details: txn.error_details.clone(),
            verification_attempts: i64::from(txn.verification_attempts),
            last_verified_at: txn.last_verified_at,
            updated_at: txn.updated_at,
        }
    }
}

// =============================================================================
// OrderStore
// =============================================================================

#[async_trait]
impl OrderStore for SupabaseStore {
    #[instrument(skip(self, new_order), fields(user_id = %new_order.user_id))]
    async fn insert_order(&self, new_order: &NewOrder) -> PaymentResult<Order> {
        let row = NewOrderRow {
            user_id: &new_order.user_id,
            shipping_address: encode_address(&new_order.shipping_address)?,
            billing_address: encode_address(&new_order.billing_address)?,
            total_amount: amount::to_major(new_order.total_amount),
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: &new_order.payment_method,
            order_date: Utc::now(),
        };

        let rows: Vec<OrderRow> = self
            .fetch(
                self.request(Method::POST, ORDERS)
                    .header("Prefer", "return=representation")
                    .json(&row),
                "insert orders",
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| PaymentError::Storage("insert orders returned no row".to_string()))?
            .into_order()
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn insert_order_items(&self, order_id: OrderId, items: &[LineItem]) -> PaymentResult<()> {
        let rows: Vec<OrderItemRow> = items
            .iter()
            .map(|item| OrderItemRow {
                order_id,
                product_id: item.product_id,
                quantity: i64::from(item.quantity),
                price: amount::to_major(item.unit_price),
            })
            .collect();

        self.execute(
            self.request(Method::POST, ORDER_ITEMS)
                .header("Prefer", "return=minimal")
                .json(&rows),
            "insert order_items",
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, order_id: OrderId) -> PaymentResult<()> {
        // Items first, in case the foreign key does not cascade
        self.execute(
            self.request(Method::DELETE, ORDER_ITEMS)
                .query(&[("order_id", eq(order_id))]),
            "delete order_items",
        )
        .await?;
        self.execute(
            self.request(Method::DELETE, ORDERS)
                .query(&[("order_id", eq(order_id))]),
            "delete orders",
        )
        .await?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> PaymentResult<Option<Order>> {
        let rows: Vec<OrderRow> = self
            .fetch(
                self.request(Method::GET, ORDERS).query(&[
                    ("select", ORDER_SELECT.to_string()),
                    ("order_id", eq(order_id)),
                ]),
                "select orders",
            )
            .await?;
        rows.into_iter().next().map(OrderRow::into_order).transpose()
    }

    #[instrument(skip(self))]
    async fn attach_transaction(
        &self,
        order_id: OrderId,
        transaction_id: &str,
        payment_method: &str,
    ) -> PaymentResult<Option<Order>> {
        let rows: Vec<OrderRow> = self
            .fetch(
                self.request(Method::PATCH, ORDERS)
                    .query(&[
                        ("select", ORDER_SELECT.to_string()),
                        ("order_id", eq(order_id)),
                        ("payment_status", "neq.completed".to_string()),
                    ])
                    .header("Prefer", "return=representation")
                    .json(&json!({
                        "transaction_id": transaction_id,
                        "order_status": OrderStatus::Processing,
                        "payment_method": payment_method,
                        "updated_at": Utc::now(),
                    })),
                "attach transaction",
            )
            .await?;
        rows.into_iter().next().map(OrderRow::into_order).transpose()
    }

    #[instrument(skip(self))]
    async fn set_payment_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> PaymentResult<Option<Order>> {
        let rows: Vec<OrderRow> = self
            .fetch(
                self.request(Method::PATCH, ORDERS)
                    .query(&[
                        ("select", ORDER_SELECT.to_string()),
                        ("transaction_id", eq(transaction_id)),
                        (
                            "payment_status",
                            format!("not.in.(completed,{})", status.as_str()),
                        ),
                    ])
                    .header("Prefer", "return=representation")
                    .json(&json!({
                        "payment_status": status,
                        "updated_at": Utc::now(),
                    })),
                "set payment status",
            )
            .await?;
        if rows.len() > 1 {
            warn!(transaction_id, rows = rows.len(), "More than one order references transaction");
        }
        rows.into_iter().next().map(OrderRow::into_order).transpose()
    }

    #[instrument(skip(self))]
    async fn complete_payment(
        &self,
        order_id: OrderId,
        transaction_id: &str,
    ) -> PaymentResult<Option<Order>> {
        let rows: Vec<OrderRow> = self
            .fetch(
                self.request(Method::PATCH, ORDERS)
                    .query(&[
                        ("select", ORDER_SELECT.to_string()),
                        ("order_id", eq(order_id)),
                        ("payment_status", "neq.completed".to_string()),
                    ])
                    .header("Prefer", "return=representation")
                    .json(&json!({
                        "payment_status": PaymentStatus::Completed,
                        "transaction_id": transaction_id,
                        "updated_at": Utc::now(),
                    })),
                "complete payment",
            )
            .await?;
        rows.into_iter().next().map(OrderRow::into_order).transpose()
    }
}

// =============================================================================
// TransactionStore
// =============================================================================

#[async_trait]
impl TransactionStore for SupabaseStore {
    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.merchant_transaction_id))]
    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> PaymentResult<()> {
        self.execute(
            self.request(Method::POST, TRANSACTIONS)
                .header("Prefer", "return=minimal")
                .json(&TransactionRow::from_domain(transaction)),
            "insert payment_transactions",
        )
        .await?;
        Ok(())
    }

    async fn get_transaction(
        &self,
        merchant_transaction_id: &str,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        Ok(self
            .fetch_transaction_row(merchant_transaction_id)
            .await?
            .map(TransactionRow::into_domain))
    }

    #[instrument(skip(self, response))]
    async fn mark_pending(
        &self,
        merchant_transaction_id: &str,
        response: &Value,
        payment_state: Option<&str>,
    ) -> PaymentResult<bool> {
        let rows: Vec<Value> = self
            .fetch(
                self.request(Method::PATCH, TRANSACTIONS)
                    .query(&[
                        ("merchant_transaction_id", eq(merchant_transaction_id)),
                        ("status", eq(TransactionStatus::Initiated.as_str())),
                    ])
                    .header("Prefer", "return=representation")
                    .json(&json!({
                        "status": TransactionStatus::Pending,
                        "phonepe_response": response,
                        "payment_state": payment_state,
                        "updated_at": Utc::now(),
                    })),
                "mark pending",
            )
            .await?;
        Ok(!rows.is_empty())
    }

    #[instrument(skip(self, error_details))]
    async fn record_initiation_error(
        &self,
        merchant_transaction_id: &str,
        error_details: &Value,
    ) -> PaymentResult<()> {
        self.execute(
            self.request(Method::PATCH, TRANSACTIONS)
                .query(&[("merchant_transaction_id", eq(merchant_transaction_id))])
                .header("Prefer", "return=minimal")
                .json(&json!({
                    "error_details": error_details,
                    "updated_at": Utc::now(),
                })),
            "record initiation error",
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, record))]
    async fn record_verification(
        &self,
        merchant_transaction_id: &str,
        record: &VerificationRecord,
    ) -> PaymentResult<PaymentTransaction> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let row = self
                .fetch_transaction_row(merchant_transaction_id)
                .await?
                .ok_or_else(|| PaymentError::not_found("Transaction", merchant_transaction_id))?;

            let attempts_filter = match row.verification_attempts {
                Some(n) => eq(n),
                None => "is.null".to_string(),
            };
            let status_filter = eq(row.status.as_str());

            let mut next = row.into_domain();
            next.apply_verification(record);

            let written: Vec<TransactionRow> = self
                .fetch(
                    self.request(Method::PATCH, TRANSACTIONS)
                        .query(&[
                            ("merchant_transaction_id", eq(merchant_transaction_id)),
                            ("verification_attempts", attempts_filter),
                            ("status", status_filter),
                        ])
                        .header("Prefer", "return=representation")
                        .json(&VerificationPatch::from_domain(&next)),
                    "record verification",
                )
                .await?;

            if let Some(row) = written.into_iter().next() {
                return Ok(row.into_domain());
            }
            debug!(attempt, "Verification write lost a race; retrying");
        }

        Err(PaymentError::Conflict(format!(
            "Transaction {} is being verified concurrently",
            merchant_transaction_id
        )))
    }

    #[instrument(skip(self, error_details))]
    async fn mark_failed(
        &self,
        merchant_transaction_id: &str,
        error_details: &Value,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        let rows: Vec<TransactionRow> = self
            .fetch(
                self.request(Method::PATCH, TRANSACTIONS)
                    .query(&[
                        ("merchant_transaction_id", eq(merchant_transaction_id)),
                        ("status", "in.(initiated,pending)".to_string()),
                    ])
                    .header("Prefer", "return=representation")
                    .json(&json!({
                        "status": TransactionStatus::Failed,
                        "error_details": error_details,
                        "updated_at": Utc::now(),
                    })),
                "mark failed",
            )
            .await?;
        Ok(rows.into_iter().next().map(TransactionRow::into_domain))
    }

    async fn completed_for_order(
        &self,
        order_id: OrderId,
    ) -> PaymentResult<Option<PaymentTransaction>> {
        let rows: Vec<TransactionRow> = self
            .fetch(
                self.request(Method::GET, TRANSACTIONS).query(&[
                    ("order_id", eq(order_id)),
                    ("status", eq(TransactionStatus::Completed.as_str())),
                    ("order", "created_at.asc".to_string()),
                    ("limit", "1".to_string()),
                ]),
                "select completed payment_transactions",
            )
            .await?;
        Ok(rows.into_iter().next().map(TransactionRow::into_domain))
    }

    async fn list_unsettled_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PaymentResult<Vec<PaymentTransaction>> {
        let rows: Vec<TransactionRow> = self
            .fetch(
                self.request(Method::GET, TRANSACTIONS).query(&[
                    ("status", "in.(initiated,pending)".to_string()),
                    ("created_at", format!("lt.{}", cutoff.to_rfc3339())),
                    ("order", "created_at.asc".to_string()),
                ]),
                "select unsettled payment_transactions",
            )
            .await?;
        Ok(rows.into_iter().map(TransactionRow::into_domain).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> SupabaseStore {
        SupabaseStore::new(SupabaseConfig::new(server.uri(), "service-key")).unwrap()
    }

    fn address_json() -> String {
        json!({
            "name": "Asha Rao",
            "address_line": "12 MG Road",
            "city": "Bengaluru",
            "state": "KA",
            "postal_code": "560001"
        })
        .to_string()
    }

    fn order_row(payment_status: &str) -> Value {
        json!({
            "order_id": 42,
            "user_id": "user-1",
            "shipping_address": address_json(),
            "billing_address": address_json(),
            "total_amount": 13.0,
            "order_status": "processing",
            "payment_status": payment_status,
            "payment_method": "phonepe",
            "transaction_id": "MT1",
            "created_at": "2024-05-01T10:00:00+00:00",
            "updated_at": "2024-05-01T10:05:00+00:00",
            "order_items": [
                { "order_id": 42, "product_id": 1, "quantity": 2, "price": 5.0 },
                { "order_id": 42, "product_id": 2, "quantity": 1, "price": 3.0 }
            ]
        })
    }

    fn transaction_row(status: &str, attempts: i64) -> Value {
        json!({
            "merchant_transaction_id": "MT1",
            "provider": "phonepe",
            "user_id": "user-1",
            "order_id": 42,
            "amount": 1300,
            "merchant_id": "TESTMERCHANT",
            "merchant_user_id": "MUIDuser-1",
            "status": status,
            "payment_state": "PAYMENT_INITIATED",
            "verification_attempts": attempts,
            "created_at": "2024-05-01T10:00:00+00:00",
            "updated_at": "2024-05-01T10:00:00+00:00"
        })
    }

    fn success_record() -> VerificationRecord {
        VerificationRecord {
            status: TransactionStatus::Completed,
            payment_state: Some("PAYMENT_SUCCESS".to_string()),
            payment_instrument: None,
            response: Some(json!({"code": "PAYMENT_SUCCESS"})),
            error_details: None,
            verified_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_order_decodes_row_and_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/orders"))
            .and(query_param("order_id", "eq.42"))
            .and(query_param("select", "*,order_items(*)"))
            .and(header("apikey", "service-key"))
            .and(header("Authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([order_row("pending")])))
            .mount(&server)
            .await;

        let order = store(&server).get_order(42).await.unwrap().unwrap();
        assert_eq!(order.total_amount, 1300);
        assert_eq!(order.order_status, OrderStatus::Processing);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.shipping_address.city, "Bengaluru");
        assert_eq!(order.line_items.len(), 2);
        assert_eq!(order.line_items[0].unit_price, 500);
        assert_eq!(order.transaction_id.as_deref(), Some("MT1"));
    }

    #[tokio::test]
    async fn test_get_order_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert!(store(&server).get_order(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_order_sends_major_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/orders"))
            .and(header("Prefer", "return=representation"))
            .and(body_partial_json(json!({
                "user_id": "user-1",
                "total_amount": 13.0,
                "order_status": "pending",
                "payment_status": "pending"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([order_row("pending")])))
            .expect(1)
            .mount(&server)
            .await;

        let address: Address = serde_json::from_str(&address_json()).unwrap();
        let new_order = NewOrder::new(
            "user-1",
            address,
            None,
            vec![LineItem::new(1, 2, 500), LineItem::new(2, 1, 300)],
        )
        .unwrap();

        let order = store(&server).insert_order(&new_order).await.unwrap();
        assert_eq!(order.order_id, 42);
    }

    #[tokio::test]
    async fn test_set_payment_status_guard_filters() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/orders"))
            .and(query_param("transaction_id", "eq.MT1"))
            .and(query_param("payment_status", "not.in.(completed,completed)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([order_row("completed")])))
            .expect(1)
            .mount(&server)
            .await;

        let updated = store(&server)
            .set_payment_status("MT1", PaymentStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_complete_payment_repoints_order() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/orders"))
            .and(query_param("order_id", "eq.42"))
            .and(query_param("payment_status", "neq.completed"))
            .and(body_partial_json(json!({
                "payment_status": "completed",
                "transaction_id": "MT1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([order_row("completed")])))
            .expect(1)
            .mount(&server)
            .await;

        let order = store(&server)
            .complete_payment(42, "MT1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(order.transaction_id.as_deref(), Some("MT1"));
    }

    #[tokio::test]
    async fn test_completed_for_order_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payment_transactions"))
            .and(query_param("order_id", "eq.42"))
            .and(query_param("status", "eq.completed"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([transaction_row("completed", 1)])))
            .mount(&server)
            .await;

        let txn = store(&server).completed_for_order(42).await.unwrap().unwrap();
        assert_eq!(txn.order_id, Some(42));
        assert_eq!(txn.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_mark_failed_is_status_only() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/payment_transactions"))
            .and(query_param("merchant_transaction_id", "eq.MT1"))
            .and(query_param("status", "in.(initiated,pending)"))
            .and(body_partial_json(json!({
                "status": "failed",
                "error_details": { "reason": "expired_unconfirmed" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([transaction_row("failed", 2)])))
            .expect(1)
            .mount(&server)
            .await;

        let stored = store(&server)
            .mark_failed("MT1", &json!({ "reason": "expired_unconfirmed" }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.verification_attempts, 2);
    }

    #[tokio::test]
    async fn test_legacy_row_without_order_id() {
        let server = MockServer::start().await;
        let mut row = transaction_row("pending", 0);
        row.as_object_mut().unwrap().remove("order_id");
        row.as_object_mut().unwrap().remove("provider");
        Mock::given(method("GET"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
            .mount(&server)
            .await;

        let txn = store(&server).get_transaction("MT1").await.unwrap().unwrap();
        assert_eq!(txn.order_id, None);
        assert_eq!(txn.provider, "phonepe");
    }

    #[tokio::test]
    async fn test_attach_transaction_guard_miss() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/orders"))
            .and(query_param("order_id", "eq.42"))
            .and(query_param("payment_status", "neq.completed"))
            .and(body_partial_json(json!({
                "transaction_id": "MT2",
                "order_status": "processing",
                "payment_method": "phonepe"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let result = store(&server)
            .attach_transaction(42, "MT2", "phonepe")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_transaction_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let txn = PaymentTransaction::initiated(
            "MT1",
            "phonepe",
            "user-1",
            42,
            1300,
            "TESTMERCHANT",
            "MUIDuser-1",
            json!({}),
            Utc::now(),
        );
        let err = store(&server).insert_transaction(&txn).await.unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_mark_pending_only_from_initiated() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/payment_transactions"))
            .and(query_param("status", "eq.initiated"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let moved = store(&server)
            .mark_pending("MT1", &json!({"success": true}), Some("PAYMENT_INITIATED"))
            .await
            .unwrap();
        assert!(!moved);
    }

    #[tokio::test]
    async fn test_record_verification_retries_lost_race() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([transaction_row("pending", 0)])))
            .mount(&server)
            .await;
        // First write loses the race, second one lands
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/payment_transactions"))
            .and(query_param("verification_attempts", "eq.0"))
            .and(query_param("status", "eq.pending"))
            .and(body_partial_json(json!({
                "status": "completed",
                "payment_state": "PAYMENT_SUCCESS",
                "verification_attempts": 1
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([transaction_row("completed", 1)])))
            .expect(1)
            .mount(&server)
            .await;

        let stored = store(&server)
            .record_verification("MT1", &success_record())
            .await
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stored.verification_attempts, 1);
    }

    #[tokio::test]
    async fn test_record_verification_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([transaction_row("pending", 3)])))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(MAX_CAS_ATTEMPTS as u64)
            .mount(&server)
            .await;

        let err = store(&server)
            .record_verification("MT1", &success_record())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_record_verification_keeps_terminal_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([transaction_row("failed", 1)])))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/payment_transactions"))
            .and(body_partial_json(json!({
                "status": "failed",
                "verification_attempts": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([transaction_row("failed", 2)])))
            .expect(1)
            .mount(&server)
            .await;

        let stored = store(&server)
            .record_verification("MT1", &success_record())
            .await
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_storage_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payment_transactions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = store(&server).get_transaction("MT1").await.unwrap_err();
        assert!(matches!(err, PaymentError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_list_unsettled_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/payment_transactions"))
            .and(query_param("status", "in.(initiated,pending)"))
            .and(query_param("order", "created_at.asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                transaction_row("pending", 0),
                transaction_row("initiated", 0)
            ])))
            .mount(&server)
            .await;

        let rows = store(&server).list_unsettled_before(Utc::now()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, TransactionStatus::Initiated);
    }
}
