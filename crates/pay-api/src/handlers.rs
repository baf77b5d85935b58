//! # Request Handlers
//!
//! Axum request handlers for the payment API.
//! Bodies use camelCase and amounts in major units (rupees); everything
//! below the handlers works in paise.

use crate::auth::AuthUser;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use pay_core::{
    amount, Address, InitiateRequest, LineItem, OrderId, OrderSnapshot, OrderStatus,
    PaymentError, PaymentStatus, VerificationOutcome, VerificationResult,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

/// Header carrying the gateway's callback checksum
const CALLBACK_SIGNATURE_HEADER: &str = "x-verify";

// =============================================================================
// Envelope
// =============================================================================

/// Error side of the `{success, data | error}` envelope
#[derive(Debug)]
pub struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.status_code();
        if code >= 500 {
            error!("Request failed: {}", self.0);
        } else {
            info!("Request rejected: {}", self.0);
        }
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "success": false,
            "error": self.0.user_message(),
        });
        (status, Json(body)).into_response()
    }
}

fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Decode a JSON body, reporting failures in the envelope instead of
/// axum's plain-text rejection
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(PaymentError::Validation(format!("Invalid request body: {}", e))))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Order id as sent by the storefront: a number or a numeric string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OrderRef {
    Number(OrderId),
    Text(String),
}

impl OrderRef {
    fn resolve(&self) -> Result<OrderId, PaymentError> {
        match self {
            OrderRef::Number(id) => Ok(*id),
            OrderRef::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| PaymentError::Validation(format!("Invalid order id: {}", text))),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    /// Major units
    pub amount: f64,
    pub order_id: OrderRef,
    pub callback_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub merchant_transaction_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: i64,
    pub quantity: u32,
    /// Unit price in major units, captured as the order-time price
    pub price: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: OrderId,
    pub total_amount: f64,
}

/// Order status fields with the amount in major units
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub order_id: OrderId,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub total_amount: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderSnapshot> for OrderStatusResponse {
    fn from(snapshot: OrderSnapshot) -> Self {
        Self {
            order_id: snapshot.order_id,
            order_status: snapshot.order_status,
            payment_status: snapshot.payment_status,
            transaction_id: snapshot.transaction_id,
            total_amount: amount::to_major(snapshot.total_amount),
            updated_at: snapshot.updated_at,
        }
    }
}

fn outcome_label(outcome: VerificationOutcome) -> &'static str {
    match outcome {
        VerificationOutcome::Success => "success",
        VerificationOutcome::Failure => "failure",
        VerificationOutcome::StillPending => "pending",
    }
}

fn verification_body(result: VerificationResult) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": result.gateway_payload,
        "outcome": outcome_label(result.outcome),
    }))
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "storefront-pay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Create an order with its line items
#[instrument(skip_all)]
pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: CreateOrderRequest = parse_body(&body)?;

    let items = request
        .items
        .iter()
        .map(|item| {
            Ok(LineItem::new(
                item.product_id,
                item.quantity,
                amount::from_major(item.price)?,
            ))
        })
        .collect::<Result<Vec<_>, PaymentError>>()?;

    let order = state
        .ledger
        .create(
            &user.user_id,
            request.shipping_address,
            request.billing_address,
            items,
        )
        .await?;

    info!(order_id = order.order_id, total = %amount::display(order.total_amount), "Order created");

    Ok((
        StatusCode::CREATED,
        ok(CreateOrderResponse {
            order_id: order.order_id,
            total_amount: amount::to_major(order.total_amount),
        }),
    ))
}

/// Fresh read of an order's status (owner only)
pub async fn get_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let order_id = OrderRef::Text(order_id).resolve()?;
    let snapshot = state.ledger.get_status(order_id).await?;
    if snapshot.user_id != user.user_id {
        return Err(PaymentError::Authorization(format!(
            "Order {} belongs to another user",
            order_id
        ))
        .into());
    }
    Ok(ok(OrderStatusResponse::from(snapshot)))
}

/// Start a payment attempt and return the gateway redirect
#[instrument(skip_all)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: InitiatePaymentRequest = parse_body(&body)?;

    let request = InitiateRequest {
        order_id: request.order_id.resolve()?,
        amount: amount::from_major(request.amount)?,
        callback_url: request.callback_url,
    };

    let session = state.initiator.initiate(request, &user).await?;
    Ok(ok(session))
}

/// Check a payment attempt with the gateway and settle it
#[instrument(skip_all)]
pub async fn verify_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: VerifyPaymentRequest = parse_body(&body)?;
    let result = state
        .callbacks
        .verify(&request.merchant_transaction_id, &user)
        .await?;
    Ok(verification_body(result))
}

/// Server-to-server notification from a gateway
#[instrument(skip(state, headers, body))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get(CALLBACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Callback without signature header");
            PaymentError::Authentication("Missing X-VERIFY header".to_string())
        })?;

    let result = state
        .callbacks
        .handle_callback(&provider, &body, signature)
        .await?;

    Ok(ok(json!({
        "merchantTransactionId": result.transaction.merchant_transaction_id,
        "outcome": outcome_label(result.outcome),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_error_conversion() {
        let response = ApiError::from(PaymentError::Validation("Bad data".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(PaymentError::gateway("phonepe", "HTTP 500")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_order_ref() {
        let number: OrderRef = serde_json::from_str("42").unwrap();
        let text: OrderRef = serde_json::from_str("\" 42 \"").unwrap();
        let junk: OrderRef = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(number.resolve().unwrap(), 42);
        assert_eq!(text.resolve().unwrap(), 42);
        assert!(matches!(junk.resolve(), Err(PaymentError::Validation(_))));
    }
}
