//! # Order Types
//!
//! Order records, line items and the two independent status fields
//! (`order_status` for fulfilment, `payment_status` for settlement).

use crate::error::{PaymentError, PaymentResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger-assigned numeric order id
pub type OrderId = i64;

/// Structured shipping/billing address, captured verbatim at order time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub address_line: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    /// Reject addresses with blank required fields
    pub fn validate(&self) -> PaymentResult<()> {
        let fields = [
            ("name", &self.name),
            ("address_line", &self.address_line),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(PaymentError::Validation(format!(
                    "Address field '{}' is required",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// A line item in an order. The unit price is captured at order time
/// and never re-read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalog product id
    pub product_id: i64,

    /// Quantity ordered
    pub quantity: u32,

    /// Unit price in minor units
    pub unit_price: i64,
}

impl LineItem {
    pub fn new(product_id: i64, quantity: u32, unit_price: i64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    /// `unit_price * quantity`, or `None` on overflow
    pub fn total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

/// Exact sum of `unit_price * quantity` over the items
pub fn compute_total(items: &[LineItem]) -> PaymentResult<i64> {
    items.iter().try_fold(0i64, |acc, item| {
        item.total()
            .and_then(|t| acc.checked_add(t))
            .ok_or_else(|| PaymentError::Validation("Order total overflows".to_string()))
    })
}

/// Fulfilment lifecycle. Driven externally except for `Processing`,
/// which the initiator sets once a payment session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

/// Settlement state of the order as a whole.
///
/// `Completed` is final. `Failed` only records that the latest attempt
/// failed; a later attempt may still complete the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Whether a poller can stop waiting on this status
    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

/// Validated input for a new order row
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub line_items: Vec<LineItem>,
    pub total_amount: i64,
    pub payment_method: String,
}

impl NewOrder {
    /// Validate the inputs and capture the total from the given prices
    pub fn new(
        user_id: impl Into<String>,
        shipping_address: Address,
        billing_address: Option<Address>,
        line_items: Vec<LineItem>,
    ) -> PaymentResult<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(PaymentError::Validation("User id is required".to_string()));
        }
        if line_items.is_empty() {
            return Err(PaymentError::Validation("Order has no items".to_string()));
        }
        for item in &line_items {
            if item.quantity == 0 {
                return Err(PaymentError::Validation(format!(
                    "Quantity for product {} must be at least 1",
                    item.product_id
                )));
            }
            if item.unit_price < 0 {
                return Err(PaymentError::Validation(format!(
                    "Price for product {} must not be negative",
                    item.product_id
                )));
            }
        }
        shipping_address.validate()?;
        let billing_address = billing_address.unwrap_or_else(|| shipping_address.clone());
        billing_address.validate()?;

        let total_amount = compute_total(&line_items)?;

        Ok(Self {
            user_id,
            shipping_address,
            billing_address,
            line_items,
            total_amount,
            payment_method: "online".to_string(),
        })
    }
}

/// A persisted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub line_items: Vec<LineItem>,
    pub total_amount: i64,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    /// Latest payment attempt for this order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            order_id: self.order_id,
            user_id: self.user_id.clone(),
            order_status: self.order_status,
            payment_status: self.payment_status,
            transaction_id: self.transaction_id.clone(),
            total_amount: self.total_amount,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of an order's status fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    pub order_id: OrderId,
    pub user_id: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub total_amount: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::address;

    #[test]
    fn test_line_item_total() {
        let item = LineItem::new(1, 3, 1000);
        assert_eq!(item.total(), Some(3000));
    }

    #[test]
    fn test_order_total() {
        let order = NewOrder::new(
            "user-1",
            address(),
            None,
            vec![LineItem::new(1, 2, 500), LineItem::new(2, 1, 300)],
        )
        .unwrap();

        assert_eq!(order.total_amount, 1300);
        assert_eq!(order.billing_address, order.shipping_address);
    }

    #[test]
    fn test_empty_order_rejected() {
        let err = NewOrder::new("user-1", address(), None, vec![]).unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[test]
    fn test_blank_address_rejected() {
        let mut addr = address();
        addr.city = "  ".to_string();
        let err = NewOrder::new("user-1", addr, None, vec![LineItem::new(1, 1, 10)]).unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn test_total_overflow_rejected() {
        let items = vec![LineItem::new(1, 2, i64::MAX)];
        assert!(compute_total(&items).is_err());
    }

    #[test]
    fn test_status_round_trip_names() {
        assert_eq!(OrderStatus::parse("shipped"), Some(OrderStatus::Shipped));
        assert_eq!(PaymentStatus::parse("completed"), Some(PaymentStatus::Completed));
        assert_eq!(PaymentStatus::parse("bogus"), None);
        assert!(!PaymentStatus::Pending.is_settled());
    }
}
