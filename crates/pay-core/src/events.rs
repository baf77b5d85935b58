//! # Order Events
//!
//! Best-effort push of order snapshots to interested listeners.
//! Delivery order is not guaranteed and lagging listeners skip ahead;
//! the authoritative state is always a fresh `OrderLedger::get_status`.

use crate::order::{OrderId, OrderSnapshot};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast hub for order changes
#[derive(Debug, Clone)]
pub struct OrderEvents {
    sender: broadcast::Sender<OrderSnapshot>,
}

impl OrderEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a snapshot. Having no listeners is not an error.
    pub fn publish(&self, snapshot: OrderSnapshot) {
        let _ = self.sender.send(snapshot);
    }

    /// Listen for changes to one order
    pub fn subscribe(&self, order_id: OrderId) -> OrderSubscription {
        OrderSubscription {
            order_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for OrderEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Handle for one order's updates. Dropping it unsubscribes.
#[derive(Debug)]
pub struct OrderSubscription {
    order_id: OrderId,
    receiver: broadcast::Receiver<OrderSnapshot>,
}

impl OrderSubscription {
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Next snapshot for this order, or `None` once the hub is gone
    pub async fn next(&mut self) -> Option<OrderSnapshot> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) if snapshot.order_id == self.order_id => return Some(snapshot),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(order_id = self.order_id, skipped, "Order subscription lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Stop listening
    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderStatus, PaymentStatus};
    use chrono::Utc;

    fn snapshot(order_id: OrderId, payment_status: PaymentStatus) -> OrderSnapshot {
        OrderSnapshot {
            order_id,
            user_id: "user-1".to_string(),
            order_status: OrderStatus::Processing,
            payment_status,
            transaction_id: Some("MT1".to_string()),
            total_amount: 1300,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscription_filters_by_order() {
        let events = OrderEvents::default();
        let mut sub = events.subscribe(7);

        events.publish(snapshot(8, PaymentStatus::Completed));
        events.publish(snapshot(7, PaymentStatus::Completed));

        let got = sub.next().await.unwrap();
        assert_eq!(got.order_id, 7);
        assert_eq!(got.payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_listener() {
        let events = OrderEvents::default();
        let sub = events.subscribe(1);
        assert_eq!(events.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(events.listener_count(), 0);

        // Publishing with nobody listening is fine
        events.publish(snapshot(1, PaymentStatus::Pending));
    }

    #[tokio::test]
    async fn test_closed_hub_ends_subscription() {
        let events = OrderEvents::new(4);
        let mut sub = events.subscribe(1);
        drop(events);
        assert!(sub.next().await.is_none());
    }
}
