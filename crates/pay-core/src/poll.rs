//! # Status Polling
//!
//! Client-side waiting for a payment to settle. Polls `get_status` with
//! exponential backoff; an `OrderSubscription` may cut a wait short, but
//! the answer is always the fresh read that follows.

use crate::error::PaymentResult;
use crate::ledger::OrderLedger;
use crate::order::{OrderId, OrderSnapshot};
use std::time::Duration;
use tracing::debug;

/// Backoff schedule for `StatusPoller`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before read number `attempt + 1` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.factor.max(1));
            if delay >= self.max_delay {
                return self.max_delay;
            }
        }
        delay.min(self.max_delay)
    }
}

#[derive(Clone)]
pub struct StatusPoller {
    ledger: OrderLedger,
    policy: BackoffPolicy,
}

impl StatusPoller {
    pub fn new(ledger: OrderLedger, policy: BackoffPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Read the order until its payment status settles or the attempts run
    /// out. Returns the last snapshot read either way.
    pub async fn wait_for_settlement(&self, order_id: OrderId) -> PaymentResult<OrderSnapshot> {
        let mut subscription = self.ledger.subscribe(order_id);
        let mut attempt = 0;
        loop {
            let snapshot = self.ledger.get_status(order_id).await?;
            attempt += 1;
            if snapshot.payment_status.is_settled() || attempt >= self.policy.max_attempts {
                debug!(order_id, attempt, "Stopped polling");
                return Ok(snapshot);
            }

            let delay = self.policy.delay_for(attempt - 1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = subscription.next() => {}
            }
        }
    }
}
