//! # Reconciliation Sweep
//!
//! Payment attempts that nobody came back to verify would stay `pending`
//! forever. The sweep picks up every unsettled attempt older than the
//! session lifetime plus a grace period and asks the gateway once more.
//!
//! A confirmed answer settles the attempt. When the gateway cannot answer,
//! a `pending` attempt is left for the next pass, since the shopper may
//! already have paid; it is only closed once it passes the give-up
//! deadline. An `initiated` attempt never had a session accepted, so it is
//! closed straight away.

use crate::callback::{CallbackHandler, VerificationOutcome};
use crate::error::PaymentResult;
use crate::store::SharedTransactionStore;
use crate::transaction::{PaymentTransaction, TransactionStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Default age after which an unconfirmed attempt is closed (24 hours)
pub const DEFAULT_GIVE_UP_SECS: i64 = 86_400;

/// Counts from one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    /// Left unsettled for a later pass
    pub deferred: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ReconciliationSweep {
    callbacks: CallbackHandler,
    transactions: SharedTransactionStore,
    session_ttl: Duration,
    grace: Duration,
    give_up_after: Duration,
}

impl ReconciliationSweep {
    pub fn new(
        callbacks: CallbackHandler,
        transactions: SharedTransactionStore,
        session_ttl: Duration,
        grace: Duration,
        give_up_after: Duration,
    ) -> Self {
        Self {
            callbacks,
            transactions,
            session_ttl,
            grace,
            give_up_after,
        }
    }

    /// Reconcile every stale attempt once
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> PaymentResult<SweepReport> {
        let cutoff = now - self.session_ttl - self.grace;
        let stale = self.transactions.list_unsettled_before(cutoff).await?;
        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for txn in stale {
            let id = txn.merchant_transaction_id.clone();
            match self.callbacks.reconcile(txn.clone(), now).await {
                Ok(result) => match result.outcome {
                    VerificationOutcome::Success => report.completed += 1,
                    VerificationOutcome::Failure => report.failed += 1,
                    // Only reachable if the row was created in the future
                    VerificationOutcome::StillPending => {
                        self.expire(&txn, "expired", &mut report).await
                    }
                },
                Err(err) if self.may_close_unconfirmed(&txn, now) => {
                    warn!(transaction_id = %id, "Gateway could not confirm stale attempt: {}", err);
                    self.expire(&txn, "expired_unconfirmed", &mut report).await
                }
                Err(err) => {
                    warn!(transaction_id = %id, "Gateway could not confirm stale attempt; retrying next pass: {}", err);
                    report.deferred += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                completed = report.completed,
                failed = report.failed,
                deferred = report.deferred,
                errors = report.errors,
                "Reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Run `run_once` every `every` until the task is aborted
    pub fn spawn(self, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once(Utc::now()).await {
                    error!("Reconciliation sweep failed: {}", err);
                }
            }
        })
    }

    fn may_close_unconfirmed(&self, txn: &PaymentTransaction, now: DateTime<Utc>) -> bool {
        txn.status == TransactionStatus::Initiated || txn.is_abandoned(now, self.give_up_after)
    }

    async fn expire(&self, txn: &PaymentTransaction, reason: &str, report: &mut SweepReport) {
        match self.callbacks.expire(txn, reason).await {
            Ok(stored) if stored.status == TransactionStatus::Completed => report.completed += 1,
            Ok(_) => report.failed += 1,
            Err(err) => {
                error!(
                    transaction_id = %txn.merchant_transaction_id,
                    "Failed to expire stale attempt: {}", err
                );
                report.errors += 1;
            }
        }
    }
}
