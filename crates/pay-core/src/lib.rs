//! # pay-core
//!
//! Order ledger and payment state machine for the storefront payment service.
//!
//! This crate provides:
//! - `OrderLedger` for creating orders and reading their status
//! - `PaymentInitiator` for opening gateway payment sessions
//! - `CallbackHandler` for settling attempts through the gateway status API
//! - `ReconciliationSweep` for closing attempts nobody came back to verify
//! - `PaymentGateway`, `OrderStore`, `TransactionStore` and
//!   `CredentialVerifier` traits for the external collaborators
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use pay_core::{Identity, InitiateRequest, LineItem};
//!
//! let order = ledger.create(&user.user_id, address, None, items).await?;
//!
//! let session = initiator
//!     .initiate(
//!         InitiateRequest {
//!             order_id: order.order_id,
//!             amount: order.total_amount,
//!             callback_url: "https://shop.example/payment/callback".into(),
//!         },
//!         &user,
//!     )
//!     .await?;
//!
//! // Redirect the shopper to session.payment_url, then on return:
//! let result = callbacks.verify(&session.merchant_transaction_id, &user).await?;
//! ```

pub mod amount;
pub mod callback;
pub mod error;
pub mod events;
pub mod gateway;
pub mod identity;
pub mod initiate;
pub mod ledger;
pub mod memory;
pub mod order;
pub mod poll;
pub mod store;
pub mod sweep;
pub mod transaction;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports for convenience
pub use callback::{CallbackHandler, VerificationOutcome, VerificationResult};
pub use error::{PaymentError, PaymentResult};
pub use events::{OrderEvents, OrderSubscription};
pub use gateway::{
    CallbackNotice, GatewayRegistry, PayRequest, PayResponse, PaymentGateway, ReportedState,
    SharedGateway, StatusResponse,
};
pub use identity::{bearer_token, CredentialVerifier, Identity, SharedVerifier};
pub use initiate::{InitiateRequest, PaymentInitiator, PaymentSession, DEFAULT_SESSION_TTL_SECS};
pub use ledger::{OrderLedger, PaymentOutcome};
pub use memory::MemoryStore;
pub use order::{
    Address, LineItem, NewOrder, Order, OrderId, OrderSnapshot, OrderStatus, PaymentStatus,
};
pub use poll::{BackoffPolicy, StatusPoller};
pub use store::{OrderStore, SharedOrderStore, SharedTransactionStore, TransactionStore};
pub use sweep::{ReconciliationSweep, SweepReport, DEFAULT_GIVE_UP_SECS};
pub use transaction::{PaymentTransaction, TransactionStatus, VerificationRecord};
