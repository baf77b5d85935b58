//! # pay-api
//!
//! HTTP API layer for the storefront payment service.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Order creation and payment initiate/verify endpoints
//! - Gateway callback handling
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/orders` | Create order |
//! | GET | `/orders/{order_id}` | Order status |
//! | POST | `/payment/initiate` | Start a payment session |
//! | POST | `/payment/verify` | Verify a payment attempt |
//! | POST | `/payment/webhook/{provider}` | Gateway callback |

pub mod auth;
pub mod config;
pub mod cors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{AppConfig, StorageBackend};
pub use routes::create_router;
pub use state::AppState;
