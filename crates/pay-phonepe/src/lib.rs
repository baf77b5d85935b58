//! # pay-phonepe
//!
//! PhonePe payment gateway for the storefront payment service.
//!
//! - `PhonePeConfig` loads merchant credentials and fails fast when a secret
//!   is missing
//! - `signature` builds the X-VERIFY checksums for pay, status and callbacks
//! - `PhonePeGateway` implements `pay_core::PaymentGateway` over reqwest
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pay_core::GatewayRegistry;
//! use pay_phonepe::PhonePeGateway;
//! use std::sync::Arc;
//!
//! let gateway = PhonePeGateway::from_env()?;
//! let registry = GatewayRegistry::new("phonepe").with_gateway(Arc::new(gateway));
//! ```

pub mod config;
pub mod gateway;
pub mod signature;

// Re-exports
pub use config::PhonePeConfig;
pub use gateway::{reported_state, PhonePeGateway, PROVIDER};
