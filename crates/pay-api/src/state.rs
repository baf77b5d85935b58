//! # Application State
//!
//! Shared state for the Axum application. Every process-wide handle
//! (stores, gateways, identity verifier) is built once here and cloned
//! into handlers; nothing is reached through globals.

use crate::config::{AppConfig, StorageBackend};
use pay_core::{
    CallbackHandler, GatewayRegistry, MemoryStore, OrderEvents, OrderLedger, PaymentError,
    PaymentInitiator, ReconciliationSweep, SharedGateway, SharedOrderStore,
    SharedTransactionStore, SharedVerifier,
};
use pay_phonepe::PhonePeGateway;
use pay_supabase::{JwtAuth, SupabaseConfig, SupabaseStore};
use std::sync::Arc;
use tracing::warn;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    pub ledger: OrderLedger,
    pub initiator: PaymentInitiator,
    pub callbacks: CallbackHandler,
    pub gateways: GatewayRegistry,
    pub verifier: SharedVerifier,
    transactions: SharedTransactionStore,
}

impl AppState {
    /// Wire the services over the given stores, gateways and verifier
    pub fn new(
        config: AppConfig,
        orders: SharedOrderStore,
        transactions: SharedTransactionStore,
        gateways: GatewayRegistry,
        verifier: SharedVerifier,
    ) -> Self {
        let ledger = OrderLedger::new(orders, OrderEvents::default());
        let initiator = PaymentInitiator::new(
            ledger.clone(),
            transactions.clone(),
            gateways.clone(),
            config.session_ttl,
        );
        let callbacks = CallbackHandler::new(
            ledger.clone(),
            transactions.clone(),
            gateways.clone(),
            config.session_ttl,
        );

        Self {
            config,
            ledger,
            initiator,
            callbacks,
            gateways,
            verifier,
            transactions,
        }
    }

    /// Build the production wiring from environment variables.
    ///
    /// Fails fast on any missing secret.
    pub fn from_env(config: AppConfig) -> Result<Self, PaymentError> {
        let phonepe = PhonePeGateway::from_env()?;
        let gateways = GatewayRegistry::new(pay_phonepe::PROVIDER)
            .with_gateway(Arc::new(phonepe) as SharedGateway);

        match config.storage {
            StorageBackend::Supabase => {
                let supabase = SupabaseConfig::from_env()?;
                let store = Arc::new(SupabaseStore::new(supabase.clone())?);
                let verifier = pay_supabase::verifier(&supabase)?;
                Ok(Self::new(config, store.clone(), store, gateways, verifier))
            }
            StorageBackend::Memory => {
                let secret = std::env::var("SUPABASE_JWT_SECRET")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| {
                        PaymentError::Configuration(
                            "SUPABASE_JWT_SECRET is required with STORAGE_BACKEND=memory"
                                .to_string(),
                        )
                    })?;
                warn!("Using in-memory storage; orders are lost on restart");
                let store = Arc::new(MemoryStore::new());
                let verifier: SharedVerifier = Arc::new(JwtAuth::new(&secret));
                Ok(Self::new(config, store.clone(), store, gateways, verifier))
            }
        }
    }

    /// Background reconciliation over this state's stores
    pub fn sweep(&self) -> ReconciliationSweep {
        ReconciliationSweep::new(
            self.callbacks.clone(),
            self.transactions.clone(),
            self.config.session_ttl,
            self.config.sweep_grace,
            self.config.sweep_give_up,
        )
    }
}
