//! # Routes
//!
//! Axum router configuration for the payment API.

use crate::cors;
use crate::handlers;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the main application router
///
/// Routes:
/// - GET  /health - Liveness
/// - POST /orders - Create an order with its items
/// - GET  /orders/{order_id} - Order status (owner only)
/// - POST /payment/initiate - Start a payment attempt
/// - POST /payment/verify - Check and settle a payment attempt
/// - POST /payment/webhook/{provider} - Gateway server-to-server callback
pub fn create_router(state: AppState) -> Router {
    let payment_routes = Router::new()
        .route("/initiate", post(handlers::initiate_payment))
        .route("/verify", post(handlers::verify_payment))
        .route("/webhook/{provider}", post(handlers::payment_webhook));

    Router::new()
        // Health check at root
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        // Orders
        .route("/orders", post(handlers::create_order))
        .route("/orders/{order_id}", get(handlers::get_order))
        // Payments
        .nest("/payment", payment_routes)
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), cors::cors))
        .layer(TraceLayer::new_for_http())
        // State
        .with_state(state)
}
