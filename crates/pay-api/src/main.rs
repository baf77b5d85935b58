//! # Storefront Pay
//!
//! Order and payment service for the storefront.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export PHONEPE_MERCHANT_ID=...
//! export PHONEPE_SALT_KEY=...
//! export SUPABASE_URL=https://<project>.supabase.co
//! export SUPABASE_SERVICE_ROLE_KEY=...
//!
//! # Run the server
//! storefront-pay
//! ```

use pay_api::{routes, AppConfig, AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    print_banner();

    let config = AppConfig::from_env()?;
    let addr = config.socket_addr()?;
    let is_prod = config.is_production();
    let sweep_interval = config.sweep_interval;

    // Initialize application state
    let state = AppState::from_env(config)?;

    info!("Environment: {}", state.config.environment);
    info!("Storage: {:?}", state.config.storage);
    info!("Payment providers: {:?}", state.gateways.providers());
    info!(
        "Session TTL: {}s, sweep every {}s",
        state.config.session_ttl.num_seconds(),
        sweep_interval.as_secs()
    );

    let _sweep = state.sweep().spawn(sweep_interval);

    let app = routes::create_router(state);

    info!("Storefront Pay starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Initiate: POST http://{}/payment/initiate", addr);
        info!("Verify: POST http://{}/payment/verify", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  Storefront Pay
  ━━━━━━━━━━━━━━━━━━━━━━━
  Orders and PhonePe payments
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
