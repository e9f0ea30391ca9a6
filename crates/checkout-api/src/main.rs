//! # Storefront Checkout
//!
//! Cart, order and payment service.
//!
//! ## Usage
//!
//! ```bash
//! # Providers are enabled when their credentials are present
//! export PAYMOB_API_KEY=...
//! export PAYMOB_INTEGRATION_ID=...
//! export PAYMOB_IFRAME_ID=...
//! export PAYMOB_HMAC_SECRET=...
//! export PAYPAL_CLIENT_ID=...
//! export PAYPAL_CLIENT_SECRET=...
//! export PAYPAL_WEBHOOK_ID=...
//!
//! # Run the server
//! storefront-checkout
//! ```

use checkout_api::{routes, state::AppState};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // LOG_FORMAT=json switches to structured output
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json");
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Currency: {}", state.config.currency);
    info!("Payment providers: {:?}", state.payments.gateways().providers());
    info!("Verification poll: {:?}", state.config.poll_policy);

    let app = routes::create_router(state);

    info!("Storefront checkout starting on http://{}", addr);

    if !is_prod {
        info!("Cart: GET http://{}/api/v1/cart", addr);
        info!("Place order: POST http://{}/api/v1/orders/place", addr);
        info!("Webhooks: POST http://{}/webhook/{{provider}}", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
