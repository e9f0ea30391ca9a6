//! # Application State
//!
//! Shared state for the Axum application: the cart store, the order
//! lifecycle and the payment service, wired over one order store.

use checkout_core::{
    CartStore, CouponBook, Currency, GatewayRegistry, LoggingNotifier, Notifier, OrderLifecycle,
    OrderStore, PaymentService, PollPolicy, PricingConfig, PricingEngine, ProductCatalog,
};
use checkout_paymob::PaymobGateway;
use checkout_paypal::PayPalGateway;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL (provider return URLs, webhook registration)
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Currency carts and orders are priced in
    pub currency: Currency,
    /// Bounds for payment verification polls
    pub poll_policy: PollPolicy,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(&env::vars().collect())
    }

    /// Load from an explicit variable map, defaults for anything unset
    pub fn from_vars(vars: &HashMap<String, String>) -> anyhow::Result<Self> {
        let var = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let currency = match var("STORE_CURRENCY") {
            Some(code) => Currency::from_code(code)
                .ok_or_else(|| anyhow::anyhow!("Unsupported STORE_CURRENCY: {}", code))?,
            None => Currency::USD,
        };

        Ok(Self {
            host: var("HOST").unwrap_or("127.0.0.1").to_string(),
            port: var("PORT").and_then(|p| p.parse().ok()).unwrap_or(8080),
            base_url: var("BASE_URL").unwrap_or("http://localhost:8080").to_string(),
            environment: var("ENVIRONMENT").unwrap_or("development").to_string(),
            currency,
            poll_policy: poll_policy_from_vars(vars)?,
        })
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// `POLL_*` variable and the [`PollPolicy`] field it sets
const POLL_VARS: [(&str, &str); 5] = [
    ("POLL_INITIAL_DELAY_MS", "initial_delay"),
    ("POLL_INTERVAL_MS", "interval"),
    ("POLL_MAX_ATTEMPTS", "max_attempts"),
    ("POLL_MAX_DURATION_MS", "max_duration"),
    ("POLL_CALL_TIMEOUT_MS", "call_timeout"),
];

/// Poll bounds from `POLL_*` variables (durations in milliseconds)
fn poll_policy_from_vars(vars: &HashMap<String, String>) -> anyhow::Result<PollPolicy> {
    let mut fields = serde_json::Map::new();
    for (name, field) in POLL_VARS {
        if let Some(value) = vars.get(name) {
            let number: u64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer", name))?;
            fields.insert(field.to_string(), number.into());
        }
    }

    let policy: PollPolicy = serde_json::from_value(fields.into())?;
    policy.validate()?;
    Ok(policy)
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub carts: Arc<CartStore>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub payments: Arc<PaymentService>,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Build state from the environment and the `config/` TOML files
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let catalog: ProductCatalog = load_toml("products.toml")?;
        let coupons: CouponBook = load_toml("coupons.toml")?;
        let pricing: PricingConfig = load_toml("pricing.toml")?;
        info!(
            products = catalog.len(),
            coupons = coupons.coupons.len(),
            "Loaded store configuration"
        );

        let mut gateways = GatewayRegistry::new();
        match PaymobGateway::from_env() {
            Ok(gateway) => gateways.register(Arc::new(gateway)),
            Err(e) => warn!("Paymob disabled: {}", e),
        }
        match PayPalGateway::from_env() {
            Ok(gateway) => gateways.register(Arc::new(gateway)),
            Err(e) => warn!("PayPal disabled: {}", e),
        }

        Ok(Self::build(
            config,
            catalog,
            coupons,
            PricingEngine::new(pricing),
            gateways,
            Arc::new(LoggingNotifier),
        ))
    }

    /// Wire the services from explicit parts
    pub fn build(
        config: AppConfig,
        catalog: ProductCatalog,
        coupons: CouponBook,
        engine: PricingEngine,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let carts = Arc::new(CartStore::new(Arc::new(catalog), coupons, engine).with_currency(config.currency));
        let orders = Arc::new(OrderStore::new());
        let lifecycle = Arc::new(
            OrderLifecycle::new(carts.clone(), orders.clone(), notifier.clone()).with_currency(config.currency),
        );
        let payments = Arc::new(PaymentService::new(gateways, orders, notifier).with_poll_policy(config.poll_policy));

        Self {
            carts,
            lifecycle,
            payments,
            config,
        }
    }
}

/// Load a TOML file from `config/`, falling back to defaults when absent
fn load_toml<T: DeserializeOwned + Default>(file: &str) -> anyhow::Result<T> {
    let config_paths = [
        format!("config/{}", file),
        format!("../config/{}", file),
        format!("../../config/{}", file),
    ];

    for path in &config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let value = toml::from_str(&content).map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
            info!("Loaded {}", path);
            return Ok(value);
        }
    }

    warn!("No {} found, using defaults", file);
    Ok(T::default())
}
