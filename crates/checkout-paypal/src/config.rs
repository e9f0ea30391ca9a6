//! # PayPal Configuration
//!
//! Configuration for the PayPal REST integration.
//! All secrets are loaded from environment variables.

use checkout_core::CheckoutError;
use std::env;
use std::time::Duration;

pub const SANDBOX_API_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
pub const LIVE_API_BASE_URL: &str = "https://api-m.paypal.com";

/// PayPal REST configuration
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    /// REST app client id
    pub client_id: String,

    /// REST app secret
    pub client_secret: String,

    /// Webhook id registered for this app; required to verify callbacks
    pub webhook_id: Option<String>,

    /// API base URL (sandbox, live, or a mock)
    pub api_base_url: String,

    /// Where PayPal sends the buyer after approval
    pub return_url: String,

    /// Where PayPal sends the buyer after cancelling
    pub cancel_url: String,

    /// Storefront name shown on the PayPal page
    pub brand_name: Option<String>,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl PayPalConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `PAYPAL_CLIENT_ID`
    /// - `PAYPAL_CLIENT_SECRET`
    ///
    /// Optional: `PAYPAL_WEBHOOK_ID`, `PAYPAL_MODE` (`sandbox` | `live`),
    /// `PAYPAL_API_BASE_URL`, `PAYPAL_RETURN_URL`, `PAYPAL_CANCEL_URL`,
    /// `PAYPAL_BRAND_NAME`
    pub fn from_env() -> Result<Self, CheckoutError> {
        dotenvy::dotenv().ok();

        let client_id = required("PAYPAL_CLIENT_ID")?;
        let client_secret = required("PAYPAL_CLIENT_SECRET")?;
        let base_url = env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let mut config = Self::new(client_id, client_secret);
        config.webhook_id = optional("PAYPAL_WEBHOOK_ID");
        config.brand_name = optional("PAYPAL_BRAND_NAME");
        config.return_url = optional("PAYPAL_RETURN_URL").unwrap_or_else(|| format!("{}/checkout/success", base_url));
        config.cancel_url = optional("PAYPAL_CANCEL_URL").unwrap_or_else(|| format!("{}/checkout/cancel", base_url));

        match optional("PAYPAL_MODE").as_deref() {
            None | Some("sandbox") => {}
            Some("live") => config.api_base_url = LIVE_API_BASE_URL.to_string(),
            Some(other) => {
                return Err(CheckoutError::Configuration(format!(
                    "PAYPAL_MODE must be sandbox or live, got {}",
                    other
                )))
            }
        }
        if let Some(url) = optional("PAYPAL_API_BASE_URL") {
            config.api_base_url = url;
        }

        Ok(config)
    }

    /// Create sandbox config with explicit credentials (for testing)
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            webhook_id: None,
            api_base_url: SANDBOX_API_BASE_URL.to_string(),
            return_url: "http://localhost:3000/checkout/success".to_string(),
            cancel_url: "http://localhost:3000/checkout/cancel".to_string(),
            brand_name: None,
            request_timeout: Duration::from_secs(15),
        }
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_webhook_id(mut self, webhook_id: impl Into<String>) -> Self {
        self.webhook_id = Some(webhook_id.into());
        self
    }

    pub fn is_live_mode(&self) -> bool {
        self.api_base_url == LIVE_API_BASE_URL
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, CheckoutError> {
    optional(name).ok_or_else(|| CheckoutError::Configuration(format!("{} not set", name)))
}
