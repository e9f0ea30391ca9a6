//! # Paymob Configuration
//!
//! Configuration for the Paymob Accept integration.
//! All secrets are loaded from environment variables.

use checkout_core::CheckoutError;
use std::env;
use std::time::Duration;

/// Production Accept API
pub const DEFAULT_API_BASE_URL: &str = "https://accept.paymob.com/api";

/// Paymob Accept configuration
#[derive(Debug, Clone)]
pub struct PaymobConfig {
    /// Merchant API key, exchanged for a short-lived auth token per call
    pub api_key: String,

    /// Card (or wallet) integration id payments are routed to
    pub integration_id: u64,

    /// Hosted iframe id the customer is sent to
    pub iframe_id: String,

    /// Secret for callback HMAC-SHA512 verification
    pub hmac_secret: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// Lifetime of an issued payment key, in seconds
    pub payment_key_expiry_secs: u64,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl PaymobConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `PAYMOB_API_KEY`
    /// - `PAYMOB_INTEGRATION_ID`
    /// - `PAYMOB_IFRAME_ID`
    /// - `PAYMOB_HMAC_SECRET`
    ///
    /// Optional: `PAYMOB_API_BASE_URL`
    pub fn from_env() -> Result<Self, CheckoutError> {
        dotenvy::dotenv().ok();

        let api_key = required("PAYMOB_API_KEY")?;
        let integration_id = required("PAYMOB_INTEGRATION_ID")?
            .trim()
            .parse::<u64>()
            .map_err(|_| {
                CheckoutError::Configuration("PAYMOB_INTEGRATION_ID must be a number".to_string())
            })?;
        let iframe_id = required("PAYMOB_IFRAME_ID")?;
        let hmac_secret = required("PAYMOB_HMAC_SECRET")?;

        let mut config = Self::new(api_key, integration_id, iframe_id, hmac_secret);
        if let Ok(url) = env::var("PAYMOB_API_BASE_URL") {
            config.api_base_url = url;
        }
        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(
        api_key: impl Into<String>,
        integration_id: u64,
        iframe_id: impl Into<String>,
        hmac_secret: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            integration_id,
            iframe_id: iframe_id.into(),
            hmac_secret: hmac_secret.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            payment_key_expiry_secs: 3600,
            request_timeout: Duration::from_secs(15),
        }
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    /// Hosted payment page for an issued payment key
    pub fn iframe_url(&self, payment_token: &str) -> String {
        format!(
            "{}?payment_token={}",
            self.endpoint(&format!("/acceptance/iframes/{}", self.iframe_id)),
            payment_token
        )
    }
}

fn required(name: &str) -> Result<String, CheckoutError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CheckoutError::Configuration(format!("{} not set", name)))
}
