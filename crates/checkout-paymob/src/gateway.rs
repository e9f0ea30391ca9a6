//! # Paymob Iframe Gateway
//!
//! Payment flow against the Accept API:
//!
//! ```text
//! initiate:  POST /auth/tokens            api_key      → auth token
//!            POST /ecommerce/orders       order total  → paymob order id
//!            POST /acceptance/payment_keys billing     → payment token
//!            → iframe URL /acceptance/iframes/{iframe_id}?payment_token=...
//!
//! verify:    POST /auth/tokens (fresh token)
//!            GET  /ecommerce/orders/{id}?token=...  paid when paid_amount_cents > 0
//! ```

use crate::callback;
use crate::config::PaymobConfig;
use crate::PROVIDER;
use async_trait::async_trait;
use checkout_core::{
    CallbackHeaders, CheckoutError, CheckoutResult, Currency, IframeDetails, Initiation, Order,
    PaymentEvent, PaymentGateway, PaymentMethod, ShippingAddress, Verification,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

/// Paymob Accept gateway
pub struct PaymobGateway {
    config: PaymobConfig,
    client: Client,
}

impl PaymobGateway {
    /// Create a new Paymob gateway
    pub fn new(config: PaymobConfig) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        Self::new(PaymobConfig::from_env()?)
    }

    pub fn config(&self) -> &PaymobConfig {
        &self.config
    }

    /// Exchange the API key for a short-lived auth token
    async fn auth_token(&self) -> CheckoutResult<String> {
        let request = self
            .client
            .post(self.config.endpoint("/auth/tokens"))
            .json(&AuthRequest {
                api_key: &self.config.api_key,
            });
        let response: AuthResponse = send_json(request, "auth").await?;
        Ok(response.token)
    }

    fn billing_data(order: &Order, details: &IframeDetails) -> BillingData {
        let address = order.shipping_address();
        let field = |f: fn(&ShippingAddress) -> &str| or_na(address.map(f));
        let city = field(|a| a.city.as_str());

        BillingData {
            first_name: details.first_name.clone(),
            last_name: details.last_name.clone(),
            email: details.email.clone(),
            phone_number: details.phone.clone(),
            street: field(|a| a.address.as_str()),
            apartment: "NA".to_string(),
            floor: "NA".to_string(),
            building: "NA".to_string(),
            shipping_method: "NA".to_string(),
            postal_code: field(|a| a.postal_code.as_str()),
            country: field(|a| a.country.as_str()),
            state: address
                .and_then(|a| a.state.clone())
                .unwrap_or_else(|| city.clone()),
            city,
        }
    }
}

#[async_trait]
impl PaymentGateway for PaymobGateway {
    #[instrument(skip(self, order), fields(order_number = %order.order_number()))]
    async fn initiate(&self, order: &Order) -> CheckoutResult<Initiation> {
        let details = match order.payment_method() {
            Some(PaymentMethod::Paymob(details)) => details,
            _ => {
                return Err(CheckoutError::Validation(
                    "order is not set up for Paymob payment".to_string(),
                ))
            }
        };
        if order.items().is_empty() {
            return Err(CheckoutError::Validation("Order has no items".to_string()));
        }

        let amount_cents = order.amount_due();
        let currency = order.currency().code();
        let auth_token = self.auth_token().await?;

        let items = order
            .items()
            .iter()
            .map(|item| PaymobItem {
                name: item.name.clone(),
                amount_cents: item.price,
                description: item.name.clone(),
                quantity: item.quantity,
            })
            .collect();
        let request = self
            .client
            .post(self.config.endpoint("/ecommerce/orders"))
            .json(&CreateOrderRequest {
                auth_token: &auth_token,
                delivery_needed: false,
                amount_cents,
                currency: &currency,
                items,
            });
        let paymob_order: CreateOrderResponse = send_json(request, "order registration").await?;
        debug!(paymob_order_id = paymob_order.id, "Registered Paymob order");

        let request = self
            .client
            .post(self.config.endpoint("/acceptance/payment_keys"))
            .json(&PaymentKeyRequest {
                auth_token: &auth_token,
                amount_cents,
                expiration: self.config.payment_key_expiry_secs,
                order_id: paymob_order.id,
                billing_data: Self::billing_data(order, details),
                currency: &currency,
                integration_id: self.config.integration_id,
                lock_order_when_paid: true,
            });
        let key: PaymentKeyResponse = send_json(request, "payment key").await?;

        info!(paymob_order_id = paymob_order.id, "Paymob payment initiated");

        Ok(Initiation {
            external_order_id: paymob_order.id.to_string(),
            redirect_url: Some(self.config.iframe_url(&key.token)),
            client_token: Some(key.token),
        })
    }

    #[instrument(skip(self))]
    async fn verify(&self, external_order_id: &str) -> CheckoutResult<Verification> {
        let auth_token = self.auth_token().await?;
        let request = self
            .client
            .get(self.config.endpoint(&format!("/ecommerce/orders/{}", external_order_id)))
            .query(&[("token", auth_token.as_str())]);
        let raw: Value = send_json(request, "order lookup").await?;

        let status: OrderStatusResponse = serde_json::from_value(raw.clone()).map_err(|e| CheckoutError::ProviderError {
            provider: PROVIDER.to_string(),
            message: format!("unexpected order lookup response: {}", e),
        })?;
        let is_paid = status.paid_amount_cents > 0;
        debug!(paid_amount_cents = status.paid_amount_cents, is_paid, "Paymob order status");

        Ok(Verification {
            is_paid,
            amount: status.paid_amount_cents,
            currency: status.currency.as_deref().and_then(Currency::from_code),
            transaction_id: None,
            status: status
                .payment_status
                .unwrap_or_else(|| if is_paid { "PAID" } else { "UNPAID" }.to_string()),
            raw_payload: raw,
        })
    }

    async fn parse_callback(&self, body: &[u8], headers: &CallbackHeaders) -> CheckoutResult<Option<PaymentEvent>> {
        callback::parse_callback(&self.config.hmac_secret, body, headers.get("hmac"))
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Paymob rejects empty billing fields
fn or_na(value: Option<&str>) -> String {
    value
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("NA")
        .to_string()
}

/// Send a request and decode a successful JSON response.
///
/// Transport failures, timeouts, 429 and 5xx are transient; other 4xx are
/// rejections of the request itself.
async fn send_json<T: DeserializeOwned>(request: RequestBuilder, step: &str) -> CheckoutResult<T> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        error!(step, %status, body = %body, "Paymob API error");
        return Err(status_error(status, retry_after, step, &body));
    }

    serde_json::from_str(&body).map_err(|e| CheckoutError::ProviderError {
        provider: PROVIDER.to_string(),
        message: format!("unexpected {} response: {}", step, e),
    })
}

fn transport_error(e: reqwest::Error) -> CheckoutError {
    if e.is_timeout() {
        CheckoutError::ProviderTimeout {
            provider: PROVIDER.to_string(),
        }
    } else {
        CheckoutError::NetworkError {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        }
    }
}

fn status_error(status: StatusCode, retry_after: Option<u64>, step: &str, body: &str) -> CheckoutError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("detail"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| format!("HTTP {}", status));

    if status == StatusCode::TOO_MANY_REQUESTS {
        CheckoutError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after_secs: retry_after.unwrap_or(60),
        }
    } else if status.is_server_error() {
        CheckoutError::ProviderError {
            provider: PROVIDER.to_string(),
            message: format!("{}: {}", step, message),
        }
    } else {
        CheckoutError::ProviderRejected {
            provider: PROVIDER.to_string(),
            message: format!("{}: {}", step, message),
        }
    }
}

// =============================================================================
// Paymob API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct PaymobItem {
    name: String,
    amount_cents: i64,
    description: String,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    auth_token: &'a str,
    delivery_needed: bool,
    amount_cents: i64,
    currency: &'a str,
    items: Vec<PaymobItem>,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct BillingData {
    first_name: String,
    last_name: String,
    email: String,
    phone_number: String,
    street: String,
    apartment: String,
    floor: String,
    building: String,
    shipping_method: String,
    postal_code: String,
    city: String,
    country: String,
    state: String,
}

#[derive(Debug, Serialize)]
struct PaymentKeyRequest<'a> {
    auth_token: &'a str,
    amount_cents: i64,
    expiration: u64,
    order_id: u64,
    billing_data: BillingData,
    currency: &'a str,
    integration_id: u64,
    lock_order_when_paid: bool,
}

#[derive(Debug, Deserialize)]
struct PaymentKeyResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    #[serde(default)]
    paid_amount_cents: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}
