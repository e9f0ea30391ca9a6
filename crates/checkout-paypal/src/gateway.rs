//! # PayPal Wallet Gateway
//!
//! ```text
//! every call:  POST /v1/oauth2/token  (client credentials, never cached)
//!
//! initiate:    POST /v2/checkout/orders          intent CAPTURE → approval link
//! verify:      GET  /v2/checkout/orders/{id}     COMPLETED ⇒ paid, VOIDED ⇒ declined
//! callback:    POST /v1/notifications/verify-webhook-signature → SUCCESS
//! ```

use crate::config::PayPalConfig;
use crate::webhook::{self, Transmission, VerifySignatureRequest};
use crate::PROVIDER;
use async_trait::async_trait;
use checkout_core::{
    CallbackHeaders, CheckoutError, CheckoutResult, Initiation, Order, PaymentEvent, PaymentGateway,
    PaymentMethod, Verification,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

/// PayPal REST gateway
pub struct PayPalGateway {
    config: PayPalConfig,
    client: Client,
}

impl PayPalGateway {
    /// Create a new PayPal gateway
    pub fn new(config: PayPalConfig) -> CheckoutResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CheckoutError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> CheckoutResult<Self> {
        Self::new(PayPalConfig::from_env()?)
    }

    pub fn config(&self) -> &PayPalConfig {
        &self.config
    }

    /// Fresh OAuth2 client-credentials token
    async fn access_token(&self) -> CheckoutResult<String> {
        let request = self
            .client
            .post(self.config.endpoint("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let token: TokenResponse = send_json(request, "oauth token").await?;
        Ok(token.access_token)
    }

    fn order_request(&self, order: &Order, payer_email: Option<&str>) -> Value {
        let currency = order.currency();
        let mut experience = json!({
            "return_url": self.config.return_url,
            "cancel_url": self.config.cancel_url,
            "user_action": "PAY_NOW",
            "shipping_preference": "NO_SHIPPING",
        });
        if let Some(brand) = &self.config.brand_name {
            experience["brand_name"] = json!(brand);
        }
        let mut paypal = json!({ "experience_context": experience });
        if let Some(email) = payer_email {
            paypal["email_address"] = json!(email);
        }

        json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": order.id(),
                "custom_id": order.id(),
                "invoice_id": order.order_number(),
                "amount": {
                    "currency_code": currency.code(),
                    "value": currency.format_minor(order.amount_due()),
                },
            }],
            "payment_source": { "paypal": paypal },
        })
    }

    /// Ask PayPal whether a webhook delivery is authentic
    async fn verify_signature(&self, headers: &CallbackHeaders, payload: &Value) -> CheckoutResult<()> {
        let webhook_id = self.config.webhook_id.as_deref().ok_or_else(|| {
            CheckoutError::Configuration("PAYPAL_WEBHOOK_ID not set; cannot verify webhooks".to_string())
        })?;
        let transmission = Transmission::from_headers(headers)?;

        let token = self.access_token().await?;
        let request = self
            .client
            .post(self.config.endpoint("/v1/notifications/verify-webhook-signature"))
            .bearer_auth(token)
            .json(&VerifySignatureRequest {
                transmission,
                webhook_id,
                webhook_event: payload,
            });
        let response: VerifySignatureResponse = send_json(request, "webhook verification").await?;

        if response.verification_status == "SUCCESS" {
            Ok(())
        } else {
            warn!(status = %response.verification_status, "PayPal webhook signature rejected");
            Err(CheckoutError::SignatureInvalid(format!(
                "PayPal verification status {}",
                response.verification_status
            )))
        }
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip(self, order), fields(order_number = %order.order_number()))]
    async fn initiate(&self, order: &Order) -> CheckoutResult<Initiation> {
        let payer_email = match order.payment_method() {
            Some(PaymentMethod::PayPal(details)) => details.payer_email.as_deref(),
            _ => {
                return Err(CheckoutError::Validation(
                    "order is not set up for PayPal payment".to_string(),
                ))
            }
        };

        let token = self.access_token().await?;
        let request = self
            .client
            .post(self.config.endpoint("/v2/checkout/orders"))
            .bearer_auth(token)
            .header("PayPal-Request-Id", order.id())
            .json(&self.order_request(order, payer_email));
        let created: OrderResponse = send_json(request, "order creation").await?;

        let approval = created
            .links
            .iter()
            .find(|link| link.rel == "payer-action" || link.rel == "approve")
            .map(|link| link.href.clone());
        if approval.is_none() {
            warn!(paypal_order_id = %created.id, "PayPal order has no approval link");
        }
        info!(paypal_order_id = %created.id, status = %created.status, "PayPal order created");

        Ok(Initiation {
            client_token: Some(created.id.clone()),
            external_order_id: created.id,
            redirect_url: approval,
        })
    }

    #[instrument(skip(self))]
    async fn verify(&self, external_order_id: &str) -> CheckoutResult<Verification> {
        let token = self.access_token().await?;
        let request = self
            .client
            .get(self.config.endpoint(&format!("/v2/checkout/orders/{}", external_order_id)))
            .bearer_auth(token);
        let raw: Value = send_json(request, "order lookup").await?;

        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        debug!(status = %status, "PayPal order status");

        if status == "VOIDED" {
            return Err(CheckoutError::PaymentDeclined {
                provider: PROVIDER.to_string(),
                reason: "order voided".to_string(),
            });
        }

        let capture = webhook::first_capture(&raw);
        let amount = capture
            .and_then(|c| c.get("amount"))
            .or_else(|| raw.pointer("/purchase_units/0/amount"))
            .and_then(webhook::parse_amount);

        Ok(Verification {
            is_paid: status == "COMPLETED",
            amount: amount.map(|(minor, _)| minor).unwrap_or(0),
            currency: amount.map(|(_, currency)| currency),
            transaction_id: capture
                .and_then(|c| c.get("id"))
                .and_then(Value::as_str)
                .map(String::from),
            status,
            raw_payload: raw,
        })
    }

    async fn parse_callback(&self, body: &[u8], headers: &CallbackHeaders) -> CheckoutResult<Option<PaymentEvent>> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| CheckoutError::CallbackParse(format!("invalid PayPal webhook: {}", e)))?;
        self.verify_signature(headers, &payload).await?;
        webhook::event_from_payload(&payload)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
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
        error!(step, %status, body = %body, "PayPal API error");
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
    // PayPal errors carry `message` (REST) or `error_description` (OAuth)
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error_description"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        StatusCode::TOO_MANY_REQUESTS => CheckoutError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after_secs: retry_after.unwrap_or(60),
        },
        s if s.is_server_error() => CheckoutError::ProviderError {
            provider: PROVIDER.to_string(),
            message: format!("{}: {}", step, message),
        },
        _ => CheckoutError::ProviderRejected {
            provider: PROVIDER.to_string(),
            message: format!("{}: {}", step, message),
        },
    }
}

// =============================================================================
// PayPal API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_core::{
        CartStore, CatalogProduct, CouponBook, Currency, Identity, LoggingNotifier, OrderLifecycle,
        OrderStore, PricingEngine, ProductCatalog, ShippingAddress, WalletDetails,
    };
    use std::sync::Arc;
    use wiremock::matchers::{basic_auth, body_partial_json, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn confirmed_order(method: PaymentMethod) -> Order {
        let catalog = ProductCatalog::new().with_product(CatalogProduct::new("p1", "Widget", 2000, 50));
        let carts = Arc::new(CartStore::new(Arc::new(catalog), CouponBook::new(), PricingEngine::default()));
        let lifecycle = OrderLifecycle::new(carts.clone(), Arc::new(OrderStore::new()), Arc::new(LoggingNotifier));

        carts.add_line(&Identity::user("u1"), "p1", None, 2).await.unwrap();
        lifecycle
            .save_shipping_address(
                "u1",
                ShippingAddress {
                    full_name: "Ada Lovelace".into(),
                    address: "1 Main St".into(),
                    city: "Austin".into(),
                    postal_code: "73301".into(),
                    country: "US".into(),
                    state: Some("TX".into()),
                },
            )
            .await
            .unwrap();
        lifecycle.save_payment_method("u1", method).await.unwrap();
        lifecycle.place_order("u1", None).await.unwrap()
    }

    fn wallet() -> PaymentMethod {
        PaymentMethod::PayPal(WalletDetails {
            payer_email: Some("ada@example.com".into()),
        })
    }

    fn gateway(server: &MockServer) -> PayPalGateway {
        let config = PayPalConfig::new("client", "secret")
            .with_api_base_url(server.uri())
            .with_webhook_id("WH-ID");
        PayPalGateway::new(config).unwrap()
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .and(basic_auth("client", "secret"))
            .and(body_string("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AAF", "token_type": "Bearer", "expires_in": 32400
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn webhook_headers() -> CallbackHeaders {
        CallbackHeaders::new()
            .with("paypal-auth-algo", "SHA256withRSA")
            .with("paypal-cert-url", "https://api.paypal.com/v1/notifications/certs/CERT")
            .with("paypal-transmission-id", "69cd13f0-d67a-11e5-baa3-778b53f4ae55")
            .with("paypal-transmission-sig", "lmI95Jx3Y9nhR5SJWlHVIWpg4AgFk7n9bCHSRxbrd8A9zrhdu2rMyFrmz+Zjh3s3boXB07VXCXUZy/UFzUlnGJn0wDugt7FlSvdKeIJenLRemUxYCPVoEZzg9VFNqOa48gMkvF+XTpxBeUx/kWy6B5cp7GkT2+pOowfRK7OaynuxUoKW3JcMWw272VKjLTtTAShncla7tGF+55rxyt2KNZIIqxNMJ48RDZheGU5w1npu9dZHnPgTXB9iomeVRoD8O/jhRpnKsGrDschyNdkeh81BJJMH4Ctc6lnCCquoP/GzCzz33MMsNdid7vL/NIWaCsekQpW26FpWPi/tfj8nLA==")
            .with("paypal-transmission-time", "2026-03-01T10:00:00Z")
    }

    #[tokio::test]
    async fn test_initiate_creates_capture_order() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        let order = confirmed_order(wallet()).await;

        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .and(header("authorization", "Bearer A21AAF"))
            .and(body_partial_json(json!({
                "intent": "CAPTURE",
                "purchase_units": [{
                    "reference_id": order.id(),
                    "amount": {"currency_code": "USD", "value": order.currency().format_minor(order.amount_due())}
                }],
                "payment_source": {"paypal": {"email_address": "ada@example.com"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "5O190127TN364715T",
                "status": "PAYER_ACTION_REQUIRED",
                "links": [
                    {"href": "https://api-m.paypal.com/v2/checkout/orders/5O190127TN364715T", "rel": "self", "method": "GET"},
                    {"href": "https://www.paypal.com/checkoutnow?token=5O190127TN364715T", "rel": "payer-action", "method": "GET"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let initiation = gateway(&server).initiate(&order).await.unwrap();
        assert_eq!(initiation.external_order_id, "5O190127TN364715T");
        assert_eq!(
            initiation.redirect_url.as_deref(),
            Some("https://www.paypal.com/checkoutnow?token=5O190127TN364715T")
        );
    }

    #[tokio::test]
    async fn test_initiate_rejects_other_methods() {
        let server = MockServer::start().await;
        let order = confirmed_order(PaymentMethod::CashOnDelivery).await;
        assert!(matches!(
            gateway(&server).initiate(&order).await,
            Err(CheckoutError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_completed_order() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/5O190127TN364715T"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "5O190127TN364715T",
                "status": "COMPLETED",
                "purchase_units": [{
                    "amount": {"currency_code": "USD", "value": "52.39"},
                    "payments": {"captures": [{
                        "id": "3C679366HH908993F",
                        "status": "COMPLETED",
                        "amount": {"currency_code": "USD", "value": "52.39"}
                    }]}
                }]
            })))
            .mount(&server)
            .await;

        let verification = gateway(&server).verify("5O190127TN364715T").await.unwrap();
        assert!(verification.is_paid);
        assert_eq!(verification.amount, 5239);
        assert_eq!(verification.currency, Some(Currency::USD));
        assert_eq!(verification.transaction_id.as_deref(), Some("3C679366HH908993F"));
    }

    #[tokio::test]
    async fn test_verify_approved_is_not_yet_paid() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/O-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "O-1",
                "status": "APPROVED",
                "purchase_units": [{"amount": {"currency_code": "USD", "value": "52.39"}}]
            })))
            .mount(&server)
            .await;

        let verification = gateway(&server).verify("O-1").await.unwrap();
        assert!(!verification.is_paid);
        assert_eq!(verification.status, "APPROVED");
        assert_eq!(verification.transaction_id, None);
    }

    #[tokio::test]
    async fn test_verify_voided_is_terminal() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/O-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "O-2", "status": "VOIDED"})))
            .mount(&server)
            .await;

        let err = gateway(&server).verify("O-2").await.unwrap_err();
        assert!(matches!(err, CheckoutError::PaymentDeclined { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_token_fetched_for_every_call() {
        let server = MockServer::start().await;
        mount_token(&server, 3).await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/O-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "O-3", "status": "CREATED"})))
            .mount(&server)
            .await;

        let gateway = gateway(&server);
        for _ in 0..3 {
            gateway.verify("O-3").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_oauth_failure_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client", "error_description": "Client Authentication failed"
            })))
            .mount(&server)
            .await;

        let err = gateway(&server).verify("O-4").await.unwrap_err();
        assert!(matches!(err, CheckoutError::ProviderRejected { ref message, .. } if message.contains("Client Authentication failed")));
    }

    #[tokio::test]
    async fn test_webhook_verified_and_mapped() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .and(body_partial_json(json!({
                "webhook_id": "WH-ID",
                "transmission_id": "69cd13f0-d67a-11e5-baa3-778b53f4ae55",
                "auth_algo": "SHA256withRSA",
                "webhook_event": {"id": "WH-EVT-1"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"verification_status": "SUCCESS"})))
            .expect(1)
            .mount(&server)
            .await;

        let body = json!({
            "id": "WH-EVT-1",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-9",
                "status": "COMPLETED",
                "amount": {"currency_code": "USD", "value": "52.39"},
                "supplementary_data": {"related_ids": {"order_id": "5O190127TN364715T"}}
            }
        });

        let event = gateway(&server)
            .parse_callback(body.to_string().as_bytes(), &webhook_headers())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.external_order_id, "5O190127TN364715T");
        assert!(event.is_paid);
    }

    #[tokio::test]
    async fn test_webhook_failed_verification() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"verification_status": "FAILURE"})))
            .mount(&server)
            .await;

        let body = json!({"id": "WH-EVT-2", "event_type": "PAYMENT.CAPTURE.COMPLETED", "resource": {}});
        let err = gateway(&server)
            .parse_callback(body.to_string().as_bytes(), &webhook_headers())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn test_webhook_missing_headers_skips_network() {
        let server = MockServer::start().await;
        mount_token(&server, 0).await;

        let body = json!({"id": "WH-EVT-3", "event_type": "PAYMENT.CAPTURE.COMPLETED", "resource": {}});
        let err = gateway(&server)
            .parse_callback(body.to_string().as_bytes(), &CallbackHeaders::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::SignatureInvalid(_)));
    }
}
