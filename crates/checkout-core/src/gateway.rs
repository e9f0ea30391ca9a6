//! # Payment Gateway Trait
//!
//! Uniform capability set over provider wire protocols. Each provider
//! crate implements [`PaymentGateway`]; the [`GatewayRegistry`] selects one
//! by name at runtime.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   PaymentGateway (trait)                    │
//! │  ├── initiate()        order → external id + client token   │
//! │  ├── verify()          external id → is_paid + amount       │
//! │  ├── parse_callback()  raw body + headers → PaymentEvent    │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                 ┌──────────┴──────────┐
//!                 │                     │
//!         ┌───────┴───────┐     ┌───────┴───────┐
//!         │ PaymobGateway │     │ PayPalGateway │
//!         │   (iframe)    │     │   (wallet)    │
//!         └───────────────┘     └───────────────┘
//! ```

use crate::error::{CheckoutError, CheckoutResult};
use crate::money::Currency;
use crate::order::Order;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Where a payment confirmation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Provider-pushed callback
    Webhook,
    /// Client-initiated verification poll
    Poll,
    /// Operator or test action
    Manual,
}

impl std::fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentChannel::Webhook => "webhook",
            PaymentChannel::Poll => "poll",
            PaymentChannel::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Result of starting a payment with a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiation {
    /// Provider-side id used to correlate callbacks and verification
    pub external_order_id: String,

    /// Short-lived token the client needs to complete payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,

    /// Where to send the customer (iframe or approval URL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// What the provider reports about a payment when asked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub is_paid: bool,

    /// Amount the provider says was paid (minor units)
    pub amount: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    /// Provider status string, verbatim
    pub status: String,

    pub raw_payload: serde_json::Value,
}

/// Header material a provider needs to authenticate a callback.
/// Names are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct CallbackHeaders {
    headers: BTreeMap<String, String>,
}

impl CallbackHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Builder: add a header
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Like [`get`](Self::get) but a missing header is a signature failure
    pub fn require(&self, name: &str) -> CheckoutResult<&str> {
        self.get(name)
            .ok_or_else(|| CheckoutError::SignatureInvalid(format!("missing {} header", name)))
    }
}

/// A payment confirmation from either channel, normalized across providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider name (e.g., "paymob", "paypal")
    pub provider: String,

    /// Provider's id for this event (transaction id, webhook event id)
    pub provider_event_id: String,

    /// Provider-side order id, as returned by `initiate`
    pub external_order_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    pub is_paid: bool,

    /// Still in flight at the provider. An event that is neither paid nor
    /// pending is a decline.
    #[serde(default)]
    pub is_pending: bool,

    /// Amount paid (minor units)
    pub amount: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,

    /// Provider status string, verbatim
    pub status: String,

    pub raw_payload: serde_json::Value,

    pub channel: PaymentChannel,

    pub received_at: DateTime<Utc>,
}

impl PaymentEvent {
    /// Turn a poll answer into an event for the reconciliation coordinator
    pub fn from_verification(
        provider: impl Into<String>,
        external_order_id: impl Into<String>,
        verification: Verification,
    ) -> Self {
        let external_order_id = external_order_id.into();
        let provider_event_id = match &verification.transaction_id {
            Some(txn) => txn.clone(),
            None => format!("poll:{}", external_order_id),
        };
        Self {
            provider: provider.into(),
            provider_event_id,
            external_order_id,
            transaction_id: verification.transaction_id,
            is_paid: verification.is_paid,
            is_pending: !verification.is_paid,
            amount: verification.amount,
            currency: verification.currency,
            status: verification.status,
            raw_payload: verification.raw_payload,
            channel: PaymentChannel::Poll,
            received_at: Utc::now(),
        }
    }

    /// A payment recorded by an operator (cash on delivery, offline transfer)
    pub fn manual(
        provider: impl Into<String>,
        reference: impl Into<String>,
        amount: i64,
        currency: Currency,
    ) -> Self {
        let reference = reference.into();
        Self {
            provider: provider.into(),
            provider_event_id: reference.clone(),
            external_order_id: reference.clone(),
            transaction_id: Some(reference),
            is_paid: true,
            is_pending: false,
            amount,
            currency: Some(currency),
            status: "COMPLETED".to_string(),
            raw_payload: serde_json::Value::Null,
            channel: PaymentChannel::Manual,
            received_at: Utc::now(),
        }
    }

    /// A terminal decline a verification poll got back from the provider
    pub fn declined_by_poll(
        provider: impl Into<String>,
        external_order_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let external_order_id = external_order_id.into();
        Self {
            provider: provider.into(),
            provider_event_id: format!("poll:{}", external_order_id),
            external_order_id,
            transaction_id: None,
            is_paid: false,
            is_pending: false,
            amount: 0,
            currency: None,
            status: reason.into(),
            raw_payload: serde_json::Value::Null,
            channel: PaymentChannel::Poll,
            received_at: Utc::now(),
        }
    }

    pub fn is_declined(&self) -> bool {
        !self.is_paid && !self.is_pending
    }
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start a payment for a confirmed order.
    async fn initiate(&self, order: &Order) -> CheckoutResult<Initiation>;

    /// Ask the provider whether the payment went through.
    ///
    /// A terminal decline is `Err(PaymentDeclined)`; "not paid yet" is
    /// `Ok` with `is_paid == false`.
    async fn verify(&self, external_order_id: &str) -> CheckoutResult<Verification>;

    /// Authenticate and parse a provider callback.
    ///
    /// Returns `Ok(None)` for authentic events that carry no payment outcome.
    async fn parse_callback(
        &self,
        body: &[u8],
        headers: &CallbackHeaders,
    ) -> CheckoutResult<Option<PaymentEvent>>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;

    /// Get the callback endpoint path for this provider.
    fn callback_path(&self) -> String {
        format!("/webhook/{}", self.provider_name())
    }
}

/// Type alias for a shared gateway (dynamic dispatch)
pub type BoxedGateway = Arc<dyn PaymentGateway>;

/// Gateways by provider name
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, BoxedGateway>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its provider name
    pub fn register(&mut self, gateway: BoxedGateway) {
        let name = gateway.provider_name().to_string();
        self.gateways.insert(name, gateway);
    }

    /// Register with builder pattern
    pub fn with_gateway(mut self, gateway: BoxedGateway) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, provider: &str) -> Option<&BoxedGateway> {
        self.gateways.get(provider)
    }

    /// Get a gateway or fail with a validation error naming the provider
    pub fn require(&self, provider: &str) -> CheckoutResult<&BoxedGateway> {
        self.get(provider)
            .ok_or_else(|| CheckoutError::Validation(format!("unknown payment provider: {}", provider)))
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.gateways.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.gateways.contains_key(provider)
    }
}
