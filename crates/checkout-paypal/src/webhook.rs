//! # PayPal Webhook Handling
//!
//! PayPal signs webhooks with a certificate chain; rather than validating it
//! locally, the event is posted back to `/v1/notifications/verify-webhook-signature`
//! together with the transmission headers. This module holds the header set
//! and maps verified events to `PaymentEvent`s.
//!
//! Mapped events:
//! - `PAYMENT.CAPTURE.COMPLETED` → paid
//! - `PAYMENT.CAPTURE.DENIED` → declined
//! - `CHECKOUT.ORDER.COMPLETED` → paid
//!
//! Everything else is acknowledged and ignored.

use crate::PROVIDER;
use checkout_core::{CallbackHeaders, CheckoutError, CheckoutResult, Currency, PaymentChannel, PaymentEvent};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

pub const CAPTURE_COMPLETED: &str = "PAYMENT.CAPTURE.COMPLETED";
pub const CAPTURE_DENIED: &str = "PAYMENT.CAPTURE.DENIED";
pub const ORDER_COMPLETED: &str = "CHECKOUT.ORDER.COMPLETED";

/// Transmission headers PayPal attaches to every webhook delivery
#[derive(Debug, Clone, Serialize)]
pub struct Transmission {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

impl Transmission {
    /// Collect the transmission headers; a missing one fails verification
    pub fn from_headers(headers: &CallbackHeaders) -> CheckoutResult<Self> {
        Ok(Self {
            auth_algo: headers.require("paypal-auth-algo")?.to_string(),
            cert_url: headers.require("paypal-cert-url")?.to_string(),
            transmission_id: headers.require("paypal-transmission-id")?.to_string(),
            transmission_sig: headers.require("paypal-transmission-sig")?.to_string(),
            transmission_time: headers.require("paypal-transmission-time")?.to_string(),
        })
    }
}

/// Body of the verify-webhook-signature call
#[derive(Debug, Serialize)]
pub(crate) struct VerifySignatureRequest<'a> {
    #[serde(flatten)]
    pub transmission: Transmission,
    pub webhook_id: &'a str,
    pub webhook_event: &'a Value,
}

/// Read a PayPal money object (`{"currency_code": "USD", "value": "52.39"}`)
pub fn parse_amount(amount: &Value) -> Option<(i64, Currency)> {
    let currency = amount
        .get("currency_code")
        .and_then(Value::as_str)
        .and_then(Currency::from_code)?;
    let value = amount.get("value").and_then(Value::as_str)?;
    currency.parse_minor(value).map(|minor| (minor, currency))
}

/// First capture of an order resource, if it has been captured
pub(crate) fn first_capture(order: &Value) -> Option<&Value> {
    order.pointer("/purchase_units/0/payments/captures/0")
}

/// Map a verified webhook payload to a payment event.
///
/// Returns `Ok(None)` for event types that carry no payment outcome.
pub fn event_from_payload(payload: &Value) -> CheckoutResult<Option<PaymentEvent>> {
    let event_id = payload
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CheckoutError::CallbackParse("PayPal event without id".to_string()))?;
    let event_type = payload.get("event_type").and_then(Value::as_str).unwrap_or_default();
    let resource = payload
        .get("resource")
        .ok_or_else(|| CheckoutError::CallbackParse("PayPal event without resource".to_string()))?;

    let (external_order_id, transaction_id, amount, is_paid) = match event_type {
        CAPTURE_COMPLETED | CAPTURE_DENIED => {
            let order_id = resource
                .pointer("/supplementary_data/related_ids/order_id")
                .and_then(Value::as_str)
                .ok_or_else(|| CheckoutError::CallbackParse("capture without related order id".to_string()))?;
            (
                order_id,
                resource.get("id").and_then(Value::as_str),
                resource.get("amount"),
                event_type == CAPTURE_COMPLETED,
            )
        }
        ORDER_COMPLETED => {
            let order_id = resource
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| CheckoutError::CallbackParse("order event without id".to_string()))?;
            let capture = first_capture(resource);
            (
                order_id,
                capture.and_then(|c| c.get("id")).and_then(Value::as_str),
                capture
                    .and_then(|c| c.get("amount"))
                    .or_else(|| resource.pointer("/purchase_units/0/amount")),
                true,
            )
        }
        other => {
            debug!(event_type = other, "Ignoring PayPal event");
            return Ok(None);
        }
    };

    let (amount, currency) = amount
        .and_then(parse_amount)
        .ok_or_else(|| CheckoutError::CallbackParse(format!("{} without a readable amount", event_type)))?;
    let status = resource
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or(if is_paid { "COMPLETED" } else { "DENIED" });

    Ok(Some(PaymentEvent {
        provider: PROVIDER.to_string(),
        provider_event_id: event_id.to_string(),
        external_order_id: external_order_id.to_string(),
        transaction_id: transaction_id.map(String::from),
        is_paid,
        is_pending: false,
        amount,
        currency: Some(currency),
        status: status.to_string(),
        raw_payload: payload.clone(),
        channel: PaymentChannel::Webhook,
        received_at: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capture_event(event_type: &str, status: &str) -> Value {
        json!({
            "id": "WH-7Y7254563A4550640",
            "event_type": event_type,
            "resource": {
                "id": "3C679366HH908993F",
                "status": status,
                "amount": {"currency_code": "USD", "value": "52.39"},
                "supplementary_data": {"related_ids": {"order_id": "5O190127TN364715T"}}
            }
        })
    }

    #[test]
    fn test_capture_completed() {
        let event = event_from_payload(&capture_event(CAPTURE_COMPLETED, "COMPLETED"))
            .unwrap()
            .unwrap();
        assert!(event.is_paid);
        assert_eq!(event.amount, 5239);
        assert_eq!(event.currency, Some(Currency::USD));
        assert_eq!(event.external_order_id, "5O190127TN364715T");
        assert_eq!(event.transaction_id.as_deref(), Some("3C679366HH908993F"));
        assert_eq!(event.provider_event_id, "WH-7Y7254563A4550640");
        assert_eq!(event.provider, "paypal");
    }

    #[test]
    fn test_capture_denied_is_not_paid() {
        let event = event_from_payload(&capture_event(CAPTURE_DENIED, "DECLINED"))
            .unwrap()
            .unwrap();
        assert!(!event.is_paid);
        assert!(event.is_declined());
        assert_eq!(event.status, "DECLINED");
    }

    #[test]
    fn test_order_completed_uses_capture_amount() {
        let payload = json!({
            "id": "WH-1",
            "event_type": ORDER_COMPLETED,
            "resource": {
                "id": "5O190127TN364715T",
                "status": "COMPLETED",
                "purchase_units": [{
                    "amount": {"currency_code": "USD", "value": "52.39"},
                    "payments": {"captures": [{
                        "id": "CAP-1",
                        "amount": {"currency_code": "USD", "value": "52.39"}
                    }]}
                }]
            }
        });
        let event = event_from_payload(&payload).unwrap().unwrap();
        assert_eq!(event.external_order_id, "5O190127TN364715T");
        assert_eq!(event.transaction_id.as_deref(), Some("CAP-1"));
        assert_eq!(event.amount, 5239);
    }

    #[test]
    fn test_unmapped_event_ignored() {
        let payload = json!({"id": "WH-2", "event_type": "BILLING.PLAN.CREATED", "resource": {}});
        assert!(event_from_payload(&payload).unwrap().is_none());
    }

    #[test]
    fn test_capture_without_order_link_rejected() {
        let mut payload = capture_event(CAPTURE_COMPLETED, "COMPLETED");
        payload["resource"]["supplementary_data"] = json!({});
        assert!(matches!(
            event_from_payload(&payload),
            Err(CheckoutError::CallbackParse(_))
        ));
    }

    #[test]
    fn test_transmission_requires_every_header() {
        let headers = CallbackHeaders::new()
            .with("PayPal-Auth-Algo", "SHA256withRSA")
            .with("PayPal-Cert-Url", "https://api.paypal.com/cert.pem")
            .with("PayPal-Transmission-Id", "tx-1")
            .with("PayPal-Transmission-Time", "2026-03-01T10:00:00Z");
        assert!(matches!(
            Transmission::from_headers(&headers),
            Err(CheckoutError::SignatureInvalid(_))
        ));

        let headers = headers.with("PayPal-Transmission-Sig", "sig==");
        let transmission = Transmission::from_headers(&headers).unwrap();
        assert_eq!(transmission.transmission_id, "tx-1");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(
            parse_amount(&json!({"currency_code": "JPY", "value": "1200"})),
            Some((1200, Currency::JPY))
        );
        assert_eq!(parse_amount(&json!({"currency_code": "XXX", "value": "1.00"})), None);
    }
}
