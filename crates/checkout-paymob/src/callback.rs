//! # Paymob Transaction Callbacks
//!
//! Paymob posts a "transaction processed" callback when a payment settles.
//! It is authenticated with HMAC-SHA512 over the values of twenty fixed
//! fields, concatenated in a fixed order with no separator:
//!
//! ```text
//! amount_cents created_at currency error_occured has_parent_transaction id
//! integration_id is_3d_secure is_auth is_capture is_refunded
//! is_standalone_payment is_voided order_id owner pending source_data_pan
//! source_data_sub_type source_data_type success
//! ```
//!
//! Booleans render as `true`/`false`, missing values as the empty string.
//! The callback arrives either flat or wrapped as `{"type": "TRANSACTION",
//! "obj": {...}}` with nested `order` and `source_data` objects; the
//! signature itself comes from the `hmac` query parameter or body field.

use checkout_core::{CheckoutError, CheckoutResult, Currency, PaymentChannel, PaymentEvent};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Signed fields, in signing order
pub const HMAC_FIELDS: [&str; 20] = [
    "amount_cents",
    "created_at",
    "currency",
    "error_occured",
    "has_parent_transaction",
    "id",
    "integration_id",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "order_id",
    "owner",
    "pending",
    "source_data_pan",
    "source_data_sub_type",
    "source_data_type",
    "success",
];

/// Look a signed field up, accepting both flat and nested layouts
fn field<'a>(transaction: &'a Value, name: &str) -> Option<&'a Value> {
    if let Some(value) = transaction.get(name) {
        return Some(value);
    }
    match name {
        "order_id" => transaction.get("order").map(|order| order.get("id").unwrap_or(order)),
        "source_data_pan" => transaction.pointer("/source_data/pan"),
        "source_data_sub_type" => transaction.pointer("/source_data/sub_type"),
        "source_data_type" => transaction.pointer("/source_data/type"),
        _ => None,
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn flag(transaction: &Value, name: &str) -> bool {
    match field(transaction, name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// The string Paymob signs for a transaction
pub fn signing_message(transaction: &Value) -> String {
    HMAC_FIELDS
        .iter()
        .map(|name| render(field(transaction, name)))
        .collect()
}

/// Hex HMAC-SHA512 of `message`
pub fn compute_hmac(secret: &str, message: &str) -> CheckoutResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| CheckoutError::Configuration(format!("invalid Paymob HMAC secret: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a received hex signature against the transaction (constant-time)
pub fn verify_hmac(secret: &str, transaction: &Value, received: &str) -> CheckoutResult<()> {
    let expected = hex::decode(received.trim())
        .map_err(|_| CheckoutError::SignatureInvalid("hmac is not hex".to_string()))?;
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| CheckoutError::Configuration(format!("invalid Paymob HMAC secret: {}", e)))?;
    mac.update(signing_message(transaction).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| CheckoutError::SignatureInvalid("Paymob HMAC mismatch".to_string()))
}

/// Authenticate a callback body and turn it into a payment event.
///
/// `query_hmac` is the `hmac` query parameter, if the callback carried one.
/// Every body must be signed. Authentic callbacks that are not transactions
/// carry no payment outcome and yield `None`.
pub fn parse_callback(secret: &str, body: &[u8], query_hmac: Option<&str>) -> CheckoutResult<Option<PaymentEvent>> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| CheckoutError::CallbackParse(format!("invalid Paymob callback: {}", e)))?;
    let transaction = payload.get("obj").unwrap_or(&payload);

    let received = query_hmac
        .or_else(|| payload.get("hmac").and_then(Value::as_str))
        .ok_or_else(|| CheckoutError::SignatureInvalid("missing hmac".to_string()))?;
    verify_hmac(secret, transaction, received)?;

    if let Some(kind) = payload.get("type").and_then(Value::as_str) {
        if kind != "TRANSACTION" {
            return Ok(None);
        }
    }

    let id = render(field(transaction, "id"));
    let order_id = render(field(transaction, "order_id"));
    if id.is_empty() || order_id.is_empty() {
        return Err(CheckoutError::CallbackParse(
            "Paymob transaction without id or order".to_string(),
        ));
    }

    let amount = field(transaction, "amount_cents")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0);
    let currency = field(transaction, "currency")
        .and_then(Value::as_str)
        .and_then(Currency::from_code);

    let success = flag(transaction, "success");
    let pending = flag(transaction, "pending") && !success;
    let status = if pending {
        "pending"
    } else if success {
        "success"
    } else {
        "failed"
    };

    Ok(Some(PaymentEvent {
        provider: crate::PROVIDER.to_string(),
        provider_event_id: id.clone(),
        external_order_id: order_id,
        transaction_id: Some(id),
        is_paid: success,
        is_pending: pending,
        amount,
        currency,
        status: status.to_string(),
        raw_payload: transaction.clone(),
        channel: PaymentChannel::Webhook,
        received_at: Utc::now(),
    }))
}
