//! # Checkout Error Types
//!
//! Typed error handling for the checkout engine.
//! Every cart, order and payment operation returns `Result<T, CheckoutError>`.

use thiserror::Error;

/// Core error type for all checkout operations
#[derive(Debug, Clone, Error)]
pub enum CheckoutError {
    /// Malformed or out-of-range input (bad quantity, empty id, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Quantity outside the accepted per-line range
    #[error("Invalid quantity {quantity}: must be between {min} and {max}")]
    InvalidQuantity { quantity: u32, min: u32, max: u32 },

    /// Product not found in catalog
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    /// Catalog cannot cover the requested quantity
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    OutOfStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    /// Coupon code is not known to the coupon book
    #[error("Unknown coupon: {code}")]
    UnknownCoupon { code: String },

    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Caller does not own the entity
    #[error("Not authorized to access {entity} {id}")]
    Forbidden { entity: &'static str, id: String },

    /// The entity is already in the requested state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The state machine does not allow this transition
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Paid amount does not match the order total
    #[error("Amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: i64, received: i64 },

    /// Transient provider failure (5xx, malformed upstream response)
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Network/HTTP error communicating with provider
    #[error("Network error [{provider}]: {message}")]
    NetworkError { provider: String, message: String },

    /// Provider call exceeded its deadline
    #[error("Provider {provider} timed out")]
    ProviderTimeout { provider: String },

    /// Rate limited by provider
    #[error("Rate limited by {provider}, retry after {retry_after_secs} seconds")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    /// Provider rejected our request (4xx); retrying the same call cannot succeed
    #[error("Provider {provider} rejected request: {message}")]
    ProviderRejected { provider: String, message: String },

    /// Provider explicitly reported the payment as failed
    #[error("Payment declined by {provider}: {reason}")]
    PaymentDeclined { provider: String, reason: String },

    /// Callback authentication failed
    #[error("Callback signature invalid: {0}")]
    SignatureInvalid(String),

    /// Callback payload parsing error
    #[error("Callback parse error: {0}")]
    CallbackParse(String),

    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Shorthand for a missing order
    pub fn order_not_found(id: impl Into<String>) -> Self {
        CheckoutError::NotFound {
            entity: "order",
            id: id.into(),
        }
    }

    /// Returns true if the caller may retry the same call with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::NetworkError { .. }
                | CheckoutError::ProviderTimeout { .. }
                | CheckoutError::RateLimited { .. }
                | CheckoutError::ProviderError { .. }
        )
    }

    /// Returns true for benign idempotency hits
    pub fn is_conflict(&self) -> bool {
        matches!(self, CheckoutError::Conflict(_))
    }

    /// Returns true when money may have moved and a human should look at it
    pub fn requires_manual_review(&self) -> bool {
        matches!(
            self,
            CheckoutError::AmountMismatch { .. } | CheckoutError::SignatureInvalid(_)
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CheckoutError::Validation(_) => 400,
            CheckoutError::InvalidQuantity { .. } => 400,
            CheckoutError::ProductNotFound { .. } => 400,
            CheckoutError::OutOfStock { .. } => 400,
            CheckoutError::UnknownCoupon { .. } => 400,
            CheckoutError::NotFound { .. } => 404,
            CheckoutError::Forbidden { .. } => 403,
            CheckoutError::Conflict(_) => 409,
            CheckoutError::InvalidTransition { .. } => 409,
            CheckoutError::AmountMismatch { .. } => 422,
            CheckoutError::ProviderError { .. } => 502,
            CheckoutError::NetworkError { .. } => 503,
            CheckoutError::ProviderTimeout { .. } => 504,
            CheckoutError::RateLimited { .. } => 429,
            CheckoutError::ProviderRejected { .. } => 502,
            CheckoutError::PaymentDeclined { .. } => 402,
            CheckoutError::SignatureInvalid(_) => 401,
            CheckoutError::CallbackParse(_) => 400,
            CheckoutError::Configuration(_) => 500,
            CheckoutError::Serialization(_) => 500,
            CheckoutError::Internal(_) => 500,
        }
    }
}

/// Result type alias for checkout operations
pub type CheckoutResult<T> = Result<T, CheckoutError>;
