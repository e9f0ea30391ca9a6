//! # checkout-paymob
//!
//! Paymob Accept (iframe) gateway for storefront checkout.
//!
//! - [`PaymobGateway`] implements `PaymentGateway`: auth-token exchange,
//!   order registration, payment-key issuance and the hosted iframe URL;
//!   verification with a fresh auth token on every call
//! - [`callback`] authenticates transaction callbacks (HMAC-SHA512 over the
//!   fixed field list) and maps them to `PaymentEvent`s
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkout_paymob::PaymobGateway;
//! use checkout_core::GatewayRegistry;
//!
//! let registry = GatewayRegistry::new()
//!     .with_gateway(std::sync::Arc::new(PaymobGateway::from_env()?));
//! ```

pub mod callback;
pub mod config;
pub mod gateway;

/// Provider name used for routing and on payment records
pub const PROVIDER: &str = "paymob";

// Re-exports
pub use config::PaymobConfig;
pub use gateway::PaymobGateway;
