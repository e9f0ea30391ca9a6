//! # checkout-paypal
//!
//! PayPal wallet gateway for storefront checkout.
//!
//! - [`PayPalGateway`] implements `PaymentGateway` over the Orders v2 API
//!   with a fresh OAuth2 client-credentials token per call
//! - [`webhook`] maps verified webhook events to `PaymentEvent`s
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkout_paypal::PayPalGateway;
//!
//! let gateway = PayPalGateway::from_env()?;
//! let initiation = gateway.initiate(&order).await?;
//! // Redirect the buyer to initiation.redirect_url
//! ```

pub mod config;
pub mod gateway;
pub mod webhook;

/// Provider name used for routing and on payment records
pub const PROVIDER: &str = "paypal";

// Re-exports
pub use config::PayPalConfig;
pub use gateway::PayPalGateway;
