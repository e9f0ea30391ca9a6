//! # checkout-core
//!
//! Core of the storefront checkout engine.
//!
//! This crate provides:
//! - `PricingEngine` turning cart lines, coupons and a shipping profile into `Totals`
//! - `CartStore` holding per-identity carts with materialized totals
//! - `OrderLifecycle` driving orders `pending → confirmed → paid → delivered`
//! - `PaymentGateway` trait implemented by each provider crate
//! - `ReconciliationCoordinator` resolving webhook/poll races into one transition
//! - `PaymentService` for initiate, bounded verification polling, and callbacks
//! - `CheckoutError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkout_core::{CartStore, Identity, OrderLifecycle, PaymentService};
//!
//! let alice = Identity::user("alice");
//! carts.add_line(&alice, "echo-dot", None, 2).await?;
//!
//! lifecycle.save_shipping_address("alice", address).await?;
//! lifecycle.save_payment_method("alice", method).await?;
//! let order = lifecycle.place_order("alice", None).await?;
//!
//! let initiation = payments.initiate("alice", order.id(), "paypal").await?;
//! // Redirect the customer to initiation.redirect_url, then:
//! let report = payments.verify("alice", order.id(), false).await?;
//! ```

pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod lifecycle;
pub mod money;
pub mod notify;
pub mod order;
pub mod payments;
pub mod polling;
pub mod pricing;
pub mod reconcile;

// Re-exports for convenience
pub use cart::{Cart, CartLine, CartStore, MAX_LINE_QUANTITY, MIN_LINE_QUANTITY};
pub use catalog::{Catalog, CatalogProduct, ProductCatalog};
pub use coupon::{Coupon, CouponBook, Discount};
pub use error::{CheckoutError, CheckoutResult};
pub use gateway::{
    BoxedGateway, CallbackHeaders, GatewayRegistry, Initiation, PaymentChannel, PaymentEvent,
    PaymentGateway, Verification,
};
pub use identity::Identity;
pub use lifecycle::{OrderLifecycle, OrderStore};
pub use money::{Currency, Price, Rate};
pub use notify::{LoggingNotifier, Notification, Notifier};
pub use order::{
    IframeDetails, IssueKind, Order, OrderItem, OrderStatus, PaymentInfo, PaymentMethod,
    PaymentRecord, ReconciliationIssue, ShippingAddress, WalletDetails,
};
pub use payments::{CallbackOutcome, CallbackRetry, PaymentService, VerifyOutcome, VerifyReport};
pub use polling::{poll, PollOutcome, PollPolicy};
pub use pricing::{PricingConfig, PricingEngine, ShippingProfile, TaxTable, Totals};
pub use reconcile::{ApplyOutcome, ReconciliationCoordinator, RejectReason};
