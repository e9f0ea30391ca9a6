//! # checkout-api
//!
//! HTTP API layer for storefront checkout.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Cart, order and payment endpoints
//! - Provider webhook intake
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/cart` | Current cart with totals |
//! | POST | `/api/v1/cart/items` | Add to cart |
//! | PUT | `/api/v1/orders/pending/shipping-address` | Save address on the draft order |
//! | POST | `/api/v1/orders/place` | Place the draft order |
//! | POST | `/api/v1/orders/{id}/payments/initiate` | Start a provider payment |
//! | POST | `/api/v1/orders/{id}/payments/verify` | Poll the provider and apply |
//! | POST | `/webhook/{provider}` | Provider callback |
//!
//! See [`routes::create_router`] for the full list.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
