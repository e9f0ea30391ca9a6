//! # Routes
//!
//! Axum router configuration for the checkout API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Cart (`/api/v1/cart`), keyed by `x-user-id` or `x-session-id`:
///   - GET    /cart                     - Cart with totals
///   - DELETE /cart                     - Empty the cart
///   - GET    /cart/count               - Item count
///   - POST   /cart/items               - Add a line
///   - PATCH  /cart/items/{product_id}  - Set line quantity
///   - DELETE /cart/items/{product_id}  - Remove a line (`?variant=`)
///   - POST   /cart/coupons             - Apply a coupon
///   - DELETE /cart/coupons/{code}      - Remove a coupon
///   - PUT    /cart/jurisdiction        - Set the tax jurisdiction
///   - POST   /cart/merge               - Merge a guest cart on sign-in
///
/// - Orders (`/api/v1/orders`), signed-in users:
///   - GET  /orders                              - Caller's orders, newest first
///   - GET  /orders/pending                      - Draft order
///   - PUT  /orders/pending/shipping-address     - Save address
///   - PUT  /orders/pending/payment-method       - Save payment method
///   - POST /orders/place                        - Place the draft
///   - GET  /orders/{order_id}                   - Order (owner or admin)
///   - POST /orders/{order_id}/cancel            - Cancel
///   - POST /orders/{order_id}/deliver           - Mark delivered (admin)
///   - POST /orders/{order_id}/manual-payment    - Record offline payment (admin)
///   - POST /orders/{order_id}/payments/initiate - Start provider payment
///   - POST /orders/{order_id}/payments/verify   - Poll provider and apply
///
/// - Webhooks:
///   - POST /webhook/{provider} - Provider callback (200, processed async)
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let cart_routes = Router::new()
        .route("/", get(handlers::get_cart).delete(handlers::clear_cart))
        .route("/count", get(handlers::cart_count))
        .route("/items", post(handlers::add_cart_item))
        .route(
            "/items/{product_id}",
            patch(handlers::update_cart_item).delete(handlers::remove_cart_item),
        )
        .route("/coupons", post(handlers::apply_coupon))
        .route("/coupons/{code}", delete(handlers::remove_coupon))
        .route("/jurisdiction", put(handlers::set_cart_jurisdiction))
        .route("/merge", post(handlers::merge_cart));

    let order_routes = Router::new()
        .route("/", get(handlers::list_orders))
        .route("/pending", get(handlers::get_pending_order))
        .route("/pending/shipping-address", put(handlers::save_shipping_address))
        .route("/pending/payment-method", put(handlers::save_payment_method))
        .route("/place", post(handlers::place_order))
        .route("/{order_id}", get(handlers::get_order))
        .route("/{order_id}/cancel", post(handlers::cancel_order))
        .route("/{order_id}/deliver", post(handlers::deliver_order))
        .route("/{order_id}/manual-payment", post(handlers::record_manual_payment))
        .route("/{order_id}/payments/initiate", post(handlers::initiate_payment))
        .route("/{order_id}/payments/verify", post(handlers::verify_payment));

    let api_routes = Router::new()
        .nest("/cart", cart_routes)
        .nest("/orders", order_routes);

    // Webhooks take the raw body; signatures are checked by each gateway
    let webhook_routes = Router::new().route("/{provider}", post(handlers::payment_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/webhook", webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
