//! # Request Handlers
//!
//! Axum request handlers for the checkout API.
//!
//! Identity is resolved upstream and arrives as headers: `x-user-id` for a
//! signed-in customer, `x-session-id` for a guest, `x-user-role: admin` for
//! operators.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use checkout_core::{
    ApplyOutcome, CallbackHeaders, CallbackOutcome, Cart, CheckoutError, Identity, Initiation, Order,
    PaymentMethod, ShippingAddress, VerifyReport,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Errors
// =============================================================================

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    /// Whether the same request may succeed if retried later
    pub retryable: bool,
    /// Money may have moved; an operator has to look at the order
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub manual_review: bool,
}

/// Handler failure
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("Missing identity: send x-user-id or x-session-id")]
    MissingIdentity,

    #[error("Sign in required")]
    SignInRequired,

    #[error("Admin role required")]
    AdminRequired,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Checkout(e) => StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::MissingIdentity | ApiError::SignInRequired => StatusCode::UNAUTHORIZED,
            ApiError::AdminRequired => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (retryable, manual_review) = match &self {
            ApiError::Checkout(e) => (e.is_retryable(), e.requires_manual_review()),
            _ => (false, false),
        };
        if status.is_server_error() {
            error!(%status, "{}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
            retryable,
            manual_review,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Caller Identity
// =============================================================================

/// Who is calling, as resolved by the auth layer in front of this service
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: Identity,
    /// Guest session sent alongside the identity, if any
    pub session_id: Option<String>,
    pub is_admin: bool,
}

impl Caller {
    /// The signed-in user id; guests are refused
    pub fn user_id(&self) -> ApiResult<&str> {
        self.identity.user_id().ok_or(ApiError::SignInRequired)
    }

    /// The caller's own guest session; a signed-in user sends it to merge
    pub fn session_id(&self) -> ApiResult<&str> {
        self.session_id.as_deref().ok_or_else(|| {
            CheckoutError::Validation("x-session-id header required to merge a guest cart".to_string()).into()
        })
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ApiError::AdminRequired)
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session_id = header(parts, "x-session-id");
        let identity = match (header(parts, "x-user-id"), session_id) {
            (Some(user_id), _) => Identity::user(user_id),
            (None, Some(session_id)) => Identity::guest(session_id),
            (None, None) => return Err(ApiError::MissingIdentity),
        };
        let is_admin = header(parts, "x-user-role").is_some_and(|role| role.eq_ignore_ascii_case("admin"));

        Ok(Self {
            identity,
            session_id: session_id.map(String::from),
            is_admin,
        })
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VariantQuery {
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CouponRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct JurisdictionRequest {
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CartCountResponse {
    pub count: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub provider: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualPaymentRequest {
    pub reference: String,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub count: usize,
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "storefront-checkout",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.payments.gateways().providers(),
    }))
}

// ----- Cart -----------------------------------------------------------------

pub async fn get_cart(State(state): State<AppState>, caller: Caller) -> Json<Cart> {
    Json(state.carts.get(&caller.identity).await)
}

pub async fn cart_count(State(state): State<AppState>, caller: Caller) -> Json<CartCountResponse> {
    Json(CartCountResponse {
        count: state.carts.item_count(&caller.identity).await,
    })
}

#[instrument(skip(state, caller, request), fields(product_id = %request.product_id))]
pub async fn add_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<AddItemRequest>,
) -> ApiResult<Json<Cart>> {
    let cart = state
        .carts
        .add_line(&caller.identity, &request.product_id, request.variant, request.quantity)
        .await?;
    Ok(Json(cart))
}

pub async fn update_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(product_id): Path<String>,
    Json(request): Json<UpdateItemRequest>,
) -> ApiResult<Json<Cart>> {
    let cart = state
        .carts
        .update_quantity(&caller.identity, &product_id, request.variant, request.quantity)
        .await?;
    Ok(Json(cart))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(product_id): Path<String>,
    Query(query): Query<VariantQuery>,
) -> ApiResult<Json<Cart>> {
    let cart = state
        .carts
        .remove_line(&caller.identity, &product_id, query.variant)
        .await?;
    Ok(Json(cart))
}

pub async fn clear_cart(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Cart>> {
    Ok(Json(state.carts.clear(&caller.identity).await?))
}

pub async fn apply_coupon(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CouponRequest>,
) -> ApiResult<Json<Cart>> {
    Ok(Json(state.carts.apply_coupon(&caller.identity, &request.code).await?))
}

pub async fn remove_coupon(
    State(state): State<AppState>,
    caller: Caller,
    Path(code): Path<String>,
) -> ApiResult<Json<Cart>> {
    Ok(Json(state.carts.remove_coupon(&caller.identity, &code).await?))
}

pub async fn set_cart_jurisdiction(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<JurisdictionRequest>,
) -> ApiResult<Json<Cart>> {
    Ok(Json(
        state
            .carts
            .set_jurisdiction(&caller.identity, request.jurisdiction)
            .await?,
    ))
}

/// Fold the caller's guest cart into their account after sign-in.
///
/// The guest cart is the one named by the caller's own `x-session-id`.
pub async fn merge_cart(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Cart>> {
    let user_id = caller.user_id()?;
    Ok(Json(state.carts.merge(caller.session_id()?, user_id).await?))
}

// ----- Orders ---------------------------------------------------------------

pub async fn list_orders(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<OrderListResponse>> {
    let orders = state.lifecycle.list_orders(caller.user_id()?).await;
    Ok(Json(OrderListResponse {
        count: orders.len(),
        orders,
    }))
}

/// The caller's draft order, or `null` when there is none
pub async fn get_pending_order(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<Option<Order>>> {
    Ok(Json(state.lifecycle.get_pending_order(caller.user_id()?).await))
}

pub async fn save_shipping_address(
    State(state): State<AppState>,
    caller: Caller,
    Json(address): Json<ShippingAddress>,
) -> ApiResult<Json<Order>> {
    let order = state
        .lifecycle
        .save_shipping_address(caller.user_id()?, address)
        .await?;
    Ok(Json(order))
}

pub async fn save_payment_method(
    State(state): State<AppState>,
    caller: Caller,
    Json(method): Json<PaymentMethod>,
) -> ApiResult<Json<Order>> {
    let order = state
        .lifecycle
        .save_payment_method(caller.user_id()?, method)
        .await?;
    Ok(Json(order))
}

#[instrument(skip(state, caller, request))]
pub async fn place_order(
    State(state): State<AppState>,
    caller: Caller,
    request: Option<Json<PlaceOrderRequest>>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let order = state
        .lifecycle
        .place_order(caller.user_id()?, request.order_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    let order = state
        .lifecycle
        .get_order(caller.user_id()?, &order_id, caller.is_admin)
        .await?;
    Ok(Json(order))
}

pub async fn deliver_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Order>> {
    caller.require_admin()?;
    Ok(Json(state.lifecycle.deliver(&order_id).await?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
    request: Option<Json<CancelOrderRequest>>,
) -> ApiResult<Json<Order>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let order = state
        .lifecycle
        .cancel(caller.user_id()?, &order_id, caller.is_admin, request.reason)
        .await?;
    Ok(Json(order))
}

/// Record a payment taken outside a gateway (cash on delivery)
pub async fn record_manual_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
    Json(request): Json<ManualPaymentRequest>,
) -> ApiResult<Json<ApplyOutcome>> {
    caller.require_admin()?;
    let outcome = state
        .payments
        .record_manual_payment(&order_id, &request.reference, request.amount)
        .await?;
    Ok(Json(outcome))
}

// ----- Payments -------------------------------------------------------------

#[instrument(skip(state, caller, request), fields(provider = %request.provider))]
pub async fn initiate_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
    Json(request): Json<InitiatePaymentRequest>,
) -> ApiResult<Json<Initiation>> {
    let initiation = state
        .payments
        .initiate(caller.user_id()?, &order_id, &request.provider)
        .await
        .map_err(|e| {
            error!("Failed to initiate payment: {}", e);
            e
        })?;
    Ok(Json(initiation))
}

/// Poll the provider and apply a confirmation if there is one.
///
/// Every poll outcome, including `timed_out` and `manual_review`, is a 200:
/// the body says what happened.
pub async fn verify_payment(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<VerifyReport>> {
    let report = state
        .payments
        .verify(caller.user_id()?, &order_id, caller.is_admin)
        .await?;
    Ok(Json(report))
}

/// Provider callback.
///
/// The body is authenticated and applied in the background; the provider
/// always gets an immediate 200 for a known provider. Transient failures are
/// retried in the background with backoff.
#[instrument(skip(state, params, headers, body))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    if !state.payments.gateways().has_provider(&provider) {
        return Err(CheckoutError::NotFound {
            entity: "payment provider",
            id: provider,
        }
        .into());
    }

    let mut callback_headers = CallbackHeaders::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            callback_headers.insert(name.as_str(), value);
        }
    }
    // Paymob sends its signature as a query parameter
    if let Some(hmac) = params.get("hmac") {
        callback_headers.insert("hmac", hmac.clone());
    }

    let payments = state.payments.clone();
    tokio::spawn(async move {
        match payments.ingest_callback(&provider, &body, &callback_headers).await {
            Ok(CallbackOutcome::Processed { order_id, outcome }) => {
                info!(provider = %provider, order_id = %order_id, ?outcome, "Callback applied");
            }
            Ok(CallbackOutcome::Ignored) => {
                info!(provider = %provider, "Callback ignored");
            }
            Err(e) if e.requires_manual_review() => {
                warn!(provider = %provider, "Callback rejected: {}", e);
            }
            Err(e) => {
                error!(provider = %provider, "Callback processing failed: {}", e);
            }
        }
    });

    Ok(StatusCode::OK)
}
