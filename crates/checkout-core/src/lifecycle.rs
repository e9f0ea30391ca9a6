//! # Order Lifecycle Manager
//!
//! Owns the order store and drives orders from draft to delivery. Each order
//! sits behind its own async mutex; the indexes (pending draft per user,
//! orders per user, provider correlation ids) share one short-lived
//! `RwLock` that is never held across an await on an order or cart lock.
//!
//! Placing an order is the one operation that touches two entities. It locks
//! the user's cart first and the order second, validates everything up front,
//! then freezes the cart into the order and clears the cart with no fallible
//! step in between.

use crate::cart::CartStore;
use crate::error::{CheckoutError, CheckoutResult};
use crate::identity::Identity;
use crate::money::Currency;
use crate::notify::{self, Notification, Notifier};
use crate::order::{Order, OrderStatus, PaymentMethod, ShippingAddress};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

pub(crate) type OrderHandle = Arc<Mutex<Order>>;

#[derive(Default)]
struct OrderIndex {
    orders: HashMap<String, OrderHandle>,
    pending_by_user: HashMap<String, String>,
    by_user: HashMap<String, Vec<String>>,
    by_external: HashMap<(String, String), String>,
}

/// In-memory order storage
#[derive(Default)]
pub struct OrderStore {
    index: RwLock<OrderIndex>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn handle(&self, order_id: &str) -> Option<OrderHandle> {
        self.index.read().await.orders.get(order_id).cloned()
    }

    pub(crate) async fn require(&self, order_id: &str) -> CheckoutResult<OrderHandle> {
        self.handle(order_id)
            .await
            .ok_or_else(|| CheckoutError::order_not_found(order_id))
    }

    /// Snapshot of an order
    pub async fn get(&self, order_id: &str) -> Option<Order> {
        match self.handle(order_id).await {
            Some(handle) => Some(handle.lock().await.clone()),
            None => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The user's current draft, creating one if none exists
    async fn pending_or_create(&self, user_id: &str, currency: Currency) -> OrderHandle {
        let mut index = self.index.write().await;
        if let Some(handle) = index
            .pending_by_user
            .get(user_id)
            .and_then(|id| index.orders.get(id))
        {
            return Arc::clone(handle);
        }

        let order = Order::new_draft(user_id, currency);
        let id = order.id().to_string();
        let handle = Arc::new(Mutex::new(order));
        index.orders.insert(id.clone(), Arc::clone(&handle));
        index.pending_by_user.insert(user_id.to_string(), id.clone());
        index.by_user.entry(user_id.to_string()).or_default().push(id.clone());
        debug!(user_id, order_id = %id, "Created draft order");
        handle
    }

    async fn pending_for(&self, user_id: &str) -> Option<OrderHandle> {
        let index = self.index.read().await;
        index
            .pending_by_user
            .get(user_id)
            .and_then(|id| index.orders.get(id))
            .cloned()
    }

    async fn release_pending(&self, user_id: &str, order_id: &str) {
        let mut index = self.index.write().await;
        if index.pending_by_user.get(user_id).map(String::as_str) == Some(order_id) {
            index.pending_by_user.remove(user_id);
        }
    }

    async fn ids_for_user(&self, user_id: &str) -> Vec<String> {
        self.index
            .read()
            .await
            .by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remember which order a provider-side id belongs to
    pub(crate) async fn index_external(&self, provider: &str, external_order_id: &str, order_id: &str) {
        self.index.write().await.by_external.insert(
            (provider.to_string(), external_order_id.to_string()),
            order_id.to_string(),
        );
    }

    /// Order id for a provider-side id
    pub async fn resolve_external(&self, provider: &str, external_order_id: &str) -> Option<String> {
        self.index
            .read()
            .await
            .by_external
            .get(&(provider.to_string(), external_order_id.to_string()))
            .cloned()
    }
}

/// Owner-or-admin access check
pub(crate) fn authorize(order: &Order, user_id: &str, is_admin: bool) -> CheckoutResult<()> {
    if is_admin || order.is_owned_by(user_id) {
        return Ok(());
    }
    Err(CheckoutError::Forbidden {
        entity: "order",
        id: order.id().to_string(),
    })
}

/// Order lifecycle operations
pub struct OrderLifecycle {
    carts: Arc<CartStore>,
    orders: Arc<OrderStore>,
    notifier: Arc<dyn Notifier>,
    currency: Currency,
}

impl OrderLifecycle {
    pub fn new(carts: Arc<CartStore>, orders: Arc<OrderStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            carts,
            orders,
            notifier,
            currency: Currency::default(),
        }
    }

    /// Builder: currency new drafts start in
    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn orders(&self) -> &Arc<OrderStore> {
        &self.orders
    }

    pub fn carts(&self) -> &Arc<CartStore> {
        &self.carts
    }

    /// Save the shipping address on the user's draft, creating the draft if needed.
    /// The address state also becomes the cart's tax jurisdiction.
    #[instrument(skip(self, address))]
    pub async fn save_shipping_address(&self, user_id: &str, address: ShippingAddress) -> CheckoutResult<Order> {
        let jurisdiction = address.state.clone();
        let handle = self.orders.pending_or_create(user_id, self.currency).await;
        let order = {
            let mut order = handle.lock().await;
            order.set_shipping_address(address)?;
            order.clone()
        };

        self.carts
            .set_jurisdiction(&Identity::user(user_id), jurisdiction)
            .await?;
        info!(order_number = order.order_number(), "Shipping address saved");
        Ok(order)
    }

    /// Save the payment method on the user's draft
    #[instrument(skip(self, method))]
    pub async fn save_payment_method(&self, user_id: &str, method: PaymentMethod) -> CheckoutResult<Order> {
        let handle = self
            .orders
            .pending_for(user_id)
            .await
            .ok_or_else(|| CheckoutError::NotFound {
                entity: "pending order",
                id: user_id.to_string(),
            })?;

        let mut order = handle.lock().await;
        order.set_payment_method(method)?;
        info!(
            order_number = order.order_number(),
            provider = order.payment_method().and_then(PaymentMethod::provider).unwrap_or("offline"),
            "Payment method saved"
        );
        Ok(order.clone())
    }

    /// `pending → confirmed`: freeze the user's cart into the order and clear the cart.
    ///
    /// With no `order_id` the user's current draft is placed.
    #[instrument(skip(self))]
    pub async fn place_order(&self, user_id: &str, order_id: Option<&str>) -> CheckoutResult<Order> {
        let handle = match order_id {
            Some(id) => self.orders.require(id).await?,
            None => self
                .orders
                .pending_for(user_id)
                .await
                .ok_or_else(|| CheckoutError::NotFound {
                    entity: "pending order",
                    id: user_id.to_string(),
                })?,
        };

        // Cart first, then order
        let mut cart = self.carts.lock(&Identity::user(user_id)).await;
        let mut order = handle.lock().await;

        authorize(&order, user_id, false)?;
        order.ensure_placeable(cart.lines())?;

        order.place(cart.lines(), *cart.totals(), cart.currency());
        cart.clear_lines();
        self.carts.reprice(&mut cart);

        let placed = order.clone();
        drop(order);
        drop(cart);

        self.orders.release_pending(user_id, placed.id()).await;
        info!(
            order_number = placed.order_number(),
            total = placed.amount_due(),
            items = placed.item_count(),
            "Order placed"
        );
        notify::dispatch(&self.notifier, Notification::Confirmed(placed.clone()));
        Ok(placed)
    }

    /// The user's draft. A draft with no frozen items shows the live cart.
    pub async fn get_pending_order(&self, user_id: &str) -> Option<Order> {
        let handle = self.orders.pending_for(user_id).await?;
        let mut order = handle.lock().await.clone();
        if order.items().is_empty() {
            let cart = self.carts.get(&Identity::user(user_id)).await;
            order.preview(cart.lines(), *cart.totals());
        }
        Some(order)
    }

    /// Read an order; only its owner or an admin may
    pub async fn get_order(&self, user_id: &str, order_id: &str, is_admin: bool) -> CheckoutResult<Order> {
        let handle = self.orders.require(order_id).await?;
        let order = handle.lock().await;
        authorize(&order, user_id, is_admin)?;
        Ok(order.clone())
    }

    /// All orders of a user, newest first
    pub async fn list_orders(&self, user_id: &str) -> Vec<Order> {
        let mut orders = Vec::new();
        for id in self.orders.ids_for_user(user_id).await {
            if let Some(order) = self.orders.get(&id).await {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        orders
    }

    /// `paid → delivered`
    #[instrument(skip(self))]
    pub async fn deliver(&self, order_id: &str) -> CheckoutResult<Order> {
        let handle = self.orders.require(order_id).await?;
        let mut order = handle.lock().await;
        order.deliver()?;
        info!(order_number = order.order_number(), "Order delivered");
        Ok(order.clone())
    }

    /// Cancel an order that has not been delivered
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        user_id: &str,
        order_id: &str,
        is_admin: bool,
        reason: Option<String>,
    ) -> CheckoutResult<Order> {
        let handle = self.orders.require(order_id).await?;
        let (cancelled, was_pending) = {
            let mut order = handle.lock().await;
            authorize(&order, user_id, is_admin)?;
            let was_pending = order.status() == OrderStatus::Pending;
            order.cancel(reason)?;
            (order.clone(), was_pending)
        };

        if was_pending {
            self.orders
                .release_pending(cancelled.user_id(), cancelled.id())
                .await;
        }

        info!(
            order_number = cancelled.order_number(),
            reason = cancelled.cancellation_reason().unwrap_or(""),
            "Order cancelled"
        );
        Ok(cancelled)
    }
}
